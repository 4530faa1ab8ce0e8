//! Simulation backend.
//!
//! Runs the driver core without hardware: a simulated sequence CPU serves
//! commands and an in-process controller delivers interrupt events.

mod cpu;
mod interrupts;

pub use cpu::{ERR_ADDRESS_RANGE, ERR_NO_MODULE, ERR_UNSUPPORTED, SimulatedCpu, SimulatedCpuHandle};
pub use interrupts::SimulatedInterrupts;

use crate::backend_registry::Backend;
use m3io_common::config::DriverConfig;
use m3io_common::error::DriverError;
use std::sync::Arc;
use std::time::Duration;

/// Registry name of this backend.
pub const BACKEND_NAME: &str = "simulation";

/// Factory function to create a simulation backend.
pub fn create_backend(config: &DriverConfig) -> Result<Backend, DriverError> {
    let cpu = SimulatedCpu::new(Duration::from_micros(config.simulation.latency_us));
    let interrupts = Arc::new(SimulatedInterrupts::new());
    Ok(Backend {
        transport: Box::new(cpu),
        interrupts: interrupts.clone(),
        injector: Some(interrupts),
    })
}
