//! Backend implementations.
//!
//! - [`simulation`] - In-process CPU module and interrupt controller
//! - [`msgq`] - Simulation with System V message queues as event queues (Linux)
//!
//! # Adding New Backends
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `CommandTransport` and `InterruptController` from `m3io_common::transport`
//! 3. Register the factory in [`register_all_backends`]

#[cfg(target_os = "linux")]
pub mod msgq;
pub mod simulation;

use crate::backend_registry::BackendRegistry;

/// Register all built-in backends.
pub fn register_all_backends(registry: &mut BackendRegistry) {
    registry.register(simulation::BACKEND_NAME, simulation::create_backend);

    #[cfg(target_os = "linux")]
    registry.register(msgq::BACKEND_NAME, msgq::create_backend);
}
