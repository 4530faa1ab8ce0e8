//! Simulated sequence CPU module.
//!
//! Serves sequence device read/write commands from an in-memory device
//! map and echoes the correlation id. Faults can be injected through
//! [`SimulatedCpuHandle`] to exercise the error paths of the core.

use m3io_common::consts::{FORMAT_CODE_SEQ, MAIN_CODE_SEQ_DEVICE, MAX_SLOTS};
use m3io_common::error::DriverError;
use m3io_common::protocol::{Command, DeviceData, DeviceType, Response};
use m3io_common::transport::CommandTransport;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Response error code: no CPU module in the destination slot.
pub const ERR_NO_MODULE: u16 = 0x0001;

/// Response error code: command not understood by the CPU.
pub const ERR_UNSUPPORTED: u16 = 0x0002;

/// Response error code: device range runs past the last word address.
pub const ERR_ADDRESS_RANGE: u16 = 0x0003;

type WordKey = (u8, DeviceType, u32);

#[derive(Debug, Default)]
struct CpuState {
    /// Device words keyed by (dest slot, device, word address)
    memory: Mutex<HashMap<WordKey, u16>>,
    fail_next: AtomicU32,
    corrupt_next: AtomicU32,
    calls: AtomicU64,
}

/// Simulated CPU acting as the command channel.
pub struct SimulatedCpu {
    state: Arc<CpuState>,
    latency: Duration,
}

/// Test and tooling access to a running [`SimulatedCpu`].
#[derive(Debug, Clone)]
pub struct SimulatedCpuHandle {
    state: Arc<CpuState>,
}

impl SimulatedCpu {
    /// Create a CPU answering after `latency`.
    pub fn new(latency: Duration) -> Self {
        Self {
            state: Arc::new(CpuState::default()),
            latency,
        }
    }

    /// Handle sharing this CPU's memory and fault switches.
    pub fn handle(&self) -> SimulatedCpuHandle {
        SimulatedCpuHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn execute(&self, command: &Command) -> (u16, Vec<u16>) {
        if command.dest_slot == 0 || command.dest_slot > MAX_SLOTS {
            return (ERR_NO_MODULE, Vec::new());
        }
        if command.format_code != FORMAT_CODE_SEQ || command.main_code != MAIN_CODE_SEQ_DEVICE {
            return (ERR_UNSUPPORTED, Vec::new());
        }

        let dev = &command.device;
        let base = dev.top_dev_no;
        let span = dev.payload_words() as u32;
        if span > 0 && base.checked_add(span - 1).is_none() {
            debug!("{}: range past the last word address", command);
            return (ERR_ADDRESS_RANGE, Vec::new());
        }
        let mask = if dev.device.is_relay() { 0x0001 } else { 0xFFFF };
        let mut memory = self.state.memory.lock();
        match &dev.data {
            DeviceData::Read => {
                let words = (0..span)
                    .map(|i| {
                        memory
                            .get(&(command.dest_slot, dev.device, base + i))
                            .copied()
                            .unwrap_or(0)
                    })
                    .collect();
                (0, words)
            }
            DeviceData::Write(words) => {
                for (i, word) in (0..span).zip(words) {
                    memory.insert((command.dest_slot, dev.device, base + i), word & mask);
                }
                (0, Vec::new())
            }
        }
    }
}

impl CommandTransport for SimulatedCpu {
    fn name(&self) -> &'static str {
        super::BACKEND_NAME
    }

    fn call(&mut self, command: &Command) -> Result<Response, DriverError> {
        self.state.calls.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        if take_one(&self.state.fail_next) {
            debug!("Injected transport failure for com_id={}", command.com_id);
            return Err(DriverError::Transport("simulated channel failure".to_string()));
        }

        let (error_code, data) = self.execute(command);
        let mut com_id = command.com_id;
        if take_one(&self.state.corrupt_next) {
            com_id = com_id.wrapping_add(1);
            debug!("Injected echo mismatch: {} -> {}", command.com_id, com_id);
        }
        trace!("{} -> error_code={} words={}", command, error_code, data.len());

        Ok(Response {
            com_id,
            error_code,
            data,
        })
    }
}

/// Decrement a fault counter if it is armed.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl SimulatedCpuHandle {
    /// Read one device word directly.
    pub fn peek(&self, slot: u8, device: DeviceType, address: u32) -> u16 {
        self.state
            .memory
            .lock()
            .get(&(slot, device, address))
            .copied()
            .unwrap_or(0)
    }

    /// Store one device word directly.
    pub fn poke(&self, slot: u8, device: DeviceType, address: u32, value: u16) {
        self.state
            .memory
            .lock()
            .insert((slot, device, address), value);
    }

    /// Fail the next `count` calls with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.state.fail_next.store(count, Ordering::SeqCst);
    }

    /// Echo a wrong correlation id on the next call.
    pub fn corrupt_next_echo(&self) {
        self.state.corrupt_next.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of transport calls served so far.
    pub fn calls(&self) -> u64 {
        self.state.calls.load(Ordering::Relaxed)
    }
}
