//! Per-bucket interrupt dispatcher thread.

use super::registry::BucketTable;
use m3io_common::error::DriverError;
use m3io_common::event::{IO_EVENT_MSG_LEN, IoEventMessage};
use m3io_common::transport::{EventQueue, QueueHandle};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Pause after a failed receive before retrying.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Receive buffer size; larger messages are truncated by the queue.
const RECEIVE_BUF_LEN: usize = IO_EVENT_MSG_LEN * 4;

/// Handle to one dispatcher thread.
pub struct InterruptDispatcher {
    queue: QueueHandle,
    handle: Option<JoinHandle<()>>,
}

impl InterruptDispatcher {
    /// Spawn the dispatcher serving `events` for bucket (unit, slot).
    pub(crate) fn spawn(
        unit: u8,
        slot: u8,
        queue: QueueHandle,
        events: Box<dyn EventQueue>,
        table: Arc<BucketTable>,
    ) -> Result<Self, DriverError> {
        let name = format!("m3io-irq-U{unit}S{slot}");
        let dispatch = DispatchLoop {
            events,
            table,
            label: name.clone(),
        };
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || dispatch.run())
            .map_err(|e| {
                DriverError::InitFailed(format!("dispatcher thread for U{unit} S{slot}: {e}"))
            })?;

        debug!("Dispatcher for U{} S{} listening on {}", unit, slot, queue);
        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// Queue this dispatcher receives from.
    pub fn queue(&self) -> QueueHandle {
        self.queue
    }

    /// Wait for the thread to exit. The queue must have been closed first.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Dispatcher thread for {} panicked", self.queue);
            }
        }
    }
}

struct DispatchLoop {
    events: Box<dyn EventQueue>,
    table: Arc<BucketTable>,
    label: String,
}

impl DispatchLoop {
    fn run(mut self) {
        let mut buf = [0u8; RECEIVE_BUF_LEN];
        loop {
            let len = match self.events.receive(&mut buf) {
                Ok(len) => len.min(buf.len()),
                Err(DriverError::QueueClosed) => break,
                Err(e) => {
                    error!("{}: {}", self.label, e);
                    self.table
                        .counters
                        .receive_errors
                        .fetch_add(1, Ordering::Relaxed);
                    thread::sleep(RECEIVE_RETRY_DELAY);
                    continue;
                }
            };

            match IoEventMessage::decode(&buf[..len]) {
                Ok(address) => {
                    self.table.dispatch(address);
                }
                Err(e) => {
                    warn!("{}: dropping event: {}", self.label, e);
                    self.table.counters.malformed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        debug!("{}: event queue closed", self.label);
    }
}
