//! In-process interrupt controller.
//!
//! Event queues are `std::sync::mpsc` channels carrying encoded event
//! messages. Closing a queue drops its sender, which ends the blocking
//! receive with `QueueClosed`.

use crate::backend_registry::EventInjector;
use m3io_common::error::DriverError;
use m3io_common::event::{IoAddress, IoEventMessage};
use m3io_common::transport::{EventQueue, InterruptController, QueueHandle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info};

#[derive(Default)]
struct ControllerState {
    next_handle: i32,
    queues: HashMap<QueueHandle, Sender<Vec<u8>>>,
    /// Enabled sources in enable order
    enabled: Vec<(IoAddress, QueueHandle)>,
}

/// Simulated interrupt controller.
#[derive(Default)]
pub struct SimulatedInterrupts {
    state: Mutex<ControllerState>,
}

impl SimulatedInterrupts {
    /// Create a controller with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push raw bytes into a queue, bypassing encoding.
    ///
    /// # Errors
    /// `DriverError::InvalidArgument` if the queue does not exist,
    /// `DriverError::QueueClosed` if its receiver is gone.
    pub fn inject_raw(&self, queue: QueueHandle, bytes: &[u8]) -> Result<(), DriverError> {
        let state = self.state.lock();
        let sender = state
            .queues
            .get(&queue)
            .ok_or_else(|| DriverError::InvalidArgument(format!("unknown queue {queue}")))?;
        sender
            .send(bytes.to_vec())
            .map_err(|_| DriverError::QueueClosed)
    }

    /// Queue handles currently open.
    pub fn open_queues(&self) -> Vec<QueueHandle> {
        let mut handles: Vec<_> = self.state.lock().queues.keys().copied().collect();
        handles.sort();
        handles
    }

    /// Number of enable calls accepted so far.
    pub fn enable_count(&self) -> usize {
        self.state.lock().enabled.len()
    }
}

impl InterruptController for SimulatedInterrupts {
    fn name(&self) -> &'static str {
        super::BACKEND_NAME
    }

    fn open_queue(&self) -> Result<(QueueHandle, Box<dyn EventQueue>), DriverError> {
        let (sender, receiver) = mpsc::channel();
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = QueueHandle(state.next_handle);
        state.queues.insert(handle, sender);
        debug!("Opened simulated event queue {}", handle);
        Ok((handle, Box::new(ChannelEventQueue { receiver })))
    }

    fn enable(&self, address: IoAddress, queue: QueueHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(&queue) {
            return Err(DriverError::Transport(format!(
                "enable ({address}) on unknown queue {queue}"
            )));
        }
        if !state.enabled.contains(&(address, queue)) {
            state.enabled.push((address, queue));
        }
        info!("Interrupt ({}) enabled on {}", address, queue);
        Ok(())
    }

    fn close_queue(&self, queue: QueueHandle) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        state.enabled.retain(|(_, q)| *q != queue);
        match state.queues.remove(&queue) {
            Some(_) => Ok(()),
            None => Err(DriverError::InvalidArgument(format!("unknown queue {queue}"))),
        }
    }
}

impl EventInjector for SimulatedInterrupts {
    fn enabled(&self) -> Vec<IoAddress> {
        self.state.lock().enabled.iter().map(|(a, _)| *a).collect()
    }

    fn raise(&self, address: IoAddress) -> Result<usize, DriverError> {
        let state = self.state.lock();
        let message = IoEventMessage::encode(address);
        let mut delivered = 0;
        for (_, queue) in state.enabled.iter().filter(|(a, _)| *a == address) {
            if let Some(sender) = state.queues.get(queue) {
                if sender.send(message.to_vec()).is_ok() {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }
}

/// Receive side of a simulated event queue.
struct ChannelEventQueue {
    receiver: Receiver<Vec<u8>>,
}

impl EventQueue for ChannelEventQueue {
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, DriverError> {
        let message = self.receiver.recv().map_err(|_| DriverError::QueueClosed)?;
        let len = message.len().min(buf.len());
        buf[..len].copy_from_slice(&message[..len]);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raise_reaches_enabled_queue_only() {
        let ctl = SimulatedInterrupts::new();
        let (q1, mut rx1) = ctl.open_queue().unwrap();
        let (_q2, _rx2) = ctl.open_queue().unwrap();
        let addr = IoAddress::new(0, 2, 5);
        ctl.enable(addr, q1).unwrap();

        assert_eq!(ctl.raise(addr).unwrap(), 1);
        assert_eq!(ctl.raise(IoAddress::new(0, 2, 6)).unwrap(), 0);

        let mut buf = [0u8; 16];
        let len = rx1.receive(&mut buf).unwrap();
        assert_eq!(IoEventMessage::decode(&buf[..len]), Ok(addr));
    }

    #[test]
    fn close_ends_receive() {
        let ctl = SimulatedInterrupts::new();
        let (q, mut rx) = ctl.open_queue().unwrap();
        ctl.close_queue(q).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(&mut buf), Err(DriverError::QueueClosed));
        assert!(ctl.close_queue(q).is_err());
    }

    #[test]
    fn enable_on_unknown_queue_fails() {
        let ctl = SimulatedInterrupts::new();
        assert!(ctl.enable(IoAddress::new(0, 1, 1), QueueHandle(42)).is_err());
    }
}
