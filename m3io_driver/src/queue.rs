//! Thread-safe FIFO of pending requests.
//!
//! Producers append under a mutex and signal a binary wake event; the
//! single command worker waits on the event and drains with `dequeue`.

use crate::request::PendingRequest;
use m3io_common::error::DriverError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Arc<PendingRequest>>,
    /// Wake event: set by `enqueue`/`close`, cleared by `wait_for_work`.
    signaled: bool,
    closed: bool,
}

/// FIFO shared between client threads and one command worker.
#[derive(Debug, Default)]
pub struct RequestQueue {
    state: Mutex<QueueState>,
    wake: Condvar,
}

impl RequestQueue {
    /// Create an empty, open queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request to the tail and wake the worker.
    ///
    /// # Errors
    /// - `DriverError::InvalidArgument` if the request has no valid command
    ///   or is already queued or in flight
    /// - `DriverError::Stopped` if the queue was closed
    pub fn enqueue(&self, request: &Arc<PendingRequest>) -> Result<(), DriverError> {
        request.submit()?;

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            request.cancel_submit();
            return Err(DriverError::Stopped);
        }
        state.pending.push_back(Arc::clone(request));
        state.signaled = true;
        drop(state);

        self.wake.notify_one();
        Ok(())
    }

    /// Pop the head without blocking.
    pub fn dequeue(&self) -> Option<Arc<PendingRequest>> {
        self.state.lock().pending.pop_front()
    }

    /// Block until the wake event is signaled, then clear it.
    ///
    /// Returns false once the queue is closed and fully drained.
    pub fn wait_for_work(&self) -> bool {
        let mut state = self.state.lock();
        while !state.signaled && !state.closed {
            self.wake.wait(&mut state);
        }
        state.signaled = false;
        !(state.closed && state.pending.is_empty())
    }

    /// Stop accepting requests and wake the worker so it can drain.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.signaled = true;
        drop(state);
        self.wake.notify_all();
    }

    /// True once `close` was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of queued requests (not counting the one in flight).
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestStatus;
    use m3io_common::protocol::{AccessType, Command, DeviceType};

    fn request(name: &str) -> Arc<PendingRequest> {
        let req = PendingRequest::new(name);
        req.set_command(Command::read(1, 3, DeviceType::DataRegister, AccessType::Word, 0, 1))
            .unwrap();
        req
    }

    #[test]
    fn dequeue_is_fifo() {
        let queue = RequestQueue::new();
        let a = request("a");
        let b = request("b");
        queue.enqueue(&a).unwrap();
        queue.enqueue(&b).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap().name(), "a");
        assert_eq!(queue.dequeue().unwrap().name(), "b");
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn request_without_command_is_invalid() {
        let queue = RequestQueue::new();
        let req = PendingRequest::new("empty");
        assert!(matches!(
            queue.enqueue(&req),
            Err(DriverError::InvalidArgument(_))
        ));
        assert!(queue.is_empty());
    }

    #[test]
    fn double_enqueue_is_rejected() {
        let queue = RequestQueue::new();
        let req = request("a");
        queue.enqueue(&req).unwrap();
        assert!(matches!(
            queue.enqueue(&req),
            Err(DriverError::InvalidArgument(_))
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn closed_queue_refuses_and_leaves_request_idle() {
        let queue = RequestQueue::new();
        queue.close();
        let req = request("late");
        assert_eq!(queue.enqueue(&req), Err(DriverError::Stopped));
        assert_eq!(req.status(), RequestStatus::Idle);
        assert!(!queue.wait_for_work());
    }

    #[test]
    fn wake_event_is_consumed() {
        let queue = RequestQueue::new();
        queue.enqueue(&request("a")).unwrap();
        assert!(queue.wait_for_work());
        queue.close();
        // Still one queued item to drain after close.
        assert!(queue.wait_for_work());
        queue.dequeue();
        assert!(!queue.wait_for_work());
    }
}
