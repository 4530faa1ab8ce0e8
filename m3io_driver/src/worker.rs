//! Command worker: the single consumer of a command channel.
//!
//! One dedicated thread per physical channel drains the [`RequestQueue`],
//! stamps each request with the next correlation id, performs the
//! blocking transport call and completes the request before touching the
//! next one. The transport is moved into the thread, so at most one call
//! is ever in flight.
//!
//! A transport call that panics completes its request with
//! `TransportError` and the worker carries on. If the thread dies anyway,
//! the queue is closed and everything still queued is completed, so
//! producers see `Stopped` instead of waiting forever.

use crate::notifier::CompletionNotifier;
use crate::queue::RequestQueue;
use crate::request::{PendingRequest, RequestStatus};
use crate::sequence::SequenceGenerator;
use m3io_common::error::DriverError;
use m3io_common::protocol::Response;
use m3io_common::transport::CommandTransport;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Counters shared between the worker thread and its handle.
#[derive(Debug, Default)]
struct WorkerShared {
    completed: AtomicU64,
    succeeded: AtomicU64,
    transport_errors: AtomicU64,
    correlation_errors: AtomicU64,
    last_id: AtomicU16,
    trace_requests: AtomicBool,
}

/// Point-in-time copy of the worker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Requests completed (any status)
    pub completed: u64,
    /// Completed with `Success`
    pub succeeded: u64,
    /// Completed with `TransportError`
    pub transport_errors: u64,
    /// Completed with `CorrelationError`
    pub correlation_errors: u64,
    /// Last correlation id issued
    pub last_id: u16,
}

/// Handle to a running command worker thread.
pub struct CommandWorker {
    queue: Arc<RequestQueue>,
    shared: Arc<WorkerShared>,
    handle: Option<JoinHandle<()>>,
    transport_name: &'static str,
}

impl CommandWorker {
    /// Thread name of the worker.
    pub const THREAD_NAME: &'static str = "m3io-cmd";

    /// Spawn a worker owning `transport`.
    ///
    /// # Errors
    /// `DriverError::InitFailed` if the thread cannot be created.
    pub fn spawn(
        transport: Box<dyn CommandTransport>,
        notifier: CompletionNotifier,
    ) -> Result<Self, DriverError> {
        Self::spawn_with_sequence(transport, notifier, SequenceGenerator::new())
    }

    /// Spawn a worker whose ids continue from `sequence`.
    pub(crate) fn spawn_with_sequence(
        transport: Box<dyn CommandTransport>,
        notifier: CompletionNotifier,
        sequence: SequenceGenerator,
    ) -> Result<Self, DriverError> {
        let queue = Arc::new(RequestQueue::new());
        let shared = Arc::new(WorkerShared::default());
        let transport_name = transport.name();

        let worker = WorkerLoop {
            queue: Arc::clone(&queue),
            shared: Arc::clone(&shared),
            transport,
            sequence,
            notifier,
        };

        let handle = thread::Builder::new()
            .name(Self::THREAD_NAME.to_string())
            .spawn(move || worker.run())
            .map_err(|e| DriverError::InitFailed(format!("command worker thread: {e}")))?;

        info!("Command worker started on transport '{}'", transport_name);
        Ok(Self {
            queue,
            shared,
            handle: Some(handle),
            transport_name,
        })
    }

    /// Submit a request. Completion is delivered later, exactly once.
    ///
    /// # Errors
    /// - `DriverError::InvalidArgument` if the request cannot be submitted
    /// - `DriverError::Stopped` after shutdown
    pub fn enqueue(&self, request: &Arc<PendingRequest>) -> Result<(), DriverError> {
        self.queue.enqueue(request)
    }

    /// The queue feeding this worker.
    pub fn queue(&self) -> Arc<RequestQueue> {
        Arc::clone(&self.queue)
    }

    /// Name of the transport the worker drives.
    pub fn transport_name(&self) -> &'static str {
        self.transport_name
    }

    /// Log every outgoing frame at info level.
    pub fn set_trace_requests(&self, enabled: bool) {
        self.shared.trace_requests.store(enabled, Ordering::Relaxed);
        info!(
            "Request tracing {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    /// Current counters.
    pub fn stats(&self) -> WorkerStats {
        let s = &self.shared;
        WorkerStats {
            completed: s.completed.load(Ordering::Relaxed),
            succeeded: s.succeeded.load(Ordering::Relaxed),
            transport_errors: s.transport_errors.load(Ordering::Relaxed),
            correlation_errors: s.correlation_errors.load(Ordering::Relaxed),
            last_id: s.last_id.load(Ordering::Relaxed),
        }
    }

    /// Close the queue, let the worker complete everything already queued,
    /// and join it.
    pub fn shutdown(&mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Command worker thread panicked");
            } else {
                info!("Command worker stopped after {} requests", self.stats().completed);
            }
        }
    }
}

impl Drop for CommandWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// State owned by the worker thread.
struct WorkerLoop {
    queue: Arc<RequestQueue>,
    shared: Arc<WorkerShared>,
    transport: Box<dyn CommandTransport>,
    sequence: SequenceGenerator,
    notifier: CompletionNotifier,
}

impl WorkerLoop {
    fn run(mut self) {
        while self.queue.wait_for_work() {
            while let Some(request) = self.queue.dequeue() {
                self.service(&request);
            }
        }
        debug!("Command worker loop exited");
    }

    /// One full round trip. Completion is initiated before returning, so
    /// completions start in submission order.
    fn service(&mut self, request: &PendingRequest) {
        let id = self.sequence.next_id();
        self.shared.last_id.store(id, Ordering::Relaxed);

        let Some(command) = request.stamp(id) else {
            warn!("{}: dequeued without a command", request.name());
            self.finish(request, RequestStatus::TransportError, None, Some("no command".into()));
            return;
        };

        if self.shared.trace_requests.load(Ordering::Relaxed) {
            info!("{}: {}", request.name(), command);
        } else {
            debug!("{}: issuing id={}", request.name(), id);
        }

        let transport = &mut self.transport;
        let result = panic::catch_unwind(AssertUnwindSafe(|| transport.call(&command)))
            .unwrap_or_else(|payload| {
                Err(DriverError::Transport(format!(
                    "transport panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

        match result {
            Err(e) => {
                error!("{}: transport call failed: {}", request.name(), e);
                let message = match e {
                    DriverError::Transport(message) => message,
                    other => other.to_string(),
                };
                self.finish(request, RequestStatus::TransportError, None, Some(message));
            }
            Ok(response) if response.com_id != id => {
                error!(
                    "{}: com_id does not match (assigned {}, echoed {})",
                    request.name(),
                    id,
                    response.com_id
                );
                self.finish(request, RequestStatus::CorrelationError, Some(response), None);
            }
            Ok(response) => {
                debug!(
                    "{}: id={} error_code={} words={}",
                    request.name(),
                    id,
                    response.error_code,
                    response.data.len()
                );
                self.finish(request, RequestStatus::Success, Some(response), None);
            }
        }
    }

    fn finish(
        &self,
        request: &PendingRequest,
        status: RequestStatus,
        response: Option<Response>,
        transport_error: Option<String>,
    ) {
        let counter = match status {
            RequestStatus::Success => &self.shared.succeeded,
            RequestStatus::TransportError => &self.shared.transport_errors,
            _ => &self.shared.correlation_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.shared.completed.fetch_add(1, Ordering::Relaxed);
        self.notifier
            .complete(request, status, response, transport_error);
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        if !thread::panicking() {
            return;
        }
        error!("Command worker thread died, failing queued requests");
        self.queue.close();
        while let Some(request) = self.queue.dequeue() {
            self.finish(
                &request,
                RequestStatus::TransportError,
                None,
                Some("command worker stopped".to_string()),
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload")
}
