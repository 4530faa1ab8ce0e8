//! Completion delivery.
//!
//! The [`CompletionNotifier`] finalizes a request and hands its owner to a
//! [`Resumer`], the facility that actually runs the client's continuation.
//! Two resumers are provided: [`InlineResumer`] runs the owner on the
//! command worker thread, [`CallbackQueue`] runs owners in order on one
//! dedicated low-priority thread so a slow client never stalls the channel.

use crate::request::{PendingRequest, RequestOwner, RequestStatus};
use m3io_common::error::DriverError;
use m3io_common::protocol::Response;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Facility that resumes request owners.
pub trait Resumer: Send + Sync {
    /// Arrange for `owner.resume(status)` to run.
    fn schedule(&self, owner: Arc<dyn RequestOwner>, status: RequestStatus);
}

/// Runs the owner immediately on the calling (worker) thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineResumer;

impl Resumer for InlineResumer {
    fn schedule(&self, owner: Arc<dyn RequestOwner>, status: RequestStatus) {
        owner.resume(status);
    }
}

type Job = (Arc<dyn RequestOwner>, RequestStatus);

/// Low-priority callback thread draining owner resumptions in order.
pub struct CallbackQueue {
    sender: Mutex<Option<Sender<Job>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CallbackQueue {
    /// Thread name of the callback task.
    pub const THREAD_NAME: &'static str = "m3io-cb-low";

    /// Spawn the callback thread.
    ///
    /// # Errors
    /// `DriverError::InitFailed` if the thread cannot be created.
    pub fn start() -> Result<Arc<Self>, DriverError> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(Self::THREAD_NAME.to_string())
            .spawn(move || {
                for (owner, status) in receiver {
                    owner.resume(status);
                }
                debug!("Callback queue drained");
            })
            .map_err(|e| DriverError::InitFailed(format!("callback thread: {e}")))?;

        info!("Callback queue started");
        Ok(Arc::new(Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }))
    }

    /// Stop accepting jobs, run what is queued, and join the thread.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!("Callback thread panicked");
            }
        }
    }
}

impl Resumer for CallbackQueue {
    fn schedule(&self, owner: Arc<dyn RequestOwner>, status: RequestStatus) {
        let rejected = match self.sender.lock().as_ref() {
            Some(sender) => sender
                .send((owner, status))
                .err()
                .map(|mpsc::SendError((owner, _))| owner),
            None => Some(owner),
        };
        // The owner must still be resumed exactly once.
        if let Some(owner) = rejected {
            warn!("Callback queue stopped, resuming owner inline");
            owner.resume(status);
        }
    }
}

impl Drop for CallbackQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Finalizes requests and hands their owners to the resumer.
#[derive(Clone)]
pub struct CompletionNotifier {
    resumer: Arc<dyn Resumer>,
}

impl CompletionNotifier {
    /// Notifier delivering through `resumer`.
    pub fn new(resumer: Arc<dyn Resumer>) -> Self {
        Self { resumer }
    }

    /// Notifier resuming owners on the worker thread.
    pub fn inline() -> Self {
        Self::new(Arc::new(InlineResumer))
    }

    /// Finalize `request` with `status` and deliver its completion.
    ///
    /// Returns false (and delivers nothing) if the request was not pending.
    pub fn complete(
        &self,
        request: &PendingRequest,
        status: RequestStatus,
        response: Option<Response>,
        transport_error: Option<String>,
    ) -> bool {
        if !request.finish(status, response, transport_error) {
            warn!("{}: completion for a request that is not pending", request.name());
            return false;
        }
        if let Some(owner) = request.owner() {
            self.resumer.schedule(Arc::clone(owner), status);
        }
        true
    }
}
