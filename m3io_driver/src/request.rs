//! Client-owned request/response records.
//!
//! A [`PendingRequest`] is created once per client and reused for every
//! command cycle: fill the command, enqueue, receive the completion,
//! inspect the response, refill, enqueue again. The driver core only
//! borrows it (through an `Arc`) while it is queued or in flight; during
//! that window the owner cannot modify or resubmit it.

use m3io_common::error::DriverError;
use m3io_common::protocol::{Command, Response};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Never submitted
    Idle,
    /// Queued or in flight
    Pending,
    /// Transport call succeeded and the echoed id matched
    Success,
    /// Transport call failed
    TransportError,
    /// Echoed id did not match; response payload is untrustworthy
    CorrelationError,
}

impl RequestStatus {
    /// True once the worker has finalized the request.
    pub const fn is_finished(self) -> bool {
        matches!(
            self,
            Self::Success | Self::TransportError | Self::CorrelationError
        )
    }
}

/// Client reference resumed when a request finishes.
///
/// Called exactly once per enqueue, after the status is final, from the
/// thread selected by the configured [`Resumer`](crate::notifier::Resumer).
pub trait RequestOwner: Send + Sync {
    /// Resume the client.
    fn resume(&self, status: RequestStatus);
}

#[derive(Debug)]
struct Exchange {
    command: Option<Command>,
    response: Response,
    status: RequestStatus,
    assigned_id: u16,
    transport_error: Option<String>,
    completions: u64,
}

/// Reusable request/response record.
pub struct PendingRequest {
    name: String,
    owner: Option<Arc<dyn RequestOwner>>,
    exchange: Mutex<Exchange>,
    finished: Condvar,
}

impl PendingRequest {
    /// Create a request without an owner callback; completion is observed
    /// through [`wait`](Self::wait) / [`status`](Self::status).
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::build(name.into(), None)
    }

    /// Create a request whose owner is resumed on every completion.
    pub fn with_owner(name: impl Into<String>, owner: Arc<dyn RequestOwner>) -> Arc<Self> {
        Self::build(name.into(), Some(owner))
    }

    fn build(name: String, owner: Option<Arc<dyn RequestOwner>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            owner,
            exchange: Mutex::new(Exchange {
                command: None,
                response: Response::default(),
                status: RequestStatus::Idle,
                assigned_id: 0,
                transport_error: None,
                completions: 0,
            }),
            finished: Condvar::new(),
        })
    }

    /// Name of the owning client.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current status.
    pub fn status(&self) -> RequestStatus {
        self.exchange.lock().status
    }

    /// Number of completions delivered so far.
    pub fn completions(&self) -> u64 {
        self.exchange.lock().completions
    }

    /// Replace the command for the next cycle.
    ///
    /// # Errors
    /// `DriverError::InvalidArgument` while the request is queued or in flight.
    pub fn set_command(&self, command: Command) -> Result<(), DriverError> {
        let mut ex = self.exchange.lock();
        if ex.status == RequestStatus::Pending {
            return Err(self.busy());
        }
        ex.command = Some(command);
        Ok(())
    }

    /// Edit the current command in place (e.g., refill a write payload).
    ///
    /// # Errors
    /// `DriverError::InvalidArgument` while in flight or when no command is set.
    pub fn modify_command<F>(&self, edit: F) -> Result<(), DriverError>
    where
        F: FnOnce(&mut Command),
    {
        let mut ex = self.exchange.lock();
        if ex.status == RequestStatus::Pending {
            return Err(self.busy());
        }
        let command = ex.command.as_mut().ok_or_else(|| {
            DriverError::InvalidArgument(format!("{}: no command set", self.name))
        })?;
        edit(command);
        Ok(())
    }

    /// Copy of the current command.
    pub fn command(&self) -> Option<Command> {
        self.exchange.lock().command.clone()
    }

    /// Raw copy of the last response, whatever the status.
    ///
    /// After `CorrelationError` the payload must not be trusted; prefer
    /// [`outcome`](Self::outcome).
    pub fn response(&self) -> Response {
        self.exchange.lock().response.clone()
    }

    /// Result of the last finished cycle.
    ///
    /// # Errors
    /// - `InvalidArgument` if the request is idle or still pending
    /// - `Transport` / `CorrelationMismatch` for failed cycles
    /// - `DeviceError` when the hardware reported a non-zero error code
    pub fn outcome(&self) -> Result<Response, DriverError> {
        let ex = self.exchange.lock();
        match ex.status {
            RequestStatus::Idle => Err(DriverError::InvalidArgument(format!(
                "{}: never submitted",
                self.name
            ))),
            RequestStatus::Pending => Err(self.busy()),
            RequestStatus::TransportError => Err(DriverError::Transport(
                ex.transport_error
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
            )),
            RequestStatus::CorrelationError => Err(DriverError::CorrelationMismatch {
                assigned: ex.assigned_id,
                echoed: ex.response.com_id,
            }),
            RequestStatus::Success => {
                ex.response.check()?;
                Ok(ex.response.clone())
            }
        }
    }

    /// Block until the current cycle finishes. Returns immediately when
    /// nothing is pending.
    pub fn wait(&self) -> RequestStatus {
        let mut ex = self.exchange.lock();
        while ex.status == RequestStatus::Pending {
            self.finished.wait(&mut ex);
        }
        ex.status
    }

    /// Like [`wait`](Self::wait) with an upper bound. `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<RequestStatus> {
        let deadline = Instant::now() + timeout;
        let mut ex = self.exchange.lock();
        while ex.status == RequestStatus::Pending {
            if self.finished.wait_until(&mut ex, deadline).timed_out()
                && ex.status == RequestStatus::Pending
            {
                return None;
            }
        }
        Some(ex.status)
    }

    /// Mark the request pending. Rejects requests that cannot be submitted.
    pub(crate) fn submit(&self) -> Result<(), DriverError> {
        let mut ex = self.exchange.lock();
        if ex.status == RequestStatus::Pending {
            return Err(self.busy());
        }
        let command = ex.command.as_ref().ok_or_else(|| {
            DriverError::InvalidArgument(format!("{}: no command set", self.name))
        })?;
        command.validate()?;
        ex.status = RequestStatus::Pending;
        ex.transport_error = None;
        Ok(())
    }

    /// Undo `submit` when the queue refused the request.
    pub(crate) fn cancel_submit(&self) {
        let mut ex = self.exchange.lock();
        if ex.status == RequestStatus::Pending {
            ex.status = RequestStatus::Idle;
        }
    }

    /// Stamp the correlation id and return the frame to transmit.
    pub(crate) fn stamp(&self, id: u16) -> Option<Command> {
        let mut ex = self.exchange.lock();
        ex.assigned_id = id;
        let command = ex.command.as_mut()?;
        command.com_id = id;
        Some(command.clone())
    }

    /// Finalize the cycle. Returns false if the request was not pending,
    /// in which case no completion may be delivered.
    pub(crate) fn finish(
        &self,
        status: RequestStatus,
        response: Option<Response>,
        transport_error: Option<String>,
    ) -> bool {
        let mut ex = self.exchange.lock();
        if ex.status != RequestStatus::Pending || !status.is_finished() {
            return false;
        }
        if let Some(response) = response {
            ex.response = response;
        }
        ex.transport_error = transport_error;
        ex.status = status;
        ex.completions += 1;
        drop(ex);
        self.finished.notify_all();
        true
    }

    pub(crate) fn owner(&self) -> Option<&Arc<dyn RequestOwner>> {
        self.owner.as_ref()
    }

    fn busy(&self) -> DriverError {
        DriverError::InvalidArgument(format!("{}: request already queued or in flight", self.name))
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("has_owner", &self.owner.is_some())
            .finish()
    }
}
