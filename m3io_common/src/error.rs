//! Driver error types.
//!
//! Synchronous errors (`InvalidArgument`, `ResourceExhausted`, `Stopped`)
//! are returned directly by `enqueue` / `register`. Transport and
//! correlation failures happen on the worker thread and reach the client
//! through the request status; `PendingRequest::outcome` maps them back
//! into this enum.

use thiserror::Error;

/// Error types for driver operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// Argument rejected before any state change (bad address, request not submittable)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Interrupt bucket already holds its full set of registrations
    #[error("No interrupt slot left on U{unit} S{slot} (capacity {capacity})")]
    ResourceExhausted {
        /// Unit number
        unit: u8,
        /// Slot number
        slot: u8,
        /// Bucket capacity
        capacity: usize,
    },

    /// Blocking transport call failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Echoed correlation id did not match the assigned one
    #[error("Correlation id mismatch: assigned {assigned}, echoed {echoed}")]
    CorrelationMismatch {
        /// Id assigned by the worker
        assigned: u16,
        /// Id echoed in the response
        echoed: u16,
    },

    /// Hardware reported a non-zero error code in the response
    #[error("Device returned error code {0}")]
    DeviceError(u16),

    /// Interrupt event message too short to decode
    #[error("Malformed event message: {len} bytes (minimum {min})")]
    MalformedEvent {
        /// Received length
        len: usize,
        /// Minimum accepted length
        min: usize,
    },

    /// Event queue receive failed
    #[error("Event receive failed: {0}")]
    Receive(String),

    /// Event queue was closed
    #[error("Event queue closed")]
    QueueClosed,

    /// Request queue no longer accepts work
    #[error("Command worker stopped")]
    Stopped,

    /// Resource creation failed during setup
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Backend not found
    #[error("Backend not found: {0}")]
    BackendNotFound(String),
}

impl DriverError {
    /// True for errors delivered asynchronously through request completion.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::CorrelationMismatch { .. } | Self::DeviceError(_)
        )
    }
}
