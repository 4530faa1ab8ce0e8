//! Prelude module for common re-exports.
//!
//! ```rust
//! use m3io_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, DriverConfig, LogLevel, SharedConfig};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{IO_INTR_CAPACITY, MAX_SLOTS, MAX_UNITS};

// ─── Errors ─────────────────────────────────────────────────────────
pub use crate::error::DriverError;

// ─── Protocol ───────────────────────────────────────────────────────
pub use crate::event::{IoAddress, IoEventMessage};
pub use crate::protocol::{AccessType, Command, DeviceData, DeviceType, Response};

// ─── Transport ──────────────────────────────────────────────────────
pub use crate::transport::{CommandTransport, EventQueue, InterruptController, QueueHandle};
