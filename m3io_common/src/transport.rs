//! Transport traits consumed by the driver core.
//!
//! This module defines:
//! - `CommandTransport` trait - The single blocking command channel
//! - `InterruptController` trait - Event queue creation and interrupt enabling
//! - `EventQueue` trait - Blocking receive side of one event queue
//! - `QueueHandle` - Identifier binding an enabled interrupt to a queue
//!
//! Backends (simulation, kernel message queues, device files) implement
//! these; the core never touches a device handle directly.

use crate::error::DriverError;
use crate::event::IoAddress;
use crate::protocol::{Command, Response};
use std::fmt;

/// Identifier of an event queue, as passed to `InterruptController::enable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueHandle(pub i32);

impl fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}", self.0)
    }
}

/// The hardware command channel.
///
/// Accepts one outstanding command at a time. The driver core moves the
/// transport into its worker thread, so `call` is never entered
/// concurrently.
///
/// # Timing Contracts
///
/// | Operation | Max Duration | Constraint |
/// |-----------|--------------|------------|
/// | `call()` | `command.timeout_s` | Blocking, bounded by the channel |
pub trait CommandTransport: Send {
    /// Returns the transport's identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Issue one command and block until its response arrives.
    ///
    /// The returned `Response::com_id` must echo `command.com_id`.
    ///
    /// # Errors
    /// Return `DriverError::Transport` if the channel call itself fails.
    fn call(&mut self, command: &Command) -> Result<Response, DriverError>;
}

/// Blocking receive side of an event queue.
pub trait EventQueue: Send {
    /// Block until one event message arrives and copy it into `buf`.
    ///
    /// Returns the number of bytes received.
    ///
    /// # Errors
    /// - `DriverError::QueueClosed` once the queue was closed
    /// - `DriverError::Receive` for any other receive failure
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, DriverError>;
}

/// Interrupt subscription primitives.
///
/// # Lifecycle
///
/// 1. `open_queue()` - Once per (unit, slot) bucket
/// 2. `enable()` - Bind an interrupt source to the bucket's queue
/// 3. `close_queue()` - On shutdown; pending `receive` calls return `QueueClosed`
pub trait InterruptController: Send + Sync {
    /// Returns the controller's identifier.
    fn name(&self) -> &'static str;

    /// Create a new event queue.
    ///
    /// # Errors
    /// Return `DriverError::InitFailed` if the queue cannot be created.
    fn open_queue(&self) -> Result<(QueueHandle, Box<dyn EventQueue>), DriverError>;

    /// Enable interrupts from `address`, delivering them to `queue`.
    fn enable(&self, address: IoAddress, queue: QueueHandle) -> Result<(), DriverError>;

    /// Close a queue previously returned by `open_queue`.
    fn close_queue(&self, queue: QueueHandle) -> Result<(), DriverError>;
}
