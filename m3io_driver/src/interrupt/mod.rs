//! Interrupt registration and dispatch.
//!
//! Clients register a listener per (unit, slot, channel). Each (unit, slot)
//! gets its own event queue and dispatcher thread on first registration;
//! the dispatcher decodes incoming event messages and wakes every listener
//! registered on the message's address.

mod dispatcher;
mod listener;
mod registry;

pub use dispatcher::InterruptDispatcher;
pub use listener::{EventListener, WakeSignal};
pub use registry::{DispatchStats, InterruptBucket, InterruptChannel, InterruptRegistry};
