//! # m3io Driver Library
//!
//! Driver core for backplane I/O modules: a serialized command channel
//! with request/response correlation, and an interrupt registration and
//! dispatch table.
//!
//! # Module Structure
//!
//! - [`request`] - Client-owned, reusable `PendingRequest` records
//! - [`queue`] - FIFO between client threads and the command worker
//! - [`sequence`] - Correlation id generator
//! - [`worker`] - The single consumer driving the command transport
//! - [`notifier`] - Completion delivery to request owners
//! - [`interrupt`] - Interrupt buckets, registration and dispatch threads
//! - [`backend_registry`] - Backend factory registration
//! - [`drivers`] - Backend implementations
//! - [`core`] - `DriverCore`, wiring a backend into both subsystems
//! - [`clients`] - Poll and watch clients run by the binary
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          m3io_driver                                 │
//! │  clients ──enqueue──► RequestQueue ──► CommandWorker ──► Transport   │
//! │     ▲                                      │                         │
//! │     └────── CompletionNotifier ◄───────────┘                         │
//! │                                                                      │
//! │  clients ──register──► InterruptRegistry ──► (unit, slot) buckets    │
//! │     ▲                                            │                   │
//! │     └──── wake ◄──── InterruptDispatcher ◄── EventQueue              │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod backend_registry;
pub mod clients;
pub mod core;
pub mod drivers;
pub mod interrupt;
pub mod notifier;
pub mod queue;
pub mod request;
pub mod sequence;
pub mod worker;

// Re-export key types for convenience
pub use crate::backend_registry::{Backend, BackendRegistry, EventInjector};
pub use crate::core::{CoreStats, DriverCore};
pub use crate::interrupt::{EventListener, InterruptRegistry, WakeSignal};
pub use crate::notifier::{CallbackQueue, CompletionNotifier, InlineResumer, Resumer};
pub use crate::queue::RequestQueue;
pub use crate::request::{PendingRequest, RequestOwner, RequestStatus};
pub use crate::worker::{CommandWorker, WorkerStats};
