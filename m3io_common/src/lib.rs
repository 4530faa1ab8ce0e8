//! m3io Common Library
//!
//! Shared definitions for the m3io driver workspace: the command/response
//! protocol spoken over the sequence-CPU command channel, the interrupt
//! event wire format, the transport traits backends implement, the error
//! type, and configuration loading.
//!
//! # Module Structure
//!
//! - [`consts`] - Hardware limits and protocol codes
//! - [`error`] - `DriverError` taxonomy
//! - [`protocol`] - `Command` / `Response` payloads
//! - [`event`] - Interrupt event message decoding
//! - [`transport`] - Traits consumed by the driver core
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use m3io_common::prelude::*;
//!
//! let cmd = Command::read(0, 3, DeviceType::DataRegister, AccessType::Word, 100, 1);
//! assert!(cmd.validate().is_ok());
//! ```

pub mod config;
pub mod consts;
pub mod error;
pub mod event;
pub mod prelude;
pub mod protocol;
pub mod transport;
