//! System-wide constants for the m3io workspace.
//!
//! Single source of truth for hardware limits and protocol codes.
//! Imported by every crate in the workspace.

/// Number of base units addressable on the backplane (units 0..=7).
pub const MAX_UNITS: u8 = 8;

/// Number of I/O slots per unit (slots 1..=16).
pub const MAX_SLOTS: u8 = 16;

/// Interrupt registrations held per (unit, slot) bucket.
pub const IO_INTR_CAPACITY: usize = 8;

/// Format code of a sequence-CPU command frame.
pub const FORMAT_CODE_SEQ: u8 = 0xF1;

/// Main operation code for sequence device access.
pub const MAIN_CODE_SEQ_DEVICE: u8 = 0x26;

/// Sub operation code: read sequence device.
pub const SUB_CODE_READ: u8 = 0x01;

/// Sub operation code: write sequence device.
pub const SUB_CODE_WRITE: u8 = 0x02;

/// Size in bytes of the sequence device header (access, type, count, top).
pub const SEQ_DEVICE_HEADER_SIZE: u16 = 10;

/// Maximum number of 16-bit words carried by one command payload.
pub const MAX_PAYLOAD_WORDS: usize = 512;

/// Default transport timeout in seconds.
pub const DEFAULT_TIMEOUT_S: u16 = 1;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/m3io/m3io.toml";

/// Canonical service name (used for logging).
pub const DRIVER_SERVICE_NAME: &str = "m3io";
