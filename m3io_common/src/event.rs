//! Interrupt event addressing and message decoding.
//!
//! Hardware interrupts arrive as small fixed-layout messages on the event
//! queue bound to a (unit, slot) bucket. The message body is
//! `#[repr(C)]`: unit, slot and channel as native-endian `u16`, followed
//! by one reserved word.

use crate::error::DriverError;
use static_assertions::const_assert_eq;
use std::fmt;

/// Hardware address of an interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoAddress {
    /// Base unit number
    pub unit: u8,
    /// Slot within the unit
    pub slot: u8,
    /// Channel (relay number) within the module
    pub channel: u16,
}

impl IoAddress {
    /// Create an address.
    pub const fn new(unit: u8, slot: u8, channel: u16) -> Self {
        Self {
            unit,
            slot,
            channel,
        }
    }
}

impl fmt::Display for IoAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{},S{},C{}", self.unit, self.slot, self.channel)
    }
}

/// Raw event message body as delivered by the interrupt queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct IoEventMessage {
    /// Unit number
    pub unit: u16,
    /// Slot number
    pub slot: u16,
    /// Channel number
    pub channel: u16,
    /// Reserved
    pub _reserved: u16,
}

const_assert_eq!(core::mem::size_of::<IoEventMessage>(), IO_EVENT_MSG_LEN);

/// Full length of an encoded event message in bytes.
pub const IO_EVENT_MSG_LEN: usize = 8;

/// Shortest message the dispatcher accepts (unit, slot and channel present).
pub const IO_EVENT_MIN_LEN: usize = 6;

impl IoEventMessage {
    /// Encode the message body for an address.
    pub fn encode(address: IoAddress) -> [u8; IO_EVENT_MSG_LEN] {
        let mut buf = [0u8; IO_EVENT_MSG_LEN];
        buf[0..2].copy_from_slice(&u16::from(address.unit).to_ne_bytes());
        buf[2..4].copy_from_slice(&u16::from(address.slot).to_ne_bytes());
        buf[4..6].copy_from_slice(&address.channel.to_ne_bytes());
        buf
    }

    /// Decode a received message.
    ///
    /// # Errors
    /// `DriverError::MalformedEvent` when fewer than `IO_EVENT_MIN_LEN`
    /// bytes were received, or when unit/slot do not fit the address range.
    pub fn decode(bytes: &[u8]) -> Result<IoAddress, DriverError> {
        if bytes.len() < IO_EVENT_MIN_LEN {
            return Err(DriverError::MalformedEvent {
                len: bytes.len(),
                min: IO_EVENT_MIN_LEN,
            });
        }
        let word = |i: usize| u16::from_ne_bytes([bytes[i], bytes[i + 1]]);
        let (unit, slot) = match (u8::try_from(word(0)), u8::try_from(word(2))) {
            (Ok(unit), Ok(slot)) => (unit, slot),
            _ => {
                return Err(DriverError::MalformedEvent {
                    len: bytes.len(),
                    min: IO_EVENT_MIN_LEN,
                });
            }
        };
        Ok(IoAddress::new(unit, slot, word(4)))
    }
}
