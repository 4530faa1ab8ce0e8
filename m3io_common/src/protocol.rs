//! Command channel protocol types.
//!
//! A [`Command`] is the outbound request frame handed to the blocking
//! command channel; a [`Response`] is what the channel hands back. Both
//! are plain values: the driver core only stamps the correlation id and
//! compares it against the echo, everything else is owned by the client
//! that built the command.
//!
//! # Frame layout
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `format_code` | Frame format (`0xF1` for sequence-CPU access) |
//! | `src_slot` / `dest_slot` | Issuing CPU slot / target CPU slot |
//! | `main_code` / `sub_code` | Operation (`0x26` / `0x01` read, `0x02` write) |
//! | `data_size` | Header (10 bytes) plus inline write payload in bytes |
//! | `device` | Sequence device sub-record |

use crate::consts::{
    DEFAULT_TIMEOUT_S, FORMAT_CODE_SEQ, MAIN_CODE_SEQ_DEVICE, MAX_PAYLOAD_WORDS,
    SEQ_DEVICE_HEADER_SIZE, SUB_CODE_READ, SUB_CODE_WRITE,
};
use crate::error::DriverError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element width of a sequence device access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum AccessType {
    /// Single relay bit, carried in one word
    Bit = 0x00,
    /// 16-bit word
    #[default]
    Word = 0x02,
    /// 32-bit long word, carried as two words (low first)
    Long = 0x04,
}

impl AccessType {
    /// Number of 16-bit words one element occupies in a payload.
    pub const fn words_per_element(self) -> usize {
        match self {
            Self::Bit | Self::Word => 1,
            Self::Long => 2,
        }
    }
}

/// Sequence CPU device kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum DeviceType {
    /// File register (`B`)
    FileRegister = 0x02,
    /// Data register (`D`)
    DataRegister = 0x04,
    /// Internal relay (`I`)
    InternalRelay = 0x09,
    /// Special relay (`M`)
    SpecialRelay = 0x0D,
}

impl DeviceType {
    /// Convert from raw `u8` code. Returns `None` for unknown codes.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x02 => Some(Self::FileRegister),
            0x04 => Some(Self::DataRegister),
            0x09 => Some(Self::InternalRelay),
            0x0D => Some(Self::SpecialRelay),
            _ => None,
        }
    }

    /// Relay devices only support bit access.
    pub const fn is_relay(self) -> bool {
        matches!(self, Self::InternalRelay | Self::SpecialRelay)
    }
}

/// Inline data area of a sequence device sub-record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceData {
    /// Read: the result arrives in the response
    #[default]
    Read,
    /// Write: words to store starting at the top device number
    Write(Vec<u16>),
}

/// Sequence device sub-record of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqDevice {
    /// Element width
    pub access: AccessType,
    /// Device kind
    pub device: DeviceType,
    /// Element count
    pub data_num: u16,
    /// First device number
    pub top_dev_no: u32,
    /// Inline payload
    pub data: DeviceData,
}

impl SeqDevice {
    /// Number of payload words the sub-record describes.
    pub fn payload_words(&self) -> usize {
        self.data_num as usize * self.access.words_per_element()
    }
}

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Frame format code
    pub format_code: u8,
    /// Response requested (1) or not (0)
    pub response_option: u8,
    /// Slot of the issuing CPU
    pub src_slot: u8,
    /// Slot of the target CPU
    pub dest_slot: u8,
    /// Main operation code
    pub main_code: u8,
    /// Sub operation code
    pub sub_code: u8,
    /// Header plus inline payload size in bytes
    pub data_size: u16,
    /// Transport timeout in seconds
    pub timeout_s: u16,
    /// Correlation id, stamped by the command worker
    pub com_id: u16,
    /// Device sub-record
    pub device: SeqDevice,
}

impl Command {
    /// Build a sequence device read of `count` elements starting at `top`.
    pub fn read(
        src_slot: u8,
        dest_slot: u8,
        device: DeviceType,
        access: AccessType,
        top: u32,
        count: u16,
    ) -> Self {
        Self {
            format_code: FORMAT_CODE_SEQ,
            response_option: 1,
            src_slot,
            dest_slot,
            main_code: MAIN_CODE_SEQ_DEVICE,
            sub_code: SUB_CODE_READ,
            data_size: SEQ_DEVICE_HEADER_SIZE,
            timeout_s: DEFAULT_TIMEOUT_S,
            com_id: 0,
            device: SeqDevice {
                access,
                device,
                data_num: count,
                top_dev_no: top,
                data: DeviceData::Read,
            },
        }
    }

    /// Build a sequence device write. The element count is derived from
    /// the payload length and the access width.
    pub fn write(
        src_slot: u8,
        dest_slot: u8,
        device: DeviceType,
        access: AccessType,
        top: u32,
        words: Vec<u16>,
    ) -> Self {
        let (data_num, data_size) = write_sizes(words.len(), access);
        Self {
            format_code: FORMAT_CODE_SEQ,
            response_option: 1,
            src_slot,
            dest_slot,
            main_code: MAIN_CODE_SEQ_DEVICE,
            sub_code: SUB_CODE_WRITE,
            data_size,
            timeout_s: DEFAULT_TIMEOUT_S,
            com_id: 0,
            device: SeqDevice {
                access,
                device,
                data_num,
                top_dev_no: top,
                data: DeviceData::Write(words),
            },
        }
    }

    /// Replace the write payload, keeping the frame sizes consistent.
    pub fn set_write_data(&mut self, words: Vec<u16>) {
        let (data_num, data_size) = write_sizes(words.len(), self.device.access);
        self.device.data_num = data_num;
        self.data_size = data_size;
        self.device.data = DeviceData::Write(words);
    }

    /// True for write frames.
    pub fn is_write(&self) -> bool {
        self.sub_code == SUB_CODE_WRITE
    }

    /// Check the frame is internally consistent.
    ///
    /// # Validation Rules
    /// 1. `data_num` > 0
    /// 2. Payload fits in `MAX_PAYLOAD_WORDS`
    /// 3. Relay devices use bit access
    /// 4. Write frames carry exactly `data_num` elements and a matching `data_size`
    /// 5. Read frames carry no inline payload
    pub fn validate(&self) -> Result<(), DriverError> {
        let dev = &self.device;
        if dev.data_num == 0 {
            return Err(DriverError::InvalidArgument(
                "element count must be greater than 0".to_string(),
            ));
        }
        if dev.payload_words() > MAX_PAYLOAD_WORDS {
            return Err(DriverError::InvalidArgument(format!(
                "payload of {} words exceeds {}",
                dev.payload_words(),
                MAX_PAYLOAD_WORDS
            )));
        }
        if dev.device.is_relay() && dev.access != AccessType::Bit {
            return Err(DriverError::InvalidArgument(format!(
                "{:?} only supports bit access",
                dev.device
            )));
        }
        match (&dev.data, self.sub_code) {
            (DeviceData::Write(words), SUB_CODE_WRITE) => {
                if words.len() != dev.payload_words() {
                    return Err(DriverError::InvalidArgument(format!(
                        "write payload has {} words, header describes {}",
                        words.len(),
                        dev.payload_words()
                    )));
                }
                let expected = SEQ_DEVICE_HEADER_SIZE as usize + words.len() * 2;
                if self.data_size as usize != expected {
                    return Err(DriverError::InvalidArgument(format!(
                        "data_size {} does not match payload ({} expected)",
                        self.data_size, expected
                    )));
                }
            }
            (DeviceData::Read, SUB_CODE_READ) => {}
            _ => {
                return Err(DriverError::InvalidArgument(format!(
                    "sub code 0x{:02x} does not match device data",
                    self.sub_code
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "format=0x{:02x} resp={} src={} dest={} main=0x{:02x} sub=0x{:02x} size={} \
             access={} dev=0x{:02x} num={} top={} id={}",
            self.format_code,
            self.response_option,
            self.src_slot,
            self.dest_slot,
            self.main_code,
            self.sub_code,
            self.data_size,
            self.device.access as u8,
            self.device.device as u8,
            self.device.data_num,
            self.device.top_dev_no,
            self.com_id
        )
    }
}

/// Element count and frame size for a write payload of `len` words.
/// Oversized payloads saturate and are rejected by `Command::validate`.
fn write_sizes(len: usize, access: AccessType) -> (u16, u16) {
    let data_num = u16::try_from(len / access.words_per_element()).unwrap_or(u16::MAX);
    let words = u16::try_from(len).unwrap_or(u16::MAX);
    let data_size = SEQ_DEVICE_HEADER_SIZE.saturating_add(words.saturating_mul(2));
    (data_num, data_size)
}

/// Inbound reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    /// Echoed correlation id
    pub com_id: u16,
    /// Hardware error code, 0 on success
    pub error_code: u16,
    /// Result payload (reads) or empty (writes)
    pub data: Vec<u16>,
}

impl Response {
    /// Build a successful response echoing `com_id`.
    pub fn ok(com_id: u16, data: Vec<u16>) -> Self {
        Self {
            com_id,
            error_code: 0,
            data,
        }
    }

    /// Return the payload, or the hardware error code as an error.
    pub fn check(&self) -> Result<&[u16], DriverError> {
        if self.error_code != 0 {
            return Err(DriverError::DeviceError(self.error_code));
        }
        Ok(&self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_frame_matches_sequence_cpu_layout() {
        let cmd = Command::read(1, 3, DeviceType::DataRegister, AccessType::Word, 100, 1);
        assert_eq!(cmd.format_code, 0xF1);
        assert_eq!(cmd.main_code, 0x26);
        assert_eq!(cmd.sub_code, 0x01);
        assert_eq!(cmd.data_size, 10);
        assert_eq!(cmd.device.device as u8, 0x04);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn write_frame_sizes_follow_payload() {
        let cmd = Command::write(1, 3, DeviceType::DataRegister, AccessType::Long, 8, vec![1, 2]);
        assert_eq!(cmd.device.data_num, 1);
        assert_eq!(cmd.data_size, 14);
        assert!(cmd.validate().is_ok());

        let bit = Command::write(1, 3, DeviceType::InternalRelay, AccessType::Bit, 5, vec![1]);
        assert_eq!(bit.data_size, 12);
        assert!(bit.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inconsistent_frames() {
        let mut cmd = Command::read(1, 3, DeviceType::DataRegister, AccessType::Word, 0, 0);
        assert!(matches!(cmd.validate(), Err(DriverError::InvalidArgument(_))));

        cmd.device.data_num = 1;
        cmd.device.data = DeviceData::Write(vec![1]);
        assert!(cmd.validate().is_err());

        let relay = Command::read(1, 3, DeviceType::InternalRelay, AccessType::Word, 0, 1);
        assert!(relay.validate().is_err());

        let mut write = Command::write(1, 3, DeviceType::FileRegister, AccessType::Word, 0, vec![7, 8]);
        write.data_size = 10;
        assert!(write.validate().is_err());
    }

    #[test]
    fn set_write_data_keeps_sizes_consistent() {
        let mut cmd = Command::write(1, 3, DeviceType::DataRegister, AccessType::Word, 0, vec![1]);
        cmd.set_write_data(vec![1, 2, 3]);
        assert_eq!(cmd.device.data_num, 3);
        assert_eq!(cmd.data_size, 16);
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn oversized_write_saturates_and_is_rejected() {
        let words = vec![0; usize::from(u16::MAX) + 2];
        let cmd = Command::write(1, 3, DeviceType::DataRegister, AccessType::Word, 0, words);
        assert_eq!(cmd.device.data_num, u16::MAX);
        assert_eq!(cmd.data_size, u16::MAX);
        assert!(matches!(cmd.validate(), Err(DriverError::InvalidArgument(_))));
    }

    #[test]
    fn response_check_reports_device_error() {
        assert_eq!(Response::ok(1, vec![0x1234]).check().unwrap(), &[0x1234]);
        let failed = Response {
            com_id: 1,
            error_code: 5,
            data: vec![],
        };
        assert_eq!(failed.check(), Err(DriverError::DeviceError(5)));
    }

    #[test]
    fn device_type_codes_round_trip() {
        for dev in [
            DeviceType::FileRegister,
            DeviceType::DataRegister,
            DeviceType::InternalRelay,
            DeviceType::SpecialRelay,
        ] {
            assert_eq!(DeviceType::from_u8(dev as u8), Some(dev));
        }
        assert_eq!(DeviceType::from_u8(0x7F), None);
    }
}
