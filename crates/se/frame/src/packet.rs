//! Command packets and response frames
//!
//! Command: `count | opcode | param1 | param2 (LE) | data | crc (LE)`.
//! Response: `count | payload | crc (LE)`; a four byte response carries a single
//! status byte. `count` always covers the whole frame including itself and the
//! checksum.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::crc::{checksum_bytes, crc16};
use crate::error::{Error, Result};

/// Bytes added around command data: count, opcode, two parameters, checksum
pub const COMMAND_OVERHEAD: usize = 7;
/// Bytes added around response data: count and checksum
pub const RESPONSE_OVERHEAD: usize = 3;
/// Size of a status-only response
pub const STATUS_RESPONSE_SIZE: usize = 4;
/// Largest command frame the device accepts
pub const MAX_COMMAND_SIZE: usize = 155;
/// Largest response frame the device produces
pub const MAX_RESPONSE_SIZE: usize = 75;

/// Status byte carried by a four byte response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Status {
    /// Command executed
    #[display("success")]
    Success,
    /// CheckMac or Verify comparison failed
    #[display("miscompare")]
    Miscompare,
    /// Malformed command
    #[display("parse error")]
    ParseError,
    /// Internal ECC computation fault, transient
    #[display("ECC fault")]
    EccFault,
    /// Command refused
    #[display("execution error")]
    ExecutionError,
    /// First status after the device woke up
    #[display("after wake")]
    AfterWake,
    /// Watchdog about to expire, the command was not run
    #[display("watchdog")]
    Watchdog,
    /// CRC or framing error seen by the device
    #[display("communication error")]
    CommunicationError,
    /// Anything else
    #[display("unknown status {_0:#04x}")]
    Unknown(u8),
}

impl Status {
    /// Decode a status byte
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Success,
            0x01 => Self::Miscompare,
            0x03 => Self::ParseError,
            0x05 => Self::EccFault,
            0x0F => Self::ExecutionError,
            0x11 => Self::AfterWake,
            0xEE => Self::Watchdog,
            0xFF => Self::CommunicationError,
            other => Self::Unknown(other),
        }
    }

    /// Encode the status byte
    pub const fn to_byte(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::Miscompare => 0x01,
            Self::ParseError => 0x03,
            Self::EccFault => 0x05,
            Self::ExecutionError => 0x0F,
            Self::AfterWake => 0x11,
            Self::Watchdog => 0xEE,
            Self::CommunicationError => 0xFF,
            Self::Unknown(other) => other,
        }
    }

    /// Whether resending the same command may succeed
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::EccFault | Self::Watchdog | Self::CommunicationError
        )
    }
}

/// A command ready to be framed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    opcode: u8,
    param1: u8,
    param2: u16,
    data: Bytes,
    execution_time: Duration,
}

impl Packet {
    /// Create a packet without data
    pub const fn new(opcode: u8, param1: u8, param2: u16) -> Self {
        Self {
            opcode,
            param1,
            param2,
            data: Bytes::new(),
            execution_time: Duration::ZERO,
        }
    }

    /// Attach the data field
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Set the typical execution time, waited before the first poll
    pub fn with_execution_time(mut self, execution_time: Duration) -> Self {
        self.execution_time = execution_time;
        self
    }

    /// Opcode
    pub const fn opcode(&self) -> u8 {
        self.opcode
    }

    /// First parameter (mode)
    pub const fn param1(&self) -> u8 {
        self.param1
    }

    /// Second parameter (key id or address)
    pub const fn param2(&self) -> u16 {
        self.param2
    }

    /// Data field
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Typical execution time
    pub const fn execution_time(&self) -> Duration {
        self.execution_time
    }

    /// Serialize to a complete frame with count and checksum
    pub fn to_bytes(&self) -> Result<Bytes> {
        let size = COMMAND_OVERHEAD + self.data.len();
        if size > MAX_COMMAND_SIZE {
            return Err(Error::CommandTooLong(size));
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u8(size as u8);
        buf.put_u8(self.opcode);
        buf.put_u8(self.param1);
        buf.put_u16_le(self.param2);
        buf.put_slice(&self.data);
        let crc = checksum_bytes(&buf);
        buf.put_slice(&crc);
        Ok(buf.freeze())
    }

    /// Parse a complete command frame, as the device sees it
    pub fn from_bytes(frame: &[u8]) -> Result<Self> {
        let body = checked_body(frame, COMMAND_OVERHEAD, MAX_COMMAND_SIZE)?;
        Ok(Self {
            opcode: body[0],
            param1: body[1],
            param2: u16::from_le_bytes([body[2], body[3]]),
            data: Bytes::copy_from_slice(&body[4..]),
            execution_time: Duration::ZERO,
        })
    }
}

/// Validated response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Four byte status response
    Status(Status),
    /// Payload-carrying response
    Data(Bytes),
}

impl Response {
    /// Parse and validate a response frame
    pub fn from_bytes(frame: &[u8]) -> Result<Self> {
        let body = checked_body(frame, STATUS_RESPONSE_SIZE, MAX_RESPONSE_SIZE)?;
        if body.len() == 1 {
            Ok(Self::Status(Status::from_byte(body[0])))
        } else {
            Ok(Self::Data(Bytes::copy_from_slice(body)))
        }
    }

    /// Frame a status response
    pub fn status_frame(status: Status) -> Bytes {
        frame_payload(&[status.to_byte()])
    }

    /// Frame a data response
    pub fn data_frame(data: &[u8]) -> Bytes {
        frame_payload(data)
    }

    /// Status, if this is a status response
    pub const fn status(&self) -> Option<Status> {
        match self {
            Self::Status(status) => Some(*status),
            Self::Data(_) => None,
        }
    }

    /// Payload, if this is a data response
    pub const fn data(&self) -> Option<&Bytes> {
        match self {
            Self::Data(data) => Some(data),
            Self::Status(_) => None,
        }
    }
}

fn frame_payload(payload: &[u8]) -> Bytes {
    let size = payload.len() + RESPONSE_OVERHEAD;
    let mut buf = BytesMut::with_capacity(size);
    buf.put_u8(size as u8);
    buf.put_slice(payload);
    let crc = checksum_bytes(&buf);
    buf.put_slice(&crc);
    buf.freeze()
}

/// Check count and checksum, returning the bytes between them
fn checked_body(frame: &[u8], min: usize, max: usize) -> Result<&[u8]> {
    let Some(&count) = frame.first() else {
        return Err(Error::InvalidLength(0));
    };
    let count = count as usize;
    if count < min || count > max || count > frame.len() {
        return Err(Error::InvalidLength(count));
    }

    let (body, trailer) = frame[..count].split_at(count - 2);
    let expected = crc16(body);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    if expected != received {
        return Err(Error::Checksum { expected, received });
    }

    Ok(&body[1..])
}
