//! Error type for the framing layer
//!
//! Everything that can go wrong between handing a command to the [`Framer`](crate::Framer)
//! and getting a validated response back is consolidated here.

use crate::packet::Status;
use crate::transport::TransportError;

/// Result type for framing operations
pub type Result<T> = std::result::Result<T, Error>;

/// Framing layer error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The underlying byte channel failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A response failed its checksum
    #[error("Checksum mismatch: expected {expected:#06x}, received {received:#06x}")]
    Checksum {
        /// Checksum computed over the received bytes
        expected: u16,
        /// Checksum carried by the frame
        received: u16,
    },

    /// The length byte of a response is inconsistent, the link is desynchronized
    #[error("Invalid response length: {0}")]
    InvalidLength(usize),

    /// The device did not answer within the configured number of polls
    #[error("No response after {0} polls")]
    NoResponse(u32),

    /// The command is larger than a frame can carry
    #[error("Command too long: {0} bytes")]
    CommandTooLong(usize),

    /// The device could not parse the command
    #[error("Device reported a parse error")]
    DeviceParse,

    /// The device parsed the command but refused to execute it
    #[error("Device reported an execution error")]
    DeviceExecution,

    /// A retried device status persisted across every attempt
    #[error("Device reported status {0}")]
    DeviceStatus(Status),

    /// No valid wake reply was seen
    #[error("Device unresponsive after {0} wake attempts")]
    Unresponsive(u32),

    /// The outer send loop was exhausted
    #[error("Communication failed after {attempts} attempts: {source}")]
    CommunicationFailure {
        /// Number of sends performed
        attempts: u32,
        /// Last error observed
        source: Box<Self>,
    },

    /// Other error with static message
    #[error("{0}")]
    Other(&'static str),
}

impl Error {
    /// Create a new error with a static message
    pub const fn other(message: &'static str) -> Self {
        Self::Other(message)
    }

    /// Whether the error means the framing itself got lost and the link needs a resync
    pub const fn is_desync(&self) -> bool {
        matches!(
            self,
            Self::Checksum { .. } | Self::InvalidLength(_) | Self::NoResponse(_)
        )
    }

    /// Whether retrying the whole exchange later may succeed.
    ///
    /// Parse and execution errors are final: the same command will fail the same way.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::DeviceParse | Self::DeviceExecution | Self::CommandTooLong(_) => false,
            Self::DeviceStatus(status) => status.is_transient() || *status == Status::AfterWake,
            Self::Other(_) => false,
            _ => true,
        }
    }
}
