//! Framed command/response exchange with a discrete secure element.
//!
//! This crate turns a raw byte channel into a reliable request/response link:
//!
//! - every command is length-prefixed and CRC-16 suffixed, every response is
//!   checked before it is trusted
//! - a wake handshake brings the device out of sleep
//! - desynchronized or unparsable replies trigger a resync, either through an
//!   I/O buffer reset or a fresh wake, and the command is resent
//! - device status bytes are classified into retried and terminal failures
//!
//! The [`Framer`] is the only consumer of a [`Transport`]; higher layers never
//! see raw frames or status bytes.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub use bytes::Bytes;

pub mod config;
pub mod crc;
pub mod error;
pub mod framer;
pub mod packet;
pub mod transport;

pub use config::RetryConfig;
pub use crc::{crc16, crc16_update};
pub use error::{Error, Result};
pub use framer::{Framer, Reply, ResyncOutcome, WakeStatus};
pub use packet::{Packet, Response, Status};
pub use transport::{Transport, TransportError};

#[cfg(any(test, feature = "mock"))]
pub use transport::mock::MockTransport;
