//! Challenge-response command set of a discrete secure element.
//!
//! The secure element never reveals its secrets. Instead both sides hash the
//! same public inputs into an ephemeral accumulator, the TempKey, and prove
//! knowledge of a slot key by producing matching digests. This crate:
//!
//! - mirrors the device's internal hashing on the host ([`digest`])
//! - threads that state through an explicit [`Session`]
//! - implements Nonce, GenDig, MAC, CheckMac, Sign, Verify, Random, Read and
//!   Write on top of the framing layer ([`Device`])
//! - describes the slot layout the device must be configured with ([`slot`])
//!
//! With the `mock` feature a [`sim::SimulatedDevice`] answers frames the way the
//! chip does, so whole flows can be exercised without hardware.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod device;
pub mod digest;
pub mod error;
pub mod opcode;
pub mod session;
pub mod slot;
pub mod types;
pub mod zone;

#[cfg(any(test, feature = "mock"))]
pub mod sim;

pub use config::ProtocolConfig;
pub use device::{Device, VerifyKey};
pub use digest::{MacMode, MacRequest, OtherData, TempKey, TempKeySource};
pub use error::{Error, Result, ResultExt};
pub use opcode::Opcode;
pub use session::Session;
pub use slot::{Access, KeyKind, KeyRef, METER_CATALOGUE, Slot, SlotCatalogue, SlotName, SlotSpec};
pub use types::{PublicKey, SerialNumber, Signature};
pub use zone::{ConfigZone, Zone};

pub use meterid_frame::{RetryConfig, Transport};
