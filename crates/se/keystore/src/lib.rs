//! Key material manager for a discrete secure element.
//!
//! The host keeps a durable mirror of each managed slot key, flagged valid
//! by a CRC-16. At startup every slot gets exactly one authoritative copy,
//! seeding factory defaults where the mirror is blank or torn. Key rotation
//! stages the candidate, writes the device through an encrypted,
//! MAC-authorized write and only then promotes the candidate, so a power
//! loss at any point leaves a consistent slot.
//!
//! Passwords cached on the host can be sealed under a managed key
//! ([`seal`]).
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod record;
pub mod seal;
pub mod storage;
pub mod store;

pub use config::{FactoryKey, KeyStoreConfig};
pub use error::{Error, Result, ResultExt};
pub use record::{KEY_LEN, KeyRecord, RecordKind, Validity};
pub use storage::{MemoryStore, Storage};
pub use store::{KeySource, KeyStore, SlotState};
