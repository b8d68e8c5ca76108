//! Device PKI verification for a metering endpoint.
//!
//! The [`Orchestrator`] composes the protocol engine and the certificate
//! reconstructor into a binary trust gate:
//!
//! 1. open a session, check the device configuration, prove the host key
//! 2. read the root, signer and device public keys and the certificate slot
//! 3. rebuild the signer certificate and have the device verify it under
//!    the root key
//! 4. rebuild the device certificate and verify it under the signer key
//! 5. sign a fresh challenge with the device key and verify it
//!
//! The outcome is a [`Verdict`]: pass, or fail with a reason category.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod layout;
pub mod orchestrator;
pub mod stage;

#[cfg(any(test, feature = "mock"))]
pub mod provision;

pub use config::{DEFAULT_ORGANIZATION_PREFIX, PkiConfig};
pub use error::{Error, FailReason, Result, ResultExt, Verdict};
pub use layout::{CERTIFICATE_SLOT_LEN, CertificateSlot};
pub use orchestrator::{Orchestrator, Report, rebuild_from};
pub use stage::Stage;
