//! Reconstruction of full X.509 certificates from the compact partial
//! certificates a secure element stores.
//!
//! A partial certificate keeps only what varies between devices: the CA's
//! raw signature, packed dates, the signer id and a few selector nibbles.
//! Everything else comes from a fixed DER [`Template`]. [`rebuild`] splices
//! the stored values and public keys into the template and re-encodes the
//! signature, yielding the exact bytes the CA signed.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod date;
pub mod der;
pub mod error;
pub mod partial;
pub mod rebuild;
pub mod template;

pub use date::CompressedDate;
pub use error::{Error, Result};
pub use partial::{PartialCertificate, SerialSource};
pub use rebuild::{CertificateDefinition, SUBJECT_SERIAL_LEN, key_id, rebuild, serial_number};
pub use template::{DEVICE_TEMPLATE, DEVICE_TEMPLATE_ID, Element, SIGNER_TEMPLATE, SIGNER_TEMPLATE_ID, Span, Template};
