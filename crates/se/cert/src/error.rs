//! Encoding errors of the certificate reconstructor
//!
//! None of these are retried: they mean the caller handed in the wrong
//! buffer, template or partial certificate.

use crate::template::Element;

/// Result type for certificate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Certificate reconstruction error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Output buffer cannot hold the certificate
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// The serial number element is wider than its source can fill
    #[error("Serial number of {width} bytes is too wide for its source")]
    SerialTooWide {
        /// Width of the serial element in the template
        width: usize,
    },

    /// Value does not fit the element's span
    #[error("Element {element} holds {expected} bytes, got {found}")]
    ElementSize {
        /// Element
        element: Element,
        /// Span length
        expected: usize,
        /// Value length
        found: usize,
    },

    /// The template requires an input that was not supplied
    #[error("Missing value for element {0}")]
    MissingElement(Element),

    /// The template itself is inconsistent
    #[error("Malformed template: {0}")]
    MalformedTemplate(&'static str),

    /// No built-in template carries this id
    #[error("Unknown template id {0}")]
    UnknownTemplate(u8),

    /// A date field is outside what the certificate can express
    #[error("Date out of range: {0}")]
    DateOutOfRange(&'static str),

    /// Serial number source code not understood
    #[error("Unknown serial number source {0:#03x}")]
    UnknownSerialSource(u8),

    /// Input of the wrong size
    #[error("Invalid length: expected {expected}, found {found}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        found: usize,
    },

    /// DER structure could not be walked
    #[error("Malformed DER: {0}")]
    MalformedDer(&'static str),
}
