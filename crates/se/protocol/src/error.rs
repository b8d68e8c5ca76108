//! Error type for secure element protocol operations

use crate::slot::Slot;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol engine error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Framing or transport failure
    #[error(transparent)]
    Frame(#[from] meterid_frame::Error),

    /// The device lost its volatile state (resync through wake, sleep) while a
    /// challenge-response sequence depended on it
    #[error("Session lost: device state was reset")]
    SessionLost,

    /// An operation needed a TempKey that is not established
    #[error("No TempKey established")]
    NoTempKey,

    /// The device and the host disagree on a digest or signature
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(&'static str),

    /// The device configuration zone does not match the slot catalogue
    #[error("Configuration mismatch on {slot} {field}: expected {expected:#06x}, found {found:#06x}")]
    Configuration {
        /// Offending slot
        slot: Slot,
        /// Configuration word name
        field: &'static str,
        /// Word derived from the catalogue
        expected: u16,
        /// Word read from the device
        found: u16,
    },

    /// The slot is not part of the catalogue
    #[error("Unknown slot {0}")]
    UnknownSlot(u8),

    /// The slot policy forbids the operation or needs a different key
    #[error("Policy violation: {0}")]
    Policy(&'static str),

    /// MAC mode byte outside the supported combinations
    #[error("Unsupported MAC mode {0:#04x}")]
    UnsupportedMacMode(u8),

    /// The device never produced a full-length signature
    #[error("Signature incomplete after {0} attempts")]
    SignatureIncomplete(u32),

    /// The device response does not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(&'static str),

    /// Caller-supplied data is malformed
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Strip context wrappers
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether an application-level retry of the whole operation may succeed.
    ///
    /// Transport trouble and lost sessions are transient. Authentication,
    /// configuration and policy failures are not and must surface.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Frame(e) => e.is_retryable(),
            Self::SessionLost | Self::SignatureIncomplete(_) => true,
            _ => false,
        }
    }

    /// Whether the error is a digest or signature mismatch
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self.root(), Self::AuthenticationFailed(_))
    }
}

/// Extension trait for Result with protocol errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::SessionLost.is_retryable());
        assert!(Error::from(meterid_frame::Error::NoResponse(3)).is_retryable());
        assert!(!Error::from(meterid_frame::Error::DeviceExecution).is_retryable());
        assert!(!Error::AuthenticationFailed("mac").is_retryable());
        assert!(
            Error::SessionLost
                .with_context("signing")
                .with_context("self-test")
                .is_retryable()
        );
        assert!(
            Error::AuthenticationFailed("mac")
                .with_context("verify")
                .is_authentication_failure()
        );
    }
}
