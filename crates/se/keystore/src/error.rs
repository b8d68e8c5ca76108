//! Error type for the key material manager

use meterid_protocol::SlotName;

/// Result type for key store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Key store error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Protocol engine failure while talking to the device
    #[error(transparent)]
    Protocol(#[from] meterid_protocol::Error),

    /// The persistence backend failed
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Access outside the persisted region
    #[error("Storage access out of bounds: {offset}+{len} exceeds {size}")]
    OutOfBounds {
        /// Start of the access
        offset: usize,
        /// Bytes accessed
        len: usize,
        /// Size of the region
        size: usize,
    },

    /// The slot has no factory default and is not managed here
    #[error("Slot {0} is not managed")]
    NotManaged(SlotName),

    /// The slot cannot be managed as a 32-byte secret
    #[error("Slot {slot} cannot be managed: {reason}")]
    Unmanageable {
        /// Offending slot
        slot: SlotName,
        /// Why
        reason: &'static str,
    },

    /// `resume_rotation` on a slot without an interrupted rotation
    #[error("No rotation pending on {0}")]
    NoPendingRotation(SlotName),

    /// Sealing or opening a cached password failed
    #[error("Sealed data rejected: {0}")]
    Seal(&'static str),

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

    /// Whether retrying the whole rotation may succeed
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Protocol(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Extension trait for Result with key store errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}
