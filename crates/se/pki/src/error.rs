//! Errors of the orchestrator and the verdict it reports
//!
//! Callers above this crate see a [`Verdict`]: pass, or fail with a
//! [`FailReason`] category. Device status codes never leak past it.

use crate::stage::Stage;

/// Result type for orchestration steps
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestration error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Protocol engine failure
    #[error(transparent)]
    Protocol(#[from] meterid_protocol::Error),

    /// A certificate could not be rebuilt
    #[error(transparent)]
    Certificate(#[from] meterid_cert::Error),

    /// The device refused the host's authorization key
    #[error("Host authorization refused")]
    HostNotAuthorized,

    /// The device identifier does not carry the expected organization prefix
    #[error("Device identifier {found} does not start with {expected}")]
    IdentityMismatch {
        /// Required prefix
        expected: String,
        /// Identifier read from the device
        found: String,
    },

    /// The certificate slot holds something other than the expected layout
    #[error("Malformed certificate slot: {0}")]
    MalformedSlot(&'static str),

    /// The root key on the device differs from the pinned one
    #[error("Root public key does not match the pinned key")]
    UntrustedRoot,

    /// The device rejected a certificate signature
    #[error("Signature rejected at {0}")]
    SignatureRejected(Stage),

    /// The sign/verify round trip failed
    #[error("Self-test signature rejected")]
    SelfTestFailed,

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

    /// Whether the whole orchestration may be attempted again
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::Protocol(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Category reported to the caller
    pub fn reason(&self) -> FailReason {
        match self.root() {
            Self::Protocol(e) => {
                if e.is_authentication_failure() {
                    return FailReason::Authentication;
                }
                match e.root() {
                    meterid_protocol::Error::Configuration { .. }
                    | meterid_protocol::Error::Policy(_)
                    | meterid_protocol::Error::UnknownSlot(_) => FailReason::Configuration,
                    _ => FailReason::Communication,
                }
            }
            Self::Certificate(_) | Self::MalformedSlot(_) => FailReason::Encoding,
            Self::HostNotAuthorized => FailReason::Authentication,
            Self::IdentityMismatch { .. } => FailReason::Identity,
            Self::UntrustedRoot => FailReason::UntrustedRoot,
            Self::SignatureRejected(Stage::VerifySignerCert) => FailReason::SignerCertificate,
            Self::SignatureRejected(_) => FailReason::DeviceCertificate,
            Self::SelfTestFailed => FailReason::SelfTest,
            Self::Context { .. } => FailReason::Communication,
        }
    }
}

/// Extension trait for Result with orchestration errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

/// Why the trust gate closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum FailReason {
    /// The device could not be reached reliably
    #[display("communication")]
    Communication,
    /// The configuration zone or slot policy is not what the system expects
    #[display("configuration")]
    Configuration,
    /// A MAC or key authorization mismatch
    #[display("authentication")]
    Authentication,
    /// The device identifier is foreign
    #[display("identity")]
    Identity,
    /// The root key is not the pinned one
    #[display("untrusted root")]
    UntrustedRoot,
    /// The signer certificate does not verify under the root key
    #[display("signer certificate")]
    SignerCertificate,
    /// The device certificate does not verify under the signer key
    #[display("device certificate")]
    DeviceCertificate,
    /// A stored certificate could not be rebuilt
    #[display("certificate encoding")]
    Encoding,
    /// Sign/verify round trip failed
    #[display("self-test")]
    SelfTest,
}

/// Binary outcome of the trust gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Verdict {
    /// The identity chain and the self-test hold
    #[display("pass")]
    Pass,
    /// Something did not hold
    #[display("fail ({_0})")]
    Fail(FailReason),
}

impl Verdict {
    /// Whether the device passed
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}
