//! Configuration of the orchestrator

use meterid_protocol::PublicKey;

/// IEEE OUI the device identifiers of this product line start with
pub const DEFAULT_ORGANIZATION_PREFIX: &str = "001BC5";

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkiConfig {
    /// Attempts of the whole orchestration when transient errors occur
    pub attempts: u32,

    /// Prefix the device identifier must carry, as upper-case hex
    pub organization_prefix: String,

    /// Root key the device must hold, when known to the host
    pub pinned_root: Option<PublicKey>,

    /// Whether to run the sign/verify self-test after the chain checks
    pub self_test: bool,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            organization_prefix: DEFAULT_ORGANIZATION_PREFIX.to_string(),
            pinned_root: None,
            self_test: true,
        }
    }
}

impl PkiConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of attempts
    pub const fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the required identifier prefix
    pub fn with_organization_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.organization_prefix = prefix.into();
        self
    }

    /// Pin the root public key
    pub const fn with_pinned_root(mut self, root: PublicKey) -> Self {
        self.pinned_root = Some(root);
        self
    }

    /// Enable or disable the self-test
    pub const fn with_self_test(mut self, self_test: bool) -> Self {
        self.self_test = self_test;
        self
    }
}
