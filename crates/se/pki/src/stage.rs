//! Steps of the verification, in order

/// Orchestrator state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, derive_more::Display)]
pub enum Stage {
    /// Nothing attempted yet
    #[default]
    #[display("idle")]
    Idle,
    /// Session opened, configuration checked, host key proven
    #[display("authorize host")]
    AuthorizeHost,
    /// Public keys and the certificate slot read
    #[display("read keys")]
    ReadKeys,
    /// Signer certificate rebuilt from its partial
    #[display("rebuild signer certificate")]
    RebuildSignerCert,
    /// Signer certificate verified under the root key
    #[display("verify signer certificate")]
    VerifySignerCert,
    /// Device certificate rebuilt from its partial
    #[display("rebuild device certificate")]
    RebuildDeviceCert,
    /// Device certificate verified under the signer key
    #[display("verify device certificate")]
    VerifyDeviceCert,
    /// Fresh challenge signed and verified
    #[display("self-test")]
    SelfTestSignVerify,
    /// Finished
    #[display("done")]
    Done,
}
