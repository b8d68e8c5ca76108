//! Configuration of the protocol engine

use meterid_frame::RetryConfig;

use crate::slot::{METER_CATALOGUE, SlotCatalogue};

/// Protocol engine configuration
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Framing layer retry bounds
    pub retry: RetryConfig,

    /// Sign attempts before a short signature is reported as an error
    pub max_sign_attempts: u32,

    /// Slot layout the device must be configured with
    pub catalogue: &'static SlotCatalogue,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            max_sign_attempts: 3,
            catalogue: &METER_CATALOGUE,
        }
    }
}

impl ProtocolConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the framing retry bounds
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the number of sign attempts
    pub const fn with_max_sign_attempts(mut self, max_sign_attempts: u32) -> Self {
        self.max_sign_attempts = max_sign_attempts;
        self
    }

    /// Use a different slot catalogue
    pub const fn with_catalogue(mut self, catalogue: &'static SlotCatalogue) -> Self {
        self.catalogue = catalogue;
        self
    }
}
