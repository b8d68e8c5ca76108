//! Retry and timing configuration for the framing layer

use std::time::Duration;

/// Bounds for the nested retry loops and bus timing.
///
/// `send_retries` bounds how often a whole command is (re)sent,
/// `receive_polls` bounds how often a single send is polled for its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Number of times a command is sent before giving up
    pub send_retries: u32,

    /// Number of response polls per send
    pub receive_polls: u32,

    /// Number of wake pulses before the device is declared unresponsive
    pub wake_retries: u32,

    /// Delay between two response polls
    pub poll_interval: Duration,

    /// Delay after a wake pulse before the wake reply is read
    pub wake_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            send_retries: 3,
            receive_polls: 20,
            wake_retries: 3,
            poll_interval: Duration::from_millis(2),
            wake_delay: Duration::from_micros(2500),
        }
    }
}

impl RetryConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of command sends
    pub const fn with_send_retries(mut self, send_retries: u32) -> Self {
        self.send_retries = send_retries;
        self
    }

    /// Set the number of response polls per send
    pub const fn with_receive_polls(mut self, receive_polls: u32) -> Self {
        self.receive_polls = receive_polls;
        self
    }

    /// Set the number of wake attempts
    pub const fn with_wake_retries(mut self, wake_retries: u32) -> Self {
        self.wake_retries = wake_retries;
        self
    }

    /// Set the delay between response polls
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the delay between a wake pulse and reading the wake reply
    pub const fn with_wake_delay(mut self, wake_delay: Duration) -> Self {
        self.wake_delay = wake_delay;
        self
    }
}
