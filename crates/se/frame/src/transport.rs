//! Byte-level boundary to the bus that carries secure element frames
//!
//! A transport knows nothing about frames, checksums or status bytes. It moves
//! bytes, issues the wake pulse, and sleeps for bus-settle delays.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace};

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The bus did not acknowledge
    #[error("Bus not acknowledged")]
    Nack,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// The transport does not implement the requested operation
    #[error("Operation not supported by the transport")]
    Unsupported,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}

/// Byte channel to a secure element.
///
/// Implementations provide the `do_*` methods; the provided wrappers add
/// trace logging of every frame.
pub trait Transport: Send + fmt::Debug {
    /// Send a complete frame
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        trace!(frame = %hex::encode(frame), "Sending frame");
        let result = self.do_send(frame);
        if let Err(e) = &result {
            debug!(error = ?e, "Transport error during send");
        }
        result
    }

    /// Receive up to `max_len` bytes. An empty buffer means the device has nothing
    /// to report yet.
    fn receive(&mut self, max_len: usize) -> Result<Bytes, TransportError> {
        let result = self.do_receive(max_len);
        match &result {
            Ok(bytes) if !bytes.is_empty() => {
                trace!(frame = %hex::encode(bytes), "Received frame");
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = ?e, "Transport error during receive");
            }
        }
        result
    }

    /// Internal implementation of send
    fn do_send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Internal implementation of receive
    fn do_receive(&mut self, max_len: usize) -> Result<Bytes, TransportError>;

    /// Hold the data line low long enough to wake the device
    fn wake_pulse(&mut self) -> Result<(), TransportError>;

    /// Block for a bus-settle or execution delay
    fn delay(&mut self, duration: Duration);

    /// Reset the device's I/O buffer so the next frame is parsed from its start.
    ///
    /// Returns `Ok(false)` when the bus has no such primitive.
    fn reset_io(&mut self) -> Result<bool, TransportError> {
        Ok(false)
    }

    /// Put the device into its low-power sleep state, clearing its volatile state
    fn sleep(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn do_send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        (**self).do_send(frame)
    }

    fn do_receive(&mut self, max_len: usize) -> Result<Bytes, TransportError> {
        (**self).do_receive(max_len)
    }

    fn wake_pulse(&mut self) -> Result<(), TransportError> {
        (**self).wake_pulse()
    }

    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }

    fn reset_io(&mut self) -> Result<bool, TransportError> {
        (**self).reset_io()
    }

    fn sleep(&mut self) -> Result<(), TransportError> {
        (**self).sleep()
    }
}

#[cfg(any(test, feature = "mock"))]
pub mod mock {
    //! Scripted transport for tests

    use std::collections::VecDeque;
    use std::time::Duration;

    use bytes::Bytes;

    use super::{Transport, TransportError};

    /// Transport that replays scripted replies and records what was sent
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        /// Replies handed out by `receive`, one per call; empty means "nothing yet"
        pub responses: VecDeque<Bytes>,
        /// Frames that were sent
        pub commands: Vec<Bytes>,
        /// Replies handed out after a wake pulse
        pub wake_responses: VecDeque<Bytes>,
        /// Number of wake pulses issued
        pub wake_pulses: u32,
        /// Number of I/O resets issued
        pub io_resets: u32,
        /// Whether `reset_io` is available
        pub supports_reset_io: bool,
        /// Total time spent in `delay`
        pub delayed: Duration,
        /// Whether `sleep` was called
        pub asleep: bool,
        pending_wake: Option<Bytes>,
    }

    impl MockTransport {
        /// Create a new mock transport with the given responses
        pub fn new<I, B>(responses: I) -> Self
        where
            I: IntoIterator<Item = B>,
            B: Into<Bytes>,
        {
            Self {
                responses: responses.into_iter().map(Into::into).collect(),
                ..Self::default()
            }
        }

        /// Queue a reply for the next wake pulse
        pub fn with_wake_response(mut self, response: impl Into<Bytes>) -> Self {
            self.wake_responses.push_back(response.into());
            self
        }

        /// Queue a response
        pub fn with_response(mut self, response: impl Into<Bytes>) -> Self {
            self.responses.push_back(response.into());
            self
        }

        /// Enable the I/O reset primitive
        pub const fn with_reset_io(mut self) -> Self {
            self.supports_reset_io = true;
            self
        }
    }

    impl Transport for MockTransport {
        fn do_send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.commands.push(Bytes::copy_from_slice(frame));
            Ok(())
        }

        fn do_receive(&mut self, max_len: usize) -> Result<Bytes, TransportError> {
            if let Some(reply) = self.pending_wake.take() {
                return Ok(reply);
            }
            match self.responses.pop_front() {
                Some(mut reply) => {
                    reply.truncate(max_len);
                    Ok(reply)
                }
                None => Ok(Bytes::new()),
            }
        }

        fn wake_pulse(&mut self) -> Result<(), TransportError> {
            self.wake_pulses += 1;
            self.asleep = false;
            self.pending_wake = self.wake_responses.pop_front();
            Ok(())
        }

        fn delay(&mut self, duration: Duration) {
            self.delayed += duration;
        }

        fn reset_io(&mut self) -> Result<bool, TransportError> {
            if self.supports_reset_io {
                self.io_resets += 1;
            }
            Ok(self.supports_reset_io)
        }

        fn sleep(&mut self) -> Result<(), TransportError> {
            self.asleep = true;
            Ok(())
        }
    }
}
