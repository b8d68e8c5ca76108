//! Reliable command/response exchange over a [`Transport`]

use tracing::{debug, instrument, trace, warn};

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::packet::{MAX_RESPONSE_SIZE, Packet, Response, Status};
use crate::transport::{Transport, TransportError};

/// Outcome of a wake handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeStatus {
    /// The device was asleep and has reset its volatile state
    WokeFromSleep,
    /// The device was already awake
    AlreadyAwake,
}

/// Outcome of a resynchronization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncOutcome {
    /// The I/O buffer was reset, device state is intact
    InSync,
    /// The link was recovered through a wake; TempKey and authorization state may be gone
    ResyncedWithWake,
}

/// A validated response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// The response
    pub response: Response,
    /// Whether the link went through a wake while producing this response.
    /// Any challenge-response sequence in flight must be abandoned.
    pub resynced: bool,
}

/// Frames commands, validates responses, and recovers the link.
///
/// Every wake that may have cleared device state bumps [`Framer::epoch`], so
/// callers holding session state can tell that it went stale.
#[derive(Debug)]
pub struct Framer<T> {
    transport: T,
    config: RetryConfig,
    epoch: u64,
}

impl<T: Transport> Framer<T> {
    /// Create a framer over the given transport
    pub const fn new(transport: T, config: RetryConfig) -> Self {
        Self {
            transport,
            config,
            epoch: 0,
        }
    }

    /// Counter of device state resets observed on this link
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Retry configuration
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Get a reference to the underlying transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Get a mutable reference to the underlying transport
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport
    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Wake the device
    #[instrument(level = "debug", skip(self))]
    pub fn wake(&mut self) -> Result<WakeStatus> {
        let status = self.wake_handshake()?;
        if status == WakeStatus::WokeFromSleep {
            self.epoch += 1;
        }
        Ok(status)
    }

    /// Put the device to sleep. Its TempKey and authorization state are lost.
    pub fn sleep(&mut self) -> Result<()> {
        self.transport.sleep()?;
        self.epoch += 1;
        debug!("device put to sleep");
        Ok(())
    }

    /// Recover framing after a desynchronized exchange.
    ///
    /// An I/O buffer reset is tried first; if the transport has none, or it
    /// fails, the device is woken again.
    #[instrument(level = "debug", skip(self))]
    pub fn resync(&mut self) -> Result<ResyncOutcome> {
        match self.transport.reset_io() {
            Ok(true) => {
                debug!("I/O buffer reset");
                return Ok(ResyncOutcome::InSync);
            }
            Ok(false) => {}
            Err(e) => debug!(error = %e, "I/O buffer reset failed, waking instead"),
        }

        self.wake_handshake()?;
        self.epoch += 1;
        warn!(epoch = self.epoch, "resynchronized through wake");
        Ok(ResyncOutcome::ResyncedWithWake)
    }

    /// Send a command and return its validated response.
    ///
    /// Success and miscompare statuses are returned to the caller, parse and
    /// execution errors fail immediately, transient statuses resend the command.
    /// Desynchronized replies resync the link and resend. Exhausting the send
    /// budget yields [`Error::CommunicationFailure`].
    #[instrument(level = "trace", skip(self, packet), fields(opcode = packet.opcode()))]
    pub fn exchange(&mut self, packet: &Packet) -> Result<Reply> {
        let frame = packet.to_bytes()?;
        let mut resynced = false;
        let mut last_error = Error::other("command never sent");

        for attempt in 1..=self.config.send_retries {
            let outcome = match self.transport.send(&frame) {
                Ok(()) => {
                    self.transport.delay(packet.execution_time());
                    self.poll_response()
                }
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(Response::Status(status)) => match status {
                    Status::Success | Status::Miscompare => {
                        return Ok(Reply {
                            response: Response::Status(status),
                            resynced,
                        });
                    }
                    Status::ParseError => return Err(Error::DeviceParse),
                    Status::ExecutionError => return Err(Error::DeviceExecution),
                    Status::AfterWake => {
                        // The device had fallen asleep; the frame only woke it.
                        self.epoch += 1;
                        resynced = true;
                        warn!(attempt, "device woke mid-command, resending");
                        last_error = Error::DeviceStatus(status);
                    }
                    status if status.is_transient() => {
                        debug!(attempt, %status, "transient device status, resending");
                        last_error = Error::DeviceStatus(status);
                    }
                    status => return Err(Error::DeviceStatus(status)),
                },
                Ok(response) => return Ok(Reply { response, resynced }),
                Err(e) if e.is_desync() || matches!(e, Error::Transport(_)) => {
                    warn!(attempt, error = %e, "exchange desynchronized");
                    if self.resync()? == ResyncOutcome::ResyncedWithWake {
                        resynced = true;
                    }
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::CommunicationFailure {
            attempts: self.config.send_retries,
            source: Box::new(last_error),
        })
    }

    fn wake_handshake(&mut self) -> Result<WakeStatus> {
        for attempt in 1..=self.config.wake_retries {
            if let Err(e) = self.transport.wake_pulse() {
                debug!(attempt, error = %e, "wake pulse failed");
                continue;
            }
            self.transport.delay(self.config.wake_delay);

            let reply = self
                .transport
                .receive(MAX_RESPONSE_SIZE)
                .map_err(Error::from)
                .and_then(|bytes| Response::from_bytes(&bytes));
            match reply {
                Ok(Response::Status(Status::AfterWake)) => {
                    trace!(attempt, "device woke from sleep");
                    return Ok(WakeStatus::WokeFromSleep);
                }
                Ok(Response::Status(Status::Success)) => {
                    trace!(attempt, "device already awake");
                    return Ok(WakeStatus::AlreadyAwake);
                }
                Ok(other) => debug!(attempt, reply = ?other, "unexpected wake reply"),
                Err(e) => debug!(attempt, error = %e, "no valid wake reply"),
            }
        }

        Err(Error::Unresponsive(self.config.wake_retries))
    }

    fn poll_response(&mut self) -> Result<Response> {
        for _ in 0..self.config.receive_polls {
            match self.transport.receive(MAX_RESPONSE_SIZE) {
                Ok(bytes) if !bytes.is_empty() => return Response::from_bytes(&bytes),
                // Still executing
                Ok(_) | Err(TransportError::Nack) => {
                    self.transport.delay(self.config.poll_interval);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::NoResponse(self.config.receive_polls))
    }
}
