//! Explicit session state threaded through every protocol call
//!
//! The device keeps one TempKey. The host mirrors it here together with the
//! serial number the digests need and the link epoch the mirror belongs to.
//! When the framing layer reports a wake or sleep, the epoch moves on and the
//! mirror is void, as is any key authorization the device was holding.

use crate::digest::TempKey;
use crate::error::{Error, Result};
use crate::slot::Slot;
use crate::types::SerialNumber;

/// Host-side view of one device session
#[derive(Debug)]
pub struct Session {
    serial: SerialNumber,
    epoch: u64,
    temp_key: Option<TempKey>,
    last_random: Option<[u8; 32]>,
    authorized: Option<Slot>,
}

impl Session {
    /// Start a session for a device at a given link epoch
    pub const fn new(serial: SerialNumber, epoch: u64) -> Self {
        Self {
            serial,
            epoch,
            temp_key: None,
            last_random: None,
            authorized: None,
        }
    }

    /// Device serial number
    pub const fn serial(&self) -> &SerialNumber {
        &self.serial
    }

    /// Link epoch the session state belongs to
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current TempKey mirror
    pub fn temp_key(&self) -> Result<&TempKey> {
        self.temp_key.as_ref().ok_or(Error::NoTempKey)
    }

    /// Whether a TempKey is established
    pub const fn has_temp_key(&self) -> bool {
        self.temp_key.is_some()
    }

    /// Take the TempKey out; the operation it feeds consumes it on the device too
    pub fn take_temp_key(&mut self) -> Result<TempKey> {
        self.temp_key.take().ok_or(Error::NoTempKey)
    }

    /// Most recent device randomness
    pub const fn last_random(&self) -> Option<&[u8; 32]> {
        self.last_random.as_ref()
    }

    /// Key the device holds as authorized in this epoch
    pub const fn authorized(&self) -> Option<Slot> {
        self.authorized
    }

    /// Whether device-side state from this epoch is still relied upon
    pub const fn in_sequence(&self) -> bool {
        self.temp_key.is_some() || self.authorized.is_some()
    }

    pub(crate) fn set_authorized(&mut self, slot: Slot) {
        self.authorized = Some(slot);
    }

    pub(crate) fn set_temp_key(&mut self, temp_key: TempKey) {
        self.temp_key = Some(temp_key);
    }

    pub(crate) fn clear_temp_key(&mut self) {
        self.temp_key = None;
    }

    pub(crate) fn set_last_random(&mut self, random: [u8; 32]) {
        self.last_random = Some(random);
    }

    /// Drop all volatile state and bind to a new link epoch
    pub fn reset(&mut self, epoch: u64) {
        self.temp_key = None;
        self.last_random = None;
        self.authorized = None;
        self.epoch = epoch;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::TempKeySource;

    #[test]
    fn test_temp_key_is_consumed_once() {
        let mut session = Session::new(SerialNumber::default(), 1);
        assert_eq!(session.temp_key().unwrap_err(), Error::NoTempKey);

        session.set_temp_key(TempKey::new([1; 32], TempKeySource::Random));
        assert!(session.has_temp_key());
        assert_eq!(session.take_temp_key().unwrap().as_bytes(), &[1; 32]);
        assert_eq!(session.take_temp_key().unwrap_err(), Error::NoTempKey);
    }

    #[test]
    fn test_reset_rebinds_epoch() {
        let mut session = Session::new(SerialNumber::default(), 1);
        session.set_temp_key(TempKey::new([1; 32], TempKeySource::Input));
        session.set_last_random([2; 32]);
        session.set_authorized(Slot::default());
        assert!(session.in_sequence());

        session.reset(4);

        assert_eq!(session.epoch(), 4);
        assert!(!session.has_temp_key());
        assert_eq!(session.authorized(), None);
        assert!(!session.in_sequence());
        assert_eq!(session.last_random(), None);
    }
}
