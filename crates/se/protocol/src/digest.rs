//! Host-side mirror of the device's internal hashing.
//!
//! Each function reproduces, byte for byte, the SHA-256 input the device
//! builds for the matching command. A single misplaced byte does not fail
//! loudly: it makes every later authentication mismatch.

use std::fmt;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::opcode::{NONCE_NUM_IN_SIZE, Opcode};
use crate::slot::Slot;
use crate::types::SerialNumber;

/// Size of a TempKey, a key block and a MAC
pub const DIGEST_SIZE: usize = 32;

/// How TempKey was last established
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempKeySource {
    /// Random nonce: device randomness hashed with the host input
    Random,
    /// Pass-through nonce: host input loaded as is
    Input,
}

/// The device's ephemeral hashing accumulator, as derived on the host
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct TempKey {
    value: [u8; DIGEST_SIZE],
    #[zeroize(skip)]
    source: TempKeySource,
}

impl TempKey {
    /// Wrap a derived value
    pub const fn new(value: [u8; DIGEST_SIZE], source: TempKeySource) -> Self {
        Self { value, source }
    }

    /// Raw value
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.value
    }

    /// How the value was established
    pub const fn source(&self) -> TempKeySource {
        self.source
    }
}

impl fmt::Debug for TempKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TempKey")
            .field("value", &"<redacted>")
            .field("source", &self.source)
            .finish()
    }
}

/// TempKey after a random-mode Nonce:
/// `SHA256(RandOut ‖ NumIn ‖ opcode ‖ mode ‖ 0x00)`
pub fn nonce_temp_key(
    rand_out: &[u8; DIGEST_SIZE],
    num_in: &[u8; NONCE_NUM_IN_SIZE],
    mode: u8,
) -> TempKey {
    let mut hasher = Sha256::new();
    hasher.update(rand_out);
    hasher.update(num_in);
    hasher.update([Opcode::Nonce.code(), mode, 0x00]);
    TempKey::new(hasher.finalize().into(), TempKeySource::Random)
}

/// TempKey after GenDig on a data zone slot:
/// `SHA256(key ‖ opcode ‖ zone ‖ key id ‖ SN[8] ‖ SN[0..2] ‖ 0^25 ‖ TempKey)`
pub fn gen_dig(
    temp_key: &TempKey,
    key: &[u8; DIGEST_SIZE],
    zone: u8,
    key_id: u16,
    serial: &SerialNumber,
) -> TempKey {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update([Opcode::GenDig.code(), zone]);
    hasher.update(key_id.to_le_bytes());
    hasher.update([serial.byte(8), serial.byte(0), serial.byte(1)]);
    hasher.update([0u8; 25]);
    hasher.update(temp_key.as_bytes());
    TempKey::new(hasher.finalize().into(), temp_key.source())
}

/// Block selection of a MAC command.
///
/// Only the combinations the host actually issues are modelled; serial-number
/// and OTP inclusion bits are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacMode {
    /// Block 1 slot key, block 2 challenge
    KeyAndChallenge,
    /// Block 1 slot key, block 2 TempKey
    KeyAndTempKey,
    /// Block 1 TempKey, block 2 challenge
    TempKeyAndChallenge,
}

const MAC_MODE_BLOCK2_TEMPKEY: u8 = 0x01;
const MAC_MODE_BLOCK1_TEMPKEY: u8 = 0x02;
const MAC_MODE_SOURCE_INPUT: u8 = 0x04;

impl MacMode {
    /// Whether either block is taken from TempKey
    pub const fn uses_temp_key(self) -> bool {
        !matches!(self, Self::KeyAndChallenge)
    }

    /// Whether the command carries a challenge
    pub const fn uses_challenge(self) -> bool {
        !matches!(self, Self::KeyAndTempKey)
    }

    /// Whether block 1 is the slot key
    pub const fn uses_key(self) -> bool {
        !matches!(self, Self::TempKeyAndChallenge)
    }

    /// Mode byte; the source bit must echo how TempKey was established
    pub const fn mode_byte(self, source: Option<TempKeySource>) -> u8 {
        let base = match self {
            Self::KeyAndChallenge => 0x00,
            Self::KeyAndTempKey => MAC_MODE_BLOCK2_TEMPKEY,
            Self::TempKeyAndChallenge => MAC_MODE_BLOCK1_TEMPKEY,
        };
        match (self.uses_temp_key(), source) {
            (true, Some(TempKeySource::Input)) => base | MAC_MODE_SOURCE_INPUT,
            _ => base,
        }
    }

    /// Decode a mode byte into the block selection and the expected TempKey source
    pub const fn from_mode_byte(byte: u8) -> Result<(Self, Option<TempKeySource>)> {
        let source = if byte & MAC_MODE_SOURCE_INPUT != 0 {
            TempKeySource::Input
        } else {
            TempKeySource::Random
        };
        match byte & !MAC_MODE_SOURCE_INPUT {
            0x00 if byte == 0x00 => Ok((Self::KeyAndChallenge, None)),
            MAC_MODE_BLOCK2_TEMPKEY => Ok((Self::KeyAndTempKey, Some(source))),
            MAC_MODE_BLOCK1_TEMPKEY => Ok((Self::TempKeyAndChallenge, Some(source))),
            _ => Err(Error::UnsupportedMacMode(byte)),
        }
    }
}

/// Thirteen bytes of command metadata hashed into a MAC or CheckMac digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtherData([u8; 13]);

impl OtherData {
    /// Wrap raw bytes
    pub const fn new(bytes: [u8; 13]) -> Self {
        Self(bytes)
    }

    /// The metadata a MAC command with `mode_byte` over `key_id` hashes in.
    ///
    /// Fed to CheckMac, it makes the device recompute exactly the digest a MAC
    /// command would have produced.
    pub const fn for_mac(mode_byte: u8, key_id: u16) -> Self {
        let id = key_id.to_le_bytes();
        Self([
            Opcode::Mac.code(),
            mode_byte,
            id[0],
            id[1],
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
    }

    /// Raw bytes
    pub const fn as_bytes(&self) -> &[u8; 13] {
        &self.0
    }
}

/// Digest shared by MAC and CheckMac:
/// `SHA256(block1 ‖ block2 ‖ OD[0..4] ‖ 0^8 ‖ OD[4..7] ‖ SN[8] ‖ OD[7..11] ‖ SN[0..2] ‖ OD[11..13])`
pub fn mac_digest(
    block1: &[u8; DIGEST_SIZE],
    block2: &[u8; DIGEST_SIZE],
    other_data: &OtherData,
    serial: &SerialNumber,
) -> [u8; DIGEST_SIZE] {
    let od = other_data.as_bytes();
    let mut hasher = Sha256::new();
    hasher.update(block1);
    hasher.update(block2);
    hasher.update(&od[0..4]);
    hasher.update([0u8; 8]);
    hasher.update(&od[4..7]);
    hasher.update([serial.byte(8)]);
    hasher.update(&od[7..11]);
    hasher.update([serial.byte(0), serial.byte(1)]);
    hasher.update(&od[11..13]);
    hasher.finalize().into()
}

/// Inputs of a MAC computation.
///
/// `key` is ignored when block 1 comes from TempKey, `challenge` when block 2 does.
#[derive(Clone, Copy)]
pub struct MacRequest<'a> {
    /// Block selection
    pub mode: MacMode,
    /// Slot whose key is (or would be) block 1
    pub slot: Slot,
    /// Slot key
    pub key: &'a [u8; DIGEST_SIZE],
    /// Challenge
    pub challenge: &'a [u8; DIGEST_SIZE],
}

impl fmt::Debug for MacRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacRequest")
            .field("mode", &self.mode)
            .field("slot", &self.slot)
            .finish_non_exhaustive()
    }
}

impl MacRequest<'_> {
    /// Mode byte sent with the command
    pub fn mode_byte(&self, temp_key: Option<&TempKey>) -> u8 {
        self.mode.mode_byte(temp_key.map(TempKey::source))
    }

    /// The 32-byte response the device must produce
    pub fn digest(&self, temp_key: Option<&TempKey>, serial: &SerialNumber) -> Result<[u8; DIGEST_SIZE]> {
        let (block1, block2) = match (self.mode, temp_key) {
            (MacMode::KeyAndChallenge, _) => (self.key, self.challenge),
            (MacMode::KeyAndTempKey, Some(tk)) => (self.key, tk.as_bytes()),
            (MacMode::TempKeyAndChallenge, Some(tk)) => (tk.as_bytes(), self.challenge),
            (_, None) => return Err(Error::NoTempKey),
        };
        let other = OtherData::for_mac(self.mode_byte(temp_key), self.slot.key_id());
        Ok(mac_digest(block1, block2, &other, serial))
    }
}

/// MAC authorizing an encrypted write:
/// `SHA256(TempKey ‖ opcode ‖ param1 ‖ address ‖ SN[8] ‖ SN[0..2] ‖ 0^25 ‖ plaintext)`
pub fn write_mac(
    temp_key: &TempKey,
    param1: u8,
    address: u16,
    plaintext: &[u8; DIGEST_SIZE],
    serial: &SerialNumber,
) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(temp_key.as_bytes());
    hasher.update([Opcode::Write.code(), param1]);
    hasher.update(address.to_le_bytes());
    hasher.update([serial.byte(8), serial.byte(0), serial.byte(1)]);
    hasher.update([0u8; 25]);
    hasher.update(plaintext);
    hasher.finalize().into()
}

/// XOR a block with TempKey; encrypts and decrypts alike
pub fn xor_with_temp_key(block: &[u8; DIGEST_SIZE], temp_key: &TempKey) -> [u8; DIGEST_SIZE] {
    let mut out = *block;
    out.iter_mut()
        .zip(temp_key.as_bytes())
        .for_each(|(b, k)| *b ^= k);
    out
}

/// SHA-256 of a message
pub fn sha256(message: &[u8]) -> [u8; DIGEST_SIZE] {
    Sha256::digest(message).into()
}
