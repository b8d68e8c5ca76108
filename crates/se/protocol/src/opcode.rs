//! Opcodes and per-command constants

use std::time::Duration;

/// Command opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Opcode {
    /// Compare a host-computed digest with the device's
    CheckMac,
    /// Fold a slot key into TempKey
    GenDig,
    /// Digest a challenge with a key
    Mac,
    /// Establish TempKey
    Nonce,
    /// Device random number
    Random,
    /// Read a zone
    Read,
    /// ECDSA sign
    Sign,
    /// ECDSA verify
    Verify,
    /// Write a zone
    Write,
}

impl Opcode {
    /// Wire code
    pub const fn code(self) -> u8 {
        match self {
            Self::CheckMac => 0x28,
            Self::GenDig => 0x15,
            Self::Mac => 0x08,
            Self::Nonce => 0x16,
            Self::Random => 0x1B,
            Self::Read => 0x02,
            Self::Sign => 0x41,
            Self::Verify => 0x45,
            Self::Write => 0x12,
        }
    }

    /// Decode a wire code
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x28 => Self::CheckMac,
            0x15 => Self::GenDig,
            0x08 => Self::Mac,
            0x16 => Self::Nonce,
            0x1B => Self::Random,
            0x02 => Self::Read,
            0x41 => Self::Sign,
            0x45 => Self::Verify,
            0x12 => Self::Write,
            _ => return None,
        })
    }

    /// Typical execution time, waited before polling for the response
    pub const fn execution_time(self) -> Duration {
        Duration::from_millis(match self {
            Self::CheckMac => 13,
            Self::GenDig => 11,
            Self::Mac => 14,
            Self::Nonce => 7,
            Self::Random => 23,
            Self::Read => 1,
            Self::Sign => 50,
            Self::Verify => 58,
            Self::Write => 26,
        })
    }
}

/// Nonce: random mode, update the RNG seed
pub const NONCE_MODE_SEED_UPDATE: u8 = 0x00;
/// Nonce: random mode, keep the RNG seed
pub const NONCE_MODE_NO_SEED_UPDATE: u8 = 0x01;
/// Nonce: load the 32-byte input straight into TempKey
pub const NONCE_MODE_PASS_THROUGH: u8 = 0x03;
/// Size of the Nonce input in random mode
pub const NONCE_NUM_IN_SIZE: usize = 20;

/// Random: update the RNG seed
pub const RANDOM_SEED_UPDATE: u8 = 0x00;
/// Random: keep the RNG seed
pub const RANDOM_NO_SEED_UPDATE: u8 = 0x01;

/// Sign: message digest comes from TempKey
pub const SIGN_MODE_EXTERNAL: u8 = 0x80;

/// Verify: public key stored in a slot
pub const VERIFY_MODE_STORED: u8 = 0x00;
/// Verify: public key carried in the command
pub const VERIFY_MODE_EXTERNAL: u8 = 0x02;
/// Verify: key type selector for P-256 in external mode
pub const VERIFY_KEY_P256: u16 = 0x0004;

/// CheckMac mode: block 1 is the slot key, block 2 is TempKey from a random nonce
pub const CHECKMAC_MODE_TEMPKEY: u8 = 0x01;
/// CheckMac data: client challenge, client response, other data
pub const CHECKMAC_DATA_SIZE: usize = 32 + 32 + 13;

/// Zone selector bit for 32-byte reads and writes
pub const ZONE_SIZE_32: u8 = 0x80;

/// Size of a block transferred by Read and Write
pub const BLOCK_SIZE: usize = 32;
