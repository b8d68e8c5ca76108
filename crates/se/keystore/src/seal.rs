//! At-rest sealing of locally cached passwords
//!
//! AES-256-CBC with ISO 7816-4 padding. The key is `SHA256(slot key)` of a
//! managed slot, so rotating that slot invalidates every sealed password.
//! A sealed blob is the 16-byte IV followed by the ciphertext.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Iso7816};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::record::KEY_LEN;

type Encryptor = cbc::Encryptor<aes::Aes256>;
type Decryptor = cbc::Decryptor<aes::Aes256>;

/// IV length
pub const IV_LEN: usize = 16;

const BLOCK_LEN: usize = 16;

fn sealing_key(slot_key: &[u8; KEY_LEN]) -> Zeroizing<[u8; 32]> {
    Zeroizing::new(Sha256::digest(slot_key).into())
}

/// Seal `password` under a slot key with a fresh random IV
pub fn seal(slot_key: &[u8; KEY_LEN], password: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    rand::rng().fill_bytes(&mut iv);
    seal_with_iv(slot_key, &iv, password)
}

/// Seal `password` under a slot key with the given IV
pub fn seal_with_iv(slot_key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], password: &[u8]) -> Result<Vec<u8>> {
    let key = sealing_key(slot_key);
    let ciphertext = Encryptor::new_from_slices(&key[..], iv)
        .map_err(|_| Error::Seal("key or IV length"))?
        .encrypt_padded_vec_mut::<Iso7816>(password);

    let mut sealed = Vec::with_capacity(IV_LEN + ciphertext.len());
    sealed.extend_from_slice(iv);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Recover a password sealed under a slot key
pub fn open(slot_key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < IV_LEN + BLOCK_LEN || (sealed.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(Error::Seal("length is not IV plus whole blocks"));
    }
    let (iv, ciphertext) = sealed.split_at(IV_LEN);
    let key = sealing_key(slot_key);
    Decryptor::new_from_slices(&key[..], iv)
        .map_err(|_| Error::Seal("key or IV length"))?
        .decrypt_padded_vec_mut::<Iso7816>(ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| Error::Seal("padding check failed"))
}
