//! CRC-16 carried by every frame.
//!
//! Polynomial 0x8005, zero seed, data bits consumed least-significant first
//! and no final reflection. The checksum travels little-endian after the
//! frame it covers.

const POLYNOMIAL: u16 = 0x8005;

/// Continue a CRC-16 computation from `seed` over `data`.
///
/// Feeding a message in pieces gives the same result as feeding it whole:
/// `crc16_update(crc16_update(seed, a), b) == crc16_update(seed, a ‖ b)`.
pub const fn crc16_update(seed: u16, data: &[u8]) -> u16 {
    let mut crc = seed;
    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        let mut shift = 0;
        while shift < 8 {
            let data_bit = (byte >> shift) & 1;
            let crc_bit = ((crc >> 15) & 1) as u8;
            crc <<= 1;
            if data_bit != crc_bit {
                crc ^= POLYNOMIAL;
            }
            shift += 1;
        }
        i += 1;
    }
    crc
}

/// CRC-16 of `data` from a zero seed.
pub const fn crc16(data: &[u8]) -> u16 {
    crc16_update(0, data)
}

/// The two checksum bytes as they appear on the wire.
pub const fn checksum_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_le_bytes()
}
