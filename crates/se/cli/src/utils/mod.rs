//! Argument parsing and output encoding helpers

pub mod display;

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Decode a hex argument, tolerating whitespace and a `0x` prefix
pub fn parse_hex(name: &str, value: &str) -> anyhow::Result<Vec<u8>> {
    let cleaned: String = value.split_whitespace().collect();
    let cleaned = cleaned.strip_prefix("0x").unwrap_or(&cleaned);
    hex::decode(cleaned).with_context(|| format!("{name} is not valid hex"))
}

/// Decode a hex argument of exactly `N` bytes
pub fn parse_hex_array<const N: usize>(name: &str, value: &str) -> anyhow::Result<[u8; N]> {
    let bytes = parse_hex(name, value)?;
    match <[u8; N]>::try_from(bytes.as_slice()) {
        Ok(array) => Ok(array),
        Err(_) => bail!("{name} must be {N} bytes, got {}", bytes.len()),
    }
}

/// Armor DER as a PEM certificate
pub fn pem(der: &[u8]) -> String {
    let encoded = STANDARD.encode(der);
    let mut out = String::from("-----BEGIN CERTIFICATE-----\n");
    for line in encoded.as_bytes().chunks(64) {
        // base64 output is ASCII
        out.push_str(&String::from_utf8_lossy(line));
        out.push('\n');
    }
    out.push_str("-----END CERTIFICATE-----\n");
    out
}
