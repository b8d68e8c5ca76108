//! The little DER the reconstructor needs: element headers, integers, and
//! the signature BIT STRING

use crate::error::{Error, Result};

/// SEQUENCE tag
pub const TAG_SEQUENCE: u8 = 0x30;
/// INTEGER tag
pub const TAG_INTEGER: u8 = 0x02;
/// BIT STRING tag
pub const TAG_BIT_STRING: u8 = 0x03;

/// Tag and length of one DER element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Tag byte
    pub tag: u8,
    /// Bytes taken by tag and length
    pub header_len: usize,
    /// Bytes of content
    pub content_len: usize,
}

impl Header {
    /// Header plus content
    pub const fn total_len(&self) -> usize {
        self.header_len + self.content_len
    }
}

/// Read the element header at the start of `bytes`.
///
/// Short lengths and long lengths of one or two bytes are accepted; a
/// certificate this small never needs more.
pub fn read_header(bytes: &[u8]) -> Result<Header> {
    let [tag, first, rest @ ..] = bytes else {
        return Err(Error::MalformedDer("truncated header"));
    };
    let (header_len, content_len) = match *first {
        len @ 0x00..=0x7F => (2, len as usize),
        0x81 => match rest {
            [len, ..] => (3, *len as usize),
            _ => return Err(Error::MalformedDer("truncated length")),
        },
        0x82 => match rest {
            [hi, lo, ..] => (4, u16::from_be_bytes([*hi, *lo]) as usize),
            _ => return Err(Error::MalformedDer("truncated length")),
        },
        _ => return Err(Error::MalformedDer("unsupported length form")),
    };
    Ok(Header {
        tag: *tag,
        header_len,
        content_len,
    })
}

/// Encode a length field
pub fn encode_length(len: usize, out: &mut Vec<u8>) {
    match len {
        0..=0x7F => out.push(len as u8),
        0x80..=0xFF => out.extend_from_slice(&[0x81, len as u8]),
        _ => {
            out.push(0x82);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
    }
}

/// Encode an unsigned big-endian value as an INTEGER: leading zeros are
/// trimmed and a zero byte is prepended when the top bit is set
pub fn encode_unsigned_integer(value: &[u8], out: &mut Vec<u8>) {
    let start = value
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(value.len().saturating_sub(1));
    let trimmed = &value[start..];
    let pad = trimmed.first().is_some_and(|b| b & 0x80 != 0);

    out.push(TAG_INTEGER);
    encode_length(trimmed.len() + pad as usize, out);
    if pad {
        out.push(0x00);
    }
    out.extend_from_slice(trimmed);
}

/// Encode a raw `R ‖ S` signature as the certificate's signatureValue:
/// a BIT STRING wrapping `SEQUENCE { INTEGER r, INTEGER s }`
pub fn encode_signature(raw: &[u8; 64]) -> Vec<u8> {
    let mut integers = Vec::with_capacity(70);
    encode_unsigned_integer(&raw[..32], &mut integers);
    encode_unsigned_integer(&raw[32..], &mut integers);

    let mut sequence = Vec::with_capacity(72);
    sequence.push(TAG_SEQUENCE);
    encode_length(integers.len(), &mut sequence);
    sequence.extend_from_slice(&integers);

    let mut out = Vec::with_capacity(75);
    out.push(TAG_BIT_STRING);
    // One byte for the unused-bits count
    encode_length(sequence.len() + 1, &mut out);
    out.push(0x00);
    out.extend_from_slice(&sequence);
    out
}

/// The to-be-signed region of a certificate: the first element inside the
/// outer SEQUENCE, header included
pub fn tbs_region(cert: &[u8]) -> Result<&[u8]> {
    let outer = read_header(cert)?;
    if outer.tag != TAG_SEQUENCE || outer.total_len() > cert.len() {
        return Err(Error::MalformedDer("certificate is not a SEQUENCE"));
    }
    let body = &cert[outer.header_len..outer.total_len()];
    let tbs = read_header(body)?;
    if tbs.tag != TAG_SEQUENCE || tbs.total_len() > body.len() {
        return Err(Error::MalformedDer("TBS certificate is not a SEQUENCE"));
    }
    Ok(&body[..tbs.total_len()])
}
