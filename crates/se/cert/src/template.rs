//! DER templates of the signer and device certificates
//!
//! Each template is a complete certificate with placeholder values at the
//! dynamic elements. Element spans are byte offsets into the template.

use crate::error::{Error, Result};

/// Dynamic element of a certificate template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum Element {
    /// Certificate serial number (INTEGER content)
    #[display("serial number")]
    Serial,
    /// notBefore UTCTime
    #[display("issue date")]
    IssueDate,
    /// notAfter UTCTime
    #[display("expire date")]
    ExpireDate,
    /// Four hex characters of the signer's common name
    #[display("signer id")]
    SignerId,
    /// EUI-64 as sixteen hex characters in the subject common name
    #[display("subject serial")]
    SubjectSerial,
    /// Raw X and Y of the subject public key
    #[display("public key")]
    PublicKey,
    /// Subject key identifier extension value
    #[display("subject key id")]
    SubjectKeyId,
    /// Authority key identifier extension value
    #[display("authority key id")]
    AuthorityKeyId,
    /// Signature BIT STRING, header included; always the last element
    #[display("signature")]
    Signature,
}

/// Byte range of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Offset from the start of the certificate
    pub offset: usize,
    /// Length in bytes
    pub len: usize,
}

impl Span {
    /// Create a span
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// End offset, exclusive
    pub const fn end(&self) -> usize {
        self.offset + self.len
    }
}

/// A certificate template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Template {
    /// Template id as carried in the partial certificate
    pub id: u8,
    /// Name for diagnostics
    pub name: &'static str,
    /// Certificate with placeholder values
    pub der: &'static [u8],
    /// Dynamic elements, ordered by offset
    pub elements: &'static [(Element, Span)],
}

impl Template {
    /// Look up a built-in template by id
    pub fn by_id(id: u8) -> Result<&'static Self> {
        [&SIGNER_TEMPLATE, &DEVICE_TEMPLATE]
            .into_iter()
            .find(|template| template.id == id)
            .ok_or(Error::UnknownTemplate(id))
    }

    /// Span of an element, if the template carries it
    pub fn span(&self, element: Element) -> Option<Span> {
        self.elements
            .iter()
            .find(|(e, _)| *e == element)
            .map(|(_, span)| *span)
    }

    /// Check that the template is well formed: a two-byte-length outer
    /// SEQUENCE, elements in bounds and non-overlapping, and the signature
    /// running to the end of the certificate
    pub fn validate(&self) -> Result<()> {
        if self.der.len() < 8 || self.der[0] != 0x30 || self.der[1] != 0x82 {
            return Err(Error::MalformedTemplate("outer SEQUENCE must use a two byte length"));
        }
        let declared = u16::from_be_bytes([self.der[2], self.der[3]]) as usize;
        if declared + 4 != self.der.len() {
            return Err(Error::MalformedTemplate("outer length does not match template size"));
        }

        let mut previous_end = 0;
        for (_, span) in self.elements {
            if span.offset < previous_end || span.end() > self.der.len() {
                return Err(Error::MalformedTemplate("element out of bounds or overlapping"));
            }
            previous_end = span.end();
        }
        match self.elements.last() {
            Some((Element::Signature, span)) if span.end() == self.der.len() => Ok(()),
            _ => Err(Error::MalformedTemplate("signature must be the last element")),
        }
    }
}

/// Template id of the signer certificate
pub const SIGNER_TEMPLATE_ID: u8 = 0;
/// Template id of the device certificate
pub const DEVICE_TEMPLATE_ID: u8 = 1;

/// Signer certificate, issued by the root CA.
///
/// Subject `O=Meter Trust, CN=Meter Signer XXXX`, CA with path length 0,
/// key usage digitalSignature, keyCertSign and cRLSign, subject and
/// authority key identifiers.
pub static SIGNER_TEMPLATE: Template = Template {
    id: SIGNER_TEMPLATE_ID,
    name: "signer",
    der: &SIGNER_DER,
    elements: &SIGNER_ELEMENTS,
};

/// Device certificate, issued by a signer.
///
/// Subject `O=Meter Trust, CN=<EUI-64>`, end entity, key usage
/// digitalSignature and keyAgreement, authority key identifier only.
pub static DEVICE_TEMPLATE: Template = Template {
    id: DEVICE_TEMPLATE_ID,
    name: "device",
    der: &DEVICE_DER,
    elements: &DEVICE_ELEMENTS,
};

const SIGNER_ELEMENTS: [(Element, Span); 8] = [
    (Element::Serial, Span::new(15, 16)),
    (Element::IssueDate, Span::new(95, 13)),
    (Element::ExpireDate, Span::new(110, 13)),
    (Element::SignerId, Span::new(171, 4)),
    (Element::PublicKey, Span::new(202, 64)),
    (Element::SubjectKeyId, Span::new(317, 20)),
    (Element::AuthorityKeyId, Span::new(350, 20)),
    (Element::Signature, Span::new(382, 75)),
];

const DEVICE_ELEMENTS: [(Element, Span); 8] = [
    (Element::Serial, Span::new(15, 16)),
    (Element::SignerId, Span::new(91, 4)),
    (Element::IssueDate, Span::new(99, 13)),
    (Element::ExpireDate, Span::new(114, 13)),
    (Element::SubjectSerial, Span::new(162, 16)),
    (Element::PublicKey, Span::new(205, 64)),
    (Element::AuthorityKeyId, Span::new(316, 20)),
    (Element::Signature, Span::new(348, 75)),
];

#[rustfmt::skip]
const SIGNER_DER: [u8; 457] = [
    0x30, 0x82, 0x01, 0xC5, 0x30, 0x82, 0x01, 0x6A, 0xA0, 0x03, 0x02, 0x01, 0x02, 0x02, 0x10, 0x40,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x30,
    0x0A, 0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02, 0x30, 0x2E, 0x31, 0x14, 0x30,
    0x12, 0x06, 0x03, 0x55, 0x04, 0x0A, 0x0C, 0x0B, 0x4D, 0x65, 0x74, 0x65, 0x72, 0x20, 0x54, 0x72,
    0x75, 0x73, 0x74, 0x31, 0x16, 0x30, 0x14, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0C, 0x0D, 0x4D, 0x65,
    0x74, 0x65, 0x72, 0x20, 0x52, 0x6F, 0x6F, 0x74, 0x20, 0x43, 0x41, 0x30, 0x1E, 0x17, 0x0D, 0x31,
    0x37, 0x30, 0x31, 0x30, 0x31, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x5A, 0x17, 0x0D, 0x31, 0x37,
    0x30, 0x31, 0x30, 0x31, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x5A, 0x30, 0x32, 0x31, 0x14, 0x30,
    0x12, 0x06, 0x03, 0x55, 0x04, 0x0A, 0x0C, 0x0B, 0x4D, 0x65, 0x74, 0x65, 0x72, 0x20, 0x54, 0x72,
    0x75, 0x73, 0x74, 0x31, 0x1A, 0x30, 0x18, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0C, 0x11, 0x4D, 0x65,
    0x74, 0x65, 0x72, 0x20, 0x53, 0x69, 0x67, 0x6E, 0x65, 0x72, 0x20, 0x46, 0x46, 0x46, 0x46, 0x30,
    0x59, 0x30, 0x13, 0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01, 0x06, 0x08, 0x2A, 0x86,
    0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xA3, 0x66, 0x30, 0x64, 0x30, 0x12,
    0x06, 0x03, 0x55, 0x1D, 0x13, 0x01, 0x01, 0xFF, 0x04, 0x08, 0x30, 0x06, 0x01, 0x01, 0xFF, 0x02,
    0x01, 0x00, 0x30, 0x0E, 0x06, 0x03, 0x55, 0x1D, 0x0F, 0x01, 0x01, 0xFF, 0x04, 0x04, 0x03, 0x02,
    0x01, 0x86, 0x30, 0x1D, 0x06, 0x03, 0x55, 0x1D, 0x0E, 0x04, 0x16, 0x04, 0x14, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x30, 0x1F, 0x06, 0x03, 0x55, 0x1D, 0x23, 0x04, 0x18, 0x30, 0x16, 0x80, 0x14, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x30, 0x0A, 0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02, 0x03, 0x49,
    0x00, 0x30, 0x46, 0x02, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[rustfmt::skip]
const DEVICE_DER: [u8; 423] = [
    0x30, 0x82, 0x01, 0xA3, 0x30, 0x82, 0x01, 0x48, 0xA0, 0x03, 0x02, 0x01, 0x02, 0x02, 0x10, 0x40,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x30,
    0x0A, 0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02, 0x30, 0x32, 0x31, 0x14, 0x30,
    0x12, 0x06, 0x03, 0x55, 0x04, 0x0A, 0x0C, 0x0B, 0x4D, 0x65, 0x74, 0x65, 0x72, 0x20, 0x54, 0x72,
    0x75, 0x73, 0x74, 0x31, 0x1A, 0x30, 0x18, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0C, 0x11, 0x4D, 0x65,
    0x74, 0x65, 0x72, 0x20, 0x53, 0x69, 0x67, 0x6E, 0x65, 0x72, 0x20, 0x46, 0x46, 0x46, 0x46, 0x30,
    0x1E, 0x17, 0x0D, 0x31, 0x37, 0x30, 0x31, 0x30, 0x31, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x5A,
    0x17, 0x0D, 0x31, 0x37, 0x30, 0x31, 0x30, 0x31, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x5A, 0x30,
    0x31, 0x31, 0x14, 0x30, 0x12, 0x06, 0x03, 0x55, 0x04, 0x0A, 0x0C, 0x0B, 0x4D, 0x65, 0x74, 0x65,
    0x72, 0x20, 0x54, 0x72, 0x75, 0x73, 0x74, 0x31, 0x19, 0x30, 0x17, 0x06, 0x03, 0x55, 0x04, 0x03,
    0x0C, 0x10, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30, 0x30,
    0x30, 0x30, 0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01, 0x06,
    0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00, 0x04, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xA3, 0x41, 0x30,
    0x3F, 0x30, 0x0C, 0x06, 0x03, 0x55, 0x1D, 0x13, 0x01, 0x01, 0xFF, 0x04, 0x02, 0x30, 0x00, 0x30,
    0x0E, 0x06, 0x03, 0x55, 0x1D, 0x0F, 0x01, 0x01, 0xFF, 0x04, 0x04, 0x03, 0x02, 0x03, 0x88, 0x30,
    0x1F, 0x06, 0x03, 0x55, 0x1D, 0x23, 0x04, 0x18, 0x30, 0x16, 0x80, 0x14, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x30, 0x0A, 0x06, 0x08, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x04, 0x03, 0x02, 0x03, 0x49, 0x00, 0x30,
    0x46, 0x02, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x02, 0x21, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_are_well_formed() {
        SIGNER_TEMPLATE.validate().unwrap();
        DEVICE_TEMPLATE.validate().unwrap();
    }

    #[test]
    fn test_optional_elements() {
        assert!(SIGNER_TEMPLATE.span(Element::SubjectKeyId).is_some());
        assert!(SIGNER_TEMPLATE.span(Element::SubjectSerial).is_none());
        assert!(DEVICE_TEMPLATE.span(Element::SubjectKeyId).is_none());
        assert_eq!(DEVICE_TEMPLATE.span(Element::SubjectSerial), Some(Span::new(162, 16)));
    }

    #[test]
    fn test_placeholders() {
        let span = SIGNER_TEMPLATE.span(Element::SignerId).unwrap();
        assert_eq!(&SIGNER_TEMPLATE.der[span.offset..span.end()], b"FFFF");
        let span = DEVICE_TEMPLATE.span(Element::IssueDate).unwrap();
        assert_eq!(&DEVICE_TEMPLATE.der[span.offset..span.end()], b"170101000000Z");
    }

    #[test]
    fn test_lookup_by_id() {
        assert_eq!(Template::by_id(1).unwrap().name, "device");
        assert_eq!(Template::by_id(7), Err(Error::UnknownTemplate(7)));
    }

    #[test]
    fn test_validate_rejects_bad_length() {
        let der: &'static [u8] = &[0x30, 0x82, 0x00, 0x05, 0x30, 0x82, 0x00, 0x00];
        let template = Template {
            der,
            ..DEVICE_TEMPLATE
        };
        assert!(template.validate().is_err());
    }
}
