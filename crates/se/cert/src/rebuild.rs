//! Splicing a partial certificate and public keys into a template

use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::der;
use crate::error::{Error, Result};
use crate::partial::{PartialCertificate, SerialSource};
use crate::template::{Element, Span, Template};

/// Length of the EUI-64 subject serial, as upper-case hex
pub const SUBJECT_SERIAL_LEN: usize = 16;

/// A certificate under reconstruction: DER bytes plus the spans of its
/// dynamic elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateDefinition {
    der: Vec<u8>,
    elements: Vec<(Element, Span)>,
}

impl CertificateDefinition {
    /// Start from a template's placeholder certificate
    pub fn from_template(template: &Template) -> Result<Self> {
        template.validate()?;
        Ok(Self {
            der: template.der.to_vec(),
            elements: template.elements.to_vec(),
        })
    }

    /// DER bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    /// Take the DER bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.der
    }

    /// Span of an element, if present
    pub fn span(&self, element: Element) -> Option<Span> {
        self.elements
            .iter()
            .find(|(e, _)| *e == element)
            .map(|(_, span)| *span)
    }

    /// Current bytes of an element, if present
    pub fn element(&self, element: Element) -> Option<&[u8]> {
        self.span(element)
            .and_then(|span| self.der.get(span.offset..span.end()))
    }

    /// The to-be-signed region
    pub fn tbs(&self) -> Result<&[u8]> {
        der::tbs_region(&self.der)
    }

    /// Copy the certificate into a caller buffer, returning its length
    pub fn copy_to(&self, out: &mut [u8]) -> Result<usize> {
        let Some(dest) = out.get_mut(..self.der.len()) else {
            return Err(Error::BufferTooSmall {
                needed: self.der.len(),
                available: out.len(),
            });
        };
        dest.copy_from_slice(&self.der);
        Ok(self.der.len())
    }

    /// Overwrite an element in place.
    ///
    /// Returns `false` when the template does not carry the element.
    pub fn splice(&mut self, element: Element, value: &[u8]) -> Result<bool> {
        let Some(span) = self.span(element) else {
            return Ok(false);
        };
        if value.len() != span.len {
            return Err(Error::ElementSize {
                element,
                expected: span.len,
                found: value.len(),
            });
        }
        self.der[span.offset..span.end()].copy_from_slice(value);
        Ok(true)
    }

    /// Replace the signature element, which may change size, and move the
    /// outer length by the difference
    pub fn set_signature(&mut self, raw: &[u8; 64]) -> Result<()> {
        let Some(index) = self.elements.iter().position(|(e, _)| *e == Element::Signature) else {
            return Err(Error::MalformedTemplate("template has no signature element"));
        };
        let span = self.elements[index].1;
        let encoded = der::encode_signature(raw);

        let outer = u16::from_be_bytes([self.der[2], self.der[3]]) as usize;
        let outer = (outer + encoded.len())
            .checked_sub(span.len)
            .ok_or(Error::MalformedTemplate("outer length underflow"))?;
        let outer = u16::try_from(outer).map_err(|_| Error::MalformedTemplate("outer length overflow"))?;

        self.der.truncate(span.offset);
        self.der.extend_from_slice(&encoded);
        self.der[2..4].copy_from_slice(&outer.to_be_bytes());
        self.elements[index].1 = Span::new(span.offset, encoded.len());
        Ok(())
    }
}

/// Serial number bytes for a serial element of `width` bytes.
///
/// The top bit of the first byte is cleared so the INTEGER is positive, and
/// bit 6 set so it keeps its full width.
pub fn serial_number(
    source: SerialSource,
    width: usize,
    subject_public_key: &[u8; 64],
    partial: &PartialCertificate,
) -> Result<Vec<u8>> {
    let mut serial = match source {
        SerialSource::PublicKeyHash => {
            let digest = Sha256::new()
                .chain_update(subject_public_key)
                .chain_update(partial.date_bytes())
                .finalize();
            digest
                .get(..width)
                .ok_or(Error::SerialTooWide { width })?
                .to_vec()
        }
        SerialSource::SignerId if width == 2 => partial.signer_id().to_be_bytes().to_vec(),
        SerialSource::SignerId => return Err(Error::SerialTooWide { width }),
    };
    if let Some(first) = serial.first_mut() {
        *first &= 0x7F;
        if source == SerialSource::PublicKeyHash {
            *first |= 0x40;
        }
    }
    Ok(serial)
}

/// Key identifier: `SHA1(0x04 ‖ X ‖ Y)`
pub fn key_id(public_key: &[u8; 64]) -> [u8; 20] {
    Sha1::new()
        .chain_update([0x04])
        .chain_update(public_key)
        .finalize()
        .into()
}

/// Signer id as it appears in the signer's common name
pub fn signer_id_text(signer_id: u16) -> [u8; 4] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = [0u8; 4];
    for (i, shift) in [12, 8, 4, 0].into_iter().enumerate() {
        out[i] = HEX[((signer_id >> shift) & 0x0F) as usize];
    }
    out
}

/// Rebuild a full certificate.
///
/// `subject_serial` is required by templates carrying the subject serial
/// element (device certificates) and ignored otherwise.
#[instrument(level = "debug", skip_all, fields(template = template.name))]
pub fn rebuild(
    template: &Template,
    partial: &PartialCertificate,
    subject_public_key: &[u8; 64],
    issuer_public_key: &[u8; 64],
    subject_serial: Option<&[u8; SUBJECT_SERIAL_LEN]>,
) -> Result<CertificateDefinition> {
    let mut cert = CertificateDefinition::from_template(template)?;
    let date = partial.date();

    cert.splice(Element::IssueDate, &date.issue_time()?)?;
    cert.splice(Element::ExpireDate, &date.expire_time()?)?;
    cert.splice(Element::SignerId, &signer_id_text(partial.signer_id()))?;

    if let Some(span) = cert.span(Element::Serial) {
        let serial = serial_number(partial.serial_source()?, span.len, subject_public_key, partial)?;
        cert.splice(Element::Serial, &serial)?;
    }

    cert.splice(Element::PublicKey, subject_public_key)?;
    cert.splice(Element::SubjectKeyId, &key_id(subject_public_key))?;
    cert.splice(Element::AuthorityKeyId, &key_id(issuer_public_key))?;

    if cert.span(Element::SubjectSerial).is_some() {
        let serial = subject_serial.ok_or(Error::MissingElement(Element::SubjectSerial))?;
        cert.splice(Element::SubjectSerial, serial)?;
    }

    cert.set_signature(partial.signature())?;
    debug!(len = cert.as_bytes().len(), "certificate rebuilt");
    Ok(cert)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::date::CompressedDate;
    use crate::der::read_header;
    use crate::template::{DEVICE_TEMPLATE, SIGNER_TEMPLATE};

    const EUI: &[u8; 16] = b"001BC50C7100A1B2";

    fn subject_key() -> [u8; 64] {
        std::array::from_fn(|i| i as u8 + 1)
    }

    fn issuer_key() -> [u8; 64] {
        std::array::from_fn(|i| i as u8 + 0x41)
    }

    fn golden_signature() -> [u8; 64] {
        let mut signature = [0u8; 64];
        for (i, b) in signature[..32].iter_mut().enumerate() {
            *b = 0x80 + i as u8;
        }
        signature[32..35].copy_from_slice(&hex!("00007f"));
        for (i, b) in signature[35..].iter_mut().enumerate() {
            *b = i as u8;
        }
        signature
    }

    fn golden_partial() -> PartialCertificate {
        PartialCertificate::new(
            &golden_signature(),
            CompressedDate::from_bytes(hex!("8a3154")),
            0x3A1F,
            1,
            SerialSource::PublicKeyHash,
        )
    }

    fn device_cert(signature: &[u8; 64]) -> CertificateDefinition {
        let mut partial = golden_partial();
        partial.set_signature(signature);
        rebuild(&DEVICE_TEMPLATE, &partial, &subject_key(), &issuer_key(), Some(EUI)).unwrap()
    }

    #[test]
    fn test_golden_device_certificate() {
        let cert = rebuild(
            &DEVICE_TEMPLATE,
            &golden_partial(),
            &subject_key(),
            &issuer_key(),
            Some(EUI),
        )
        .unwrap();

        let expected = hex!(
            "308201a030820148a0030201020210406ebf7173beb6e5a6ca0c75ecb8a1a5300a06082a8648ce3d0403023032311430"
            "12060355040a0c0b4d65746572205472757374311a301806035504030c114d65746572205369676e6572203341314630"
            "1e170d3137303431323130303030305a170d3337303431323130303030305a303131143012060355040a0c0b4d657465"
            "722054727573743119301706035504030c10303031424335304337313030413142323059301306072a8648ce3d020106"
            "082a8648ce3d030107034200040102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f20212223"
            "2425262728292a2b2c2d2e2f303132333435363738393a3b3c3d3e3f40a341303f300c0603551d130101ff0402300030"
            "0e0603551d0f0101ff040403020388301f0603551d2304183016801425b0dd95305cb890bb105a5ea4db66c01365b6e3"
            "300a06082a8648ce3d0403020346003043022100808182838485868788898a8b8c8d8e8f909192939495969798999a9b"
            "9c9d9e9f021e7f000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c"
        );
        assert_eq!(cert.as_bytes(), &expected);
        assert_eq!(
            cert.element(Element::Signature).unwrap(),
            &expected[348..]
        );
        assert_eq!(
            cert.element(Element::AuthorityKeyId).unwrap(),
            &key_id(&issuer_key())
        );
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let first = device_cert(&golden_signature());
        let second = device_cert(&golden_signature());
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_signature_padding_moves_outer_length() {
        let padded = device_cert(&[0x80; 64]);
        let unpadded = device_cert(&[0x7F; 64]);

        assert_eq!(padded.as_bytes().len(), DEVICE_TEMPLATE.der.len());
        assert_eq!(padded.as_bytes().len() - unpadded.as_bytes().len(), 2);
        for cert in [&padded, &unpadded] {
            let header = read_header(cert.as_bytes()).unwrap();
            assert_eq!(header.total_len(), cert.as_bytes().len());
        }
    }

    #[test]
    fn test_tbs_is_unchanged_by_signature() {
        let a = device_cert(&[0x80; 64]);
        let b = device_cert(&[0x01; 64]);
        assert_eq!(a.tbs().unwrap(), b.tbs().unwrap());
        assert_eq!(a.tbs().unwrap().len(), 0x148 + 4);
    }

    #[test]
    fn test_serial_number_top_bit_clear() {
        let partial = golden_partial();
        for seed in 0..=255u8 {
            let key = [seed; 64];
            let serial = serial_number(SerialSource::PublicKeyHash, 16, &key, &partial).unwrap();
            assert_eq!(serial[0] & 0x80, 0);
        }
        let serial = serial_number(SerialSource::PublicKeyHash, 16, &subject_key(), &partial).unwrap();
        assert_eq!(serial, hex!("406ebf7173beb6e5a6ca0c75ecb8a1a5"));
    }

    #[test]
    fn test_serial_width_limits() {
        let partial = golden_partial();
        assert_eq!(
            serial_number(SerialSource::PublicKeyHash, 33, &subject_key(), &partial),
            Err(Error::SerialTooWide { width: 33 })
        );
        assert_eq!(
            serial_number(SerialSource::SignerId, 2, &subject_key(), &partial).unwrap(),
            hex!("3a1f")
        );
        assert_eq!(
            serial_number(SerialSource::SignerId, 16, &subject_key(), &partial),
            Err(Error::SerialTooWide { width: 16 })
        );
    }

    #[test]
    fn test_signer_certificate_carries_both_key_ids() {
        let cert = rebuild(&SIGNER_TEMPLATE, &golden_partial(), &subject_key(), &issuer_key(), None).unwrap();
        assert_eq!(
            cert.element(Element::SubjectKeyId).unwrap(),
            &hex!("882964a129dc00ad020b246abc573fd559595b97")
        );
        assert_eq!(cert.element(Element::SignerId).unwrap(), b"3A1F");
        assert_eq!(cert.element(Element::IssueDate).unwrap(), b"170412100000Z");
        assert_eq!(cert.element(Element::ExpireDate).unwrap(), b"370412100000Z");
    }

    #[test]
    fn test_device_certificate_needs_subject_serial() {
        let err = rebuild(&DEVICE_TEMPLATE, &golden_partial(), &subject_key(), &issuer_key(), None)
            .unwrap_err();
        assert_eq!(err, Error::MissingElement(Element::SubjectSerial));
    }

    #[test]
    fn test_expiry_out_of_range() {
        let mut bytes = golden_partial().to_bytes();
        // 2030 plus 25 years
        bytes[64..67].copy_from_slice(
            &CompressedDate::new()
                .with_year(30)
                .with_month(1)
                .with_day(1)
                .with_expire_years(25)
                .to_bytes(),
        );
        let partial = PartialCertificate::parse(&bytes).unwrap();
        assert!(matches!(
            rebuild(&DEVICE_TEMPLATE, &partial, &subject_key(), &issuer_key(), Some(EUI)),
            Err(Error::DateOutOfRange(_))
        ));
    }

    #[test]
    fn test_copy_to_buffer() {
        let cert = device_cert(&golden_signature());
        let mut small = [0u8; 100];
        assert_eq!(
            cert.copy_to(&mut small),
            Err(Error::BufferTooSmall {
                needed: 420,
                available: 100
            })
        );
        let mut buf = [0u8; 512];
        assert_eq!(cert.copy_to(&mut buf).unwrap(), 420);
        assert_eq!(&buf[..420], cert.as_bytes());
    }

    #[test]
    fn test_splice_checks_size() {
        let mut cert = CertificateDefinition::from_template(&DEVICE_TEMPLATE).unwrap();
        assert!(!cert.splice(Element::SubjectKeyId, &[0; 20]).unwrap());
        assert_eq!(
            cert.splice(Element::SignerId, b"ABC"),
            Err(Error::ElementSize {
                element: Element::SignerId,
                expected: 4,
                found: 3
            })
        );
    }
}
