//! Factory provisioning of a simulated device
//!
//! Software certificate authorities issue the signer and device partial
//! certificates the way a production line would: rebuild the certificate
//! with a placeholder signature, sign the SHA-256 of its TBS region and
//! store only the raw signature with the packed metadata.

use meterid_cert::{CompressedDate, PartialCertificate, SerialSource, Template};
use meterid_protocol::sim::{SimulatedDevice, SoftwareKey};
use meterid_protocol::{METER_CATALOGUE, PublicKey, SlotName};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::layout::CertificateSlot;
use crate::orchestrator::rebuild_from;

/// Secrets and identity a device receives in the factory
#[derive(Debug, Clone)]
pub struct Provisioning {
    /// Root CA key
    pub root: SoftwareKey,
    /// Signer CA key
    pub signer: SoftwareKey,
    /// Signer id carried in the partials
    pub signer_id: u16,
    /// Issue date and validity
    pub date: CompressedDate,
    /// Device identifier, EUI-64 as upper-case hex
    pub identifier: [u8; 16],
    /// Device private key scalar
    pub device_scalar: [u8; 32],
    /// Secret authorizing the device private key
    pub auth_key: [u8; 32],
    /// Secret protecting encrypted writes
    pub write_key: [u8; 32],
}

impl Provisioning {
    /// Fixed identity for demonstrations and tests
    pub fn demo() -> Result<Self> {
        Ok(Self {
            root: SoftwareKey::from_scalar(&[0x52; 32])?,
            signer: SoftwareKey::from_scalar(&[0x53; 32])?,
            signer_id: 0x3A1F,
            date: CompressedDate::new()
                .with_year(24)
                .with_month(6)
                .with_day(15)
                .with_hour(8)
                .with_expire_years(20),
            identifier: *b"001BC50C7100A1B2",
            device_scalar: [0x11; 32],
            auth_key: [0x31; 32],
            write_key: [0x5A; 32],
        })
    }
}

/// Public half of a provisioned identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Root CA public key
    pub root: PublicKey,
    /// Signer CA public key
    pub signer: PublicKey,
    /// Device public key
    pub device: PublicKey,
    /// Contents written to the certificate slot
    pub certificates: CertificateSlot,
}

/// Issue a partial certificate: `issuer` signs the certificate rebuilt for
/// `subject` from the template
pub fn issue(
    template: &Template,
    issuer: &SoftwareKey,
    subject: &PublicKey,
    date: CompressedDate,
    signer_id: u16,
    subject_serial: Option<&[u8; 16]>,
) -> Result<PartialCertificate> {
    let mut partial = PartialCertificate::new(&[0u8; 64], date, signer_id, template.id, SerialSource::PublicKeyHash);
    let issuer_public = issuer.public_key()?;
    let cert = rebuild_from(&partial, subject, &issuer_public, subject_serial)?;
    let digest: [u8; 32] = Sha256::digest(cert.tbs()?).into();
    partial.set_signature(issuer.sign_digest(&digest)?.as_bytes());
    Ok(partial)
}

/// Load keys, secrets and certificates into a simulated device
pub fn provision(sim: &mut SimulatedDevice, provisioning: &Provisioning) -> Result<Provisioned> {
    let catalogue = &METER_CATALOGUE;
    let slot = |name| catalogue.get(name).slot;

    let root = provisioning.root.public_key()?;
    let signer = provisioning.signer.public_key()?;
    let device = sim.load_private_key(slot(SlotName::DevicePrivateKey), &provisioning.device_scalar)?;

    let certificates = CertificateSlot {
        signer: issue(
            &meterid_cert::SIGNER_TEMPLATE,
            &provisioning.root,
            &signer,
            provisioning.date,
            provisioning.signer_id,
            None,
        )?,
        device: issue(
            &meterid_cert::DEVICE_TEMPLATE,
            &provisioning.signer,
            &device,
            provisioning.date,
            provisioning.signer_id,
            Some(&provisioning.identifier),
        )?,
        subject_serial: provisioning.identifier,
    };

    sim.load_slot(slot(SlotName::AuthKey), &provisioning.auth_key)?;
    sim.load_slot(slot(SlotName::WriteKey), &provisioning.write_key)?;
    sim.load_slot(slot(SlotName::RootPublicKey), root.as_bytes())?;
    sim.load_slot(slot(SlotName::SignerPublicKey), signer.as_bytes())?;
    sim.load_slot(slot(SlotName::DevicePublicKey), device.as_bytes())?;
    sim.load_slot(slot(SlotName::Certificates), &certificates.to_bytes())?;

    Ok(Provisioned {
        root,
        signer,
        device,
        certificates,
    })
}
