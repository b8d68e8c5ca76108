//! The device trust gate
//!
//! One pass walks root → signer → device and ends with a sign/verify round
//! trip. Transient failures restart the whole pass on a fresh session;
//! everything else fails the gate at once.

use meterid_cert::{CertificateDefinition, PartialCertificate, Template, rebuild};
use meterid_protocol::{Device, KeyRef, PublicKey, Session, Signature, SlotName, Transport, VerifyKey};
use rand::RngCore;
use tracing::{debug, info, instrument, warn};

use crate::config::PkiConfig;
use crate::error::{Error, Result, ResultExt, Verdict};
use crate::layout::{CERTIFICATE_SLOT_LEN, CertificateSlot};
use crate::stage::Stage;

/// Outcome of [`Orchestrator::run`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Pass or fail
    pub verdict: Verdict,
    /// Last stage entered
    pub stage: Stage,
    /// Passes made
    pub attempts: u32,
}

/// Public keys read from the device
#[derive(Debug, Clone, Copy)]
struct ChainKeys {
    root: PublicKey,
    signer: PublicKey,
    device: PublicKey,
}

/// Drives a device through the verification stages
#[derive(Debug)]
pub struct Orchestrator<'a, T> {
    device: &'a mut Device<T>,
    config: PkiConfig,
    stage: Stage,
}

impl<'a, T: Transport> Orchestrator<'a, T> {
    /// Prepare a verification of `device`
    pub const fn new(device: &'a mut Device<T>, config: PkiConfig) -> Self {
        Self {
            device,
            config,
            stage: Stage::Idle,
        }
    }

    /// Stage reached so far
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Run the gate. `auth_key` is the host's copy of the key authorizing the
    /// device private key.
    #[instrument(level = "info", skip_all)]
    pub fn run(&mut self, auth_key: &[u8; 32]) -> Report {
        let attempts = self.config.attempts.max(1);
        let mut attempt = 1;
        let verdict = loop {
            self.stage = Stage::Idle;
            match self.attempt(auth_key) {
                Ok(()) => break Verdict::Pass,
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(attempt, stage = %self.stage, error = %e, "verification interrupted, retrying");
                    attempt += 1;
                }
                Err(e) => {
                    warn!(stage = %self.stage, error = %e, "verification failed");
                    break Verdict::Fail(e.reason());
                }
            }
        };

        if let Err(e) = self.device.sleep() {
            debug!(error = %e, "device did not go to sleep");
        }
        info!(%verdict, attempts = attempt, "trust gate closed");
        Report {
            verdict,
            stage: self.stage,
            attempts: attempt,
        }
    }

    fn enter(&mut self, stage: Stage) {
        debug!(%stage, "entering");
        self.stage = stage;
    }

    fn attempt(&mut self, auth_key: &[u8; 32]) -> Result<()> {
        let catalogue = self.device.catalogue();
        let auth = KeyRef::new(catalogue.get(SlotName::AuthKey).slot, auth_key);

        self.enter(Stage::AuthorizeHost);
        let mut session = self.device.open_session()?;
        self.device
            .check_configuration()
            .map_err(Error::from)
            .context("checking configuration zone")?;
        if !self.device.key_authorization(&mut session, auth)? {
            return Err(Error::HostNotAuthorized);
        }

        self.enter(Stage::ReadKeys);
        let (keys, slot) = self.read_keys(&mut session)?;

        self.enter(Stage::RebuildSignerCert);
        let signer_cert = rebuild_from(&slot.signer, &keys.signer, &keys.root, None)?;

        self.enter(Stage::VerifySignerCert);
        let root_slot = catalogue.get(SlotName::RootPublicKey).slot;
        self.verify_certificate(&mut session, VerifyKey::Stored(root_slot), &signer_cert, &slot.signer)?;

        self.enter(Stage::RebuildDeviceCert);
        let device_cert = rebuild_from(&slot.device, &keys.device, &keys.signer, Some(&slot.subject_serial))?;

        self.enter(Stage::VerifyDeviceCert);
        let signer_slot = catalogue.get(SlotName::SignerPublicKey).slot;
        self.verify_certificate(&mut session, VerifyKey::Stored(signer_slot), &device_cert, &slot.device)?;

        if self.config.self_test {
            self.enter(Stage::SelfTestSignVerify);
            self.self_test(&mut session, auth)?;
        }

        self.enter(Stage::Done);
        Ok(())
    }

    fn read_keys(&mut self, session: &mut Session) -> Result<(ChainKeys, CertificateSlot)> {
        let catalogue = self.device.catalogue();
        let keys = ChainKeys {
            root: self.device.public_key(session, catalogue.get(SlotName::RootPublicKey).slot)?,
            signer: self.device.public_key(session, catalogue.get(SlotName::SignerPublicKey).slot)?,
            device: self.device.public_key(session, catalogue.get(SlotName::DevicePublicKey).slot)?,
        };
        if let Some(pinned) = &self.config.pinned_root {
            if *pinned != keys.root {
                return Err(Error::UntrustedRoot);
            }
        }

        let bytes = self
            .device
            .read(session, catalogue.get(SlotName::Certificates).slot, CERTIFICATE_SLOT_LEN, None)
            .map_err(Error::from)
            .context("reading certificate slot")?;
        let slot = CertificateSlot::parse(&bytes)?;
        slot.check_prefix(&self.config.organization_prefix)?;
        debug!(identifier = slot.identifier(), "device identity");
        Ok((keys, slot))
    }

    /// Have the device verify the partial's signature over the rebuilt TBS
    fn verify_certificate(
        &mut self,
        session: &mut Session,
        key: VerifyKey<'_>,
        cert: &CertificateDefinition,
        partial: &PartialCertificate,
    ) -> Result<()> {
        let tbs = cert.tbs()?;
        let signature = Signature::new(*partial.signature());
        if self.device.verify(session, key, tbs, false, &signature)? {
            debug!(stage = %self.stage, "certificate signature verified");
            Ok(())
        } else {
            Err(Error::SignatureRejected(self.stage))
        }
    }

    /// Sign a fresh host challenge with the device key and verify it against
    /// the device public key slot
    fn self_test(&mut self, session: &mut Session, auth: KeyRef<'_>) -> Result<()> {
        let catalogue = self.device.catalogue();
        let mut challenge = [0u8; 32];
        rand::rng().fill_bytes(&mut challenge);

        let signature = self.device.sign(
            session,
            catalogue.get(SlotName::DevicePrivateKey).slot,
            Some(auth),
            &challenge,
            false,
        )?;
        let public_slot = catalogue.get(SlotName::DevicePublicKey).slot;
        if self
            .device
            .verify(session, VerifyKey::Stored(public_slot), &challenge, false, &signature)?
        {
            Ok(())
        } else {
            Err(Error::SelfTestFailed)
        }
    }
}

/// Rebuild a certificate from its partial, picking the template it names
pub fn rebuild_from(
    partial: &PartialCertificate,
    subject: &PublicKey,
    issuer: &PublicKey,
    subject_serial: Option<&[u8; 16]>,
) -> Result<CertificateDefinition> {
    let template = Template::by_id(partial.template_id())?;
    Ok(rebuild(
        template,
        partial,
        subject.as_bytes(),
        issuer.as_bytes(),
        subject_serial,
    )?)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use meterid_protocol::sim::{SimulatedDevice, SoftwareKey};
    use meterid_protocol::{METER_CATALOGUE, ProtocolConfig, RetryConfig, SerialNumber, Slot};
    use sha2::Digest;

    use super::*;
    use crate::error::FailReason;
    use crate::provision::{Provisioned, Provisioning, provision};

    fn slot(name: SlotName) -> Slot {
        METER_CATALOGUE.get(name).slot
    }

    fn provisioned() -> (Device<SimulatedDevice>, Provisioning, Provisioned) {
        let mut sim = SimulatedDevice::new(SerialNumber::new(hex!("0123456789abcdefee")), 3);
        let provisioning = Provisioning::demo().unwrap();
        let identity = provision(&mut sim, &provisioning).unwrap();
        let retry = RetryConfig::default().with_receive_polls(2);
        let device = Device::new(sim, ProtocolConfig::default().with_retry(retry));
        (device, provisioning, identity)
    }

    fn run(device: &mut Device<SimulatedDevice>, config: PkiConfig, auth_key: &[u8; 32]) -> Report {
        Orchestrator::new(device, config).run(auth_key)
    }

    /// Rewrite part of the certificate slot on the simulated device
    fn tamper(device: &mut Device<SimulatedDevice>, offset: usize, bytes: &[u8]) {
        let certs = slot(SlotName::Certificates);
        let mut data = device.transport().slot_data(certs).to_vec();
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        device.transport_mut().load_slot(certs, &data[..CERTIFICATE_SLOT_LEN]).unwrap();
    }

    #[test]
    fn test_provisioned_device_passes() {
        let (mut device, provisioning, _) = provisioned();
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(
            report,
            Report {
                verdict: Verdict::Pass,
                stage: Stage::Done,
                attempts: 1
            }
        );
        assert!(!device.transport().is_awake());
    }

    #[test]
    fn test_pinned_root() {
        let (mut device, provisioning, identity) = provisioned();
        let config = PkiConfig::default().with_pinned_root(identity.root);
        assert!(run(&mut device, config, &provisioning.auth_key).verdict.is_pass());

        let stranger = SoftwareKey::from_scalar(&[0x77; 32]).unwrap().public_key().unwrap();
        let report = run(
            &mut device,
            PkiConfig::default().with_pinned_root(stranger),
            &provisioning.auth_key,
        );
        assert_eq!(report.verdict, Verdict::Fail(FailReason::UntrustedRoot));
        assert_eq!(report.stage, Stage::ReadKeys);
    }

    #[test]
    fn test_foreign_identifier() {
        let (mut device, provisioning, _) = provisioned();
        let config = PkiConfig::default().with_organization_prefix("0050C2");
        let report = run(&mut device, config, &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::Identity));
        assert_eq!(report.stage, Stage::ReadKeys);
    }

    #[test]
    fn test_wrong_host_key() {
        let (mut device, _, _) = provisioned();
        let report = run(&mut device, PkiConfig::default(), &[0x99; 32]);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::Authentication));
        assert_eq!(report.stage, Stage::AuthorizeHost);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_configuration_mismatch() {
        let (mut device, provisioning, _) = provisioned();
        device
            .transport_mut()
            .config_zone_mut()
            .set_key_config(slot(SlotName::RootPublicKey), 0x0000);
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::Configuration));
        assert_eq!(report.stage, Stage::AuthorizeHost);
        assert_eq!(report.attempts, 1);

        let err = Orchestrator::new(&mut device, PkiConfig::default())
            .attempt(&provisioning.auth_key)
            .unwrap_err();
        assert!(err.to_string().starts_with("checking configuration zone: "));
        assert!(matches!(
            err.root(),
            Error::Protocol(meterid_protocol::Error::Configuration { .. })
        ));
        assert_eq!(err.reason(), FailReason::Configuration);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_context_keeps_retry_classification() {
        let err = Error::from(meterid_protocol::Error::SessionLost).with_context("reading certificate slot");
        assert!(err.is_retryable());
        assert_eq!(err.reason(), FailReason::Communication);
        assert_eq!(err.root(), &Error::Protocol(meterid_protocol::Error::SessionLost));
    }

    #[test]
    fn test_tampered_signer_certificate() {
        let (mut device, provisioning, _) = provisioned();
        // Signer id of the signer partial
        tamper(&mut device, 67, &[0x3A, 0x20]);
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::SignerCertificate));
        assert_eq!(report.stage, Stage::VerifySignerCert);
    }

    #[test]
    fn test_tampered_device_certificate() {
        let (mut device, provisioning, _) = provisioned();
        // Signer id of the device partial
        tamper(&mut device, 72 + 67, &[0x3A, 0x20]);
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::DeviceCertificate));
        assert_eq!(report.stage, Stage::VerifyDeviceCert);
    }

    #[test]
    fn test_substituted_device_key() {
        let (mut device, provisioning, _) = provisioned();
        let other = SoftwareKey::from_scalar(&[0x12; 32]).unwrap().public_key().unwrap();
        device
            .transport_mut()
            .load_slot(slot(SlotName::DevicePublicKey), other.as_bytes())
            .unwrap();
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::DeviceCertificate));
    }

    #[test]
    fn test_unknown_template() {
        let (mut device, provisioning, _) = provisioned();
        // Template id nibble of the device partial
        tamper(&mut device, 72 + 69, &[0x70]);
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::Encoding));
        assert_eq!(report.stage, Stage::RebuildDeviceCert);
    }

    #[test]
    fn test_transient_failure_restarts_the_pass() {
        let (mut device, provisioning, _) = provisioned();
        // Every send of the first command is lost
        device.transport_mut().faults_mut().drop_responses = 3;
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.attempts, 2);
    }

    #[test]
    fn test_unreachable_device() {
        let (mut device, provisioning, _) = provisioned();
        device.transport_mut().faults_mut().drop_responses = u32::MAX;
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Fail(FailReason::Communication));
        assert_eq!(report.attempts, 3);
    }

    #[test]
    fn test_short_signature_quirk_is_absorbed() {
        let (mut device, provisioning, _) = provisioned();
        device.transport_mut().faults_mut().short_signatures = 1;
        let report = run(&mut device, PkiConfig::default(), &provisioning.auth_key);
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_without_self_test() {
        let (mut device, provisioning, _) = provisioned();
        let before = device.transport().commands();
        let config = PkiConfig::default().with_self_test(false);
        let report = run(&mut device, config, &provisioning.auth_key);
        assert_eq!(report.stage, Stage::Done);
        assert!(report.verdict.is_pass());
        assert!(device.transport().commands() > before);
    }

    #[test]
    fn test_rebuild_matches_issued_signature() {
        let provisioning = Provisioning::demo().unwrap();
        let mut sim = SimulatedDevice::new(SerialNumber::default(), 1);
        let identity = provision(&mut sim, &provisioning).unwrap();

        let cert = rebuild_from(
            &identity.certificates.device,
            &identity.device,
            &identity.signer,
            Some(&identity.certificates.subject_serial),
        )
        .unwrap();
        let digest: [u8; 32] = sha2::Sha256::digest(cert.tbs().unwrap()).into();
        let signature = Signature::new(*identity.certificates.device.signature());
        assert!(SoftwareKey::verify_digest(&identity.signer, &digest, &signature));
    }
}
