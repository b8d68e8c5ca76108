//! Key rotation against the simulated secure element

use hex_literal::hex;
use meterid_keystore::{Error, KeySource, KeyStore, KeyStoreConfig, MemoryStore, SlotState};
use meterid_protocol::sim::SimulatedDevice;
use meterid_protocol::{Device, METER_CATALOGUE, ProtocolConfig, RetryConfig, SerialNumber, Session, Slot, SlotName};

const AUTH_KEY: [u8; 32] = [0x31; 32];
const WRITE_KEY: [u8; 32] = [0x5A; 32];
const METER_KEY: [u8; 32] = [0x4D; 32];
const NETWORK_KEY: [u8; 32] = [0x4E; 32];
const NEW_KEY: [u8; 32] = [0xA5; 32];

const MANAGED: usize = 4;
const STRIDE: usize = 68;

fn slot(name: SlotName) -> Slot {
    METER_CATALOGUE.get(name).slot
}

fn config() -> KeyStoreConfig {
    KeyStoreConfig::new()
        .with_default(SlotName::AuthKey, AUTH_KEY)
        .with_default(SlotName::WriteKey, WRITE_KEY)
        .with_default(SlotName::MeterKey, METER_KEY)
        .with_default(SlotName::NetworkKey, NETWORK_KEY)
}

fn device() -> (Device<SimulatedDevice>, Session) {
    let mut sim = SimulatedDevice::new(SerialNumber::new(hex!("0123456789abcdefee")), 7);
    sim.load_slot(slot(SlotName::AuthKey), &AUTH_KEY).unwrap();
    sim.load_slot(slot(SlotName::WriteKey), &WRITE_KEY).unwrap();
    sim.load_slot(slot(SlotName::MeterKey), &METER_KEY).unwrap();
    sim.load_slot(slot(SlotName::NetworkKey), &NETWORK_KEY).unwrap();

    let retry = RetryConfig::default().with_receive_polls(2);
    let mut device = Device::new(sim, ProtocolConfig::default().with_retry(retry));
    let session = device.open_session().unwrap();
    (device, session)
}

fn device_slot(device: &Device<SimulatedDevice>, name: SlotName) -> Vec<u8> {
    device.transport().slot_data(slot(name))[..32].to_vec()
}

fn fresh() -> (MemoryStore, KeyStore<MemoryStore>) {
    let flash = MemoryStore::new(MANAGED * STRIDE);
    let store = KeyStore::open(flash.clone(), config()).unwrap();
    (flash, store)
}

#[test]
fn test_first_start_seeds_defaults() {
    let (flash, store) = fresh();
    for (_, state) in store.states() {
        assert_eq!(state, SlotState::Validated(KeySource::FactoryDefault));
    }
    assert!(!store.is_blank(SlotName::MeterKey).unwrap());
    assert_eq!(*store.key(SlotName::MeterKey).unwrap(), METER_KEY);
    assert_eq!(
        store.state(SlotName::MeterKey).unwrap(),
        SlotState::InUse(KeySource::FactoryDefault)
    );

    let restarted = KeyStore::open(flash, config()).unwrap();
    assert_eq!(
        restarted.state(SlotName::WriteKey).unwrap(),
        SlotState::Validated(KeySource::Persisted)
    );
}

#[test]
fn test_replace_then_read_back() {
    let (_, store) = fresh();
    let (mut device, mut session) = device();

    store
        .replace(&mut device, &mut session, SlotName::MeterKey, &NEW_KEY)
        .unwrap();

    assert_eq!(*store.key(SlotName::MeterKey).unwrap(), NEW_KEY);
    let read = store
        .read_device(&mut device, &mut session, SlotName::MeterKey)
        .unwrap();
    assert_eq!(read.as_slice(), &NEW_KEY);
    assert_eq!(device_slot(&device, SlotName::MeterKey), NEW_KEY);
}

#[test]
fn test_unreadable_slot_is_refused() {
    let (_, store) = fresh();
    let (mut device, mut session) = device();
    let err = store
        .read_device(&mut device, &mut session, SlotName::AuthKey)
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(meterid_protocol::Error::Policy(_))));
}

#[test]
fn test_rotating_the_write_key_authorizes_later_writes() {
    let (_, store) = fresh();
    let (mut device, mut session) = device();
    let new_write_key = [0xC3; 32];

    store
        .replace(&mut device, &mut session, SlotName::WriteKey, &new_write_key)
        .unwrap();
    assert_eq!(device_slot(&device, SlotName::WriteKey), new_write_key);

    store
        .replace(&mut device, &mut session, SlotName::NetworkKey, &NEW_KEY)
        .unwrap();
    assert_eq!(device_slot(&device, SlotName::NetworkKey), NEW_KEY);
}

#[test]
fn test_authorize_after_rotation() {
    let (_, store) = fresh();
    let (mut device, mut session) = device();
    assert!(store.authorize(&mut device, &mut session, SlotName::AuthKey).unwrap());

    store
        .replace(&mut device, &mut session, SlotName::AuthKey, &NEW_KEY)
        .unwrap();
    assert!(store.authorize(&mut device, &mut session, SlotName::AuthKey).unwrap());
    assert_eq!(device.transport().auth_valid(), Some(slot(SlotName::AuthKey)));
}

#[test]
fn test_crash_before_device_write_keeps_authoritative_copy() {
    let (flash, store) = fresh();
    let (mut device, mut session) = device();

    // Staging CRC invalidated, then power is lost
    flash.fail_after_writes(1);
    let err = store
        .replace(&mut device, &mut session, SlotName::MeterKey, &NEW_KEY)
        .unwrap_err();
    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(device_slot(&device, SlotName::MeterKey), METER_KEY);

    flash.restore_power();
    let restarted = KeyStore::open(flash, config()).unwrap();
    assert_eq!(*restarted.key(SlotName::MeterKey).unwrap(), METER_KEY);
    assert_eq!(
        restarted.state(SlotName::MeterKey).unwrap(),
        SlotState::InUse(KeySource::Persisted)
    );
}

#[test]
fn test_failed_device_write_leaves_rotation_pending() {
    let (flash, store) = fresh();
    let (mut device, mut session) = device();

    device.transport_mut().faults_mut().failed_writes = 100;
    let err = store
        .replace(&mut device, &mut session, SlotName::MeterKey, &NEW_KEY)
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().starts_with("writing MeterKey to the device: "));
    assert_eq!(store.state(SlotName::MeterKey).unwrap(), SlotState::RotationPending);
    assert_eq!(*store.key(SlotName::MeterKey).unwrap(), METER_KEY);

    let restarted = KeyStore::open(flash, config()).unwrap();
    assert_eq!(restarted.state(SlotName::MeterKey).unwrap(), SlotState::RotationPending);
    assert_eq!(*restarted.key(SlotName::MeterKey).unwrap(), METER_KEY);

    device.transport_mut().faults_mut().failed_writes = 0;
    let mut session = device.open_session().unwrap();
    restarted
        .resume_rotation(&mut device, &mut session, SlotName::MeterKey)
        .unwrap();
    assert_eq!(*restarted.key(SlotName::MeterKey).unwrap(), NEW_KEY);
    assert_eq!(device_slot(&device, SlotName::MeterKey), NEW_KEY);

    assert!(matches!(
        restarted.resume_rotation(&mut device, &mut session, SlotName::MeterKey),
        Err(Error::NoPendingRotation(SlotName::MeterKey))
    ));
}

#[test]
fn test_resume_when_self_authorized_write_already_landed() {
    let (flash, store) = fresh();
    let (mut device, mut session) = device();
    let new_write_key = [0xC3; 32];

    device.transport_mut().faults_mut().failed_writes = 100;
    let err = store
        .replace(&mut device, &mut session, SlotName::WriteKey, &new_write_key)
        .unwrap_err();
    assert!(err.to_string().starts_with("writing WriteKey to the device: "));
    assert_eq!(store.state(SlotName::WriteKey).unwrap(), SlotState::RotationPending);

    // The device took the candidate but the confirmation was lost
    device.transport_mut().faults_mut().failed_writes = 0;
    device
        .transport_mut()
        .load_slot(slot(SlotName::WriteKey), &new_write_key)
        .unwrap();

    let restarted = KeyStore::open(flash, config()).unwrap();
    let mut session = device.open_session().unwrap();
    restarted
        .resume_rotation(&mut device, &mut session, SlotName::WriteKey)
        .unwrap();
    assert_eq!(*restarted.key(SlotName::WriteKey).unwrap(), new_write_key);
    assert_eq!(device_slot(&device, SlotName::WriteKey), new_write_key);
}

#[test]
fn test_transient_write_failures_are_absorbed() {
    let (_, store) = fresh();
    let (mut device, mut session) = device();

    device.transport_mut().faults_mut().failed_writes = 2;
    store
        .replace(&mut device, &mut session, SlotName::MeterKey, &NEW_KEY)
        .unwrap();
    assert_eq!(device_slot(&device, SlotName::MeterKey), NEW_KEY);
}

#[test]
fn test_crash_after_confirmed_write_is_promoted() {
    let (flash, store) = fresh();
    let (mut device, mut session) = device();

    // Two staging writes and the staging CRC validation land; promotion does not
    flash.fail_after_writes(3);
    assert!(store
        .replace(&mut device, &mut session, SlotName::MeterKey, &NEW_KEY)
        .is_err());
    assert_eq!(device_slot(&device, SlotName::MeterKey), NEW_KEY);

    flash.restore_power();
    let restarted = KeyStore::open(flash, config()).unwrap();
    assert_eq!(*restarted.key(SlotName::MeterKey).unwrap(), NEW_KEY);
    assert!(!restarted.is_blank(SlotName::MeterKey).unwrap());
}

#[test]
fn test_torn_authoritative_copy() {
    let (flash, store) = fresh();
    let (mut device, mut session) = device();
    store
        .replace(&mut device, &mut session, SlotName::MeterKey, &NEW_KEY)
        .unwrap();

    // MeterKey is the third managed slot; its staging copy is intact
    flash.corrupt(2 * STRIDE, 0x01);
    let restarted = KeyStore::open(flash.clone(), config()).unwrap();
    assert_eq!(*restarted.key(SlotName::MeterKey).unwrap(), NEW_KEY);

    // NetworkKey never rotated: nothing to recover, the default is seeded
    flash.corrupt(3 * STRIDE, 0x01);
    let restarted = KeyStore::open(flash, config()).unwrap();
    assert_eq!(
        restarted.state(SlotName::NetworkKey).unwrap(),
        SlotState::Validated(KeySource::FactoryDefault)
    );
    assert_eq!(*restarted.key(SlotName::NetworkKey).unwrap(), NETWORK_KEY);
}

#[test]
fn test_readers_never_see_a_half_rotated_slot() {
    let (_, store) = fresh();
    let (mut device, mut session) = device();

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            for _ in 0..200 {
                let key = *store.key(SlotName::MeterKey).unwrap();
                assert!(key == METER_KEY || key == NEW_KEY);
                let state = store.state(SlotName::MeterKey).unwrap();
                assert_ne!(state, SlotState::RotationPending);
            }
        });
        store
            .replace(&mut device, &mut session, SlotName::MeterKey, &NEW_KEY)
            .unwrap();
        reader.join().unwrap();
    });
}

#[test]
fn test_configuration_errors() {
    let flash = MemoryStore::new(MANAGED * STRIDE);
    let err = KeyStore::open(flash.clone(), KeyStoreConfig::new().with_default(SlotName::RootPublicKey, [0; 32]))
        .unwrap_err();
    assert!(matches!(err, Error::Unmanageable { slot: SlotName::RootPublicKey, .. }));

    let err = KeyStore::open(MemoryStore::new(STRIDE), config()).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { .. }));

    let (_, store) = fresh();
    assert_eq!(
        store.key(SlotName::DevicePrivateKey).unwrap_err(),
        Error::NotManaged(SlotName::DevicePrivateKey)
    );
}

#[test]
fn test_sealed_password_round_trip() {
    let (_, store) = fresh();
    let sealed = store.seal_password(SlotName::NetworkKey, b"installer-pin").unwrap();
    assert_eq!(
        store.open_password(SlotName::NetworkKey, &sealed).unwrap().as_slice(),
        b"installer-pin"
    );
}
