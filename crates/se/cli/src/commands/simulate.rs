//! Commands running against the in-memory secure element

use anyhow::bail;
use meterid_keystore::record::SLOT_STRIDE;
use meterid_keystore::{KeyStore, KeyStoreConfig, MemoryStore};
use meterid_pki::provision::{Provisioning, provision};
use meterid_pki::{Orchestrator, PkiConfig};
use meterid_protocol::sim::SimulatedDevice;
use meterid_protocol::{Access, Device, METER_CATALOGUE, ProtocolConfig, SerialNumber, SlotName};
use rand::RngCore;
use tracing::info;

use crate::commands::{RotateArgs, SimulateArgs};
use crate::utils::{self, display};

const DEMO_SERIAL: [u8; 9] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF, 0xEE];

const MANAGED: [(SlotName, [u8; 32]); 4] = [
    (SlotName::AuthKey, [0x31; 32]),
    (SlotName::WriteKey, [0x5A; 32]),
    (SlotName::MeterKey, [0x4D; 32]),
    (SlotName::NetworkKey, [0x4E; 32]),
];

/// Provision a simulated device and run the trust gate against it
pub fn simulate_command(args: &SimulateArgs) -> anyhow::Result<()> {
    let provisioning = Provisioning::demo()?;
    let mut sim = SimulatedDevice::new(SerialNumber::new(DEMO_SERIAL), args.seed);
    let identity = provision(&mut sim, &provisioning)?;
    info!(identifier = identity.certificates.identifier(), "device provisioned");

    let faults = sim.faults_mut();
    faults.drop_responses = args.drop_responses;
    faults.corrupt_responses = args.corrupt_responses;
    faults.fall_asleep = args.fall_asleep;
    faults.short_signatures = args.short_signatures;

    let mut config = PkiConfig::default()
        .with_attempts(args.attempts)
        .with_self_test(!args.no_self_test);
    if let Some(prefix) = &args.prefix {
        config = config.with_organization_prefix(prefix.as_str());
    }
    if args.pin_root {
        config = config.with_pinned_root(identity.root);
    }
    let auth_key = match &args.auth_key {
        Some(key) => utils::parse_hex_array("auth key", key)?,
        None => provisioning.auth_key,
    };

    let mut device = Device::new(sim, ProtocolConfig::default());
    let report = Orchestrator::new(&mut device, config).run(&auth_key);

    println!("{}", display::section_title("Trust gate"));
    println!(
        "{}",
        display::key_value_box(
            "Report",
            vec![
                ("Identifier", identity.certificates.identifier().to_string()),
                ("Verdict", report.verdict.to_string()),
                ("Last stage", report.stage.to_string()),
                ("Attempts", report.attempts.to_string()),
                ("Commands", device.transport().commands().to_string()),
            ],
        )
    );
    println!("{}", display::verdict_line(report.verdict));

    if !report.verdict.is_pass() {
        bail!("verification failed at {}", report.stage);
    }
    Ok(())
}

/// Rotate a managed key on a simulated device, then read it back
pub fn rotate_command(args: &RotateArgs) -> anyhow::Result<()> {
    let name = SlotName::from(args.slot);
    let value: [u8; 32] = match &args.key {
        Some(key) => utils::parse_hex_array("key", key)?,
        None => {
            let mut key = [0u8; 32];
            rand::rng().fill_bytes(&mut key);
            key
        }
    };

    let mut sim = SimulatedDevice::new(SerialNumber::new(DEMO_SERIAL), 1);
    let mut config = KeyStoreConfig::new();
    for (slot, default) in MANAGED {
        sim.load_slot(METER_CATALOGUE.get(slot).slot, &default)?;
        config = config.with_default(slot, default);
    }
    sim.faults_mut().failed_writes = args.failed_writes;

    let store = KeyStore::open(MemoryStore::new(MANAGED.len() * SLOT_STRIDE), config)?;
    let mut device = Device::new(sim, ProtocolConfig::default());
    let mut session = device.open_session()?;

    let result = store.replace(&mut device, &mut session, name, &value);

    println!("{}", display::section_title("Key store"));
    let states: Vec<(&str, String)> = store
        .states()
        .into_iter()
        .map(|(slot, state)| (slot_label(slot), state.to_string()))
        .collect();
    println!("{}", display::key_value_box("Slots", states));

    match result {
        Ok(()) => {
            if METER_CATALOGUE.get(name).read != Access::Never {
                let read = store.read_device(&mut device, &mut session, name)?;
                if read.as_slice() != value.as_slice() {
                    bail!("{name} reads back a different key");
                }
                println!("{}", display::success(&format!("{name} rotated and read back")));
            } else {
                println!("{}", display::success(&format!("{name} rotated")));
                println!("{}", display::info("slot is not readable, read-back skipped"));
            }
        }
        Err(e) => {
            println!("{}", display::warning(&format!("rotation of {name} interrupted: {e}")));
            return Err(e.into());
        }
    }
    device.sleep()?;
    Ok(())
}

const fn slot_label(slot: SlotName) -> &'static str {
    match slot {
        SlotName::AuthKey => "auth key",
        SlotName::WriteKey => "write key",
        SlotName::MeterKey => "meter key",
        SlotName::NetworkKey => "network key",
        _ => "other",
    }
}
