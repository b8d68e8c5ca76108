use clap::{Args, Subcommand, ValueEnum};
use meterid_protocol::SlotName;

mod certificate;
mod checksum;
mod simulate;

pub use certificate::*;
pub use checksum::*;
pub use simulate::*;

/// Define subcommands for the CLI
#[derive(Subcommand)]
pub enum Commands {
    /// Checksum bytes the way the device frames them
    Crc {
        /// Data in hex
        #[arg(required = true)]
        data: String,
    },

    /// Show the metadata packed into a 72-byte partial certificate
    Decode {
        /// Partial certificate in hex
        #[arg(required = true)]
        partial: String,
    },

    /// Rebuild a full X.509 certificate from its partial
    Rebuild(RebuildArgs),

    /// Provision a simulated device and run the trust gate against it
    Simulate(SimulateArgs),

    /// Rotate a managed key on a simulated device
    Rotate(RotateArgs),
}

/// Arguments for `rebuild`
#[derive(Args, Debug, Clone)]
pub struct RebuildArgs {
    /// Partial certificate in hex (72 bytes)
    #[arg(long, required = true)]
    pub partial: String,

    /// Subject public key in hex, X ‖ Y (64 bytes)
    #[arg(long, required = true)]
    pub subject: String,

    /// Issuer public key in hex, X ‖ Y (64 bytes)
    #[arg(long, required = true)]
    pub issuer: String,

    /// Subject serial number text (device certificates only)
    #[arg(long)]
    pub subject_serial: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Pem)]
    pub format: OutputFormat,
}

/// Certificate output encodings
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Base64 DER between PEM armor
    Pem,
    /// Hex DER
    Hex,
}

/// Arguments for `simulate`
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Seed of the simulated device's random generator
    #[arg(long, default_value_t = 1)]
    pub seed: u64,

    /// Full verification passes before giving up
    #[arg(long, default_value_t = 3)]
    pub attempts: u32,

    /// Organizational prefix the device identifier must carry
    #[arg(long)]
    pub prefix: Option<String>,

    /// Pin the provisioned root key
    #[arg(long)]
    pub pin_root: bool,

    /// Skip the sign/verify self-test
    #[arg(long)]
    pub no_self_test: bool,

    /// Authorize with this key (hex) instead of the provisioned one
    #[arg(long)]
    pub auth_key: Option<String>,

    /// Commands lost on the bus
    #[arg(long, default_value_t = 0)]
    pub drop_responses: u32,

    /// Responses garbled on the bus
    #[arg(long, default_value_t = 0)]
    pub corrupt_responses: u32,

    /// Commands arriving after the device dozed off
    #[arg(long, default_value_t = 0)]
    pub fall_asleep: u32,

    /// Sign responses cut short
    #[arg(long, default_value_t = 0)]
    pub short_signatures: u32,
}

/// Arguments for `rotate`
#[derive(Args, Debug, Clone)]
pub struct RotateArgs {
    /// Slot to rotate
    #[arg(long, value_enum, default_value_t = ManagedSlot::Meter)]
    pub slot: ManagedSlot,

    /// New key in hex (32 bytes, random when omitted)
    #[arg(long)]
    pub key: Option<String>,

    /// Device writes rejected before one lands
    #[arg(long, default_value_t = 0)]
    pub failed_writes: u32,
}

/// Slots whose keys the key store manages
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedSlot {
    /// Device private key authorization
    Auth,
    /// Encrypted write key
    Write,
    /// Meter application key
    Meter,
    /// Network join key
    Network,
}

impl From<ManagedSlot> for SlotName {
    fn from(slot: ManagedSlot) -> Self {
        match slot {
            ManagedSlot::Auth => Self::AuthKey,
            ManagedSlot::Write => Self::WriteKey,
            ManagedSlot::Meter => Self::MeterKey,
            ManagedSlot::Network => Self::NetworkKey,
        }
    }
}
