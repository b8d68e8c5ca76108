//! Frame checksum helper

use meterid_frame::crc16;

use crate::utils::{self, display};

/// Print the CRC16 of `data` and its little-endian wire bytes
pub fn crc_command(data: &str) -> anyhow::Result<()> {
    let bytes = utils::parse_hex("data", data)?;
    let crc = crc16(&bytes);
    println!(
        "{}",
        display::key_value_box(
            "CRC16",
            vec![
                ("Length", bytes.len().to_string()),
                ("Value", format!("0x{crc:04X}")),
                ("Wire bytes", hex::encode_upper(crc.to_le_bytes())),
            ],
        )
    );
    Ok(())
}
