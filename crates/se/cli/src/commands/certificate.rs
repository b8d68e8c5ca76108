//! Offline certificate commands

use meterid_cert::{CompressedDate, PartialCertificate, SUBJECT_SERIAL_LEN, Template};
use meterid_pki::rebuild_from;
use meterid_protocol::PublicKey;
use tracing::{debug, info};

use crate::commands::{OutputFormat, RebuildArgs};
use crate::utils::{self, display};

fn parse_partial(value: &str) -> anyhow::Result<PartialCertificate> {
    let bytes = utils::parse_hex("partial", value)?;
    Ok(PartialCertificate::parse(&bytes)?)
}

/// Print the fields of a partial certificate
pub fn decode_command(partial: &str) -> anyhow::Result<()> {
    let partial = parse_partial(partial)?;
    let date = partial.date();
    let template = Template::by_id(partial.template_id())
        .map(|template| template.name.to_string())
        .unwrap_or_else(|_| display::warning(&format!("unknown ({})", partial.template_id())));
    let source = partial
        .serial_source()
        .map(|source| source.to_string())
        .unwrap_or_else(|e| display::warning(&e.to_string()));

    println!(
        "{}",
        display::key_value_box(
            "Partial certificate",
            vec![
                ("Template", template),
                ("Chain id", partial.chain_id().to_string()),
                ("Signer id", format!("{:04X}", partial.signer_id())),
                ("Serial source", source),
                ("Format version", partial.format_version().to_string()),
                (
                    "Issued",
                    format!(
                        "{:04}-{:02}-{:02} {:02}:00 UTC",
                        CompressedDate::BASE_YEAR + u16::from(date.year()),
                        date.month(),
                        date.day(),
                        date.hour()
                    ),
                ),
                ("Validity", format!("{} years", date.expire_years())),
                ("Signature", hex::encode_upper(partial.signature())),
            ],
        )
    );
    Ok(())
}

/// Rebuild the certificate a partial stands for and print it
pub fn rebuild_command(args: &RebuildArgs) -> anyhow::Result<()> {
    let partial = parse_partial(&args.partial)?;
    let subject = PublicKey::new(utils::parse_hex_array("subject", &args.subject)?);
    let issuer = PublicKey::new(utils::parse_hex_array("issuer", &args.issuer)?);

    let serial: Option<[u8; SUBJECT_SERIAL_LEN]> = match &args.subject_serial {
        Some(text) => {
            let Ok(serial) = <[u8; SUBJECT_SERIAL_LEN]>::try_from(text.as_bytes()) else {
                anyhow::bail!("subject serial must be {SUBJECT_SERIAL_LEN} characters");
            };
            Some(serial)
        }
        None => None,
    };

    debug!(template = partial.template_id(), "rebuilding certificate");
    let cert = rebuild_from(&partial, &subject, &issuer, serial.as_ref())?;
    info!(len = cert.as_bytes().len(), "certificate rebuilt");

    match args.format {
        OutputFormat::Pem => print!("{}", utils::pem(cert.as_bytes())),
        OutputFormat::Hex => println!("{}", hex::encode(cert.as_bytes())),
    }
    Ok(())
}
