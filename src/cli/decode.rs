use std::io;

use anyhow::Result;
use clap::Args;
use owo_colors::OwoColorize;
use tracing::instrument;

use crate::advertisement::{AdvertisementData, parse_advertisement};
use crate::cli::OutputFormat;
use crate::cli::command::ModelArg;
use crate::error::{CliConfigError, ProtocolError};

/// Arguments for the `decode` command.
#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Manufacturer payload as hexadecimal bytes.
    payload: String,
    /// Hardware family that sent the advertisement.
    #[arg(long, value_enum, default_value_t = ModelArg::Original)]
    model: ModelArg,
}

/// Executes the `decode` command.
#[instrument(skip(args, out), level = "info", fields(model = ?args.model, ?output_format))]
pub(crate) fn run<W>(args: &DecodeArgs, out: &mut W, output_format: OutputFormat) -> Result<()>
where
    W: io::Write,
{
    let payload = hex::decode(args.payload.trim()).map_err(CliConfigError::from)?;
    let data = parse_advertisement(&payload, args.model.into()).map_err(ProtocolError::from)?;

    match output_format {
        OutputFormat::Pretty => write_pretty(out, &data)?,
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &data)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn write_pretty<W>(out: &mut W, data: &AdvertisementData) -> Result<()>
where
    W: io::Write,
{
    let snapshot = &data.snapshot;
    writeln!(out, "{}", snapshot.bold())?;
    writeln!(out, "  model: {}", snapshot.model)?;
    if let Some(firmware_version) = snapshot.firmware_version {
        writeln!(out, "  firmware: {firmware_version}")?;
    }
    match &data.pairing_token {
        Some(token) => writeln!(out, "  pairing: {} (token {token})", "yes".green())?,
        None => writeln!(out, "  pairing: no")?,
    }
    if data.supports_fan() {
        writeln!(out, "  fan: supported")?;
    }
    Ok(())
}
