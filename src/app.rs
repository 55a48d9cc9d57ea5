use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::Result;
use tracing::instrument;

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat};
use crate::hw::{BtleplugBackend, FakeHardwareClient, HardwareClient};
use crate::telemetry;

/// Creates a hardware client backed by the system Bluetooth adapter.
#[must_use]
pub fn real_hardware_client() -> Arc<dyn HardwareClient> {
    Arc::new(BtleplugBackend::new())
}

/// Creates a hardware client backed by an in-memory fake device.
#[must_use]
pub fn fake_hardware_client(fake_args: FakeArgs) -> Arc<dyn HardwareClient> {
    Arc::new(FakeHardwareClient::new(fake_args.into_device_config()))
}

/// Runs the CLI command with an injected hardware client.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = snooz::Args::try_parse_from([
///     "snooz", "--fake", "control", "--address", "00:00:00:00:AB:CD", "volume", "50",
/// ])?;
/// let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
/// let hardware_client = match maybe_fake_args {
///     Some(fake_args) => snooz::fake_hardware_client(fake_args),
///     None => snooz::real_hardware_client(),
/// };
/// let mut out = Vec::new();
/// snooz::run(command, &mut out, hardware_client, snooz::OutputFormat::Json).await?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command does not
/// succeed, or output writing fails.
pub async fn run<W>(
    command: Command,
    out: &mut W,
    hardware_client: Arc<dyn HardwareClient>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    run_with_log_level(command, out, hardware_client, None, output_format).await
}

/// Runs the CLI command with an explicit telemetry log-level override.
///
/// # Errors
///
/// Returns an error if tracing initialisation fails, the command does not
/// succeed, or output writing fails.
#[instrument(
    skip(command, out, hardware_client),
    level = "info",
    fields(command = command.name(), ?log_level)
)]
pub async fn run_with_log_level<W>(
    command: Command,
    out: &mut W,
    hardware_client: Arc<dyn HardwareClient>,
    log_level: Option<LogLevel>,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "snooz",
        io::stderr().is_terminal(),
        log_level.map(LogLevel::as_level_filter),
    )?;

    match command {
        Command::Control(args) => {
            crate::cli::control::run(hardware_client, &args, out, output_format).await
        }
        Command::Decode(args) => crate::cli::decode::run(&args, out, output_format),
    }
}
