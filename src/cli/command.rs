use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

use crate::cli::control::ControlArgs;
use crate::cli::decode::DecodeArgs;
use crate::error::{CliConfigError, ProtocolError};
use crate::hw::{FakeDeviceConfig, WriteOutcome};
use crate::model::DeviceModel;
use crate::notification::{NotificationHandler, StateReport};

/// Command-line options for the SNOOZ BLE tool.
#[derive(Debug, Parser)]
#[command(name = "snooz", about = "Control SNOOZ white noise machines over BLE.")]
pub struct Args {
    /// Log level, overriding `RUST_LOG`.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; defaults to pretty on a terminal and JSON otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Uses the in-memory fake device instead of BLE.
    #[arg(long, global = true)]
    fake: bool,
    /// Initial fake device state as a hexadecimal state notification payload.
    #[arg(long, global = true, requires = "fake")]
    fake_state: Option<String>,
    /// Number of writes the fake device rejects before accepting.
    #[arg(long, global = true, requires = "fake")]
    fake_write_rejections: Option<usize>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Creates argument values directly without CLI parsing.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            log_level: None,
            output: None,
            fake: false,
            fake_state: None,
            fake_write_rejections: None,
            command,
        }
    }

    /// Log level requested on the command line.
    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Output format requested on the command line.
    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output
    }

    /// Splits parsed CLI arguments into command and optional fake-client settings.
    ///
    /// ```
    /// use clap::Parser;
    ///
    /// let args = snooz::Args::try_parse_from([
    ///     "snooz", "--fake", "--fake-state", "3201", "decode", "0A0000000000000000320100",
    /// ])?;
    /// let (_command, fake_args) = args.into_command_and_fake_args()?;
    /// assert!(fake_args.is_some());
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the fake state payload is invalid.
    pub fn into_command_and_fake_args(self) -> anyhow::Result<(Command, Option<FakeArgs>)> {
        let Args {
            fake,
            fake_state,
            fake_write_rejections,
            command,
            ..
        } = self;

        let fake_args = if fake {
            let initial_state = fake_state.as_deref().map(parse_state_payload).transpose()?;
            Some(
                FakeArgs::builder()
                    .maybe_initial_state(initial_state)
                    .write_rejections(fake_write_rejections.unwrap_or_default())
                    .build(),
            )
        } else {
            None
        };

        Ok((command, fake_args))
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Clone, Builder)]
pub struct FakeArgs {
    initial_state: Option<StateReport>,
    #[builder(default)]
    write_rejections: usize,
}

impl FakeArgs {
    pub(crate) fn into_device_config(self) -> FakeDeviceConfig {
        let Self {
            initial_state,
            write_rejections,
        } = self;

        FakeDeviceConfig::builder()
            .maybe_initial_state(initial_state)
            .write_outcomes(vec![WriteOutcome::Reject; write_rejections])
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to one device and apply a power or volume change.
    Control(ControlArgs),
    /// Decode a captured manufacturer advertisement payload.
    Decode(DecodeArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Control(_args) => "control",
            Self::Decode(_args) => "decode",
        }
    }
}

/// Log levels accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

/// Output formats accepted by `--output`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, coloured lines.
    Pretty,
    /// One JSON document per result.
    Json,
}

/// Device models selectable on the command line.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum ModelArg {
    Original,
    Pro,
    Breez,
}

impl From<ModelArg> for DeviceModel {
    fn from(model: ModelArg) -> Self {
        match model {
            ModelArg::Original => Self::Original,
            ModelArg::Pro => Self::Pro,
            ModelArg::Breez => Self::Breez,
        }
    }
}

pub(crate) fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}

fn parse_state_payload(value: &str) -> Result<StateReport, CliConfigError> {
    let payload = hex::decode(value)?;
    NotificationHandler::decode(&payload)
        .map_err(|error| CliConfigError::InvalidFakeState(Box::new(ProtocolError::from(error))))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::error::ErrorKind;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::Volume;

    const ADVERTISEMENT: &str = "0A0000000000000000320100";

    #[test]
    fn fake_state_requires_fake_mode() {
        let result = Args::try_parse_from(["snooz", "--fake-state", "3201", "decode", ADVERTISEMENT]);

        let error = result.expect_err("--fake-state should require --fake");
        assert_eq!(ErrorKind::MissingRequiredArgument, error.kind());
    }

    #[test]
    fn fake_mode_builds_fake_settings() -> anyhow::Result<()> {
        let args = Args::try_parse_from([
            "snooz",
            "--fake",
            "--fake-state",
            "3201",
            "--fake-write-rejections",
            "2",
            "decode",
            ADVERTISEMENT,
        ])?;

        let (command, fake_args) = args.into_command_and_fake_args()?;
        assert_matches!(command, Command::Decode(_));
        let fake_args = fake_args.expect("--fake should produce fake settings");
        assert_eq!(
            Some(StateReport {
                is_on: true,
                volume: Volume::new(0x32)?,
            }),
            fake_args.initial_state
        );
        assert_eq!(2, fake_args.write_rejections);
        Ok(())
    }

    #[test]
    fn invalid_fake_state_is_reported() -> anyhow::Result<()> {
        let args = Args::try_parse_from(["snooz", "--fake", "--fake-state", "zz", "decode", "00"])?;

        let error = args
            .into_command_and_fake_args()
            .expect_err("non-hex fake state should be rejected");
        assert_matches!(
            error.downcast_ref::<CliConfigError>(),
            Some(CliConfigError::InvalidHex(_))
        );
        Ok(())
    }

    #[test]
    fn log_level_maps_to_filter() -> anyhow::Result<()> {
        let args = Args::try_parse_from(["snooz", "--log-level", "debug", "decode", "00"])?;
        assert_eq!(
            Some(LevelFilter::DEBUG),
            args.log_level().map(LogLevel::as_level_filter)
        );
        Ok(())
    }
}
