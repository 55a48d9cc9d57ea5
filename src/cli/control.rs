use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use tracing::instrument;

use crate::cli::OutputFormat;
use crate::cli::command::{ModelArg, parse_duration};
use crate::command::{Command, CommandResult};
use crate::device::{SessionConfig, SnoozDevice};
use crate::hw::HardwareClient;
use crate::model::{DeviceIdentity, DeviceSnapshot, PairingToken, Volume};

/// JSON result emitted by a `control` action.
#[derive(Debug, Serialize)]
struct ControlRecord {
    device: String,
    command: String,
    #[serde(flatten)]
    result: CommandResult,
    state: Option<DeviceSnapshot>,
}

/// Arguments for the `control` command.
#[derive(Debug, Args)]
pub struct ControlArgs {
    /// Peripheral address (or platform identifier) of the device.
    #[arg(long)]
    address: String,
    /// Advertised local name, used for display only.
    #[arg(long)]
    name: Option<String>,
    /// Pairing token as 16 hexadecimal characters.
    #[arg(long)]
    token: Option<PairingToken>,
    /// Hardware family of the device.
    #[arg(long, value_enum, default_value_t = ModelArg::Original)]
    model: ModelArg,
    #[command(subcommand)]
    action: ControlAction,
}

impl ControlArgs {
    /// Creates control arguments for one action on the device at `address`.
    ///
    /// ```
    /// use snooz::{ControlAction, ControlArgs};
    ///
    /// let args = ControlArgs::new("00:00:00:00:AB:CD", ControlAction::off());
    /// let _ = args;
    /// ```
    #[must_use]
    pub fn new(address: impl Into<String>, action: ControlAction) -> Self {
        Self {
            address: address.into(),
            name: None,
            token: None,
            model: ModelArg::Original,
            action,
        }
    }

    fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::builder()
            .address(self.address.as_str())
            .maybe_local_name(self.name.clone())
            .model(self.model.into())
            .maybe_token(self.token)
            .build()
    }
}

/// Action performed by the `control` command.
#[derive(Debug, Subcommand)]
pub enum ControlAction {
    /// Turn noise on, optionally at a volume and fading in.
    On {
        /// Volume to play at (0..=100).
        #[arg(long, value_parser = parse_volume)]
        volume: Option<Volume>,
        /// Fade-in duration (e.g. `10s`, `1m`).
        #[arg(long, value_parser = parse_duration)]
        transition: Option<Duration>,
    },
    /// Turn noise off, optionally fading out.
    Off {
        /// Fade-out duration (e.g. `10s`, `1m`).
        #[arg(long, value_parser = parse_duration)]
        transition: Option<Duration>,
    },
    /// Change the volume without touching power.
    Volume {
        /// Volume to set (0..=100).
        #[arg(value_parser = parse_volume)]
        volume: Volume,
        /// Transition duration (e.g. `10s`, `1m`).
        #[arg(long, value_parser = parse_duration)]
        transition: Option<Duration>,
    },
}

impl ControlAction {
    /// Immediate power-off action.
    #[must_use]
    pub fn off() -> Self {
        Self::Off { transition: None }
    }

    fn to_command(&self) -> Command {
        let command = match self {
            Self::On { volume, .. } => {
                let command = Command::turn_on();
                match volume {
                    Some(volume) => command.with_volume(*volume),
                    None => command,
                }
            }
            Self::Off { .. } => Command::turn_off(),
            Self::Volume { volume, .. } => Command::set_volume(*volume),
        };

        match self.transition() {
            Some(duration) => command.with_transition(duration),
            None => command,
        }
    }

    fn transition(&self) -> Option<Duration> {
        match self {
            Self::On { transition, .. }
            | Self::Off { transition }
            | Self::Volume { transition, .. } => *transition,
        }
    }
}

fn parse_volume(value: &str) -> Result<Volume, String> {
    let parsed = value.parse::<u8>().map_err(|error| error.to_string())?;
    Volume::new(parsed).map_err(|error| error.to_string())
}

/// Executes the `control` command.
#[instrument(skip(client, args, out), level = "info", fields(action = ?args.action, ?output_format))]
pub(crate) async fn run<W>(
    client: Arc<dyn HardwareClient>,
    args: &ControlArgs,
    out: &mut W,
    output_format: OutputFormat,
) -> Result<()>
where
    W: io::Write,
{
    let identity = args.identity();
    let device_name = identity.display_name();
    let device = SnoozDevice::spawn(identity, client, SessionConfig::default());

    let command = args.action.to_command();
    let result = device.execute(command).await;
    let state = device.current_state();
    device.disconnect().await;

    let record = ControlRecord {
        device: device_name,
        command: command.to_string(),
        result,
        state,
    };
    write_record(out, &record, output_format)?;

    if !result.is_success() {
        anyhow::bail!("command finished with status `{}`", result.status);
    }
    Ok(())
}

fn write_record<W>(out: &mut W, record: &ControlRecord, output_format: OutputFormat) -> Result<()>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            let marker = if record.result.is_success() {
                "✓".green().to_string()
            } else {
                "✗".red().to_string()
            };
            writeln!(
                out,
                "{marker} {}: {} ({}, {:?})",
                record.device.bold(),
                record.command,
                record.result.status,
                record.result.duration,
            )?;
            if let Some(state) = record.state {
                writeln!(out, "  {state}")?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, record)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
