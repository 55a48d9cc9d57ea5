use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_with::{DurationMilliSeconds, serde_as};
use strum_macros::Display;

use crate::model::Volume;

/// A user-level request for one device.
///
/// Commands are immutable; a transition duration of zero behaves exactly like
/// no transition.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Command {
    /// Turn noise on, optionally at a volume and optionally fading in.
    PowerOn {
        volume: Option<Volume>,
        transition: Option<Duration>,
    },
    /// Turn noise off, optionally fading out first.
    PowerOff { transition: Option<Duration> },
    /// Change the volume without touching power.
    SetVolume {
        volume: Volume,
        transition: Option<Duration>,
    },
}

impl Command {
    /// Turns the device on at its current volume.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// let command = snooz::Command::turn_on()
    ///     .with_volume(snooz::Volume::new(30)?)
    ///     .with_transition(Duration::from_secs(10));
    /// assert_eq!("TurnOn, SetVolume(30%), transition 10s", command.to_string());
    /// # Ok::<(), snooz::VolumeError>(())
    /// ```
    #[must_use]
    pub fn turn_on() -> Self {
        Self::PowerOn {
            volume: None,
            transition: None,
        }
    }

    /// Turns the device off.
    #[must_use]
    pub fn turn_off() -> Self {
        Self::PowerOff { transition: None }
    }

    /// Sets the device volume.
    #[must_use]
    pub fn set_volume(volume: Volume) -> Self {
        Self::SetVolume {
            volume,
            transition: None,
        }
    }

    /// Sets the target volume. `PowerOff` always targets silence, so it is
    /// returned unchanged.
    #[must_use]
    pub fn with_volume(self, target: Volume) -> Self {
        match self {
            Self::PowerOn { transition, .. } => Self::PowerOn {
                volume: Some(target),
                transition,
            },
            Self::SetVolume { transition, .. } => Self::SetVolume {
                volume: target,
                transition,
            },
            Self::PowerOff { .. } => self,
        }
    }

    /// Spreads the command over `duration`.
    #[must_use]
    pub fn with_transition(self, duration: Duration) -> Self {
        let transition = Some(duration);
        match self {
            Self::PowerOn { volume, .. } => Self::PowerOn { volume, transition },
            Self::PowerOff { .. } => Self::PowerOff { transition },
            Self::SetVolume { volume, .. } => Self::SetVolume { volume, transition },
        }
    }

    /// Returns the requested volume, if the command carries one.
    #[must_use]
    pub fn volume(&self) -> Option<Volume> {
        match self {
            Self::PowerOn { volume, .. } => *volume,
            Self::PowerOff { .. } => None,
            Self::SetVolume { volume, .. } => Some(*volume),
        }
    }

    /// Returns the non-zero transition duration, if any.
    #[must_use]
    pub fn transition(&self) -> Option<Duration> {
        let transition = match self {
            Self::PowerOn { transition, .. }
            | Self::PowerOff { transition }
            | Self::SetVolume { transition, .. } => *transition,
        };
        transition.filter(|duration| !duration.is_zero())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut operations = Vec::with_capacity(3);
        match self {
            Self::PowerOn { .. } => operations.push("TurnOn".to_string()),
            Self::PowerOff { .. } => operations.push("TurnOff".to_string()),
            Self::SetVolume { .. } => {}
        }
        if let Some(volume) = self.volume() {
            operations.push(format!("SetVolume({volume})"));
        }
        if let Some(transition) = self.transition() {
            operations.push(format!(
                "transition {}",
                humantime::format_duration(transition)
            ));
        }
        f.write_str(&operations.join(", "))
    }
}

/// Final status of one submitted command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Every frame was acknowledged while connected.
    #[strum(to_string = "success")]
    Success,
    /// A newer command or an explicit disconnect superseded this one.
    #[strum(to_string = "cancelled")]
    Cancelled,
    /// The device could not be reached or dropped the connection.
    #[strum(to_string = "not_connected")]
    NotConnected,
    /// A connect or write deadline elapsed.
    #[strum(to_string = "timeout")]
    Timeout,
    /// Writes failed permanently.
    #[strum(to_string = "failed")]
    Failed,
}

/// Result resolved exactly once per submitted command.
#[serde_as]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct CommandResult {
    /// Final status.
    pub status: CommandStatus,
    /// Time from submission to resolution.
    #[serde(rename = "duration_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub duration: Duration,
}

impl CommandResult {
    pub(crate) fn new(status: CommandStatus, duration: Duration) -> Self {
        Self { status, duration }
    }

    /// Returns whether the command completed successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn volume(value: u8) -> Volume {
        Volume::new(value).expect("test volume should be valid")
    }

    #[rstest]
    #[case(Command::turn_on(), "TurnOn")]
    #[case(Command::turn_off(), "TurnOff")]
    #[case(Command::set_volume(volume(40)), "SetVolume(40%)")]
    #[case(
        Command::turn_off().with_transition(Duration::from_secs(90)),
        "TurnOff, transition 1m 30s"
    )]
    fn display_lists_operations(#[case] command: Command, #[case] expected: &str) {
        assert_eq!(expected, command.to_string());
    }

    #[test]
    fn zero_transition_is_treated_as_immediate() {
        let command = Command::turn_on().with_transition(Duration::ZERO);
        assert_eq!(None, command.transition());
    }

    #[test]
    fn power_off_ignores_target_volume() {
        let command = Command::turn_off().with_volume(volume(30));
        assert_eq!(Command::turn_off(), command);
        assert_eq!(None, command.volume());
    }

    #[test]
    fn result_serializes_duration_in_milliseconds() -> anyhow::Result<()> {
        let result = CommandResult::new(CommandStatus::Timeout, Duration::from_millis(1500));
        assert_eq!(
            r#"{"status":"timeout","duration_ms":1500}"#,
            serde_json::to_string(&result)?
        );
        Ok(())
    }
}
