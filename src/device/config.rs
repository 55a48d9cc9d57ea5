use std::time::Duration;

use bon::Builder;

use crate::model::Volume;

const DEFAULT_WRITE_ATTEMPTS: u32 = 5;
const DEFAULT_WRITE_BACKOFF: Duration = Duration::from_millis(50);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RAMP_TICK: Duration = Duration::from_nanos(1_000_000_000 / 6);
const DEFAULT_QUIET_VOLUME: Volume = Volume::saturating(10);

/// Tuning for one device session.
///
/// Retry and pacing values are vendor-tuned; the defaults work with current
/// firmware but every field can be overridden.
///
/// ```
/// use std::time::Duration;
///
/// let config = snooz::SessionConfig::builder()
///     .write_attempts(3)
///     .connect_timeout(Duration::from_secs(10))
///     .build();
/// assert_eq!(3, config.write_attempts());
/// assert_eq!(Duration::from_millis(50), config.write_backoff());
/// ```
#[derive(Debug, Clone, Copy, Eq, PartialEq, Builder)]
pub struct SessionConfig {
    /// Total attempts per frame, including the first.
    #[builder(default = DEFAULT_WRITE_ATTEMPTS)]
    write_attempts: u32,
    /// Pause between attempts after a transient rejection.
    #[builder(default = DEFAULT_WRITE_BACKOFF)]
    write_backoff: Duration,
    /// Deadline for each write attempt.
    #[builder(default = DEFAULT_WRITE_TIMEOUT)]
    write_timeout: Duration,
    /// Deadline for opening and preparing a connection.
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    /// Spacing between volume writes during a transition.
    #[builder(default = DEFAULT_RAMP_TICK)]
    ramp_tick: Duration,
    /// Volume a fade-in starts from when the device was off.
    #[builder(default = DEFAULT_QUIET_VOLUME)]
    quiet_volume: Volume,
    /// Whether a fade-out restores the starting volume after powering off.
    ///
    /// On by default, so a fade-out ends with `SetVolume(0)`, `SetPower(false)`
    /// and then `SetVolume(start)`, and the published snapshot reports the
    /// restored volume with noise off. The next power-on then plays at the
    /// level it faded out from instead of silence. Turn it off to leave the
    /// device at volume 0.
    #[builder(default = true)]
    restore_volume_after_fade_out: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.max(1)
    }

    #[must_use]
    pub fn write_backoff(&self) -> Duration {
        self.write_backoff
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    #[must_use]
    pub fn ramp_tick(&self) -> Duration {
        self.ramp_tick
    }

    #[must_use]
    pub fn quiet_volume(&self) -> Volume {
        self.quiet_volume
    }

    #[must_use]
    pub fn restore_volume_after_fade_out(&self) -> bool {
        self.restore_volume_after_fade_out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_device_tuning() {
        let config = SessionConfig::default();

        assert_eq!(5, config.write_attempts());
        assert_eq!(Duration::from_millis(50), config.write_backoff());
        assert_eq!(Duration::from_secs(5), config.write_timeout());
        assert_eq!(Duration::from_secs(30), config.connect_timeout());
        assert_eq!(10, config.quiet_volume().value());
        assert!(config.restore_volume_after_fade_out());
    }

    #[test]
    fn zero_write_attempts_still_writes_once() {
        let config = SessionConfig::builder().write_attempts(0).build();
        assert_eq!(1, config.write_attempts());
    }
}
