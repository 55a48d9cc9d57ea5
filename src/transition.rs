use std::time::Duration;

use thiserror::Error;

use crate::model::Volume;

/// Errors returned while building a volume ramp.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum TransitionError {
    #[error("ramp tick interval must be greater than zero")]
    ZeroTick,
}

/// One scheduled volume write, relative to the start of the ramp.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RampStep {
    /// Time since the ramp started.
    pub offset: Duration,
    /// Volume to write at `offset`.
    pub volume: Volume,
}

/// Linear volume change from `start` to `target` over `duration`, paced at
/// multiples of `tick`.
///
/// Levels move toward the target and only reach it once the full duration has
/// elapsed, so a ramp never overshoots.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct VolumeRamp {
    start: Volume,
    target: Volume,
    duration: Duration,
    tick: Duration,
}

impl VolumeRamp {
    /// Creates a ramp.
    ///
    /// # Errors
    ///
    /// Returns an error when `tick` is zero.
    pub fn new(
        start: Volume,
        target: Volume,
        duration: Duration,
        tick: Duration,
    ) -> Result<Self, TransitionError> {
        if tick.is_zero() {
            return Err(TransitionError::ZeroTick);
        }

        Ok(Self {
            start,
            target,
            duration,
            tick,
        })
    }

    /// Level at the start of the ramp.
    #[must_use]
    pub fn start(&self) -> Volume {
        self.start
    }

    /// Level the ramp ends at.
    #[must_use]
    pub fn target(&self) -> Volume {
        self.target
    }

    /// Total ramp duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Returns the level the ramp should be at after `elapsed`.
    #[must_use]
    pub fn level_at(&self, elapsed: Duration) -> Volume {
        if elapsed >= self.duration {
            return self.target;
        }

        let distance = u128::from(self.distance());
        let moved = distance * elapsed.as_nanos() / self.duration.as_nanos();
        self.moved_by(u8::try_from(moved).unwrap_or(self.distance()))
    }

    /// Returns the full write schedule.
    ///
    /// Steps are strictly increasing in offset, never repeat a level, and the
    /// last step lands on the target at exactly the ramp duration. A ramp
    /// whose start equals its target has no steps.
    ///
    /// ```
    /// use std::time::Duration;
    /// use snooz::{Volume, VolumeRamp};
    ///
    /// let ramp = VolumeRamp::new(
    ///     Volume::new(10)?,
    ///     Volume::new(13)?,
    ///     Duration::from_secs(3),
    ///     Duration::from_millis(500),
    /// )?;
    /// let levels: Vec<u8> = ramp.schedule().iter().map(|step| step.volume.value()).collect();
    /// assert_eq!(vec![11, 12, 13], levels);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    #[must_use]
    pub fn schedule(&self) -> Vec<RampStep> {
        let distance = self.distance();
        let mut steps: Vec<RampStep> = Vec::with_capacity(usize::from(distance));

        for moved in 1..=distance {
            let offset = self.offset_for(moved, distance);
            let volume = self.moved_by(moved);
            match steps.last_mut() {
                Some(last) if last.offset == offset => last.volume = volume,
                _ => steps.push(RampStep { offset, volume }),
            }
        }

        steps
    }

    /// Returns the steps still ahead after `elapsed`, recomputed from the time
    /// remaining so an interrupted ramp resumes at the right level.
    #[must_use]
    pub fn remaining_after(&self, elapsed: Duration) -> Vec<RampStep> {
        self.schedule()
            .into_iter()
            .filter(|step| step.offset > elapsed)
            .collect()
    }

    fn distance(&self) -> u8 {
        self.start.value().abs_diff(self.target.value())
    }

    fn moved_by(&self, moved: u8) -> Volume {
        let moved = moved.min(self.distance());
        let level = if self.target >= self.start {
            self.start.value() + moved
        } else {
            self.start.value() - moved
        };
        Volume::new(level).unwrap_or(self.target)
    }

    // Earliest tick boundary at which `moved` levels have been covered.
    fn offset_for(&self, moved: u8, distance: u8) -> Duration {
        if self.duration.is_zero() {
            return Duration::ZERO;
        }

        let reached = (self.duration.as_nanos() * u128::from(moved)).div_ceil(u128::from(distance));
        let tick = self.tick.as_nanos();
        let quantized = reached.div_ceil(tick).saturating_mul(tick);
        let nanos = u64::try_from(quantized).unwrap_or(u64::MAX);
        Duration::from_nanos(nanos).min(self.duration)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const TICK: Duration = Duration::from_nanos(1_000_000_000 / 6);

    fn volume(value: u8) -> Volume {
        Volume::new(value).expect("test volume should be valid")
    }

    fn ramp(start: u8, target: u8, duration: Duration) -> VolumeRamp {
        VolumeRamp::new(volume(start), volume(target), duration, TICK)
            .expect("test ramp should be valid")
    }

    #[test]
    fn zero_tick_is_rejected() {
        assert_eq!(
            Err(TransitionError::ZeroTick),
            VolumeRamp::new(volume(0), volume(10), Duration::from_secs(1), Duration::ZERO)
        );
    }

    #[rstest]
    #[case(80, 0, Duration::from_secs(10))]
    #[case(10, 100, Duration::from_secs(30))]
    #[case(0, 3, Duration::from_secs(60))]
    #[case(50, 49, Duration::from_millis(100))]
    fn schedule_is_monotonic_and_ends_at_target(
        #[case] start: u8,
        #[case] target: u8,
        #[case] duration: Duration,
    ) {
        let ramp = ramp(start, target, duration);
        let steps = ramp.schedule();

        let last = steps.last().expect("ramp with distance should have steps");
        assert_eq!(volume(target), last.volume);
        assert_eq!(duration, last.offset);

        let mut previous = volume(start);
        let mut previous_offset = Duration::ZERO;
        for step in &steps {
            assert!(step.volume != previous, "levels must not repeat");
            if target < start {
                assert!(step.volume < previous);
            } else {
                assert!(step.volume > previous);
            }
            assert!(step.offset > previous_offset || previous_offset.is_zero());
            assert_eq!(step.volume, ramp.level_at(step.offset));
            previous = step.volume;
            previous_offset = step.offset;
        }
    }

    #[test]
    fn steps_fall_on_tick_boundaries() {
        let steps = ramp(80, 0, Duration::from_secs(10)).schedule();
        for step in &steps[..steps.len() - 1] {
            assert_eq!(0, step.offset.as_nanos() % TICK.as_nanos());
        }
    }

    #[test]
    fn short_ramp_collapses_levels_onto_ticks() {
        let ramp = VolumeRamp::new(
            volume(0),
            volume(100),
            Duration::from_secs(1),
            Duration::from_millis(250),
        )
        .expect("test ramp should be valid");

        let levels: Vec<(u128, u8)> = ramp
            .schedule()
            .iter()
            .map(|step| (step.offset.as_millis(), step.volume.value()))
            .collect();
        assert_eq!(vec![(250, 25), (500, 50), (750, 75), (1000, 100)], levels);
    }

    #[test]
    fn equal_levels_have_no_steps() {
        assert_eq!(Vec::<RampStep>::new(), ramp(40, 40, Duration::from_secs(5)).schedule());
    }

    #[test]
    fn zero_duration_jumps_to_target() {
        let ramp = ramp(20, 60, Duration::ZERO);
        assert_eq!(
            vec![RampStep {
                offset: Duration::ZERO,
                volume: volume(60),
            }],
            ramp.schedule()
        );
        assert_eq!(volume(60), ramp.level_at(Duration::ZERO));
    }

    #[rstest]
    #[case(Duration::ZERO, 80)]
    #[case(Duration::from_secs(5), 40)]
    #[case(Duration::from_millis(9_999), 1)]
    #[case(Duration::from_secs(10), 0)]
    #[case(Duration::from_secs(60), 0)]
    fn level_at_interpolates_toward_target(#[case] elapsed: Duration, #[case] expected: u8) {
        assert_eq!(volume(expected), ramp(80, 0, Duration::from_secs(10)).level_at(elapsed));
    }

    #[test]
    fn remaining_after_resumes_from_elapsed_time() {
        let ramp = ramp(80, 0, Duration::from_secs(10));
        let elapsed = Duration::from_secs(4);
        let remaining = ramp.remaining_after(elapsed);

        let first = remaining.first().expect("ramp should have remaining steps");
        assert!(first.offset > elapsed);
        assert!(first.volume < ramp.level_at(elapsed));
        assert_eq!(
            Some(volume(0)),
            remaining.last().map(|step| step.volume)
        );
        assert!(ramp.remaining_after(Duration::from_secs(10)).is_empty());
    }
}
