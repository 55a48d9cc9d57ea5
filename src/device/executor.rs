use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep_until, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use super::config::SessionConfig;
use crate::codec::{CommandFrame, FrameCodec};
use crate::command::{Command, CommandStatus};
use crate::error::{InteractionError, ProtocolError};
use crate::hw::ConnectedBleLink;
use crate::model::Volume;
use crate::notification::{NotificationHandler, StateReport};
use crate::protocol::EndpointId;
use crate::transition::VolumeRamp;
use crate::utils::format_hex;

/// Reasons a command stopped before completing.
#[derive(Debug, Error)]
pub(crate) enum ExecutionError {
    #[error("command was superseded")]
    Cancelled,
    #[error("write was not acknowledged within {deadline:?}")]
    Timeout { deadline: Duration },
    #[error("write was rejected {attempts} times")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: InteractionError,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ExecutionError {
    /// Maps the failure onto the status reported to the caller.
    pub(crate) fn status(&self) -> CommandStatus {
        match self {
            Self::Cancelled => CommandStatus::Cancelled,
            Self::Timeout { .. } => CommandStatus::Timeout,
            Self::Protocol(error) if error.is_link_lost() => CommandStatus::NotConnected,
            Self::RetriesExhausted { .. } | Self::Protocol(_) => CommandStatus::Failed,
        }
    }
}

impl From<InteractionError> for ExecutionError {
    fn from(error: InteractionError) -> Self {
        Self::Protocol(error.into())
    }
}

/// One frame being written, owned by the retry loop.
#[derive(Debug)]
struct PendingWrite {
    frame: CommandFrame,
    payload: Vec<u8>,
    attempts: u32,
    deadline: Instant,
}

impl PendingWrite {
    fn new(frame: CommandFrame) -> Self {
        Self {
            frame,
            payload: FrameCodec::encode(&frame),
            attempts: 0,
            deadline: Instant::now(),
        }
    }

    fn begin_attempt(&mut self, write_timeout: Duration) {
        self.attempts += 1;
        self.deadline = Instant::now() + write_timeout;
    }
}

/// Runs one command against an open connection.
///
/// Every write goes through [`CommandExecutor::write`], which checks the
/// cancellation token before each attempt, so nothing belonging to a
/// superseded command is sent once cancellation is observed.
#[derive(Debug)]
pub(crate) struct CommandExecutor {
    link: Arc<dyn ConnectedBleLink>,
    config: SessionConfig,
    cancel: CancellationToken,
}

impl CommandExecutor {
    pub(crate) fn new(
        link: Arc<dyn ConnectedBleLink>,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            link,
            config,
            cancel,
        }
    }

    /// Applies `command`, immediately or as a transition.
    pub(crate) async fn execute(&self, command: Command) -> Result<(), ExecutionError> {
        match command.transition() {
            None => {
                for frame in FrameCodec::frames_for(&command) {
                    self.write(frame).await?;
                }
                Ok(())
            }
            Some(duration) => self.transition(command, duration).await,
        }
    }

    async fn transition(&self, command: Command, duration: Duration) -> Result<(), ExecutionError> {
        let current = self.read_state().await?;
        debug!(
            is_on = current.is_on,
            volume = %current.volume,
            "starting transition from current state"
        );

        match command {
            Command::PowerOn { volume, .. } => {
                let target = volume.unwrap_or(current.volume);
                let start = if current.is_on {
                    current.volume
                } else {
                    let quiet = self.config.quiet_volume();
                    self.write(CommandFrame::SetVolume(quiet)).await?;
                    self.write(CommandFrame::SetPower(true)).await?;
                    quiet
                };
                self.ramp(start, target, duration).await
            }
            Command::PowerOff { .. } => {
                if !current.is_on {
                    return self.write(CommandFrame::SetPower(false)).await;
                }
                self.ramp(current.volume, Volume::MIN, duration).await?;
                self.write(CommandFrame::SetPower(false)).await?;
                if self.config.restore_volume_after_fade_out() && current.volume != Volume::MIN {
                    self.write(CommandFrame::SetVolume(current.volume)).await?;
                }
                Ok(())
            }
            Command::SetVolume { volume, .. } => self.ramp(current.volume, volume, duration).await,
        }
    }

    #[instrument(skip_all, level = "debug", fields(%start, %target, ?duration))]
    async fn ramp(
        &self,
        start: Volume,
        target: Volume,
        duration: Duration,
    ) -> Result<(), ExecutionError> {
        let ramp = VolumeRamp::new(start, target, duration, self.config.ramp_tick())
            .map_err(ProtocolError::from)?;
        let origin = Instant::now();
        let mut written = start;
        let mut elapsed = Duration::ZERO;

        while let Some(step) = ramp.remaining_after(elapsed).first().copied() {
            self.pause_until(origin + step.offset).await?;
            // A slow acknowledgment may have eaten into later steps; jump to
            // the level for the time actually elapsed.
            elapsed = origin.elapsed().max(step.offset);
            let level = ramp.level_at(elapsed);
            if level != written {
                self.write(CommandFrame::SetVolume(level)).await?;
                written = level;
            }
        }

        if written != target {
            self.write(CommandFrame::SetVolume(target)).await?;
        }
        Ok(())
    }

    async fn read_state(&self) -> Result<StateReport, ExecutionError> {
        let payload = self
            .link
            .read_endpoint(EndpointId::ReadStateCharacteristic)
            .await?;
        let report = NotificationHandler::decode(&payload).map_err(ProtocolError::from)?;
        Ok(report)
    }

    /// Writes one frame, retrying transient rejections up to the configured
    /// attempt ceiling.
    async fn write(&self, frame: CommandFrame) -> Result<(), ExecutionError> {
        let mut pending = PendingWrite::new(frame);

        loop {
            if self.cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }

            pending.begin_attempt(self.config.write_timeout());
            trace!(
                frame = ?pending.frame,
                payload = %format_hex(&pending.payload),
                attempt = pending.attempts,
                "writing frame"
            );
            let write = self
                .link
                .write_endpoint(EndpointId::WriteStateCharacteristic, &pending.payload);

            match timeout_at(pending.deadline, write).await {
                Err(_elapsed) => {
                    return Err(ExecutionError::Timeout {
                        deadline: self.config.write_timeout(),
                    });
                }
                Ok(Ok(())) => return Ok(()),
                Ok(Err(error))
                    if error.is_transient() && pending.attempts < self.config.write_attempts() =>
                {
                    debug!(
                        %error,
                        attempt = pending.attempts,
                        "write rejected; retrying after backoff"
                    );
                    self.pause_until(Instant::now() + self.config.write_backoff())
                        .await?;
                }
                Ok(Err(error)) if error.is_transient() => {
                    return Err(ExecutionError::RetriesExhausted {
                        attempts: pending.attempts,
                        source: error,
                    });
                }
                Ok(Err(error)) => return Err(error.into()),
            }
        }
    }

    /// Sleeps until `deadline`, waking early when the command is cancelled.
    async fn pause_until(&self, deadline: Instant) -> Result<(), ExecutionError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(ExecutionError::Cancelled),
            () = sleep_until(deadline) => Ok(()),
        }
    }
}
