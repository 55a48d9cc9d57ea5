use thiserror::Error;
use tracing::instrument;

use crate::command::Command;
use crate::model::{PairingToken, Volume, VolumeError};
use crate::protocol::PAIRING_TOKEN_LEN;

const SET_VOLUME_ID: u8 = 0x01;
const SET_POWER_ID: u8 = 0x02;
const SET_TOKEN_ID: u8 = 0x06;

/// Errors returned while decoding command frames.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum FrameDecodeError {
    #[error("command frame was empty")]
    EmptyFrame,
    #[error("unknown command id 0x{id:02X}")]
    UnknownCommand { id: u8 },
    #[error("command 0x{id:02X} expects {expected} payload bytes, got {actual}")]
    InvalidLength {
        id: u8,
        expected: usize,
        actual: usize,
    },
    #[error("power byte 0x{value:02X} is neither on nor off")]
    InvalidPowerByte { value: u8 },
    #[error(transparent)]
    Volume(#[from] VolumeError),
}

/// One frame written to the write-state characteristic.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommandFrame {
    /// Set the volume level.
    SetVolume(Volume),
    /// Switch noise on or off.
    SetPower(bool),
    /// Authenticate the connection with the pairing token.
    Authenticate(PairingToken),
}

/// Encodes and decodes SNOOZ command frames.
pub struct FrameCodec;

impl FrameCodec {
    /// Encodes one frame as `[command_id, payload..]`.
    ///
    /// ```
    /// use snooz::{CommandFrame, FrameCodec, Volume};
    ///
    /// let frame = FrameCodec::encode(&CommandFrame::SetVolume(Volume::new(50)?));
    /// assert_eq!(vec![0x01, 0x32], frame);
    /// # Ok::<(), snooz::VolumeError>(())
    /// ```
    #[must_use]
    pub fn encode(frame: &CommandFrame) -> Vec<u8> {
        match frame {
            CommandFrame::SetVolume(volume) => vec![SET_VOLUME_ID, volume.value()],
            CommandFrame::SetPower(on) => vec![SET_POWER_ID, u8::from(*on)],
            CommandFrame::Authenticate(token) => {
                let mut payload = Vec::with_capacity(1 + PAIRING_TOKEN_LEN);
                payload.push(SET_TOKEN_ID);
                payload.extend_from_slice(token.as_bytes());
                payload
            }
        }
    }

    /// Decodes one frame previously produced by [`FrameCodec::encode`].
    ///
    /// # Errors
    ///
    /// Returns an error for empty frames, unknown command ids, unexpected
    /// payload lengths, or out-of-range values.
    #[instrument(skip(frame), level = "trace", fields(frame_len = frame.len()))]
    pub fn decode(frame: &[u8]) -> Result<CommandFrame, FrameDecodeError> {
        let Some((&id, payload)) = frame.split_first() else {
            return Err(FrameDecodeError::EmptyFrame);
        };

        match id {
            SET_VOLUME_ID => {
                let [value] = expect_payload::<1>(id, payload)?;
                Ok(CommandFrame::SetVolume(Volume::new(value)?))
            }
            SET_POWER_ID => match expect_payload::<1>(id, payload)? {
                [0x00] => Ok(CommandFrame::SetPower(false)),
                [0x01] => Ok(CommandFrame::SetPower(true)),
                [value] => Err(FrameDecodeError::InvalidPowerByte { value }),
            },
            SET_TOKEN_ID => {
                let token = expect_payload::<PAIRING_TOKEN_LEN>(id, payload)?;
                Ok(CommandFrame::Authenticate(PairingToken::new(token)))
            }
            _ => Err(FrameDecodeError::UnknownCommand { id }),
        }
    }

    /// Returns the frames that apply `command` immediately, in write order.
    ///
    /// Volume is written before power so a device never briefly plays at its
    /// previous level.
    #[must_use]
    pub fn frames_for(command: &Command) -> Vec<CommandFrame> {
        match command {
            Command::PowerOn { volume, .. } => volume
                .map(CommandFrame::SetVolume)
                .into_iter()
                .chain([CommandFrame::SetPower(true)])
                .collect(),
            Command::PowerOff { .. } => vec![CommandFrame::SetPower(false)],
            Command::SetVolume { volume, .. } => vec![CommandFrame::SetVolume(*volume)],
        }
    }
}

fn expect_payload<const N: usize>(id: u8, payload: &[u8]) -> Result<[u8; N], FrameDecodeError> {
    payload
        .try_into()
        .map_err(|_| FrameDecodeError::InvalidLength {
            id,
            expected: N,
            actual: payload.len(),
        })
}
