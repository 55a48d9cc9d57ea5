use thiserror::Error;
use tracing::instrument;

use crate::model::{DeviceModel, DeviceSnapshot, Provenance, Volume, VolumeError};

/// Length of the state payload devices send on the read-state characteristic.
pub(crate) const STATE_PAYLOAD_LEN: usize = 20;

const POWER_ON_BYTE: u8 = 0x01;

/// Noise state reported by a connected device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StateReport {
    /// Whether noise output is on.
    pub is_on: bool,
    /// Current volume.
    pub volume: Volume,
}

impl StateReport {
    /// Encodes the report the way devices send it: volume, power flag, then
    /// zero padding.
    #[must_use]
    pub fn to_payload(self) -> Vec<u8> {
        let mut payload = vec![0x00; STATE_PAYLOAD_LEN];
        payload[0] = self.volume.value();
        payload[1] = if self.is_on { POWER_ON_BYTE } else { 0x00 };
        payload
    }

    /// Promotes the report to a full snapshot for `model`.
    #[must_use]
    pub fn into_snapshot(self, model: DeviceModel) -> DeviceSnapshot {
        DeviceSnapshot {
            is_on: self.is_on,
            volume: self.volume,
            model,
            firmware_version: None,
            provenance: Provenance::Notification,
        }
    }
}

/// Errors returned while decoding state payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum NotificationDecodeError {
    #[error("notification payload was empty")]
    EmptyPayload,
    #[error("notification payload has {len} bytes, expected at least 2")]
    Truncated { len: usize },
    #[error(transparent)]
    VolumeOutOfRange(#[from] VolumeError),
}

/// Decodes raw read-state payloads into typed reports.
pub struct NotificationHandler;

impl NotificationHandler {
    /// Decodes one state payload from a read or a notification.
    ///
    /// ```
    /// let report = snooz::NotificationHandler::decode(&[0x1E, 0x01])?;
    /// assert!(report.is_on);
    /// assert_eq!(30, report.volume.value());
    /// # Ok::<(), snooz::NotificationDecodeError>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is empty, shorter than two bytes, or
    /// reports a volume above 100.
    #[instrument(skip(payload), level = "trace", fields(payload_len = payload.len()))]
    pub fn decode(payload: &[u8]) -> Result<StateReport, NotificationDecodeError> {
        match payload {
            [] => Err(NotificationDecodeError::EmptyPayload),
            [volume, power, ..] => Ok(StateReport {
                is_on: *power == POWER_ON_BYTE,
                volume: Volume::new(*volume)?,
            }),
            _ => Err(NotificationDecodeError::Truncated { len: payload.len() }),
        }
    }
}
