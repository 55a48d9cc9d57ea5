use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::model::{DeviceModel, DeviceSnapshot, FirmwareVersion, Provenance, Volume};
use crate::protocol::PAIRING_TOKEN_LEN;

const FIRMWARE_OFFSET: usize = 0;
const TOKEN_OFFSET: usize = 1;
const VOLUME_OFFSET: usize = TOKEN_OFFSET + PAIRING_TOKEN_LEN;
const FLAGS_OFFSET: usize = VOLUME_OFFSET + 1;
const NOISE_ON_FLAG: u8 = 0x01;

/// Minimum manufacturer payload length carrying state.
pub const ADVERTISEMENT_PAYLOAD_LEN: usize = FLAGS_OFFSET + 1;

// Devices that are not pairing broadcast one of these in the token slot.
const NOT_PAIRING_TOKENS: [[u8; PAIRING_TOKEN_LEN]; 2] = [
    [0x00; PAIRING_TOKEN_LEN],
    [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
];

/// Errors returned while decoding advertisement payloads.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum AdvertisementDecodeError {
    /// Payload is empty or truncated; common while scanning starts.
    #[error("advertisement payload has {len} bytes, need at least {required}")]
    InsufficientData { len: usize, required: usize },
    /// Payload does not come from a supported device.
    #[error("advertisement was not recognized: {reason}")]
    NotRecognized { reason: String },
    /// Payload has the right shape but carries impossible values.
    #[error("advertisement payload is malformed: {reason}")]
    Malformed { reason: String },
}

/// State and pairing details decoded from one advertisement.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct AdvertisementData {
    /// Passive state snapshot.
    pub snapshot: DeviceSnapshot,
    /// Hex pairing token, present while the device is in pairing mode.
    pub pairing_token: Option<String>,
}

impl AdvertisementData {
    /// Returns whether the device is broadcasting its pairing token.
    #[must_use]
    pub fn is_pairing(&self) -> bool {
        self.pairing_token.is_some()
    }

    /// Returns whether the advertising model has a fan.
    #[must_use]
    pub fn supports_fan(&self) -> bool {
        self.snapshot.model.supports_fan()
    }
}

/// Decodes a manufacturer payload into a passive state snapshot.
///
/// ```
/// use snooz::{DeviceModel, decode_advertisement};
///
/// let payload = [0x04, 0, 0, 0, 0, 0, 0, 0, 0, 0x21, 0x01];
/// let snapshot = decode_advertisement(&payload, DeviceModel::Original)?;
/// assert!(snapshot.is_on);
/// assert_eq!(33, snapshot.volume.value());
/// # Ok::<(), snooz::AdvertisementDecodeError>(())
/// ```
///
/// # Errors
///
/// Returns [`AdvertisementDecodeError::InsufficientData`] for empty or short
/// payloads, [`AdvertisementDecodeError::NotRecognized`] for unsupported
/// models or firmware, and [`AdvertisementDecodeError::Malformed`] for
/// impossible volume values.
pub fn decode_advertisement(
    payload: &[u8],
    model: DeviceModel,
) -> Result<DeviceSnapshot, AdvertisementDecodeError> {
    parse_advertisement(payload, model).map(|data| data.snapshot)
}

/// Decodes a manufacturer payload, keeping the pairing token when present.
///
/// # Errors
///
/// Returns the same errors as [`decode_advertisement`].
#[instrument(skip(payload), level = "trace", fields(payload_len = payload.len(), %model))]
pub fn parse_advertisement(
    payload: &[u8],
    model: DeviceModel,
) -> Result<AdvertisementData, AdvertisementDecodeError> {
    if payload.len() < ADVERTISEMENT_PAYLOAD_LEN {
        return Err(AdvertisementDecodeError::InsufficientData {
            len: payload.len(),
            required: ADVERTISEMENT_PAYLOAD_LEN,
        });
    }
    if model == DeviceModel::Unsupported {
        return Err(AdvertisementDecodeError::NotRecognized {
            reason: "unsupported device model".to_string(),
        });
    }

    let firmware_version = FirmwareVersion::try_from(payload[FIRMWARE_OFFSET]).map_err(|byte| {
        AdvertisementDecodeError::NotRecognized {
            reason: format!("unknown firmware version byte 0x{byte:02X}"),
        }
    })?;
    let volume = Volume::new(payload[VOLUME_OFFSET]).map_err(|error| {
        AdvertisementDecodeError::Malformed {
            reason: error.to_string(),
        }
    })?;
    let token = &payload[TOKEN_OFFSET..VOLUME_OFFSET];
    let pairing_token = NOT_PAIRING_TOKENS
        .iter()
        .all(|placeholder| placeholder.as_slice() != token)
        .then(|| hex::encode(token));

    Ok(AdvertisementData {
        snapshot: DeviceSnapshot {
            is_on: payload[FLAGS_OFFSET] & NOISE_ON_FLAG == NOISE_ON_FLAG,
            volume,
            model,
            firmware_version: Some(firmware_version),
            provenance: Provenance::Advertisement,
        },
        pairing_token,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn payload(firmware: u8, token: [u8; 8], volume: u8, flags: u8) -> Vec<u8> {
        let mut payload = vec![firmware];
        payload.extend_from_slice(&token);
        payload.extend_from_slice(&[volume, flags]);
        payload
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(ADVERTISEMENT_PAYLOAD_LEN - 1)]
    fn short_payloads_report_insufficient_data(#[case] len: usize) {
        let bytes = vec![0x04; len];
        assert_eq!(
            Err(AdvertisementDecodeError::InsufficientData {
                len,
                required: ADVERTISEMENT_PAYLOAD_LEN,
            }),
            decode_advertisement(&bytes, DeviceModel::Original)
        );
    }

    #[test]
    fn decodes_state_fields() {
        let bytes = payload(0x06, [0; 8], 45, 0x00);
        let snapshot =
            decode_advertisement(&bytes, DeviceModel::Pro).expect("advertisement should decode");

        assert_eq!(
            DeviceSnapshot {
                is_on: false,
                volume: Volume::new(45).expect("test volume should be valid"),
                model: DeviceModel::Pro,
                firmware_version: FirmwareVersion::try_from(6).ok(),
                provenance: Provenance::Advertisement,
            },
            snapshot
        );
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut bytes = payload(0x04, [0; 8], 10, 0x01);
        bytes.extend_from_slice(&[0xFF, 0xFF]);

        let snapshot = decode_advertisement(&bytes, DeviceModel::Breez)
            .expect("advertisement with trailing bytes should decode");
        assert!(snapshot.is_on);
    }

    #[test]
    fn unsupported_model_is_not_recognized() {
        let bytes = payload(0x04, [0; 8], 10, 0x01);
        assert_matches!(
            decode_advertisement(&bytes, DeviceModel::Unsupported),
            Err(AdvertisementDecodeError::NotRecognized { .. })
        );
    }

    #[rstest]
    #[case(0x01)]
    #[case(0x10)]
    fn unknown_firmware_is_not_recognized(#[case] firmware: u8) {
        let bytes = payload(firmware, [0; 8], 10, 0x01);
        assert_matches!(
            decode_advertisement(&bytes, DeviceModel::Original),
            Err(AdvertisementDecodeError::NotRecognized { .. })
        );
    }

    #[test]
    fn impossible_volume_is_malformed() {
        let bytes = payload(0x04, [0; 8], 101, 0x01);
        assert_matches!(
            decode_advertisement(&bytes, DeviceModel::Original),
            Err(AdvertisementDecodeError::Malformed { .. })
        );
    }

    #[rstest]
    #[case([0; 8], None)]
    #[case([1, 2, 3, 4, 5, 6, 7, 8], None)]
    #[case([0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 1], Some("deadbeef00000001"))]
    fn pairing_token_is_reported_only_while_pairing(
        #[case] token: [u8; 8],
        #[case] expected: Option<&str>,
    ) {
        let data = parse_advertisement(&payload(0x04, token, 10, 0x00), DeviceModel::Original)
            .expect("advertisement should decode");

        assert_eq!(expected.map(str::to_string), data.pairing_token);
        assert_eq!(expected.is_some(), data.is_pairing());
    }

    #[test]
    fn breez_advertisement_supports_fan() {
        let data = parse_advertisement(&payload(0x04, [0; 8], 10, 0x00), DeviceModel::Breez)
            .expect("advertisement should decode");
        assert!(data.supports_fan());
    }
}
