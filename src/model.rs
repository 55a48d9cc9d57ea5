use std::fmt;
use std::str::FromStr;

use bon::Builder;
use serde::Serialize;
use serde_with::SerializeDisplay;
use strum_macros::Display;
use thiserror::Error;

use crate::protocol::PAIRING_TOKEN_LEN;

const MIN_VOLUME: u8 = 0;
const MAX_VOLUME: u8 = 100;
const MIN_FIRMWARE_VERSION: u8 = 2;
const MAX_FIRMWARE_VERSION: u8 = 15;

/// Errors returned by volume validation.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
pub enum VolumeError {
    /// The volume byte was outside the accepted range.
    #[error("volume {value} is out of range ({min}..={max})")]
    OutOfRange { value: u8, min: u8, max: u8 },
}

/// Validated volume level in the inclusive range `0..=100`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(transparent)]
pub struct Volume(u8);

impl Volume {
    /// Silent volume.
    pub const MIN: Self = Self(MIN_VOLUME);
    /// Loudest volume.
    pub const MAX: Self = Self(MAX_VOLUME);

    /// Creates a validated volume level.
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is outside `0..=100`.
    ///
    /// ```
    /// use snooz::Volume;
    ///
    /// let volume = Volume::new(42)?;
    /// assert_eq!(42, volume.value());
    /// # Ok::<(), snooz::VolumeError>(())
    /// ```
    pub fn new(value: u8) -> Result<Self, VolumeError> {
        if !(MIN_VOLUME..=MAX_VOLUME).contains(&value) {
            return Err(VolumeError::OutOfRange {
                value,
                min: MIN_VOLUME,
                max: MAX_VOLUME,
            });
        }

        Ok(Self(value))
    }

    /// Creates a volume, capping `value` at the maximum.
    #[must_use]
    pub const fn saturating(value: u8) -> Self {
        if value > MAX_VOLUME {
            Self(MAX_VOLUME)
        } else {
            Self(value)
        }
    }

    /// Returns the underlying volume byte.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Volume {
    type Error = VolumeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// SNOOZ hardware families.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    /// A device this crate does not know how to talk to.
    #[default]
    #[strum(to_string = "unsupported")]
    Unsupported,
    /// The original SNOOZ white noise machine.
    #[strum(to_string = "original")]
    Original,
    /// SNOOZ Pro.
    #[strum(to_string = "pro")]
    Pro,
    /// Breez, the fan variant.
    #[strum(to_string = "breez")]
    Breez,
}

impl DeviceModel {
    /// Returns whether the model has a fan.
    #[must_use]
    pub fn supports_fan(self) -> bool {
        matches!(self, Self::Breez)
    }
}

/// Firmware version advertised by a device.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, SerializeDisplay)]
pub struct FirmwareVersion(u8);

impl FirmwareVersion {
    /// Returns the firmware version byte.
    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for FirmwareVersion {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (MIN_FIRMWARE_VERSION..=MAX_FIRMWARE_VERSION).contains(&value) {
            Ok(Self(value))
        } else {
            Err(value)
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Decoded passively from a broadcast advertisement.
    #[strum(to_string = "advertisement")]
    Advertisement,
    /// Reported by a connected device.
    #[strum(to_string = "notification")]
    Notification,
}

/// Best-known device state.
///
/// Snapshots are replaced wholesale; fields are never merged across
/// provenances.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct DeviceSnapshot {
    /// Whether noise output is on.
    pub is_on: bool,
    /// Current volume.
    pub volume: Volume,
    /// Hardware family.
    pub model: DeviceModel,
    /// Firmware version, when the source carries one.
    pub firmware_version: Option<FirmwareVersion>,
    /// Source of the snapshot.
    pub provenance: Provenance,
}

impl fmt::Display for DeviceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let power = if self.is_on { "On" } else { "Off" };
        write!(f, "Snooz(Noise {power} at {} volume)", self.volume)
    }
}

/// Errors returned while parsing pairing tokens.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PairingTokenError {
    #[error("pairing token is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("pairing token must be {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Token a device hands out while in pairing mode; required to authenticate.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct PairingToken([u8; PAIRING_TOKEN_LEN]);

impl PairingToken {
    /// Creates a token from raw bytes.
    #[must_use]
    pub fn new(bytes: [u8; PAIRING_TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw token bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PAIRING_TOKEN_LEN] {
        &self.0
    }
}

impl FromStr for PairingToken {
    type Err = PairingTokenError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(value.trim())?;
        let bytes: [u8; PAIRING_TOKEN_LEN] =
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| PairingTokenError::InvalidLength {
                    expected: PAIRING_TOKEN_LEN,
                    actual: decoded.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// Tokens are credentials; keep them out of debug logs.
impl fmt::Debug for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingToken(..)")
    }
}

/// Identity of one physical device.
#[derive(Debug, Clone, Eq, PartialEq, Builder)]
pub struct DeviceIdentity {
    #[builder(into)]
    address: String,
    #[builder(into)]
    local_name: Option<String>,
    #[builder(default)]
    model: DeviceModel,
    token: Option<PairingToken>,
}

impl DeviceIdentity {
    /// Peripheral address (or platform identifier).
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Advertised local name, if known.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Hardware family.
    #[must_use]
    pub fn model(&self) -> DeviceModel {
        self.model
    }

    /// Pairing token used to authenticate the connection.
    #[must_use]
    pub fn token(&self) -> Option<&PairingToken> {
        self.token.as_ref()
    }

    /// Name used when logging about this device.
    ///
    /// ```
    /// let identity = snooz::DeviceIdentity::builder()
    ///     .address("00:00:00:00:AB:CD")
    ///     .local_name("Snooz")
    ///     .build();
    /// assert_eq!("Snooz ABCD", identity.display_name());
    /// ```
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name(self.local_name.as_deref(), &self.address)
    }
}

/// Derives the display name used for a device from its local name and address.
pub(crate) fn display_name(local_name: Option<&str>, address: &str) -> String {
    match local_name {
        Some(name) if !name.eq_ignore_ascii_case("snooz") => name.replace('-', " "),
        _ => {
            let mut suffix: Vec<char> = address
                .chars()
                .rev()
                .filter(|c| *c != ':')
                .take(4)
                .collect();
            suffix.reverse();
            format!("Snooz {}", String::from_iter(suffix))
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0)]
    #[case(50)]
    #[case(100)]
    fn volume_accepts_range(#[case] value: u8) {
        let volume = Volume::new(value).expect("valid volume should construct");
        assert_eq!(value, volume.value());
    }

    #[rstest]
    #[case(101)]
    #[case(255)]
    fn volume_rejects_out_of_range(#[case] value: u8) {
        assert_matches!(
            Volume::new(value),
            Err(VolumeError::OutOfRange {
                value: rejected,
                min: MIN_VOLUME,
                max: MAX_VOLUME,
            }) if rejected == value
        );
    }

    #[rstest]
    #[case(7, 7)]
    #[case(100, 100)]
    #[case(180, 100)]
    fn saturating_volume_caps_at_max(#[case] value: u8, #[case] expected: u8) {
        assert_eq!(expected, Volume::saturating(value).value());
    }

    #[rstest]
    #[case(Some("Snooz"), "00:00:00:00:00:00", "Snooz 0000")]
    #[case(Some("snooz"), "00:00:00:00:AB:CD", "Snooz ABCD")]
    #[case(Some("sNooZ"), "00:00:00:00:AB:CD", "Snooz ABCD")]
    #[case(Some("Snooz-DEBF"), "00:00:00:00:AB:CD", "Snooz DEBF")]
    #[case(Some("Snooz CCCC"), "00:00:00:00:AB:CD", "Snooz CCCC")]
    #[case(Some("Very custom"), "00:00:00:00:AB:CD", "Very custom")]
    #[case(None, "00:00:00:00:12:34", "Snooz 1234")]
    #[case(None, "éaé", "Snooz éaé")]
    #[case(None, "AB", "Snooz AB")]
    fn display_name_matches_device_naming(
        #[case] local_name: Option<&str>,
        #[case] address: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(expected, display_name(local_name, address));
    }

    #[test]
    fn pairing_token_parses_hex() {
        let token: PairingToken = "deadbeef01020304".parse().expect("token should parse");
        assert_eq!(
            &[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04],
            token.as_bytes()
        );
        assert_eq!("deadbeef01020304", token.to_string());
    }

    #[test]
    fn pairing_token_rejects_wrong_length() {
        let result = "deadbeef".parse::<PairingToken>();
        assert_matches!(
            result,
            Err(PairingTokenError::InvalidLength {
                expected: 8,
                actual: 4
            })
        );
    }

    #[test]
    fn pairing_token_debug_hides_bytes() {
        let token = PairingToken::new([0xAA; 8]);
        assert_eq!("PairingToken(..)", format!("{token:?}"));
    }

    #[rstest]
    #[case(true, 10, "Snooz(Noise On at 10% volume)")]
    #[case(false, 15, "Snooz(Noise Off at 15% volume)")]
    fn snapshot_display_describes_noise_state(
        #[case] is_on: bool,
        #[case] volume: u8,
        #[case] expected: &str,
    ) {
        let snapshot = DeviceSnapshot {
            is_on,
            volume: Volume::new(volume).expect("test volume should be valid"),
            model: DeviceModel::Original,
            firmware_version: None,
            provenance: Provenance::Notification,
        };
        assert_eq!(expected, snapshot.to_string());
    }

    #[rstest]
    #[case(1, None)]
    #[case(2, Some(2))]
    #[case(15, Some(15))]
    #[case(16, None)]
    fn firmware_version_accepts_known_range(#[case] value: u8, #[case] expected: Option<u8>) {
        let parsed = FirmwareVersion::try_from(value).ok().map(FirmwareVersion::value);
        assert_eq!(expected, parsed);
    }
}
