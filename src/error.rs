use derive_more::From;
use thiserror::Error;

use crate::advertisement::AdvertisementDecodeError;
use crate::codec::FrameDecodeError;
use crate::model::VolumeError;
use crate::notification::NotificationDecodeError;
use crate::protocol::{EndpointId, endpoint_metadata};
use crate::transition::TransitionError;

/// Errors returned by BLE interaction operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("no SNOOZ device with address `{address}` was found")]
    DeviceNotFound { address: String },
    #[error(
        "required endpoint `{name}` ({uuid}) was not found on the connected device",
        name = endpoint_metadata(*endpoint).name(),
        uuid = endpoint_metadata(*endpoint).uuid()
    )]
    MissingEndpoint { endpoint: EndpointId },
    #[error("device rejected the write: {reason}")]
    WriteRejected { reason: String },
    #[error("device write failed: {reason}")]
    WriteFailed { reason: String },
    #[error("device is not connected")]
    NotConnected,
}

impl InteractionError {
    /// Returns whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WriteRejected { .. })
    }

    /// Returns whether the error means the connection is gone.
    #[must_use]
    pub fn is_link_lost(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Ble(btleplug::Error::NotConnected)
        )
    }
}

/// Errors returned when validating CLI options.
#[derive(Debug, Error)]
pub(crate) enum CliConfigError {
    #[error("payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("fake state payload is invalid")]
    InvalidFakeState(#[source] Box<ProtocolError>),
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Top-level protocol errors wrapping module-specific error types.
#[derive(Debug, Error, From)]
pub enum ProtocolError {
    #[error(transparent)]
    #[from(NotificationDecodeError, Box<NotificationDecodeError>)]
    Notification(Box<NotificationDecodeError>),
    #[error(transparent)]
    #[from(FrameDecodeError, Box<FrameDecodeError>)]
    Frame(Box<FrameDecodeError>),
    #[error(transparent)]
    #[from(AdvertisementDecodeError, Box<AdvertisementDecodeError>)]
    Advertisement(Box<AdvertisementDecodeError>),
    #[error(transparent)]
    #[from(VolumeError, Box<VolumeError>)]
    Volume(Box<VolumeError>),
    #[error(transparent)]
    #[from(TransitionError, Box<TransitionError>)]
    Transition(Box<TransitionError>),
    #[error(transparent)]
    #[from(InteractionError, Box<InteractionError>)]
    Interaction(Box<InteractionError>),
}

impl ProtocolError {
    /// Returns whether the underlying failure means the connection is gone.
    #[must_use]
    pub fn is_link_lost(&self) -> bool {
        matches!(self, Self::Interaction(error) if error.is_link_lost())
    }
}
