mod advertisement;
mod app;
mod cli;
mod codec;
mod command;
mod device;
mod error;
mod hw;
mod model;
mod notification;
mod protocol;
mod telemetry;
mod transition;
mod utils;

pub use advertisement::{
    ADVERTISEMENT_PAYLOAD_LEN, AdvertisementData, AdvertisementDecodeError, decode_advertisement,
    parse_advertisement,
};
pub use app::{fake_hardware_client, real_hardware_client, run, run_with_log_level};
pub use cli::{
    Args, Command as CliCommand, ControlAction, ControlArgs, DecodeArgs, FakeArgs, LogLevel,
    ModelArg, OutputFormat,
};
pub use codec::{CommandFrame, FrameCodec, FrameDecodeError};
pub use command::{Command, CommandResult, CommandStatus};
pub use device::{
    ConnectionEvent, ConnectionState, InvalidTransition, PendingCommand, SessionConfig,
    SnoozDevice,
};
pub use error::{InteractionError, ProtocolError};
pub use hw::{
    ConnectOutcome, ConnectedBleLink, EstablishedConnection, FakeDevice, FakeDeviceConfig,
    FakeHardwareClient, HardwareClient, LinkEvent, WriteOutcome,
};
pub use model::{
    DeviceIdentity, DeviceModel, DeviceSnapshot, FirmwareVersion, PairingToken,
    PairingTokenError, Provenance, Volume, VolumeError,
};
pub use notification::{NotificationDecodeError, NotificationHandler, StateReport};
pub use protocol::EndpointId;
pub use transition::{RampStep, TransitionError, VolumeRamp};
