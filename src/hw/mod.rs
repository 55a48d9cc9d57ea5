mod btleplug_backend;
mod fake_backend;
mod hardware;

pub(crate) use self::btleplug_backend::BtleplugBackend;
pub use self::fake_backend::{
    ConnectOutcome, FakeDevice, FakeDeviceConfig, FakeHardwareClient, WriteOutcome,
};
pub use self::hardware::{ConnectedBleLink, EstablishedConnection, HardwareClient, LinkEvent};
