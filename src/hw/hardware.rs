use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::InteractionError;
use crate::model::DeviceIdentity;
use crate::protocol::EndpointId;

/// Event delivered by a live connection, in arrival order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum LinkEvent {
    /// A notification on a subscribed endpoint.
    Notification {
        endpoint: EndpointId,
        payload: Vec<u8>,
    },
    /// The peripheral dropped the connection without being asked to.
    Disconnected,
}

/// An open connection plus the channel its events arrive on.
///
/// Dropping the receiver stops delivery from this connection; a later
/// connection always comes with a fresh channel.
#[derive(Debug)]
pub struct EstablishedConnection {
    /// Connection handle used for reads, writes and teardown.
    pub link: Arc<dyn ConnectedBleLink>,
    /// Notifications and unsolicited disconnects for this connection only.
    pub events: mpsc::UnboundedReceiver<LinkEvent>,
}

/// Opens connections to SNOOZ peripherals.
#[async_trait]
pub trait HardwareClient: Send + Sync + std::fmt::Debug {
    /// Connects to the device described by `identity`, discovering the state
    /// characteristics.
    ///
    /// Transport-level connect retries happen inside this call.
    async fn connect(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<EstablishedConnection, InteractionError>;
}

/// Operations available on one open connection.
#[async_trait]
pub trait ConnectedBleLink: Send + Sync + std::fmt::Debug {
    /// Reads the current value of `endpoint`.
    async fn read_endpoint(&self, endpoint: EndpointId) -> Result<Vec<u8>, InteractionError>;

    /// Writes `payload` to `endpoint`, waiting for the acknowledgment.
    async fn write_endpoint(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
    ) -> Result<(), InteractionError>;

    /// Starts notification delivery for `endpoint`.
    async fn subscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError>;

    /// Stops notification delivery for `endpoint`.
    async fn unsubscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError>;

    /// Disconnects from the peripheral.
    async fn close(&self) -> Result<(), InteractionError>;
}
