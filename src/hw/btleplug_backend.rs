use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use strum::IntoEnumIterator;
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_stream::StreamExt;
use tracing::{debug, info, instrument, trace};

use super::hardware::{ConnectedBleLink, EstablishedConnection, HardwareClient, LinkEvent};
use crate::error::InteractionError;
use crate::model::DeviceIdentity;
use crate::protocol::{self, EndpointId};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);
const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Hardware client backed by `btleplug`.
///
/// The platform manager is created on first connect, so building the backend
/// never touches the Bluetooth stack.
#[derive(Debug)]
pub(crate) struct BtleplugBackend {
    manager: OnceCell<Manager>,
    scan_timeout: Duration,
}

impl BtleplugBackend {
    /// Creates the real BLE backend.
    pub(crate) fn new() -> Self {
        Self {
            manager: OnceCell::new(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }

    async fn manager(&self) -> Result<&Manager, InteractionError> {
        let manager = self.manager.get_or_try_init(Manager::new).await?;
        Ok(manager)
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, InteractionError> {
        let adapters = self.manager().await?.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }

    /// Scans until a peripheral whose address (or platform id) matches
    /// `address` appears, or the scan timeout elapses.
    #[instrument(skip(self), level = "debug")]
    async fn find_peripheral(&self, address: &str) -> Result<FoundPeripheral, InteractionError> {
        let adapters = self.adapters().await?;
        for handle in &adapters {
            handle.adapter.start_scan(ScanFilter::default()).await?;
        }

        let deadline = Instant::now() + self.scan_timeout;
        let found = loop {
            if let Some(found) = first_matching_peripheral(&adapters, address).await? {
                break Some(found);
            }
            if Instant::now() >= deadline {
                break None;
            }
            sleep(SCAN_POLL_INTERVAL).await;
        };

        for handle in &adapters {
            if let Err(error) = handle.adapter.stop_scan().await {
                debug!(?error, adapter = %handle.name, "failed to stop adapter scan cleanly");
            }
        }

        found.ok_or_else(|| InteractionError::DeviceNotFound {
            address: address.to_string(),
        })
    }
}

#[async_trait]
impl HardwareClient for BtleplugBackend {
    #[instrument(skip(self, identity), level = "debug", fields(device = %identity.display_name()))]
    async fn connect(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<EstablishedConnection, InteractionError> {
        let FoundPeripheral {
            adapter,
            peripheral,
        } = self.find_peripheral(identity.address()).await?;

        connect_with_retries(&peripheral).await?;
        peripheral.discover_services().await?;

        let characteristics = match characteristics_by_endpoint(&peripheral) {
            Ok(characteristics) => characteristics,
            Err(error) => {
                if let Err(disconnect_error) = peripheral.disconnect().await {
                    debug!(
                        ?disconnect_error,
                        "failed to disconnect after endpoint validation error"
                    );
                }
                return Err(error);
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let forwarder = spawn_event_forwarder(&adapter, &peripheral, events_tx).await?;
        info!(peripheral_id = %peripheral.id(), "connected to SNOOZ peripheral");

        Ok(EstablishedConnection {
            link: Arc::new(BtleplugLink {
                peripheral,
                characteristics,
                forwarder,
            }),
            events: events_rx,
        })
    }
}

async fn first_matching_peripheral(
    adapters: &[AdapterHandle],
    address: &str,
) -> Result<Option<FoundPeripheral>, InteractionError> {
    for handle in adapters {
        for peripheral in handle.adapter.peripherals().await? {
            if matches_address(&peripheral, address) {
                trace!(adapter = %handle.name, "found matching peripheral");
                return Ok(Some(FoundPeripheral {
                    adapter: handle.adapter.clone(),
                    peripheral,
                }));
            }
        }
    }
    Ok(None)
}

fn matches_address(peripheral: &Peripheral, address: &str) -> bool {
    peripheral.address().to_string().eq_ignore_ascii_case(address)
        || peripheral.id().to_string().eq_ignore_ascii_case(address)
}

#[instrument(skip(peripheral), level = "debug")]
async fn connect_with_retries(peripheral: &Peripheral) -> Result<(), InteractionError> {
    let mut attempt = 1;
    loop {
        if peripheral.is_connected().await? {
            return Ok(());
        }

        match peripheral.connect().await {
            Ok(()) => return Ok(()),
            Err(error) if attempt < CONNECT_ATTEMPTS => {
                debug!(?error, attempt, "connect attempt failed; retrying");
                attempt += 1;
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(error) => return Err(error.into()),
        }
    }
}

fn characteristics_by_endpoint(
    peripheral: &Peripheral,
) -> Result<HashMap<EndpointId, Characteristic>, InteractionError> {
    let characteristics = peripheral.characteristics();
    EndpointId::iter()
        .map(|endpoint| {
            let uuid = protocol::endpoint_metadata(endpoint).uuid();
            characteristics
                .iter()
                .find(|characteristic| {
                    characteristic.uuid.to_string().eq_ignore_ascii_case(uuid)
                })
                .cloned()
                .map(|characteristic| (endpoint, characteristic))
                .ok_or(InteractionError::MissingEndpoint { endpoint })
        })
        .collect()
}

/// Forwards notifications and the adapter's disconnect event for this
/// peripheral into the connection's event channel.
async fn spawn_event_forwarder(
    adapter: &Adapter,
    peripheral: &Peripheral,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> Result<JoinHandle<()>, InteractionError> {
    let mut notifications = peripheral.notifications().await?;
    let mut central_events = adapter.events().await?;
    let peripheral_id = peripheral.id();

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                notification = notifications.next() => match notification {
                    Some(notification) => {
                        let uuid = notification.uuid.to_string();
                        let Some(endpoint) = protocol::endpoint_for_uuid(&uuid) else {
                            trace!(%uuid, "ignoring notification from unknown characteristic");
                            continue;
                        };
                        LinkEvent::Notification {
                            endpoint,
                            payload: notification.value,
                        }
                    }
                    None => LinkEvent::Disconnected,
                },
                central_event = central_events.next() => match central_event {
                    Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                        LinkEvent::Disconnected
                    }
                    Some(_) => continue,
                    None => LinkEvent::Disconnected,
                },
            };

            let disconnected = event == LinkEvent::Disconnected;
            if events.send(event).is_err() || disconnected {
                break;
            }
        }
    }))
}

fn map_write_error(error: btleplug::Error) -> InteractionError {
    match error {
        btleplug::Error::NotConnected => InteractionError::NotConnected,
        btleplug::Error::TimedOut(elapsed) => InteractionError::WriteRejected {
            reason: format!("write timed out after {elapsed:?}"),
        },
        // BlueZ reports a busy GATT queue as "In Progress".
        btleplug::Error::Other(source) if is_in_progress(&source.to_string()) => {
            InteractionError::WriteRejected {
                reason: source.to_string(),
            }
        }
        other => InteractionError::Ble(other),
    }
}

fn is_in_progress(message: &str) -> bool {
    message
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase()
        .contains("inprogress")
}

#[derive(Debug)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}

#[derive(Debug)]
struct FoundPeripheral {
    adapter: Adapter,
    peripheral: Peripheral,
}

/// Open connection to a real peripheral.
#[derive(Debug)]
struct BtleplugLink {
    peripheral: Peripheral,
    characteristics: HashMap<EndpointId, Characteristic>,
    forwarder: JoinHandle<()>,
}

impl BtleplugLink {
    fn characteristic_for(&self, endpoint: EndpointId) -> Result<&Characteristic, InteractionError> {
        self.characteristics
            .get(&endpoint)
            .ok_or(InteractionError::MissingEndpoint { endpoint })
    }
}

#[async_trait]
impl ConnectedBleLink for BtleplugLink {
    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn read_endpoint(&self, endpoint: EndpointId) -> Result<Vec<u8>, InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        let payload = self.peripheral.read(characteristic).await?;
        Ok(payload)
    }

    #[instrument(skip(self, payload), level = "trace", fields(%endpoint, payload_len = payload.len()))]
    async fn write_endpoint(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral
            .write(characteristic, payload, WriteType::WithResponse)
            .await
            .map_err(map_write_error)
    }

    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn subscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.subscribe(characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "trace", fields(%endpoint))]
    async fn unsubscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(endpoint)?;
        self.peripheral.unsubscribe(characteristic).await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn close(&self) -> Result<(), InteractionError> {
        self.forwarder.abort();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("org.bluez.Error.InProgress", true)]
    #[case("Operation In Progress", true)]
    #[case("org.bluez.Error.Failed", false)]
    fn in_progress_errors_are_detected(#[case] message: &str, #[case] expected: bool) {
        assert_eq!(expected, is_in_progress(message));
    }

    #[test]
    fn busy_writes_map_to_transient_rejections() {
        let error = btleplug::Error::Other("org.bluez.Error.InProgress".into());
        let mapped = map_write_error(error);
        assert!(mapped.is_transient());
    }

    #[test]
    fn disconnected_writes_map_to_link_loss() {
        let mapped = map_write_error(btleplug::Error::NotConnected);
        assert_matches!(mapped, InteractionError::NotConnected);
        assert!(mapped.is_link_lost());
    }

    #[test]
    fn other_write_errors_are_permanent() {
        let mapped = map_write_error(btleplug::Error::NotSupported("write".to_string()));
        assert_matches!(mapped, InteractionError::Ble(_));
        assert!(!mapped.is_transient());
    }
}
