use std::collections::VecDeque;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, instrument};

use super::hardware::{ConnectedBleLink, EstablishedConnection, HardwareClient, LinkEvent};
use crate::codec::{CommandFrame, FrameCodec};
use crate::error::InteractionError;
use crate::model::{DeviceIdentity, PairingToken, Volume};
use crate::notification::StateReport;
use crate::protocol::EndpointId;

/// Scripted result of one fake connect attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectOutcome {
    /// The connection opens.
    Succeed,
    /// The connection attempt fails immediately.
    Fail,
    /// The connection attempt never completes.
    Hang,
}

/// Scripted result of one fake write attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteOutcome {
    /// The frame is acknowledged and applied.
    Accept,
    /// The device is busy; retrying may succeed.
    Reject,
    /// The write fails permanently.
    Fail,
    /// The acknowledgment never arrives.
    Hang,
}

/// Settings for a fake SNOOZ device.
///
/// Scripted outcomes are consumed in order; once a script runs out every
/// further attempt succeeds.
#[derive(Debug, Clone, Builder)]
pub struct FakeDeviceConfig {
    #[builder(default = StateReport { is_on: false, volume: Volume::MIN })]
    initial_state: StateReport,
    #[builder(default)]
    connect_outcomes: Vec<ConnectOutcome>,
    #[builder(default)]
    connect_delay: Duration,
    #[builder(default)]
    write_outcomes: Vec<WriteOutcome>,
    #[builder(default)]
    write_delay: Duration,
    #[builder(default = true)]
    notify_on_write: bool,
}

impl Default for FakeDeviceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug)]
struct FakeDeviceState {
    report: StateReport,
    connect_outcomes: VecDeque<ConnectOutcome>,
    write_outcomes: VecDeque<WriteOutcome>,
    connect_attempts: usize,
    write_attempts: Vec<Vec<u8>>,
    accepted_frames: Vec<CommandFrame>,
    authenticated_with: Option<PairingToken>,
    subscribed: bool,
    generation: u64,
    events: Option<mpsc::UnboundedSender<LinkEvent>>,
}

impl FakeDeviceState {
    fn is_live(&self, generation: u64) -> bool {
        self.events.is_some() && self.generation == generation
    }

    fn notify_state(&self) {
        if let Some(events) = self.events.as_ref().filter(|_| self.subscribed) {
            let _ = events.send(LinkEvent::Notification {
                endpoint: EndpointId::ReadStateCharacteristic,
                payload: self.report.to_payload(),
            });
        }
    }
}

/// Handle for inspecting and driving a fake device from tests.
#[derive(Debug, Clone)]
pub struct FakeDevice {
    state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDevice {
    fn lock(&self) -> MutexGuard<'_, FakeDeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current device-side state.
    #[must_use]
    pub fn state(&self) -> StateReport {
        self.lock().report
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.lock().events.is_some()
    }

    /// Number of connect attempts received.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Raw payload of every write attempt, including rejected ones.
    #[must_use]
    pub fn write_attempts(&self) -> Vec<Vec<u8>> {
        self.lock().write_attempts.clone()
    }

    /// Frames the device acknowledged, in order.
    #[must_use]
    pub fn accepted_frames(&self) -> Vec<CommandFrame> {
        self.lock().accepted_frames.clone()
    }

    /// Volumes from acknowledged `SetVolume` frames, in order.
    #[must_use]
    pub fn accepted_volumes(&self) -> Vec<u8> {
        self.lock()
            .accepted_frames
            .iter()
            .filter_map(|frame| match frame {
                CommandFrame::SetVolume(volume) => Some(volume.value()),
                _ => None,
            })
            .collect()
    }

    /// Token the current or last connection authenticated with.
    #[must_use]
    pub fn authenticated_with(&self) -> Option<PairingToken> {
        self.lock().authenticated_with
    }

    /// Drops the connection as if the peripheral went out of range.
    pub fn trigger_disconnect(&self) {
        let mut state = self.lock();
        if let Some(events) = state.events.take() {
            debug!("fake device dropping connection");
            let _ = events.send(LinkEvent::Disconnected);
        }
        state.subscribed = false;
        state.generation += 1;
    }

    /// Sends a raw notification on the state characteristic.
    pub fn push_notification(&self, payload: Vec<u8>) {
        let state = self.lock();
        if let Some(events) = state.events.as_ref() {
            let _ = events.send(LinkEvent::Notification {
                endpoint: EndpointId::ReadStateCharacteristic,
                payload,
            });
        }
    }

    /// Changes the device-side state, as if a physical button was pressed.
    pub fn set_state(&self, report: StateReport) {
        let mut state = self.lock();
        state.report = report;
        state.notify_state();
    }
}

/// In-memory [`HardwareClient`] used by tests and `--fake` mode.
#[derive(Debug)]
pub struct FakeHardwareClient {
    device: FakeDevice,
    connect_delay: Duration,
    write_delay: Duration,
    notify_on_write: bool,
}

impl FakeHardwareClient {
    /// Creates a fake client for one device.
    #[must_use]
    pub fn new(config: FakeDeviceConfig) -> Self {
        let state = FakeDeviceState {
            report: config.initial_state,
            connect_outcomes: config.connect_outcomes.into(),
            write_outcomes: config.write_outcomes.into(),
            connect_attempts: 0,
            write_attempts: Vec::new(),
            accepted_frames: Vec::new(),
            authenticated_with: None,
            subscribed: false,
            generation: 0,
            events: None,
        };

        Self {
            device: FakeDevice {
                state: Arc::new(Mutex::new(state)),
            },
            connect_delay: config.connect_delay,
            write_delay: config.write_delay,
            notify_on_write: config.notify_on_write,
        }
    }

    /// Returns a handle to the simulated device.
    #[must_use]
    pub fn device(&self) -> FakeDevice {
        self.device.clone()
    }
}

#[async_trait]
impl HardwareClient for FakeHardwareClient {
    #[instrument(skip(self, identity), level = "debug", fields(device = %identity.display_name()))]
    async fn connect(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<EstablishedConnection, InteractionError> {
        if !self.connect_delay.is_zero() {
            sleep(self.connect_delay).await;
        }

        let outcome = {
            let mut state = self.device.lock();
            state.connect_attempts += 1;
            state
                .connect_outcomes
                .pop_front()
                .unwrap_or(ConnectOutcome::Succeed)
        };
        match outcome {
            ConnectOutcome::Succeed => {}
            ConnectOutcome::Fail => {
                return Err(InteractionError::DeviceNotFound {
                    address: identity.address().to_string(),
                });
            }
            ConnectOutcome::Hang => future::pending::<()>().await,
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let generation = {
            let mut state = self.device.lock();
            state.generation += 1;
            state.events = Some(events_tx);
            state.subscribed = false;
            state.generation
        };

        Ok(EstablishedConnection {
            link: Arc::new(FakeLink {
                device: self.device.clone(),
                generation,
                write_delay: self.write_delay,
                notify_on_write: self.notify_on_write,
            }),
            events: events_rx,
        })
    }
}

#[derive(Debug)]
struct FakeLink {
    device: FakeDevice,
    generation: u64,
    write_delay: Duration,
    notify_on_write: bool,
}

impl FakeLink {
    fn live_state(&self) -> Result<MutexGuard<'_, FakeDeviceState>, InteractionError> {
        let state = self.device.lock();
        if state.is_live(self.generation) {
            Ok(state)
        } else {
            Err(InteractionError::NotConnected)
        }
    }
}

#[async_trait]
impl ConnectedBleLink for FakeLink {
    async fn read_endpoint(&self, endpoint: EndpointId) -> Result<Vec<u8>, InteractionError> {
        let state = self.live_state()?;
        match endpoint {
            EndpointId::ReadStateCharacteristic => Ok(state.report.to_payload()),
            EndpointId::WriteStateCharacteristic => Err(InteractionError::MissingEndpoint { endpoint }),
        }
    }

    async fn write_endpoint(
        &self,
        endpoint: EndpointId,
        payload: &[u8],
    ) -> Result<(), InteractionError> {
        if endpoint != EndpointId::WriteStateCharacteristic {
            return Err(InteractionError::MissingEndpoint { endpoint });
        }
        if !self.write_delay.is_zero() {
            sleep(self.write_delay).await;
        }

        let outcome = {
            let mut state = self.live_state()?;
            state.write_attempts.push(payload.to_vec());
            state
                .write_outcomes
                .pop_front()
                .unwrap_or(WriteOutcome::Accept)
        };
        match outcome {
            WriteOutcome::Accept => {}
            WriteOutcome::Reject => {
                return Err(InteractionError::WriteRejected {
                    reason: "fake device is busy".to_string(),
                });
            }
            WriteOutcome::Fail => {
                return Err(InteractionError::WriteFailed {
                    reason: "fake device failed the write".to_string(),
                });
            }
            WriteOutcome::Hang => future::pending::<()>().await,
        }

        let frame = FrameCodec::decode(payload).map_err(|error| InteractionError::WriteFailed {
            reason: error.to_string(),
        })?;
        let mut state = self.live_state()?;
        match frame {
            CommandFrame::SetVolume(volume) => state.report.volume = volume,
            CommandFrame::SetPower(is_on) => state.report.is_on = is_on,
            CommandFrame::Authenticate(token) => state.authenticated_with = Some(token),
        }
        state.accepted_frames.push(frame);
        if self.notify_on_write {
            state.notify_state();
        }
        Ok(())
    }

    async fn subscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let mut state = self.live_state()?;
        if endpoint == EndpointId::ReadStateCharacteristic {
            state.subscribed = true;
        }
        Ok(())
    }

    async fn unsubscribe_endpoint(&self, endpoint: EndpointId) -> Result<(), InteractionError> {
        let mut state = self.live_state()?;
        if endpoint == EndpointId::ReadStateCharacteristic {
            state.subscribed = false;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), InteractionError> {
        let mut state = self.device.lock();
        if state.is_live(self.generation) {
            state.events = None;
            state.subscribed = false;
            state.generation += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::builder().address("00:00:00:00:AB:CD").build()
    }

    fn volume(value: u8) -> Volume {
        Volume::new(value).expect("test volume should be valid")
    }

    #[tokio::test]
    async fn accepted_writes_update_state_and_notify() -> anyhow::Result<()> {
        let client = FakeHardwareClient::new(FakeDeviceConfig::default());
        let device = client.device();
        let EstablishedConnection { link, mut events } = client.connect(&identity()).await?;
        link.subscribe_endpoint(EndpointId::ReadStateCharacteristic)
            .await?;

        let payload = FrameCodec::encode(&CommandFrame::SetVolume(volume(40)));
        link.write_endpoint(EndpointId::WriteStateCharacteristic, &payload)
            .await?;

        assert_eq!(volume(40), device.state().volume);
        assert_eq!(vec![CommandFrame::SetVolume(volume(40))], device.accepted_frames());
        assert_matches!(
            events.recv().await,
            Some(LinkEvent::Notification { endpoint: EndpointId::ReadStateCharacteristic, .. })
        );
        Ok(())
    }

    #[tokio::test]
    async fn scripted_rejections_are_recorded_as_attempts() -> anyhow::Result<()> {
        let client = FakeHardwareClient::new(
            FakeDeviceConfig::builder()
                .write_outcomes(vec![WriteOutcome::Reject])
                .build(),
        );
        let device = client.device();
        let connection = client.connect(&identity()).await?;
        let payload = FrameCodec::encode(&CommandFrame::SetPower(true));

        let first = connection
            .link
            .write_endpoint(EndpointId::WriteStateCharacteristic, &payload)
            .await;
        assert_matches!(first, Err(error) if error.is_transient());

        connection
            .link
            .write_endpoint(EndpointId::WriteStateCharacteristic, &payload)
            .await?;
        assert_eq!(2, device.write_attempts().len());
        assert!(device.state().is_on);
        Ok(())
    }

    #[tokio::test]
    async fn stale_links_are_not_connected() -> anyhow::Result<()> {
        let client = FakeHardwareClient::new(FakeDeviceConfig::default());
        let device = client.device();
        let first = client.connect(&identity()).await?;
        device.trigger_disconnect();
        let _second = client.connect(&identity()).await?;

        let result = first
            .link
            .read_endpoint(EndpointId::ReadStateCharacteristic)
            .await;
        assert_matches!(result, Err(InteractionError::NotConnected));
        Ok(())
    }

    #[tokio::test]
    async fn trigger_disconnect_emits_event() -> anyhow::Result<()> {
        let client = FakeHardwareClient::new(FakeDeviceConfig::default());
        let device = client.device();
        let mut connection = client.connect(&identity()).await?;

        device.trigger_disconnect();

        assert_eq!(Some(LinkEvent::Disconnected), connection.events.recv().await);
        assert!(!device.is_connected());
        Ok(())
    }

    #[tokio::test]
    async fn scripted_connect_failure_is_reported() {
        let client = FakeHardwareClient::new(
            FakeDeviceConfig::builder()
                .connect_outcomes(vec![ConnectOutcome::Fail])
                .build(),
        );

        let result = client.connect(&identity()).await;
        assert_matches!(result, Err(InteractionError::DeviceNotFound { .. }));
        assert_eq!(1, client.device().connect_attempts());
    }
}
