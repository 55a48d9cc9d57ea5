use std::fmt;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::error::Elapsed;
use tokio::time::{Instant, timeout_at};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use super::config::SessionConfig;
use super::connection::{ConnectionEvent, ConnectionState};
use super::executor::{CommandExecutor, ExecutionError};
use crate::advertisement::{AdvertisementDecodeError, decode_advertisement};
use crate::codec::{CommandFrame, FrameCodec};
use crate::command::{Command, CommandResult, CommandStatus};
use crate::error::InteractionError;
use crate::hw::{ConnectedBleLink, EstablishedConnection, HardwareClient, LinkEvent};
use crate::model::{DeviceIdentity, DeviceSnapshot};
use crate::notification::NotificationHandler;
use crate::protocol::EndpointId;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Handle to one device session.
///
/// The session runs as its own task; every method only sends a message or
/// reads published state, so handles are cheap to clone and share. The task
/// disconnects and exits once every handle is dropped.
#[derive(Debug, Clone)]
pub struct SnoozDevice {
    identity: Arc<DeviceIdentity>,
    inbox: mpsc::UnboundedSender<SessionMessage>,
    connection: watch::Receiver<ConnectionState>,
    snapshot: watch::Receiver<Option<DeviceSnapshot>>,
}

impl SnoozDevice {
    /// Starts a session for `identity` on the current tokio runtime.
    ///
    /// No connection is opened until the first command is submitted.
    ///
    /// ```
    /// # async fn demo() -> anyhow::Result<()> {
    /// use std::sync::Arc;
    /// use snooz::{Command, DeviceIdentity, FakeDeviceConfig, FakeHardwareClient, SessionConfig, SnoozDevice, Volume};
    ///
    /// let client = Arc::new(FakeHardwareClient::new(FakeDeviceConfig::default()));
    /// let identity = DeviceIdentity::builder().address("00:00:00:00:AB:CD").build();
    /// let device = SnoozDevice::spawn(identity, client, SessionConfig::default());
    ///
    /// let result = device.execute(Command::set_volume(Volume::new(50)?)).await;
    /// assert!(result.is_success());
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn spawn(
        identity: DeviceIdentity,
        client: Arc<dyn HardwareClient>,
        config: SessionConfig,
    ) -> Self {
        let identity = Arc::new(identity);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (connection_tx, connection_rx) = watch::channel(ConnectionState::Disconnected);
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        let span = info_span!("snooz", device = %identity.display_name());
        let actor = SessionActor {
            identity: Arc::clone(&identity),
            client,
            config,
            inbox: inbox_rx,
            connection_tx,
            snapshot_tx,
            state: ConnectionState::Disconnected,
            generation: 0,
            link: None,
            connecting: None,
            queued: None,
            running: None,
        };
        tokio::spawn(actor.run().instrument(span));

        Self {
            identity,
            inbox: inbox_tx,
            connection: connection_rx,
            snapshot: snapshot_rx,
        }
    }

    /// Identity this session controls.
    #[must_use]
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Submits a command, superseding any command still queued or running.
    ///
    /// The returned handle resolves exactly once. Dropping it does not cancel
    /// the command.
    pub fn submit(&self, command: Command) -> PendingCommand {
        let submitted_at = Instant::now();
        let (reply, receiver) = oneshot::channel();
        let ticket = Ticket {
            command,
            submitted_at,
            reply,
        };
        // A closed inbox drops the ticket, which resolves the handle as not
        // connected.
        let _ = self.inbox.send(SessionMessage::Submit(ticket));

        PendingCommand {
            submitted_at,
            receiver,
        }
    }

    /// Submits a command and waits for its result.
    pub async fn execute(&self, command: Command) -> CommandResult {
        self.submit(command).await
    }

    /// Cancels any command and closes the connection, waiting for teardown.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.inbox.send(SessionMessage::Disconnect(reply)).is_ok() {
            let _ = done.await;
        }
    }

    /// Decodes an advertisement for this device and, unless a live
    /// connection is reporting state, publishes it as the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns the decode error; the previous snapshot is kept.
    pub fn observe_advertisement(
        &self,
        payload: &[u8],
    ) -> Result<DeviceSnapshot, AdvertisementDecodeError> {
        match decode_advertisement(payload, self.identity.model()) {
            Ok(snapshot) => {
                let _ = self.inbox.send(SessionMessage::Advertisement(snapshot));
                Ok(snapshot)
            }
            Err(error) => {
                warn!(
                    device = %self.identity.display_name(),
                    %error,
                    "ignoring undecodable advertisement"
                );
                Err(error)
            }
        }
    }

    /// Best-known device state, from the last notification or advertisement.
    #[must_use]
    pub fn current_state(&self) -> Option<DeviceSnapshot> {
        *self.snapshot.borrow()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Receiver notified on every snapshot replacement.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<Option<DeviceSnapshot>> {
        self.snapshot.clone()
    }

    /// Stream of connection states, starting with the current one.
    #[must_use]
    pub fn connection_changes(&self) -> WatchStream<ConnectionState> {
        WatchStream::new(self.connection.clone())
    }
}

/// Result handle for one submitted command.
#[derive(Debug)]
#[must_use = "a pending command does nothing unless awaited"]
pub struct PendingCommand {
    submitted_at: Instant,
    receiver: oneshot::Receiver<CommandResult>,
}

impl Future for PendingCommand {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let submitted_at = self.submitted_at;
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.unwrap_or_else(|_closed| {
                CommandResult::new(CommandStatus::NotConnected, submitted_at.elapsed())
            })
        })
    }
}

enum SessionMessage {
    Submit(Ticket),
    Disconnect(oneshot::Sender<()>),
    Advertisement(DeviceSnapshot),
}

impl fmt::Debug for SessionMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submit(ticket) => write!(f, "Submit({})", ticket.command),
            Self::Disconnect(_) => f.write_str("Disconnect"),
            Self::Advertisement(snapshot) => write!(f, "Advertisement({snapshot})"),
        }
    }
}

/// A submitted command and the channel its result goes to.
struct Ticket {
    command: Command,
    submitted_at: Instant,
    reply: oneshot::Sender<CommandResult>,
}

impl Ticket {
    fn resolve(self, status: CommandStatus) {
        let result = CommandResult::new(status, self.submitted_at.elapsed());
        debug!(
            command = %self.command,
            %status,
            duration = ?result.duration,
            "command resolved"
        );
        let _ = self.reply.send(result);
    }
}

struct RunningCommand {
    // Taken when the command is resolved early; the job keeps running until
    // it observes cancellation.
    ticket: Option<Ticket>,
    cancel: CancellationToken,
    job: BoxFuture<Result<(), ExecutionError>>,
}

struct LiveLink {
    link: Arc<dyn ConnectedBleLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    generation: u64,
    ready_at: Instant,
}

struct PendingConnect {
    started_at: Instant,
    cancel: CancellationToken,
    future: BoxFuture<Result<EstablishedConnection, ConnectError>>,
}

#[derive(Debug, Error)]
enum ConnectError {
    #[error("connection was not ready within {after:?}")]
    TimedOut { after: Duration },
    #[error("connection setup was cancelled")]
    Cancelled,
    #[error(transparent)]
    Interaction(#[from] InteractionError),
}

impl ConnectError {
    fn status(&self) -> CommandStatus {
        match self {
            Self::TimedOut { .. } => CommandStatus::Timeout,
            Self::Cancelled => CommandStatus::Cancelled,
            Self::Interaction(_) => CommandStatus::NotConnected,
        }
    }
}

struct SessionActor {
    identity: Arc<DeviceIdentity>,
    client: Arc<dyn HardwareClient>,
    config: SessionConfig,
    inbox: mpsc::UnboundedReceiver<SessionMessage>,
    connection_tx: watch::Sender<ConnectionState>,
    snapshot_tx: watch::Sender<Option<DeviceSnapshot>>,
    state: ConnectionState,
    generation: u64,
    link: Option<LiveLink>,
    connecting: Option<PendingConnect>,
    // Waits for a connection, or for a superseded job to wind down.
    queued: Option<Ticket>,
    running: Option<RunningCommand>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                event = next_link_event(self.link.as_mut()) => self.on_link_event(event),
                message = self.inbox.recv() => match message {
                    Some(message) => self.on_message(message).await,
                    None => break,
                },
                outcome = wait_on(self.connecting.as_mut().map(|pending| &mut pending.future)) => {
                    self.on_connect_finished(outcome);
                }
                outcome = wait_on(self.running.as_mut().map(|running| &mut running.job)) => {
                    self.on_job_finished(outcome);
                }
            }
        }

        self.disconnect().await;
        debug!("session closed");
    }

    async fn on_message(&mut self, message: SessionMessage) {
        trace!(?message, "session message");
        match message {
            SessionMessage::Submit(ticket) => self.submit(ticket),
            SessionMessage::Disconnect(reply) => {
                self.disconnect().await;
                let _ = reply.send(());
            }
            SessionMessage::Advertisement(snapshot) => {
                if self.state.is_connected() {
                    trace!("connected; ignoring advertisement snapshot");
                } else {
                    self.snapshot_tx.send_replace(Some(snapshot));
                }
            }
        }
    }

    fn submit(&mut self, ticket: Ticket) {
        debug!(command = %ticket.command, "command submitted");
        self.supersede();

        if self.state.is_connected() && self.running.is_none() {
            self.start(ticket);
            return;
        }

        self.queued = Some(ticket);
        if self.state == ConnectionState::Disconnected {
            self.begin_connect();
        }
    }

    /// Resolves the queued and running commands as cancelled and tells the
    /// running job to stop at its next suspension point.
    fn supersede(&mut self) {
        if let Some(ticket) = self.queued.take() {
            ticket.resolve(CommandStatus::Cancelled);
        }
        if let Some(running) = self.running.as_mut() {
            running.cancel.cancel();
            if let Some(ticket) = running.ticket.take() {
                ticket.resolve(CommandStatus::Cancelled);
            }
        }
    }

    fn begin_connect(&mut self) {
        self.transition(ConnectionEvent::ConnectRequested);
        let client = Arc::clone(&self.client);
        let identity = Arc::clone(&self.identity);
        let connect_timeout = self.config.connect_timeout();
        let cancel = CancellationToken::new();
        let setup_cancel = cancel.clone();

        self.connecting = Some(PendingConnect {
            started_at: Instant::now(),
            cancel,
            future: Box::pin(
                async move {
                    establish(client.as_ref(), &identity, connect_timeout, &setup_cancel).await
                }
                .in_current_span(),
            ),
        });
    }

    fn on_connect_finished(&mut self, outcome: Result<EstablishedConnection, ConnectError>) {
        let Some(pending) = self.connecting.take() else {
            return;
        };
        let load_time = pending.started_at.elapsed();

        match outcome {
            Ok(EstablishedConnection { link, events }) => {
                self.generation += 1;
                self.transition(ConnectionEvent::ConnectSucceeded);
                debug!(?load_time, generation = self.generation, "connection ready");
                self.link = Some(LiveLink {
                    link,
                    events,
                    generation: self.generation,
                    ready_at: Instant::now(),
                });
                if let Some(ticket) = self.queued.take() {
                    self.start(ticket);
                }
            }
            Err(error) => {
                warn!(%error, ?load_time, "failed to connect");
                self.transition(ConnectionEvent::ConnectFailed);
                if let Some(ticket) = self.queued.take() {
                    ticket.resolve(error.status());
                }
            }
        }
    }

    fn start(&mut self, ticket: Ticket) {
        let Some(live) = self.link.as_ref() else {
            ticket.resolve(CommandStatus::NotConnected);
            return;
        };

        let cancel = CancellationToken::new();
        let executor = CommandExecutor::new(Arc::clone(&live.link), self.config, cancel.clone());
        let command = ticket.command;
        let span = info_span!("command", %command);
        self.running = Some(RunningCommand {
            ticket: Some(ticket),
            cancel,
            job: Box::pin(async move { executor.execute(command).await }.instrument(span)),
        });
    }

    fn on_job_finished(&mut self, outcome: Result<(), ExecutionError>) {
        let Some(running) = self.running.take() else {
            return;
        };

        // Apply events that arrived before the final acknowledgment so a
        // dropped link is seen before the command is reported.
        self.drain_link_events();

        let status = match outcome {
            Ok(()) if self.state.is_connected() => CommandStatus::Success,
            Ok(()) => CommandStatus::NotConnected,
            Err(error) => {
                if !matches!(error, ExecutionError::Cancelled) {
                    warn!(%error, "command failed");
                }
                error.status()
            }
        };
        if let Some(ticket) = running.ticket {
            ticket.resolve(status);
        }

        if let Some(ticket) = self.queued.take() {
            self.submit(ticket);
        }
    }

    fn drain_link_events(&mut self) {
        while let Some(live) = self.link.as_mut() {
            let generation = live.generation;
            match live.events.try_recv() {
                Ok(event) => self.on_link_event((generation, Some(event))),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.on_link_event((generation, None));
                }
            }
        }
    }

    fn on_link_event(&mut self, (generation, event): (u64, Option<LinkEvent>)) {
        if generation != self.generation {
            trace!(generation, "dropping event from a previous connection");
            return;
        }

        match event {
            Some(LinkEvent::Notification {
                endpoint: EndpointId::ReadStateCharacteristic,
                payload,
            }) => self.apply_notification(&payload),
            Some(LinkEvent::Notification { endpoint, .. }) => {
                trace!(%endpoint, "ignoring notification");
            }
            Some(LinkEvent::Disconnected) | None => self.on_link_lost(),
        }
    }

    fn apply_notification(&mut self, payload: &[u8]) {
        match NotificationHandler::decode(payload) {
            Ok(report) => {
                let snapshot = report.into_snapshot(self.identity.model());
                trace!(%snapshot, "state notification");
                self.snapshot_tx.send_replace(Some(snapshot));
            }
            Err(error) => warn!(%error, "ignoring undecodable state notification"),
        }
    }

    fn on_link_lost(&mut self) {
        let Some(live) = self.link.take() else {
            return;
        };
        info!(
            connected_for = ?live.ready_at.elapsed(),
            generation = live.generation,
            "device disconnected unexpectedly"
        );
        self.transition(ConnectionEvent::LinkLost);

        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            if let Some(ticket) = running.ticket {
                ticket.resolve(CommandStatus::NotConnected);
            }
        }
        if let Some(ticket) = self.queued.take() {
            ticket.resolve(CommandStatus::NotConnected);
        }
    }

    #[instrument(skip(self), level = "debug", fields(state = %self.state))]
    async fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.transition(ConnectionEvent::DisconnectRequested);

        if let Some(ticket) = self.queued.take() {
            ticket.resolve(CommandStatus::Cancelled);
        }
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            if let Some(ticket) = running.ticket {
                ticket.resolve(CommandStatus::Cancelled);
            }
            // An in-flight write finishes on its own before teardown.
            let _ = running.job.await;
        }
        if let Some(pending) = self.connecting.take() {
            pending.cancel.cancel();
            // Setup may have finished before the cancellation was seen.
            if let Ok(connection) = pending.future.await {
                close_quietly(connection.link.as_ref()).await;
            }
            debug!(load_time = ?pending.started_at.elapsed(), "connection setup abandoned");
        }

        if let Some(live) = self.link.take() {
            if let Err(error) = live
                .link
                .unsubscribe_endpoint(EndpointId::ReadStateCharacteristic)
                .await
            {
                debug!(%error, "failed to unsubscribe before disconnecting");
            }
            close_quietly(live.link.as_ref()).await;
            debug!(connected_for = ?live.ready_at.elapsed(), "disconnected");
        }
        self.transition(ConnectionEvent::DisconnectCompleted);
    }

    fn transition(&mut self, event: ConnectionEvent) {
        match self.state.on(event) {
            Ok(next) => {
                if next != self.state {
                    debug!(from = %self.state, to = %next, %event, "connection state changed");
                }
                self.state = next;
                self.connection_tx.send_replace(next);
            }
            Err(error) => warn!(%error, "ignoring connection event"),
        }
    }
}

/// Connects, authenticates when a token is configured, and subscribes to
/// state notifications, all before `connect_timeout` elapses.
///
/// A link that opened but could not be prepared is closed before returning.
#[instrument(skip_all, level = "debug")]
async fn establish(
    client: &dyn HardwareClient,
    identity: &DeviceIdentity,
    connect_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<EstablishedConnection, ConnectError> {
    let deadline = Instant::now() + connect_timeout;
    let timed_out = |_elapsed: Elapsed| ConnectError::TimedOut {
        after: connect_timeout,
    };

    let connection = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(ConnectError::Cancelled),
        outcome = timeout_at(deadline, client.connect(identity)) => outcome.map_err(timed_out)??,
    };

    let prepared = tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ConnectError::Cancelled),
        outcome = timeout_at(deadline, prepare(connection.link.as_ref(), identity)) => {
            outcome.map_err(timed_out).and_then(|result| result.map_err(ConnectError::from))
        }
    };

    match prepared {
        Ok(()) => Ok(connection),
        Err(error) => {
            close_quietly(connection.link.as_ref()).await;
            Err(error)
        }
    }
}

async fn prepare(
    link: &dyn ConnectedBleLink,
    identity: &DeviceIdentity,
) -> Result<(), InteractionError> {
    if let Some(token) = identity.token() {
        let frame = FrameCodec::encode(&CommandFrame::Authenticate(*token));
        link.write_endpoint(EndpointId::WriteStateCharacteristic, &frame)
            .await?;
    }
    link.subscribe_endpoint(EndpointId::ReadStateCharacteristic)
        .await
}

async fn close_quietly(link: &dyn ConnectedBleLink) {
    if let Err(error) = link.close().await {
        debug!(%error, "failed to close connection cleanly");
    }
}

async fn next_link_event(link: Option<&mut LiveLink>) -> (u64, Option<LinkEvent>) {
    match link {
        Some(live) => (live.generation, live.events.recv().await),
        None => future::pending().await,
    }
}

async fn wait_on<T>(future: Option<&mut BoxFuture<T>>) -> T {
    match future {
        Some(future) => future.await,
        None => future::pending().await,
    }
}
