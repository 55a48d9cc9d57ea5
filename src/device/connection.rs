use serde::Serialize;
use strum_macros::{Display, EnumIter};
use thiserror::Error;

/// Lifecycle of the transport connection for one device session.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    #[strum(to_string = "disconnected")]
    Disconnected,
    #[strum(to_string = "connecting")]
    Connecting,
    #[strum(to_string = "connected")]
    Connected,
    #[strum(to_string = "disconnecting")]
    Disconnecting,
}

/// Inputs that move a session between connection states.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display)]
pub enum ConnectionEvent {
    /// A command needs the device and no connection is open.
    #[strum(to_string = "connect_requested")]
    ConnectRequested,
    /// The transport connected, authenticated and subscribed.
    #[strum(to_string = "connect_succeeded")]
    ConnectSucceeded,
    /// The transport could not connect or the deadline elapsed.
    #[strum(to_string = "connect_failed")]
    ConnectFailed,
    /// The caller asked to disconnect.
    #[strum(to_string = "disconnect_requested")]
    DisconnectRequested,
    /// Teardown after an explicit disconnect finished.
    #[strum(to_string = "disconnect_completed")]
    DisconnectCompleted,
    /// The peripheral dropped the connection on its own.
    #[strum(to_string = "link_lost")]
    LinkLost,
}

/// A state/event pair with no defined transition.
#[derive(Debug, Error, Clone, Copy, Eq, PartialEq)]
#[error("no transition from `{from}` on `{event}`")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub event: ConnectionEvent,
}

impl ConnectionState {
    /// Returns the state reached by applying `event`.
    ///
    /// ```
    /// use snooz::{ConnectionEvent, ConnectionState};
    ///
    /// let state = ConnectionState::Disconnected.on(ConnectionEvent::ConnectRequested)?;
    /// assert_eq!(ConnectionState::Connecting, state);
    /// # Ok::<(), snooz::InvalidTransition>(())
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for pairs outside the lifecycle.
    pub fn on(self, event: ConnectionEvent) -> Result<Self, InvalidTransition> {
        use ConnectionEvent as E;
        use ConnectionState as S;

        match (self, event) {
            (S::Disconnected, E::ConnectRequested) => Ok(S::Connecting),
            (S::Connecting, E::ConnectSucceeded) => Ok(S::Connected),
            (S::Connecting, E::ConnectFailed) => Ok(S::Disconnected),
            (S::Connecting | S::Connected, E::DisconnectRequested) => Ok(S::Disconnecting),
            (S::Disconnecting, E::DisconnectCompleted) => Ok(S::Disconnected),
            (_, E::LinkLost) => Ok(S::Disconnected),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    /// Returns whether writes may be issued.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}
