//! Broker session lifecycle.
//!
//! `BrokerSession` owns at most one live connection and tracks where it is in
//! its lifecycle. It holds no business logic: the consumer or subscriber that
//! owns it feeds every session event through [`BrokerSession::on_event`] and
//! acts on the returned [`Transition`].
//!
//! ```text
//!   Disconnected/Failed --connect()--> Connecting --Up--> Connected
//!          ^                               |                  |
//!          +------- ConnectFailed ---------+                  |
//!          +------- Disconnected (voluntary / error) ---------+
//! ```

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::transport::{
    BrokerConnection, BrokerTransport, ConnectionParams, EventSender, SessionEvent,
};
use crate::utils::error::TransportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Disconnected after the broker dropped the session with an error.
    Failed(String),
}

/// What a session event meant for the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The session just became usable.
    Up,
    /// The connect attempt failed. No retry is made.
    ConnectFailed(String),
    /// The session went away; `Some` carries the broker's error.
    Down(Option<String>),
    Unchanged,
}

pub struct BrokerSession {
    transport: Arc<dyn BrokerTransport>,
    params: ConnectionParams,
    state: SessionState,
    connection: Option<Arc<dyn BrokerConnection>>,
}

impl BrokerSession {
    pub fn new(transport: Arc<dyn BrokerTransport>, params: ConnectionParams) -> Self {
        Self {
            transport,
            params,
            state: SessionState::Disconnected,
            connection: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// The live connection, only while `Connected`.
    pub fn connection(&self) -> Option<Arc<dyn BrokerConnection>> {
        if self.is_connected() {
            self.connection.clone()
        } else {
            None
        }
    }

    /// Starts connecting. A no-op while already connecting or connected.
    pub fn connect(&mut self, events: EventSender) -> Result<(), TransportError> {
        match self.state {
            SessionState::Connecting | SessionState::Connected => {
                info!("Already connected and ready.");
                return Ok(());
            }
            SessionState::Disconnected | SessionState::Failed(_) => {}
        }

        info!(
            "Connecting to message broker at {} (vpn \"{}\")",
            self.params.url, self.params.vpn
        );
        self.state = SessionState::Connecting;
        match self.transport.connect(&self.params, events) {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                error!("{e} - check correct parameter values and connectivity!");
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Applies a session event to the state machine.
    pub fn on_event(&mut self, event: &SessionEvent) -> Transition {
        match event {
            SessionEvent::Up => {
                if self.state == SessionState::Connecting {
                    info!("=== Successfully connected to the message broker. ===");
                    self.state = SessionState::Connected;
                    Transition::Up
                } else {
                    warn!("Ignoring session up notice while {:?}", self.state);
                    Transition::Unchanged
                }
            }
            SessionEvent::ConnectFailed { reason } => {
                if self.state != SessionState::Connecting {
                    warn!("Ignoring connect failure while {:?}: {reason}", self.state);
                    return Transition::Unchanged;
                }
                error!(
                    "Connection failed to the message router: {reason} - check correct parameter values and connectivity!"
                );
                self.state = SessionState::Disconnected;
                self.connection = None;
                Transition::ConnectFailed(reason.clone())
            }
            SessionEvent::Disconnected { error } => {
                if self.connection.is_none() && !matches!(self.state, SessionState::Connected) {
                    // Already released by disconnect().
                    return Transition::Unchanged;
                }
                self.connection = None;
                match error {
                    Some(reason) => {
                        error!("Disconnected from message broker: {reason}");
                        self.state = SessionState::Failed(reason.clone());
                    }
                    None => {
                        info!("Disconnected.");
                        self.state = SessionState::Disconnected;
                    }
                }
                Transition::Down(error.clone())
            }
            SessionEvent::SubscriptionOk { .. }
            | SessionEvent::SubscriptionError { .. }
            | SessionEvent::Message(_) => Transition::Unchanged,
        }
    }

    /// Releases the connection. Idempotent.
    pub fn disconnect(&mut self) {
        info!("Disconnecting from message broker...");
        match self.connection.take() {
            Some(connection) => {
                if let Err(e) = connection.disconnect() {
                    warn!("Error while disconnecting: {e}");
                }
            }
            None => info!("Not connected to message broker."),
        }
        self.state = SessionState::Disconnected;
    }
}
