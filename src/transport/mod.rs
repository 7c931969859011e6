//! The `transport` module defines the broker capability the rest of the bridge
//! is written against, and the WebSocket client that implements it for
//! deployments.
//!
//! A transport never calls back into its owner. Everything the broker reports
//! (session up/down, subscription confirmations, delivered messages, queue
//! flow state) is pushed as a [`BrokerEvent`] onto the single channel handed to
//! [`BrokerTransport::connect`], and the owner of that channel is the only
//! code that reacts to it.

pub mod event;
pub mod message;
pub mod websocket;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::utils::error::TransportError;

pub use event::{BrokerEvent, EventReceiver, EventSender, FlowEvent, SessionEvent, event_channel};
pub use websocket::WsTransport;

/// Credentials and location of the broker. Passed through to the transport
/// untouched.
#[derive(Clone)]
pub struct ConnectionParams {
    pub url: String,
    pub vpn: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("url", &self.url)
            .field("vpn", &self.vpn)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How a queue flow expects delivered messages to be settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// The broker forgets a message as soon as it is delivered.
    Auto,
    /// The broker keeps a message until the client acknowledges it.
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Direct,
    Persistent,
}

/// A provisioned durable queue and the topic subscription attracting messages
/// to it. Immutable once provisioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    pub name: String,
    pub subscription_topic: String,
}

/// A topic (un)subscription request. With `confirm` set the transport answers
/// with exactly one `SubscriptionOk`/`SubscriptionError` carrying
/// `correlation_key`, at the latest once `timeout` has elapsed.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub topic: String,
    pub confirm: bool,
    pub correlation_key: String,
    pub timeout: Duration,
}

impl SubscriptionRequest {
    /// Confirmed request that uses the topic itself as correlation key.
    pub fn confirmed(topic: &str, timeout: Duration) -> Self {
        Self {
            topic: topic.to_string(),
            confirm: true,
            correlation_key: topic.to_string(),
            timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub delivery_mode: DeliveryMode,
}

/// Settles guaranteed messages on behalf of an [`InboundMessage`].
pub trait Acknowledger: Send + Sync {
    fn acknowledge(&self, delivery_tag: &str) -> Result<(), TransportError>;
}

/// A message handed to a consumer or subscriber.
///
/// Owned by the handler for the duration of one processing callback.
/// [`InboundMessage::acknowledge`] consumes it, so a message cannot outlive
/// its acknowledgement.
pub struct InboundMessage {
    payload: Vec<u8>,
    destination: String,
    delivery_tag: String,
    redelivered: bool,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl InboundMessage {
    /// A direct (fire-and-forget) message; acknowledging it is a no-op.
    pub fn direct(destination: &str, payload: Vec<u8>, delivery_tag: &str) -> Self {
        Self {
            payload,
            destination: destination.to_string(),
            delivery_tag: delivery_tag.to_string(),
            redelivered: false,
            acker: None,
        }
    }

    /// A guaranteed message settled through `acker`.
    pub fn guaranteed(
        destination: &str,
        payload: Vec<u8>,
        delivery_tag: &str,
        redelivered: bool,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            payload,
            destination: destination.to_string(),
            delivery_tag: delivery_tag.to_string(),
            redelivered,
            acker: Some(acker),
        }
    }

    pub fn binary_attachment(&self) -> &[u8] {
        &self.payload
    }

    /// Topic the message was published to.
    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn delivery_tag(&self) -> &str {
        &self.delivery_tag
    }

    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn acknowledge(self) -> Result<(), TransportError> {
        match &self.acker {
            Some(acker) => acker.acknowledge(&self.delivery_tag),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("destination", &self.destination)
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("bytes", &self.payload.len())
            .field("guaranteed", &self.acker.is_some())
            .finish()
    }
}

/// Entry point of a broker implementation.
pub trait BrokerTransport: Send + Sync {
    /// Starts connecting and returns immediately. The outcome is reported on
    /// `events` as `SessionEvent::Up` or `SessionEvent::ConnectFailed`; an
    /// `Err` here means the attempt could not even be started.
    fn connect(
        &self,
        params: &ConnectionParams,
        events: EventSender,
    ) -> Result<Arc<dyn BrokerConnection>, TransportError>;
}

/// One live connection to the broker.
pub trait BrokerConnection: Send + Sync {
    fn subscribe(&self, request: SubscriptionRequest) -> Result<(), TransportError>;

    fn unsubscribe(&self, request: SubscriptionRequest) -> Result<(), TransportError>;

    fn send(&self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Opens a flow from `queue`. Flow state is reported as `FlowEvent`s.
    fn bind_queue(&self, queue: &str, ack_mode: AckMode)
    -> Result<Box<dyn QueueFlow>, TransportError>;

    /// Asks the broker to close the connection. `SessionEvent::Disconnected`
    /// follows.
    fn disconnect(&self) -> Result<(), TransportError>;
}

/// Handle on an open queue flow.
pub trait QueueFlow: Send + Sync {
    fn queue_name(&self) -> &str;

    fn disconnect(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod websocket_tests;
