//! Broker events.
//!
//! Session-level and flow-level notifications share one channel so that the
//! owning consumer or subscriber sees them in the order the transport
//! produced them.

use tokio::sync::mpsc;

use super::InboundMessage;

#[derive(Debug)]
pub enum SessionEvent {
    Up,
    ConnectFailed {
        reason: String,
    },
    /// `error` is `None` for a requested disconnect.
    Disconnected {
        error: Option<String>,
    },
    SubscriptionOk {
        correlation_key: String,
    },
    SubscriptionError {
        correlation_key: String,
        reason: String,
    },
    Message(InboundMessage),
}

#[derive(Debug)]
pub enum FlowEvent {
    Up { queue: String },
    ConnectFailed { queue: String, reason: String },
    Down { queue: String },
    DownError { queue: String, reason: String },
    Message(InboundMessage),
}

#[derive(Debug)]
pub enum BrokerEvent {
    Session(SessionEvent),
    Flow(FlowEvent),
}

impl From<SessionEvent> for BrokerEvent {
    fn from(event: SessionEvent) -> Self {
        BrokerEvent::Session(event)
    }
}

impl From<FlowEvent> for BrokerEvent {
    fn from(event: FlowEvent) -> Self {
        BrokerEvent::Flow(event)
    }
}

pub type EventSender = mpsc::UnboundedSender<BrokerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BrokerEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
