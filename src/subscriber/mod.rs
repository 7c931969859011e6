//! Emotion controller: subscribes to image analysis results and publishes one
//! expression command per analysis that contains at least one face.
//!
//! Delivery on both sides is direct (fire-and-forget). Nothing is
//! acknowledged and nothing is retried; losing messages while disconnected is
//! accepted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::emotion::{
    EmotionTally, ExpressionCommand, ImageOrigin, aggregate, parse_faces,
};
use crate::session::{BrokerSession, Transition};
use crate::transport::{
    BrokerEvent, BrokerTransport, ConnectionParams, DeliveryMode, EventReceiver, EventSender,
    InboundMessage, OutboundMessage, SessionEvent, SubscriptionRequest, event_channel,
};
use crate::utils::error::{ProcessingError, PublishError, TransportError};

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Topic pattern the analysis results arrive on.
    pub analysis_topic: String,
    /// Topic the expression commands are published to.
    pub command_topic: String,
    pub subscription_timeout: Duration,
    pub grace: Duration,
}

/// An outstanding confirmed (un)subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOperation {
    Subscribe,
    Unsubscribe,
}

pub struct TopicSubscriber {
    session: BrokerSession,
    config: SubscriberConfig,
    events_tx: EventSender,
    events_rx: EventReceiver,
    pending: HashMap<String, PendingOperation>,
    next_request: u64,
    subscribed: bool,
    tally: EmotionTally,
}

impl TopicSubscriber {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        params: ConnectionParams,
        config: SubscriberConfig,
    ) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            session: BrokerSession::new(transport, params),
            config,
            events_tx,
            events_rx,
            pending: HashMap::new(),
            next_request: 0,
            subscribed: false,
            tally: EmotionTally::new(),
        }
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn pending(&self) -> &HashMap<String, PendingOperation> {
        &self.pending
    }

    /// Dominant emotions published during the current session.
    pub fn tally(&self) -> &EmotionTally {
        &self.tally
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.session.connect(self.events_tx.clone())
    }

    /// Requests a confirmed subscription to the analysis topic.
    pub fn subscribe(&mut self) {
        if self.subscribed {
            info!(
                "Already subscribed to \"{}\" and ready to receive messages.",
                self.config.analysis_topic
            );
            return;
        }
        info!("Subscribing to topic: {}", self.config.analysis_topic);
        self.request(PendingOperation::Subscribe);
    }

    /// Requests a confirmed removal of the analysis topic subscription.
    pub fn unsubscribe(&mut self) {
        if !self.subscribed {
            info!(
                "Cannot unsubscribe because not subscribed to the topic \"{}\"",
                self.config.analysis_topic
            );
            return;
        }
        info!("Unsubscribing from topic: {}", self.config.analysis_topic);
        self.request(PendingOperation::Unsubscribe);
    }

    fn request(&mut self, operation: PendingOperation) {
        let Some(connection) = self.session.connection() else {
            warn!("Cannot change subscriptions because not connected to the message broker.");
            return;
        };

        self.next_request += 1;
        let verb = match operation {
            PendingOperation::Subscribe => "subscribe",
            PendingOperation::Unsubscribe => "unsubscribe",
        };
        let correlation_key = format!(
            "{verb}-{}-{}",
            self.next_request, self.config.analysis_topic
        );
        let request = SubscriptionRequest {
            topic: self.config.analysis_topic.clone(),
            confirm: true,
            correlation_key: correlation_key.clone(),
            timeout: self.config.subscription_timeout,
        };

        self.pending.insert(correlation_key.clone(), operation);
        let sent = match operation {
            PendingOperation::Subscribe => connection.subscribe(request),
            PendingOperation::Unsubscribe => connection.unsubscribe(request),
        };
        if let Err(e) = sent {
            self.pending.remove(&correlation_key);
            error!("Cannot {verb} to topic \"{}\": {e}", self.config.analysis_topic);
        }
    }

    pub fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Session(SessionEvent::Message(message)) => self.handle_message(message),
            BrokerEvent::Session(SessionEvent::SubscriptionOk { correlation_key }) => {
                match self.pending.remove(&correlation_key) {
                    Some(PendingOperation::Subscribe) => {
                        self.subscribed = true;
                        info!("Successfully subscribed to topic: {}", self.config.analysis_topic);
                        info!("=== Ready to receive messages. ===");
                    }
                    Some(PendingOperation::Unsubscribe) => {
                        self.subscribed = false;
                        info!(
                            "Successfully unsubscribed from topic: {}",
                            self.config.analysis_topic
                        );
                    }
                    None => debug!("Ignoring confirmation for unknown request {correlation_key}"),
                }
            }
            BrokerEvent::Session(SessionEvent::SubscriptionError {
                correlation_key,
                reason,
            }) => match self.pending.remove(&correlation_key) {
                Some(PendingOperation::Subscribe) => {
                    error!(
                        "Cannot subscribe to topic \"{}\": {reason}",
                        self.config.analysis_topic
                    );
                }
                Some(PendingOperation::Unsubscribe) => {
                    error!(
                        "Cannot unsubscribe from topic \"{}\": {reason}",
                        self.config.analysis_topic
                    );
                }
                None => warn!("Subscription error for unknown request {correlation_key}: {reason}"),
            },
            BrokerEvent::Session(event) => match self.session.on_event(&event) {
                Transition::Up => self.subscribe(),
                Transition::Down(_) | Transition::ConnectFailed(_) => self.reset(),
                Transition::Unchanged => {}
            },
            BrokerEvent::Flow(event) => debug!("Ignoring queue flow event {event:?}"),
        }
    }

    /// Session-scoped state does not survive the session.
    fn reset(&mut self) {
        self.subscribed = false;
        self.pending.clear();
        if self.tally.total() > 0 {
            info!("Session ended with emotion tally {:?}", self.tally.counts());
        }
        self.tally.reset();
    }

    fn handle_message(&mut self, message: InboundMessage) {
        let command = match self.on_message(&message) {
            Ok(command) => command,
            Err(ProcessingError::NoFaces) => {
                info!("No faces found in FaceDetails.");
                return;
            }
            Err(e) => {
                warn!("Discarding message from {}: {e}", message.destination());
                return;
            }
        };

        match self.publish(&command) {
            Ok(()) => self.tally.record(&command.highest_emotion),
            Err(e) => error!("{e}"),
        }
    }

    /// Builds the expression command for one analysis message.
    pub fn on_message(&self, message: &InboundMessage) -> Result<ExpressionCommand, ProcessingError> {
        let origin = ImageOrigin::from_topic(message.destination());
        info!("Received message from \"{}\"", origin.source);

        let faces = parse_faces(message.binary_attachment())?;
        let summary = aggregate(&faces, origin).ok_or(ProcessingError::NoFaces)?;
        info!("Response contains {} face(s)", faces.len());
        info!(
            "Highest emotion: {}, value: {}",
            summary.dominant.kind, summary.dominant.confidence
        );

        Ok(ExpressionCommand::from_dominant(&summary.dominant))
    }

    /// Publishes `command` to the command topic with direct delivery.
    pub fn publish(&self, command: &ExpressionCommand) -> Result<(), PublishError> {
        let connection = self
            .session
            .connection()
            .ok_or(TransportError::NotConnected)?;
        let payload = command.to_wire()?;

        info!(
            "Publishing message \"{}\" to topic \"{}\"...",
            String::from_utf8_lossy(&payload),
            self.config.command_topic
        );
        connection.send(OutboundMessage {
            topic: self.config.command_topic.clone(),
            payload,
            delivery_mode: DeliveryMode::Direct,
        })?;
        info!("Message published to {}", self.config.command_topic);
        Ok(())
    }

    /// Drives the subscriber until `shutdown` resolves, then exits.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.connect() {
            error!("Subscriber is not connected: {e}");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = self.events_rx.recv() => self.handle_event(event),
            }
        }

        self.exit().await;
    }

    /// Unsubscribes, disconnects and waits out the grace period.
    pub async fn exit(&mut self) {
        if self.subscribed {
            self.unsubscribe();
        }
        self.session.disconnect();
        self.reset();
        tokio::time::sleep(self.config.grace).await;
        info!("Exiting.");
    }
}
