//! [`BrokerTransport`] backed by an in-process [`Broker`].

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::client::Client;
use super::engine::{Broker, Delivery};
use super::topic::SubscriberId;
use crate::transport::{
    AckMode, Acknowledger, BrokerConnection, BrokerEvent, BrokerTransport, ConnectionParams,
    EventSender, FlowEvent, InboundMessage, OutboundMessage, QueueFlow, SessionEvent,
    SubscriptionRequest,
};
use crate::utils::error::TransportError;

/// Cloning shares the same broker.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    broker: Arc<Mutex<Broker>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broker(&self) -> Arc<Mutex<Broker>> {
        self.broker.clone()
    }

    /// Publishes as an anonymous producer.
    pub fn publish(&self, topic: &str, payload: Vec<u8>) {
        let deliveries = self.broker.lock().publish(topic, payload);
        deliver(&self.broker, deliveries);
    }

    pub fn provision_queue(&self, name: &str, topic: &str) -> Result<(), TransportError> {
        let mut broker = self.broker.lock();
        broker.provision_queue(name);
        broker.add_queue_subscription(name, topic)?;
        Ok(())
    }

    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.broker.lock().queue_depth(queue)
    }

    pub fn refuse_connections(&self, reason: Option<&str>) {
        self.broker
            .lock()
            .refuse_connections(reason.map(str::to_string));
    }

    /// Drops every connected session as if the broker had failed.
    pub fn drop_clients(&self, reason: &str) {
        let dropped: Vec<Client> = {
            let mut broker = self.broker.lock();
            let ids = broker.client_ids();
            ids.iter()
                .filter_map(|id| broker.cleanup_client(id))
                .collect()
        };
        for client in dropped {
            info!("Dropping client {} ({reason})", client.id);
            let _ = client.events.send(BrokerEvent::Session(SessionEvent::Disconnected {
                error: Some(reason.to_string()),
            }));
        }
    }
}

impl BrokerTransport for LoopbackTransport {
    fn connect(
        &self,
        params: &ConnectionParams,
        events: EventSender,
    ) -> Result<Arc<dyn BrokerConnection>, TransportError> {
        let client = Client::new(events.clone());
        let client_id = client.id.clone();

        let refusal = {
            let mut broker = self.broker.lock();
            match broker.connection_refusal() {
                Some(reason) => Some(reason.to_string()),
                None => {
                    broker.register_client(client);
                    None
                }
            }
        };

        match refusal {
            Some(reason) => {
                let _ = events.send(SessionEvent::ConnectFailed { reason }.into());
            }
            None => {
                debug!("Loopback session {client_id} for {}", params.username);
                let _ = events.send(SessionEvent::Up.into());
            }
        }

        Ok(Arc::new(LoopbackConnection {
            broker: self.broker.clone(),
            client_id,
            events,
        }))
    }
}

struct LoopbackConnection {
    broker: Arc<Mutex<Broker>>,
    client_id: SubscriberId,
    events: EventSender,
}

impl LoopbackConnection {
    fn ensure_registered(&self, broker: &Broker) -> Result<(), TransportError> {
        if broker.has_client(&self.client_id) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }

    fn confirm(&self, request: &SubscriptionRequest) {
        if request.confirm {
            let _ = self.events.send(
                SessionEvent::SubscriptionOk {
                    correlation_key: request.correlation_key.clone(),
                }
                .into(),
            );
        }
    }

    fn reject(&self, request: &SubscriptionRequest, reason: &str) {
        if request.confirm {
            let _ = self.events.send(
                SessionEvent::SubscriptionError {
                    correlation_key: request.correlation_key.clone(),
                    reason: reason.to_string(),
                }
                .into(),
            );
        }
    }
}

impl BrokerConnection for LoopbackConnection {
    fn subscribe(&self, request: SubscriptionRequest) -> Result<(), TransportError> {
        {
            let mut broker = self.broker.lock();
            self.ensure_registered(&broker)?;
            if request.topic.is_empty() {
                drop(broker);
                self.reject(&request, "invalid topic");
                return Ok(());
            }
            broker.subscribe(&request.topic, self.client_id.clone());
        }
        self.confirm(&request);
        Ok(())
    }

    fn unsubscribe(&self, request: SubscriptionRequest) -> Result<(), TransportError> {
        {
            let mut broker = self.broker.lock();
            self.ensure_registered(&broker)?;
            if !broker.is_subscribed(&request.topic, &self.client_id) {
                drop(broker);
                self.reject(&request, "subscription not found");
                return Ok(());
            }
            broker.unsubscribe(&request.topic, &self.client_id);
        }
        self.confirm(&request);
        Ok(())
    }

    fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let deliveries = {
            let mut broker = self.broker.lock();
            self.ensure_registered(&broker)?;
            broker.publish(&message.topic, message.payload)
        };
        deliver(&self.broker, deliveries);
        Ok(())
    }

    fn bind_queue(
        &self,
        queue: &str,
        ack_mode: AckMode,
    ) -> Result<Box<dyn QueueFlow>, TransportError> {
        let deliveries = {
            let mut broker = self.broker.lock();
            self.ensure_registered(&broker)?;
            broker.bind(queue, &self.client_id, ack_mode)?
        };
        let _ = self.events.send(
            FlowEvent::Up {
                queue: queue.to_string(),
            }
            .into(),
        );
        deliver(&self.broker, deliveries);

        Ok(Box::new(LoopbackFlow {
            broker: self.broker.clone(),
            client_id: self.client_id.clone(),
            queue: queue.to_string(),
            events: self.events.clone(),
        }))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let removed = self.broker.lock().cleanup_client(&self.client_id);
        if removed.is_some() {
            let _ = self
                .events
                .send(SessionEvent::Disconnected { error: None }.into());
        }
        Ok(())
    }
}

struct LoopbackFlow {
    broker: Arc<Mutex<Broker>>,
    client_id: SubscriberId,
    queue: String,
    events: EventSender,
}

impl QueueFlow for LoopbackFlow {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        if self.broker.lock().unbind(&self.queue, &self.client_id) {
            let _ = self.events.send(
                FlowEvent::Down {
                    queue: self.queue.clone(),
                }
                .into(),
            );
        }
        Ok(())
    }
}

struct LoopbackAcker {
    broker: Arc<Mutex<Broker>>,
    client_id: SubscriberId,
    queue: String,
}

impl Acknowledger for LoopbackAcker {
    fn acknowledge(&self, delivery_tag: &str) -> Result<(), TransportError> {
        let id = delivery_tag.parse::<u64>().map_err(|_| TransportError::Ack {
            delivery_tag: delivery_tag.to_string(),
            reason: "malformed delivery tag".to_string(),
        })?;
        self.broker
            .lock()
            .acknowledge(&self.queue, &self.client_id, id)
    }
}

/// Hands deliveries to their clients. Must be called without the broker
/// lock held.
fn deliver(broker: &Arc<Mutex<Broker>>, deliveries: Vec<Delivery>) {
    for delivery in deliveries {
        let (to, event) = match delivery {
            Delivery::Direct {
                to,
                topic,
                payload,
                message_id,
            } => (
                to,
                BrokerEvent::Session(SessionEvent::Message(InboundMessage::direct(
                    &topic,
                    payload,
                    &message_id.to_string(),
                ))),
            ),
            Delivery::Queued {
                to,
                client,
                queue,
                ack_mode,
                message,
            } => {
                let tag = message.id.to_string();
                let inbound = match ack_mode {
                    AckMode::Client => InboundMessage::guaranteed(
                        &message.topic,
                        message.payload,
                        &tag,
                        message.redelivered,
                        Arc::new(LoopbackAcker {
                            broker: broker.clone(),
                            client_id: client,
                            queue,
                        }),
                    ),
                    AckMode::Auto => InboundMessage::direct(&message.topic, message.payload, &tag),
                };
                (to, BrokerEvent::Flow(FlowEvent::Message(inbound)))
            }
        };
        if to.send(event).is_err() {
            debug!("Dropping delivery for a closed session");
        }
    }
}
