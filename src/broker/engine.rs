use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::broker::client::Client;
use crate::broker::queue::{Binding, Queue, QueuedMessage};
use crate::broker::topic::{SubscriberId, Topic};
use crate::transport::{AckMode, EventSender};
use crate::utils::error::TransportError;

/// Something the broker wants handed to a client once its lock is released.
#[derive(Debug)]
pub enum Delivery {
    /// A topic message for a direct subscriber.
    Direct {
        to: EventSender,
        topic: String,
        payload: Vec<u8>,
        message_id: u64,
    },
    /// A queue message for the flow bound to `queue`.
    Queued {
        to: EventSender,
        client: SubscriberId,
        queue: String,
        ack_mode: AckMode,
        message: QueuedMessage,
    },
}

/// In-process broker state.
///
/// Keeps direct topic subscriptions per client, durable queues with their
/// own subscriptions, and at most one bound flow per queue. Methods never
/// talk to clients themselves; they return the [`Delivery`]s to make.
#[derive(Debug, Default)]
pub struct Broker {
    topics: HashMap<String, Topic>,
    clients: HashMap<SubscriberId, Client>,
    queues: HashMap<String, Queue>,
    next_message_id: u64,
    refusal: Option<String>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&mut self, client: Client) {
        debug!("Registered client {}", client.id);
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove_client(&mut self, client_id: &SubscriberId) -> Option<Client> {
        self.clients.remove(client_id)
    }

    pub fn has_client(&self, client_id: &SubscriberId) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn client_ids(&self) -> Vec<SubscriberId> {
        self.clients.keys().cloned().collect()
    }

    /// While set, new connections are refused with this reason.
    pub fn refuse_connections(&mut self, reason: Option<String>) {
        self.refusal = reason;
    }

    pub fn connection_refusal(&self) -> Option<&str> {
        self.refusal.as_deref()
    }

    /// Subscribes a client to a topic pattern, creating it if needed.
    pub fn subscribe(&mut self, topic: &str, subscriber: SubscriberId) {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(subscriber);
    }

    pub fn unsubscribe(&mut self, topic: &str, subscriber: &SubscriberId) {
        if let Some(t) = self.topics.get_mut(topic) {
            t.unsubscribe(subscriber);
            if t.subscribers.is_empty() {
                self.topics.remove(topic);
            }
        }
    }

    pub fn is_subscribed(&self, topic: &str, subscriber: &SubscriberId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|t| t.subscribers.contains(subscriber))
    }

    /// Routes a message to every matching direct subscriber (once per client)
    /// and spools it on every queue whose subscriptions attract it.
    pub fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Vec<Delivery> {
        let message_id = self.next_id();
        let mut deliveries = Vec::new();

        let mut receivers: Vec<&SubscriberId> = self
            .topics
            .values()
            .filter(|t| t.matches(topic))
            .flat_map(|t| t.subscribers.iter())
            .collect();
        receivers.sort();
        receivers.dedup();

        for sub_id in receivers {
            match self.clients.get(sub_id) {
                Some(client) => deliveries.push(Delivery::Direct {
                    to: client.events.clone(),
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    message_id,
                }),
                None => warn!("No client registered with id: {sub_id}"),
            }
        }

        let mut spooled = Vec::new();
        for queue in self.queues.values_mut() {
            if queue.attracts(topic) {
                queue.spool(QueuedMessage {
                    id: message_id,
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    redelivered: false,
                });
                spooled.push(queue.name.clone());
            }
        }
        for name in spooled {
            deliveries.extend(self.dispatch(&name));
        }

        if deliveries.is_empty() {
            debug!("No receivers for message on {topic}");
        }
        deliveries
    }

    /// Creates a durable queue. Replacing an existing one keeps its spool,
    /// subscriptions and binding.
    pub fn provision_queue(&mut self, name: &str) {
        if self.queues.contains_key(name) {
            debug!("Queue {name} already exists");
            return;
        }
        info!("Created queue {name}");
        self.queues.insert(name.to_string(), Queue::new(name));
    }

    /// Returns `Ok(false)` when the subscription was already present.
    pub fn add_queue_subscription(&mut self, queue: &str, topic: &str) -> Result<bool, TransportError> {
        let q = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| unknown_queue(queue))?;
        Ok(q.add_subscription(topic))
    }

    pub fn has_queue_subscription(&self, queue: &str, topic: &str) -> bool {
        self.queues
            .get(queue)
            .is_some_and(|q| q.has_subscription(topic))
    }

    /// Binds the client's flow to `queue` and returns the backlog for it.
    /// Queues are exclusive: a second flow is refused.
    pub fn bind(
        &mut self,
        queue: &str,
        client: &SubscriberId,
        ack_mode: AckMode,
    ) -> Result<Vec<Delivery>, TransportError> {
        let q = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| unknown_queue(queue))?;
        if let Some(binding) = q.binding() {
            if &binding.client != client {
                return Err(TransportError::Bind {
                    queue: queue.to_string(),
                    reason: "queue is already bound to another flow".to_string(),
                });
            }
        }
        q.bind(Binding {
            client: client.clone(),
            ack_mode,
        });
        info!("Client {client} bound to queue {queue}");
        Ok(self.dispatch(queue))
    }

    /// Releases the client's flow. Unacknowledged messages go back to the
    /// front of the queue as redelivered.
    pub fn unbind(&mut self, queue: &str, client: &SubscriberId) -> bool {
        match self.queues.get_mut(queue) {
            Some(q) if q.binding().is_some_and(|b| &b.client == client) => {
                q.unbind();
                info!("Client {client} unbound from queue {queue}");
                true
            }
            _ => false,
        }
    }

    pub fn acknowledge(
        &mut self,
        queue: &str,
        client: &SubscriberId,
        message_id: u64,
    ) -> Result<(), TransportError> {
        let ack_error = |reason: &str| TransportError::Ack {
            delivery_tag: message_id.to_string(),
            reason: reason.to_string(),
        };
        let q = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| ack_error("unknown queue"))?;
        if !q.binding().is_some_and(|b| &b.client == client) {
            return Err(ack_error("flow is no longer bound"));
        }
        if q.acknowledge(message_id) {
            Ok(())
        } else {
            Err(ack_error("message is not outstanding"))
        }
    }

    pub fn queue_depth(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(Queue::depth)
    }

    /// Removes a client with all its subscriptions and flows.
    pub fn cleanup_client(&mut self, client_id: &SubscriberId) -> Option<Client> {
        let client = self.remove_client(client_id);

        self.topics.retain(|_, topic| {
            topic.unsubscribe(client_id);
            !topic.subscribers.is_empty()
        });
        for queue in self.queues.values_mut() {
            if queue.binding().is_some_and(|b| &b.client == client_id) {
                queue.unbind();
            }
        }

        debug!("Cleaned up client {client_id}");
        client
    }

    fn dispatch(&mut self, queue: &str) -> Vec<Delivery> {
        let Some(q) = self.queues.get_mut(queue) else {
            return Vec::new();
        };
        let Some(binding) = q.binding().cloned() else {
            return Vec::new();
        };
        let Some(client) = self.clients.get(&binding.client) else {
            warn!("Queue {queue} is bound to unknown client {}", binding.client);
            return Vec::new();
        };

        q.dispatch()
            .into_iter()
            .map(|message| Delivery::Queued {
                to: client.events.clone(),
                client: binding.client.clone(),
                queue: queue.to_string(),
                ack_mode: binding.ack_mode,
                message,
            })
            .collect()
    }

    fn next_id(&mut self) -> u64 {
        self.next_message_id += 1;
        self.next_message_id
    }
}

fn unknown_queue(queue: &str) -> TransportError {
    TransportError::Bind {
        queue: queue.to_string(),
        reason: "unknown queue".to_string(),
    }
}
