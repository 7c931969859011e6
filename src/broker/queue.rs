use std::collections::{BTreeMap, VecDeque};

use super::topic::{SubscriberId, topic_matches};
use crate::transport::AckMode;

/// A message spooled on a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// The single flow currently bound to a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub client: SubscriberId,
    pub ack_mode: AckMode,
}

/// Durable queue attracting messages through its topic subscriptions.
#[derive(Debug, Default)]
pub struct Queue {
    pub name: String,
    subscriptions: Vec<String>,
    pending: VecDeque<QueuedMessage>,
    unacked: BTreeMap<u64, QueuedMessage>,
    binding: Option<Binding>,
}

impl Queue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Returns `false` when the subscription was already present.
    pub fn add_subscription(&mut self, topic: &str) -> bool {
        if self.has_subscription(topic) {
            return false;
        }
        self.subscriptions.push(topic.to_string());
        true
    }

    pub fn has_subscription(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|s| s == topic)
    }

    pub fn attracts(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|s| topic_matches(s, topic))
    }

    pub fn spool(&mut self, message: QueuedMessage) {
        self.pending.push_back(message);
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn bind(&mut self, binding: Binding) {
        self.binding = Some(binding);
    }

    /// Clears the binding and returns unacknowledged messages to the front of
    /// the queue, flagged as redelivered.
    pub fn unbind(&mut self) -> Option<Binding> {
        let binding = self.binding.take()?;
        let unacked = std::mem::take(&mut self.unacked);
        for (_, mut message) in unacked.into_iter().rev() {
            message.redelivered = true;
            self.pending.push_front(message);
        }
        Some(binding)
    }

    /// Hands every pending message to the bound flow. Under client
    /// acknowledgement they stay outstanding until acknowledged.
    pub fn dispatch(&mut self) -> Vec<QueuedMessage> {
        let Some(binding) = &self.binding else {
            return Vec::new();
        };
        let ack_mode = binding.ack_mode;
        let messages: Vec<QueuedMessage> = self.pending.drain(..).collect();
        if ack_mode == AckMode::Client {
            for message in &messages {
                self.unacked.insert(message.id, message.clone());
            }
        }
        messages
    }

    /// Removes an outstanding message. `false` if it was not outstanding.
    pub fn acknowledge(&mut self, id: u64) -> bool {
        self.unacked.remove(&id).is_some()
    }

    /// Spooled plus outstanding messages.
    pub fn depth(&self) -> usize {
        self.pending.len() + self.unacked.len()
    }
}
