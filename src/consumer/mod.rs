//! Guaranteed-delivery queue consumer.
//!
//! [`QueueConsumer`] binds a client-acknowledged flow to a provisioned queue
//! and runs every delivered message through a [`MessageProcessor`] on its own
//! task. A message is acknowledged only once its processor returned `Ok`;
//! otherwise it is left alone and the broker redelivers it later.

mod queue_consumer;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::transport::InboundMessage;
use crate::utils::error::ProcessingError;

pub use queue_consumer::{ConsumerStats, QueueConsumer};

/// Per-message processing callback.
///
/// May run several times for the same logical message because the broker
/// redelivers anything left unacknowledged.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, destination: &str, payload: &[u8]) -> Result<(), ProcessingError>;
}

/// How one delivered message was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Processed and acknowledged.
    Acknowledged,
    /// Processing failed; left unacknowledged for redelivery.
    Rejected,
    /// Processed, but the broker did not take the acknowledgement.
    AckFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// All in-flight processing finished within the grace period.
    Drained,
    /// The grace period ran out; `abandoned` tasks were aborted.
    TimedOut { abandoned: usize },
}

/// Runs `processor` on `message` and acknowledges it only on success.
pub async fn process_and_acknowledge(
    processor: Arc<dyn MessageProcessor>,
    message: InboundMessage,
) -> DeliveryOutcome {
    let tag = message.delivery_tag().to_string();
    if message.is_redelivered() {
        info!("Message {tag} is a redelivery");
    }

    if let Err(e) = processor
        .process(message.destination(), message.binary_attachment())
        .await
    {
        error!("Processing of message {tag} failed, leaving it unacknowledged: {e}");
        return DeliveryOutcome::Rejected;
    }

    match message.acknowledge() {
        Ok(()) => {
            info!("Acknowledged message {tag}");
            DeliveryOutcome::Acknowledged
        }
        Err(e) => {
            error!("{e}");
            DeliveryOutcome::AckFailed
        }
    }
}
