use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::{DeliveryOutcome, MessageProcessor, ShutdownOutcome, process_and_acknowledge};
use crate::session::{BrokerSession, Transition};
use crate::transport::{
    AckMode, BrokerEvent, BrokerTransport, ConnectionParams, EventReceiver, EventSender,
    FlowEvent, InboundMessage, QueueDescriptor, QueueFlow, SessionEvent, event_channel,
};
use crate::utils::error::TransportError;

/// Settled deliveries since the consumer was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acknowledged: u64,
    pub rejected: u64,
    pub ack_failed: u64,
}

impl ConsumerStats {
    fn record(&mut self, joined: Result<DeliveryOutcome, JoinError>) {
        match joined {
            Ok(DeliveryOutcome::Acknowledged) => self.acknowledged += 1,
            Ok(DeliveryOutcome::Rejected) => self.rejected += 1,
            Ok(DeliveryOutcome::AckFailed) => self.ack_failed += 1,
            Err(e) => {
                error!("Message processing task failed: {e}");
                self.rejected += 1;
            }
        }
    }
}

/// Consumes a provisioned queue with client acknowledgement.
///
/// The consumer is the single reader of its session's event channel. It binds
/// the flow as soon as the session comes up and never reconnects on its own.
pub struct QueueConsumer {
    session: BrokerSession,
    queue: QueueDescriptor,
    processor: Arc<dyn MessageProcessor>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    flow: Option<Box<dyn QueueFlow>>,
    consuming: bool,
    in_flight: JoinSet<DeliveryOutcome>,
    grace: Duration,
    stats: ConsumerStats,
}

impl QueueConsumer {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        params: ConnectionParams,
        queue: QueueDescriptor,
        processor: Arc<dyn MessageProcessor>,
        grace: Duration,
    ) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            session: BrokerSession::new(transport, params),
            queue,
            processor,
            events_tx,
            events_rx,
            flow: None,
            consuming: false,
            in_flight: JoinSet::new(),
            grace,
            stats: ConsumerStats::default(),
        }
    }

    pub fn session(&self) -> &BrokerSession {
        &self.session
    }

    pub fn is_consuming(&self) -> bool {
        self.consuming
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.session.connect(self.events_tx.clone())
    }

    /// Binds the client-acknowledged flow. Needs a connected session.
    pub fn start_consume(&mut self) {
        let Some(connection) = self.session.connection() else {
            warn!("Cannot start the queue consumer because not connected to the message broker.");
            return;
        };
        if self.flow.is_some() {
            info!("Already started queue consumer for \"{}\".", self.queue.name);
            return;
        }

        info!("Starting consumer for queue: {}", self.queue.name);
        match connection.bind_queue(&self.queue.name, AckMode::Client) {
            Ok(flow) => self.flow = Some(flow),
            Err(e) => error!("{e} - check queue name and permissions!"),
        }
    }

    /// Unbinds the flow. Messages delivered afterwards are not processed and
    /// stay with the broker.
    pub fn stop_consume(&mut self) {
        match self.flow.take() {
            Some(flow) => {
                info!("Disconnecting consumption from queue: {}", flow.queue_name());
                if let Err(e) = flow.disconnect() {
                    warn!("Error while stopping the consumer: {e}");
                }
            }
            None => info!("The queue consumer is not connected."),
        }
        self.consuming = false;
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }

    pub fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Session(SessionEvent::Message(message)) => {
                debug!("Ignoring direct message on {}", message.destination());
            }
            BrokerEvent::Session(event) => match self.session.on_event(&event) {
                Transition::Up => self.start_consume(),
                Transition::Down(_) | Transition::ConnectFailed(_) => {
                    self.flow = None;
                    self.consuming = false;
                }
                Transition::Unchanged => {}
            },
            BrokerEvent::Flow(event) => self.handle_flow_event(event),
        }
    }

    fn handle_flow_event(&mut self, event: FlowEvent) {
        match event {
            FlowEvent::Up { queue } => {
                self.consuming = true;
                info!("=== Ready to receive messages from queue \"{queue}\". ===");
            }
            FlowEvent::ConnectFailed { queue, reason } => {
                self.consuming = false;
                self.flow = None;
                error!("Error starting the consumer on \"{queue}\": {reason} - check queue name and permissions!");
            }
            FlowEvent::Down { queue } => {
                self.consuming = false;
                self.flow = None;
                info!("The message consumer for \"{queue}\" is down.");
            }
            FlowEvent::DownError { queue, reason } => {
                self.consuming = false;
                self.flow = None;
                error!("The message consumer for \"{queue}\" is down: {reason}");
            }
            FlowEvent::Message(message) => self.dispatch(message),
        }
    }

    fn dispatch(&mut self, message: InboundMessage) {
        if !self.consuming {
            // Dropping without acknowledging leaves it with the broker.
            warn!(
                "Not consuming, leaving message {} for redelivery",
                message.delivery_tag()
            );
            return;
        }
        info!(
            "Received message {} on {} ({} bytes)",
            message.delivery_tag(),
            message.destination(),
            message.binary_attachment().len()
        );
        self.in_flight
            .spawn(process_and_acknowledge(self.processor.clone(), message));
    }

    /// Drives the consumer until `shutdown` resolves, then exits gracefully.
    pub async fn run_until<F>(&mut self, shutdown: F) -> ShutdownOutcome
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.connect() {
            error!("Queue consumer is not connected: {e}");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = self.events_rx.recv() => self.handle_event(event),
                Some(joined) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.stats.record(joined);
                }
            }
        }

        self.exit().await
    }

    /// Stops taking new messages and gives in-flight ones up to the grace
    /// period to be processed and acknowledged, then unbinds and disconnects.
    /// Whatever is still running after the grace period is aborted without
    /// acknowledgement and will be redelivered.
    pub async fn exit(&mut self) -> ShutdownOutcome {
        self.consuming = false;
        let outcome = self.drain().await;
        self.stop_consume();
        self.disconnect();
        info!("Exiting.");
        outcome
    }

    async fn drain(&mut self) -> ShutdownOutcome {
        let in_flight = &mut self.in_flight;
        let stats = &mut self.stats;
        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = in_flight.join_next().await {
                stats.record(joined);
            }
        })
        .await;

        match drained {
            Ok(()) => ShutdownOutcome::Drained,
            Err(_) => {
                let abandoned = self.in_flight.len();
                warn!(
                    "Grace period of {} ms elapsed, abandoning {abandoned} in-flight message(s)",
                    self.grace.as_millis()
                );
                self.in_flight.abort_all();
                ShutdownOutcome::TimedOut { abandoned }
            }
        }
    }
}
