//! WebSocket broker transport.
//!
//! One background task per connection owns the socket:
//! - connect and log in with the pass-through credentials
//! - forward queued client frames to the socket (writer half)
//! - translate server frames into [`BrokerEvent`]s (reader half)
//!
//! Callers never touch the socket; they enqueue frames on an unbounded
//! channel, so every `BrokerConnection` method is synchronous and cheap.
//!
//! `wss://` URLs are served through the platform TLS stack (`native-tls`).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use url::Url;
use uuid::Uuid;

use super::message::{ClientMessage, ServerMessage};
use super::{
    AckMode, Acknowledger, BrokerConnection, BrokerEvent, BrokerTransport, ConnectionParams,
    EventSender, FlowEvent, InboundMessage, OutboundMessage, QueueFlow, SessionEvent,
    SubscriptionRequest,
};
use crate::utils::error::TransportError;

/// How long the broker gets to answer the login frame.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
/// TCP connect plus TLS and WebSocket upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the broker gets to answer our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
pub struct WsTransport {
    handshake_timeout: Duration,
    close_timeout: Duration,
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

impl BrokerTransport for WsTransport {
    fn connect(
        &self,
        params: &ConnectionParams,
        events: EventSender,
    ) -> Result<Arc<dyn BrokerConnection>, TransportError> {
        let url = Url::parse(&params.url)
            .map_err(|e| TransportError::Connect(format!("invalid broker url {}: {e}", params.url)))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(TransportError::Connect(format!(
                    "unsupported broker url scheme \"{other}\""
                )));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            outbound: tx,
            events,
            pending: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(0),
            closing: AtomicBool::new(false),
        });

        info!("Connecting to message broker at {}", url);
        tokio::spawn(drive(*self, url, params.clone(), rx, shared.clone()));

        Ok(Arc::new(WsConnection { shared }))
    }
}

enum Outbound {
    Frame(ClientMessage),
    Close,
}

struct Shared {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: EventSender,
    /// correlation key -> ticket of the outstanding confirmed request
    pending: Mutex<HashMap<String, u64>>,
    tickets: AtomicU64,
    closing: AtomicBool,
}

impl Shared {
    fn emit(&self, event: impl Into<BrokerEvent>) {
        // The owner may already be gone during shutdown.
        let _ = self.events.send(event.into());
    }

    fn enqueue(&self, frame: ClientMessage) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Registers a confirmed request and arms its timeout.
    fn expect_confirmation(self: &Arc<Self>, correlation_key: &str, timeout: Duration) {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(correlation_key.to_string(), ticket);

        let shared = Arc::clone(self);
        let key = correlation_key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = {
                let mut pending = shared.pending.lock();
                if pending.get(&key) == Some(&ticket) {
                    pending.remove(&key);
                    true
                } else {
                    false
                }
            };
            if expired {
                shared.emit(SessionEvent::SubscriptionError {
                    correlation_key: key,
                    reason: format!("no confirmation within {} ms", timeout.as_millis()),
                });
            }
        });
    }

    fn take_confirmation(&self, correlation_key: &str) -> bool {
        self.pending.lock().remove(correlation_key).is_some()
    }
}

struct WsConnection {
    shared: Arc<Shared>,
}

impl WsConnection {
    fn request(
        &self,
        request: SubscriptionRequest,
        frame: ClientMessage,
    ) -> Result<(), TransportError> {
        if request.confirm {
            self.shared
                .expect_confirmation(&request.correlation_key, request.timeout);
        }
        let sent = self.shared.enqueue(frame);
        if sent.is_err() && request.confirm {
            self.shared.take_confirmation(&request.correlation_key);
        }
        sent
    }
}

impl BrokerConnection for WsConnection {
    fn subscribe(&self, request: SubscriptionRequest) -> Result<(), TransportError> {
        let frame = ClientMessage::Subscribe {
            topic: request.topic.clone(),
            correlation_key: request.correlation_key.clone(),
        };
        self.request(request, frame)
    }

    fn unsubscribe(&self, request: SubscriptionRequest) -> Result<(), TransportError> {
        let frame = ClientMessage::Unsubscribe {
            topic: request.topic.clone(),
            correlation_key: request.correlation_key.clone(),
        };
        self.request(request, frame)
    }

    fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.shared.enqueue(ClientMessage::Publish {
            topic: message.topic,
            payload: message.payload,
            message_id: Uuid::new_v4().to_string(),
            delivery_mode: message.delivery_mode,
        })
    }

    fn bind_queue(
        &self,
        queue: &str,
        ack_mode: AckMode,
    ) -> Result<Box<dyn QueueFlow>, TransportError> {
        self.shared.enqueue(ClientMessage::Bind {
            queue: queue.to_string(),
            ack_mode,
        })?;
        Ok(Box::new(WsFlow {
            queue: queue.to_string(),
            shared: self.shared.clone(),
        }))
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared
            .outbound
            .send(Outbound::Close)
            .map_err(|_| TransportError::NotConnected)
    }
}

struct WsFlow {
    queue: String,
    shared: Arc<Shared>,
}

impl QueueFlow for WsFlow {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.shared.enqueue(ClientMessage::Unbind {
            queue: self.queue.clone(),
        })
    }
}

struct WsAcker {
    queue: String,
    shared: Arc<Shared>,
}

impl Acknowledger for WsAcker {
    fn acknowledge(&self, delivery_tag: &str) -> Result<(), TransportError> {
        self.shared
            .enqueue(ClientMessage::Ack {
                queue: self.queue.clone(),
                message_id: delivery_tag.to_string(),
            })
            .map_err(|e| TransportError::Ack {
                delivery_tag: delivery_tag.to_string(),
                reason: e.to_string(),
            })
    }
}

async fn drive(
    transport: WsTransport,
    url: Url,
    params: ConnectionParams,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
) {
    let handshake = tokio::time::timeout(transport.handshake_timeout, connect_async(url.as_str()));
    let ws_stream = match handshake.await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => {
            shared.emit(SessionEvent::ConnectFailed {
                reason: e.to_string(),
            });
            return;
        }
        Err(_) => {
            shared.emit(SessionEvent::ConnectFailed {
                reason: format!(
                    "no handshake with {url} within {} ms",
                    transport.handshake_timeout.as_millis()
                ),
            });
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let login = ClientMessage::Login {
        username: params.username,
        password: params.password,
        vpn: params.vpn,
    };
    if let Err(e) = send_frame(&mut ws_sender, &login).await {
        shared.emit(SessionEvent::ConnectFailed {
            reason: e.to_string(),
        });
        return;
    }

    let login_result = match tokio::time::timeout(LOGIN_TIMEOUT, wait_for_login(&mut ws_receiver)).await {
        Ok(result) => result,
        Err(_) => Err(format!(
            "no login response within {} s",
            LOGIN_TIMEOUT.as_secs()
        )),
    };
    if let Err(reason) = login_result {
        let _ = ws_sender.close().await;
        shared.emit(SessionEvent::ConnectFailed { reason });
        return;
    }
    shared.emit(SessionEvent::Up);

    // Forward queued frames broker-ward until asked to close. After sending
    // our close frame the broker gets `close_timeout` to answer it.
    let (close_expired_tx, mut close_expired) = oneshot::channel::<()>();
    let close_timeout = transport.close_timeout;
    let writer = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Frame(frame) => {
                    if let Err(e) = send_frame(&mut ws_sender, &frame).await {
                        warn!("Failed to send frame to broker: {e}");
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sender.close().await;
                    tokio::time::sleep(close_timeout).await;
                    let _ = close_expired_tx.send(());
                    break;
                }
            }
        }
    });

    let mut failure = None;
    let mut close_armed = true;
    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => handle_server_frame(&shared, text.as_str()),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    failure = Some(e.to_string());
                    break;
                }
            },
            expired = &mut close_expired, if close_armed => {
                close_armed = false;
                if expired.is_ok() {
                    debug!("Broker did not answer the close frame, dropping the socket");
                    break;
                }
            }
        }
    }

    writer.abort();
    shared.pending.lock().clear();

    let error = if shared.closing.load(Ordering::SeqCst) {
        None
    } else {
        Some(failure.unwrap_or_else(|| "connection closed by broker".to_string()))
    };
    shared.emit(SessionEvent::Disconnected { error });
}

async fn send_frame<S>(sink: &mut S, frame: &ClientMessage) -> Result<(), TransportError>
where
    S: Sink<WsMessage, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
    sink.send(WsMessage::text(text))
        .await
        .map_err(|e| TransportError::Send(e.to_string()))
}

async fn wait_for_login<S>(stream: &mut S) -> Result<(), String>
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                return match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(ServerMessage::Authenticated {}) => Ok(()),
                    Ok(ServerMessage::Error { message }) => Err(message),
                    Ok(other) => Err(format!("unexpected frame during login: {other:?}")),
                    Err(e) => Err(format!("invalid frame during login: {e}")),
                };
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
    Err("connection closed during login".to_string())
}

fn handle_server_frame(shared: &Arc<Shared>, text: &str) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(
                "Invalid broker frame: {e} | {}",
                text.chars().take(100).collect::<String>()
            );
            return;
        }
    };

    match message {
        ServerMessage::SubscriptionOk { correlation_key } => {
            if shared.take_confirmation(&correlation_key) {
                shared.emit(SessionEvent::SubscriptionOk { correlation_key });
            } else {
                debug!("Ignoring unsolicited confirmation for {correlation_key}");
            }
        }
        ServerMessage::SubscriptionError {
            correlation_key,
            message,
        } => {
            if shared.take_confirmation(&correlation_key) {
                shared.emit(SessionEvent::SubscriptionError {
                    correlation_key,
                    reason: message,
                });
            } else {
                warn!("Subscription error for {correlation_key}: {message}");
            }
        }
        ServerMessage::FlowUp { queue } => shared.emit(FlowEvent::Up { queue }),
        ServerMessage::FlowError { queue, message } => shared.emit(FlowEvent::ConnectFailed {
            queue,
            reason: message,
        }),
        ServerMessage::FlowDown {
            queue,
            message: None,
        } => shared.emit(FlowEvent::Down { queue }),
        ServerMessage::FlowDown {
            queue,
            message: Some(reason),
        } => shared.emit(FlowEvent::DownError { queue, reason }),
        ServerMessage::Message {
            topic,
            payload,
            message_id,
            queue: Some(queue),
            redelivered,
            ..
        } => {
            let acker = Arc::new(WsAcker {
                queue,
                shared: shared.clone(),
            });
            shared.emit(FlowEvent::Message(InboundMessage::guaranteed(
                &topic,
                payload,
                &message_id,
                redelivered,
                acker,
            )));
        }
        ServerMessage::Message {
            topic,
            payload,
            message_id,
            queue: None,
            ..
        } => shared.emit(SessionEvent::Message(InboundMessage::direct(
            &topic,
            payload,
            &message_id,
        ))),
        ServerMessage::Error { message } => warn!("Broker reported an error: {message}"),
        ServerMessage::Authenticated {} => debug!("Ignoring repeated authentication frame"),
    }
}
