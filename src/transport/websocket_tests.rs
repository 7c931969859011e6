use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::{WebSocketStream, accept_async};
use tungstenite::protocol::Message as WsMessage;

use super::message::{ClientMessage, ServerMessage};
use super::{
    AckMode, BrokerEvent, BrokerTransport, ConnectionParams, DeliveryMode, EventReceiver,
    FlowEvent, OutboundMessage, SessionEvent, SubscriptionRequest, WsTransport, event_channel,
};

type ServerSocket = WebSocketStream<TcpStream>;

/// Accepts exactly one WebSocket client on an ephemeral port and runs
/// `script` against it.
async fn scripted_server<F, Fut>(script: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        script(ws).await;
    });
    format!("ws://{addr}")
}

async fn next_client_frame(ws: &mut ServerSocket) -> Option<ClientMessage> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn reply(ws: &mut ServerSocket, frame: ServerMessage) {
    ws.send(WsMessage::text(serde_json::to_string(&frame).unwrap()))
        .await
        .unwrap();
}

/// Completes the login handshake and hands back the login frame.
async fn accept_login(ws: &mut ServerSocket) -> ClientMessage {
    let login = next_client_frame(ws).await.expect("login frame");
    reply(ws, ServerMessage::Authenticated {}).await;
    login
}

/// Keeps reading until the client goes away so close handshakes complete.
async fn drain(ws: &mut ServerSocket) {
    while next_client_frame(ws).await.is_some() {}
}

async fn next_event(rx: &mut EventReceiver) -> BrokerEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for broker event")
        .expect("event channel closed")
}

fn params(url: &str) -> ConnectionParams {
    ConnectionParams {
        url: url.to_string(),
        vpn: "romo".to_string(),
        username: "bridge".to_string(),
        password: "secret".to_string(),
    }
}

#[tokio::test]
async fn login_passes_credentials_and_reports_up() {
    let (login_tx, login_rx) = oneshot::channel();
    let url = scripted_server(|mut ws| async move {
        let login = accept_login(&mut ws).await;
        let _ = login_tx.send(login);
        drain(&mut ws).await;
    })
    .await;

    let (tx, mut rx) = event_channel();
    let connection = WsTransport::new().connect(&params(&url), tx).unwrap();

    assert!(matches!(next_event(&mut rx).await, BrokerEvent::Session(SessionEvent::Up)));
    assert_eq!(
        login_rx.await.unwrap(),
        ClientMessage::Login {
            username: "bridge".to_string(),
            password: "secret".to_string(),
            vpn: "romo".to_string(),
        }
    );

    connection.disconnect().unwrap();
    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::Disconnected { error }) => assert!(error.is_none()),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn rejected_login_is_connect_failed_with_reason() {
    let url = scripted_server(|mut ws| async move {
        let _ = next_client_frame(&mut ws).await;
        reply(
            &mut ws,
            ServerMessage::Error {
                message: "invalid credentials".to_string(),
            },
        )
        .await;
        drain(&mut ws).await;
    })
    .await;

    let (tx, mut rx) = event_channel();
    let _connection = WsTransport::new().connect(&params(&url), tx).unwrap();

    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::ConnectFailed { reason }) => {
            assert_eq!(reason, "invalid credentials")
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_broker_is_connect_failed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, mut rx) = event_channel();
    let _connection = WsTransport::new()
        .connect(&params(&format!("ws://{addr}")), tx)
        .unwrap();

    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::ConnectFailed { reason }) => assert!(!reason.is_empty()),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn unsupported_scheme_fails_immediately() {
    let (tx, _rx) = event_channel();
    let result = WsTransport::new().connect(&params("tcp://127.0.0.1:55555"), tx);
    assert!(result.is_err());
}

#[tokio::test]
async fn confirmed_subscribe_reports_ok_with_correlation_key() {
    let url = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        if let Some(ClientMessage::Subscribe {
            correlation_key, ..
        }) = next_client_frame(&mut ws).await
        {
            reply(&mut ws, ServerMessage::SubscriptionOk { correlation_key }).await;
        }
        drain(&mut ws).await;
    })
    .await;

    let (tx, mut rx) = event_channel();
    let connection = WsTransport::new().connect(&params(&url), tx).unwrap();
    assert!(matches!(next_event(&mut rx).await, BrokerEvent::Session(SessionEvent::Up)));

    connection
        .subscribe(SubscriptionRequest::confirmed(
            "T/imageAnalysis/>",
            Duration::from_secs(5),
        ))
        .unwrap();

    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::SubscriptionOk { correlation_key }) => {
            assert_eq!(correlation_key, "T/imageAnalysis/>")
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn unanswered_subscribe_times_out() {
    let url = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        drain(&mut ws).await;
    })
    .await;

    let (tx, mut rx) = event_channel();
    let connection = WsTransport::new().connect(&params(&url), tx).unwrap();
    assert!(matches!(next_event(&mut rx).await, BrokerEvent::Session(SessionEvent::Up)));

    connection
        .subscribe(SubscriptionRequest::confirmed(
            "T/quiet",
            Duration::from_millis(50),
        ))
        .unwrap();

    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::SubscriptionError {
            correlation_key,
            reason,
        }) => {
            assert_eq!(correlation_key, "T/quiet");
            assert!(reason.contains("50 ms"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn queue_delivery_is_acknowledged_on_the_wire() {
    let (ack_tx, ack_rx) = oneshot::channel();
    let url = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        if let Some(ClientMessage::Bind { queue, ack_mode }) = next_client_frame(&mut ws).await {
            assert_eq!(ack_mode, AckMode::Client);
            reply(&mut ws, ServerMessage::FlowUp { queue: queue.clone() }).await;
            reply(
                &mut ws,
                ServerMessage::Message {
                    topic: "T/imageCapture/cam1".to_string(),
                    payload: vec![0xFF, 0xD8],
                    timestamp: 0,
                    message_id: "42".to_string(),
                    queue: Some(queue),
                    redelivered: true,
                },
            )
            .await;
        }
        let ack = next_client_frame(&mut ws).await;
        let _ = ack_tx.send(ack);
        drain(&mut ws).await;
    })
    .await;

    let (tx, mut rx) = event_channel();
    let connection = WsTransport::new().connect(&params(&url), tx).unwrap();
    assert!(matches!(next_event(&mut rx).await, BrokerEvent::Session(SessionEvent::Up)));

    let _flow = connection.bind_queue("images", AckMode::Client).unwrap();
    assert!(matches!(
        next_event(&mut rx).await,
        BrokerEvent::Flow(FlowEvent::Up { .. })
    ));

    let message = match next_event(&mut rx).await {
        BrokerEvent::Flow(FlowEvent::Message(message)) => message,
        other => panic!("unexpected event {other:?}"),
    };
    assert!(message.is_redelivered());
    assert_eq!(message.binary_attachment(), &[0xFF, 0xD8]);
    message.acknowledge().unwrap();

    assert_eq!(
        ack_rx.await.unwrap(),
        Some(ClientMessage::Ack {
            queue: "images".to_string(),
            message_id: "42".to_string(),
        })
    );
}

#[tokio::test]
async fn broker_side_close_is_reported_as_error() {
    let url = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let _ = ws.close(None).await;
    })
    .await;

    let (tx, mut rx) = event_channel();
    let _connection = WsTransport::new().connect(&params(&url), tx).unwrap();
    assert!(matches!(next_event(&mut rx).await, BrokerEvent::Session(SessionEvent::Up)));

    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::Disconnected { error }) => assert!(error.is_some()),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn publish_is_forwarded_after_login() {
    let (publish_tx, publish_rx) = oneshot::channel();
    let url = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        let frame = next_client_frame(&mut ws).await;
        let _ = publish_tx.send(frame);
        drain(&mut ws).await;
    })
    .await;

    let (tx, mut rx) = event_channel();
    let connection = WsTransport::new().connect(&params(&url), tx).unwrap();
    // Queued before the login completes; must still arrive after it.
    connection
        .send(OutboundMessage {
            topic: "T/MQTTRomo/all/command/character".to_string(),
            payload: b"[]".to_vec(),
            delivery_mode: DeliveryMode::Direct,
        })
        .unwrap();
    assert!(matches!(next_event(&mut rx).await, BrokerEvent::Session(SessionEvent::Up)));

    match publish_rx.await.unwrap() {
        Some(ClientMessage::Publish {
            topic,
            payload,
            delivery_mode,
            ..
        }) => {
            assert_eq!(topic, "T/MQTTRomo/all/command/character");
            assert_eq!(payload, b"[]");
            assert_eq!(delivery_mode, DeliveryMode::Direct);
        }
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn secure_scheme_goes_through_tls_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // Plain TCP peer that hangs up on the client hello.
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let (tx, mut rx) = event_channel();
    let _connection = WsTransport::new()
        .connect(&params(&format!("wss://{addr}")), tx)
        .unwrap();

    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::ConnectFailed { reason }) => {
            assert!(!reason.contains("not compiled in"), "{reason}");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn silent_handshake_is_bounded() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        // Accepts the TCP connection but never answers the upgrade request.
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let (tx, mut rx) = event_channel();
    let _connection = WsTransport::new()
        .with_handshake_timeout(Duration::from_millis(100))
        .connect(&params(&format!("ws://{addr}")), tx)
        .unwrap();

    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::ConnectFailed { reason }) => {
            assert!(reason.contains("100 ms"), "{reason}");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn unanswered_close_still_disconnects() {
    let url = scripted_server(|mut ws| async move {
        accept_login(&mut ws).await;
        // Stop reading so the close frame is never answered.
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(ws);
    })
    .await;

    let (tx, mut rx) = event_channel();
    let connection = WsTransport::new()
        .with_close_timeout(Duration::from_millis(100))
        .connect(&params(&url), tx)
        .unwrap();
    assert!(matches!(next_event(&mut rx).await, BrokerEvent::Session(SessionEvent::Up)));

    let started = tokio::time::Instant::now();
    connection.disconnect().unwrap();
    match next_event(&mut rx).await {
        BrokerEvent::Session(SessionEvent::Disconnected { error }) => assert!(error.is_none()),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}
