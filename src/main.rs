//! CLI for emotion-bridge
//!
//! Subcommands:
//! - `images`: provision the image queue and upload everything it delivers
//! - `controller`: turn face analysis results into expression commands
//! - `provision`: provision the image queue and its subscription, then exit
//! - `send-image`: publish one JPEG (useful for smoke tests)
//! - `analyze`: run face detection on a stored image and publish the result

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use emotion_bridge::analysis::{FaceAnalyzer, RekognitionDetector};
use emotion_bridge::config::{BrokerSettings, Settings, load_config};
use emotion_bridge::consumer::{QueueConsumer, ShutdownOutcome};
use emotion_bridge::provision::{ReqwestTransport, SempProvisioner};
use emotion_bridge::session::{BrokerSession, Transition};
use emotion_bridge::storage::{ImageUploader, S3Store};
use emotion_bridge::subscriber::{SubscriberConfig, TopicSubscriber};
use emotion_bridge::transport::{
    BrokerEvent, ConnectionParams, DeliveryMode, OutboundMessage, QueueDescriptor, WsTransport,
    event_channel,
};
use emotion_bridge::utils::error::{BridgeError, TransportError};
use emotion_bridge::utils::logging;
use tracing::{error, info, warn};

/// How long one-shot commands wait for the session to come up.
const SEND_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "emotion-bridge")]
enum Command {
    /// Provision the image queue, then upload queued images to the object store
    Images,
    /// Subscribe to analysis results and publish expression commands
    Controller,
    /// Provision the image queue and its topic subscription, then exit
    Provision,
    /// Publish one image file with persistent delivery
    SendImage {
        /// JPEG file to send
        #[arg(long)]
        path: PathBuf,
        /// Topic to publish to
        #[arg(long, default_value = "T/imageCapture/cam1")]
        topic: String,
    },
    /// Detect faces in a stored image and publish the analysis
    Analyze {
        /// Object key of the image, e.g. `cam1/romo-<uuid>.jpg`
        #[arg(long)]
        key: String,
        /// Bucket holding the image (defaults to the storage bucket)
        #[arg(long)]
        bucket: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cmd = Command::parse();

    let settings = match load_config().map_err(BridgeError::from) {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to start: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&settings.runtime.log_level);

    let result = match cmd {
        Command::Images => run_images(&settings).await,
        Command::Controller => run_controller(&settings).await,
        Command::Provision => provision(&settings).await.map(|_| ()),
        Command::SendImage { path, topic } => send_image(&settings, &path, &topic).await,
        Command::Analyze { key, bucket } => analyze(&settings, &key, bucket.as_deref()).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

fn connection_params(broker: &BrokerSettings) -> ConnectionParams {
    ConnectionParams {
        url: broker.url.clone(),
        vpn: broker.vpn.clone(),
        username: broker.username.clone(),
        password: broker.password.clone(),
    }
}

fn grace(settings: &Settings) -> Duration {
    Duration::from_millis(settings.runtime.shutdown_grace_ms)
}

async fn provision(settings: &Settings) -> Result<QueueDescriptor, BridgeError> {
    let semp = &settings.semp;
    let provisioner = SempProvisioner::new(
        ReqwestTransport::new(),
        &semp.endpoint,
        &semp.msg_vpn,
        &semp.username,
        &semp.password,
    );
    let queue = provisioner
        .provision(&settings.images.queue_name, &settings.images.ingress_topic)
        .await?;
    Ok(queue)
}

async fn run_images(settings: &Settings) -> Result<(), BridgeError> {
    let queue = provision(settings).await?;

    let store = S3Store::from_settings(&settings.storage).await;
    let uploader = ImageUploader::new(Arc::new(store), &settings.storage.key_prefix);

    let mut consumer = QueueConsumer::new(
        Arc::new(WsTransport::new()),
        connection_params(&settings.broker),
        queue,
        Arc::new(uploader),
        grace(settings),
    );

    match consumer.run_until(shutdown_signal()).await {
        ShutdownOutcome::Drained => {}
        ShutdownOutcome::TimedOut { abandoned } => {
            warn!("{abandoned} message(s) left unacknowledged for redelivery");
        }
    }
    let stats = consumer.stats();
    info!(
        "Acknowledged {}, rejected {}, acknowledgement failures {}",
        stats.acknowledged, stats.rejected, stats.ack_failed
    );
    Ok(())
}

async fn run_controller(settings: &Settings) -> Result<(), BridgeError> {
    let controller = &settings.controller;
    let mut subscriber = TopicSubscriber::new(
        Arc::new(WsTransport::new()),
        connection_params(&settings.broker),
        SubscriberConfig {
            analysis_topic: controller.analysis_topic.clone(),
            command_topic: controller.command_topic.clone(),
            subscription_timeout: Duration::from_millis(controller.subscription_timeout_ms),
            grace: grace(settings),
        },
    );

    subscriber.run_until(shutdown_signal()).await;
    Ok(())
}

async fn send_image(
    settings: &Settings,
    path: &std::path::Path,
    topic: &str,
) -> Result<(), BridgeError> {
    let payload = tokio::fs::read(path).await?;
    info!("Sending {} ({} bytes) to {topic}", path.display(), payload.len());

    let mut session = open_session(settings).await?;

    let sent = session
        .connection()
        .ok_or(TransportError::NotConnected)
        .and_then(|connection| {
            connection.send(OutboundMessage {
                topic: topic.to_string(),
                payload,
                delivery_mode: DeliveryMode::Persistent,
            })
        });
    session.disconnect();
    sent?;

    info!("Image sent.");
    Ok(())
}

async fn analyze(settings: &Settings, key: &str, bucket: Option<&str>) -> Result<(), BridgeError> {
    let detector = RekognitionDetector::from_settings(&settings.storage).await;
    let analyzer = FaceAnalyzer::new(
        detector,
        bucket.unwrap_or(&settings.storage.bucket),
        &settings.controller.analysis_prefix,
        &settings.storage.key_prefix,
    );

    let mut session = open_session(settings).await?;
    let published = match session.connection() {
        Some(connection) => analyzer
            .analyze(connection.as_ref(), key)
            .await
            .map_err(BridgeError::from),
        None => Err(TransportError::NotConnected.into()),
    };
    session.disconnect();
    let published = published?;

    info!(
        "Analysis of {key} published to {} ({} face(s)).",
        published.topic, published.faces
    );
    Ok(())
}

/// Connects a session and waits until it is up.
async fn open_session(settings: &Settings) -> Result<BrokerSession, TransportError> {
    let (events_tx, mut events_rx) = event_channel();
    let mut session = BrokerSession::new(
        Arc::new(WsTransport::new()),
        connection_params(&settings.broker),
    );
    session.connect(events_tx)?;

    let up = tokio::time::timeout(SEND_CONNECT_TIMEOUT, async {
        while let Some(event) = events_rx.recv().await {
            if let BrokerEvent::Session(event) = event {
                match session.on_event(&event) {
                    Transition::Up => return Ok(()),
                    Transition::ConnectFailed(reason) | Transition::Down(Some(reason)) => {
                        return Err(TransportError::Connect(reason));
                    }
                    Transition::Down(None) => return Err(TransportError::NotConnected),
                    Transition::Unchanged => {}
                }
            }
        }
        Err(TransportError::NotConnected)
    })
    .await
    .unwrap_or_else(|_| {
        Err(TransportError::Connect(format!(
            "no session after {} s",
            SEND_CONNECT_TIMEOUT.as_secs()
        )))
    });

    match up {
        Ok(()) => Ok(session),
        Err(e) => {
            session.disconnect();
            Err(e)
        }
    }
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received. Exiting gracefully.");
}
