//! End-to-end runs against the in-process broker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::fakes::{FakeSemp, MemoryStore, SEMP_ENDPOINT, StaticDetector, params, wait_for};
use crate::analysis::FaceAnalyzer;
use crate::broker::LoopbackTransport;
use crate::consumer::{QueueConsumer, ShutdownOutcome};
use crate::emotion::{EmotionScore, FaceQuality, FaceRecord};
use crate::provision::SempProvisioner;
use crate::storage::ImageUploader;
use crate::subscriber::{SubscriberConfig, TopicSubscriber};
use crate::transport::{
    BrokerEvent, BrokerTransport, QueueDescriptor, SessionEvent, SubscriptionRequest,
    event_channel,
};

const QUEUE: &str = "image-ingress";
const INGRESS_TOPIC: &str = "T/imageCapture/>";
const ANALYSIS_TOPIC: &str = "T/imageAnalysis/>";
const COMMAND_TOPIC: &str = "T/MQTTRomo/all/command/character";
const JPEG: [u8; 6] = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

fn broker_with_queue() -> LoopbackTransport {
    let broker = LoopbackTransport::new();
    broker.provision_queue(QUEUE, INGRESS_TOPIC).unwrap();
    broker
}

fn descriptor() -> QueueDescriptor {
    QueueDescriptor {
        name: QUEUE.to_string(),
        subscription_topic: INGRESS_TOPIC.to_string(),
    }
}

fn image_consumer(
    broker: &LoopbackTransport,
    store: &Arc<MemoryStore>,
    grace: Duration,
) -> QueueConsumer {
    QueueConsumer::new(
        Arc::new(broker.clone()),
        params(),
        descriptor(),
        Arc::new(ImageUploader::new(store.clone(), "romo")),
        grace,
    )
}

#[tokio::test]
async fn published_image_is_uploaded_and_acknowledged_once() {
    let broker = broker_with_queue();
    let store = Arc::new(MemoryStore::default());
    let mut consumer = image_consumer(&broker, &store, Duration::from_secs(1));

    let outcome = consumer
        .run_until(async {
            broker.publish("T/imageCapture/cam1", JPEG.to_vec());
            assert!(
                wait_for(Duration::from_secs(2), || {
                    store.uploads() == 1 && broker.queue_depth(QUEUE) == Some(0)
                })
                .await
            );
        })
        .await;

    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_eq!(consumer.stats().acknowledged, 1);
    assert_eq!(store.uploads(), 1);
    assert_eq!(store.objects.lock()[0].bytes, JPEG.to_vec());
    assert!(broker.broker().lock().client_ids().is_empty());
}

#[tokio::test]
async fn session_lost_mid_upload_redelivers_to_next_consumer() {
    let broker = broker_with_queue();
    let store = Arc::new(MemoryStore::with_delay(Duration::from_millis(150)));

    let mut first = image_consumer(&broker, &store, Duration::from_secs(1));
    first
        .run_until(async {
            broker.publish("T/imageCapture/cam1", JPEG.to_vec());
            tokio::time::sleep(Duration::from_millis(40)).await;
            broker.drop_clients("broker restarted");
            assert!(wait_for(Duration::from_secs(2), || store.uploads() == 1).await);
        })
        .await;

    // Uploaded, but the acknowledgement had nowhere to go.
    assert_eq!(first.stats().ack_failed, 1);
    assert_eq!(broker.queue_depth(QUEUE), Some(1));

    let mut second = image_consumer(&broker, &store, Duration::from_secs(1));
    second
        .run_until(async {
            assert!(
                wait_for(Duration::from_secs(2), || {
                    store.uploads() == 2 && broker.queue_depth(QUEUE) == Some(0)
                })
                .await
            );
        })
        .await;

    assert_eq!(second.stats().acknowledged, 1);
    let objects = store.objects.lock();
    assert_ne!(objects[0].key, objects[1].key);
}

#[tokio::test]
async fn shutdown_waits_for_upload_before_unbinding() {
    let broker = broker_with_queue();
    let store = Arc::new(MemoryStore::with_delay(Duration::from_millis(100)));
    let mut consumer = image_consumer(&broker, &store, Duration::from_secs(2));

    let outcome = consumer
        .run_until(async {
            broker.publish("T/imageCapture/cam1", JPEG.to_vec());
            tokio::time::sleep(Duration::from_millis(20)).await;
        })
        .await;

    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_eq!(store.uploads(), 1);
    assert_eq!(broker.queue_depth(QUEUE), Some(0));
}

#[tokio::test]
async fn shutdown_after_grace_leaves_message_queued() {
    let broker = broker_with_queue();
    let store = Arc::new(MemoryStore::with_delay(Duration::from_secs(5)));
    let mut consumer = image_consumer(&broker, &store, Duration::from_millis(50));

    let outcome = consumer
        .run_until(async {
            broker.publish("T/imageCapture/cam1", JPEG.to_vec());
            tokio::time::sleep(Duration::from_millis(20)).await;
        })
        .await;

    assert_eq!(outcome, ShutdownOutcome::TimedOut { abandoned: 1 });
    assert_eq!(store.uploads(), 0);
    assert_eq!(broker.queue_depth(QUEUE), Some(1));
}

#[tokio::test]
async fn refused_connection_consumes_nothing() {
    let broker = broker_with_queue();
    broker.refuse_connections(Some("authentication failed"));
    broker.publish("T/imageCapture/cam1", JPEG.to_vec());
    let store = Arc::new(MemoryStore::default());
    let mut consumer = image_consumer(&broker, &store, Duration::from_millis(50));

    let outcome = consumer
        .run_until(tokio::time::sleep(Duration::from_millis(30)))
        .await;

    assert_eq!(outcome, ShutdownOutcome::Drained);
    assert_eq!(store.uploads(), 0);
    assert_eq!(broker.queue_depth(QUEUE), Some(1));
}

#[tokio::test]
async fn provisioned_names_drive_the_consumer() {
    let semp = FakeSemp::default();
    let provisioner = SempProvisioner::new(semp.clone(), SEMP_ENDPOINT, "default", "admin", "admin");
    let queue = provisioner.provision(QUEUE, INGRESS_TOPIC).await.unwrap();

    let broker = LoopbackTransport::new();
    broker
        .provision_queue(&queue.name, &queue.subscription_topic)
        .unwrap();
    let store = Arc::new(MemoryStore::default());
    let mut consumer = QueueConsumer::new(
        Arc::new(broker.clone()),
        params(),
        queue,
        Arc::new(ImageUploader::new(store.clone(), "romo")),
        Duration::from_secs(1),
    );

    consumer
        .run_until(async {
            broker.publish("T/imageCapture/cam2/frame9", JPEG.to_vec());
            assert!(wait_for(Duration::from_secs(2), || store.uploads() == 1).await);
        })
        .await;

    assert_eq!(consumer.stats().acknowledged, 1);
}

#[tokio::test]
async fn analysis_result_becomes_expression_command() {
    let broker = LoopbackTransport::new();

    let (observer_tx, mut observer_rx) = event_channel();
    let observer = broker.connect(&params(), observer_tx).unwrap();
    observer
        .subscribe(SubscriptionRequest::confirmed(
            COMMAND_TOPIC,
            Duration::from_secs(1),
        ))
        .unwrap();
    let observer_id = broker.broker().lock().client_ids()[0].clone();

    let mut subscriber = TopicSubscriber::new(
        Arc::new(broker.clone()),
        params(),
        SubscriberConfig {
            analysis_topic: ANALYSIS_TOPIC.to_string(),
            command_topic: COMMAND_TOPIC.to_string(),
            subscription_timeout: Duration::from_secs(1),
            grace: Duration::from_millis(10),
        },
    );

    let mut commands = Vec::new();
    subscriber
        .run_until(async {
            let engine = broker.broker();
            assert!(
                wait_for(Duration::from_secs(2), || {
                    let engine = engine.lock();
                    engine
                        .client_ids()
                        .iter()
                        .any(|id| *id != observer_id && engine.is_subscribed(ANALYSIS_TOPIC, id))
                })
                .await
            );

            let analysis = json!({
                "FaceDetails": [{
                    "Emotions": [
                        { "Type": "CALM", "Confidence": 20.0 },
                        { "Type": "SURPRISED", "Confidence": 75.5 }
                    ],
                    "Quality": { "Sharpness": 92.0, "Brightness": 41.0 }
                }]
            });
            broker.publish(
                "T/imageAnalysis/cam1/romo/frame7",
                analysis.to_string().into_bytes(),
            );

            assert!(
                wait_for(Duration::from_secs(2), || {
                    while let Ok(event) = observer_rx.try_recv() {
                        if let BrokerEvent::Session(SessionEvent::Message(message)) = event {
                            commands.push(message);
                        }
                    }
                    !commands.is_empty()
                })
                .await
            );
        })
        .await;

    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].destination(), COMMAND_TOPIC);
    let command: serde_json::Value =
        serde_json::from_slice(commands[0].binary_attachment()).unwrap();
    assert_eq!(
        command,
        json!([{
            "expression": "startled",
            "emotion": "indifferent",
            "highestEmotion": "surprised",
            "higestConfidence": 75.5,
            "source": "romo",
            "Sharpness": 92.0,
            "Brightness": 41.0,
            "image": "cam1/romo-frame7"
        }])
    );

    // The subscriber left; only the observer remains.
    assert_eq!(broker.broker().lock().client_ids(), vec![observer_id]);
}

#[tokio::test]
async fn analyzed_upload_drives_the_controller() {
    let broker = LoopbackTransport::new();

    let (observer_tx, mut observer_rx) = event_channel();
    let observer = broker.connect(&params(), observer_tx).unwrap();
    observer
        .subscribe(SubscriptionRequest::confirmed(
            COMMAND_TOPIC,
            Duration::from_secs(1),
        ))
        .unwrap();
    let observer_id = broker.broker().lock().client_ids()[0].clone();

    let analyzer = FaceAnalyzer::new(
        StaticDetector::with_faces(vec![FaceRecord {
            emotions: vec![
                EmotionScore {
                    kind: "HAPPY".to_string(),
                    confidence: 88.0,
                },
                EmotionScore {
                    kind: "CALM".to_string(),
                    confidence: 10.0,
                },
            ],
            quality: FaceQuality {
                sharpness: 70.0,
                brightness: 60.0,
            },
        }]),
        "romo-robot-demo",
        "T/imageAnalysis",
        "romo",
    );

    let mut subscriber = TopicSubscriber::new(
        Arc::new(broker.clone()),
        params(),
        SubscriberConfig {
            analysis_topic: ANALYSIS_TOPIC.to_string(),
            command_topic: COMMAND_TOPIC.to_string(),
            subscription_timeout: Duration::from_secs(1),
            grace: Duration::from_millis(10),
        },
    );

    let mut commands = Vec::new();
    subscriber
        .run_until(async {
            let engine = broker.broker();
            assert!(
                wait_for(Duration::from_secs(2), || {
                    let engine = engine.lock();
                    engine
                        .client_ids()
                        .iter()
                        .any(|id| *id != observer_id && engine.is_subscribed(ANALYSIS_TOPIC, id))
                })
                .await
            );

            let published = analyzer
                .analyze(observer.as_ref(), "cam1/romo-frame1")
                .await
                .unwrap();
            assert_eq!(published.topic, "T/imageAnalysis/cam1/romo/frame1");

            assert!(
                wait_for(Duration::from_secs(2), || {
                    while let Ok(event) = observer_rx.try_recv() {
                        if let BrokerEvent::Session(SessionEvent::Message(message)) = event {
                            commands.push(message);
                        }
                    }
                    !commands.is_empty()
                })
                .await
            );
        })
        .await;

    assert_eq!(commands.len(), 1);
    let command: serde_json::Value =
        serde_json::from_slice(commands[0].binary_attachment()).unwrap();
    assert_eq!(command[0]["highestEmotion"], "happy");
    assert_eq!(command[0]["source"], "romo");
    assert_eq!(command[0]["image"], "cam1/romo-frame1");
}
