//! Face analysis of stored images.
//!
//! A [`FaceDetector`] runs face detection on an object already in the bucket;
//! [`FaceAnalyzer`] publishes the detected faces on the analysis topic derived
//! from the object key, where the controller picks them up.

pub mod rekognition;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::emotion::FaceRecord;
use crate::transport::{BrokerConnection, DeliveryMode, OutboundMessage};
use crate::utils::error::{AnalysisError, PublishError};

pub use rekognition::RekognitionDetector;

#[async_trait]
pub trait FaceDetector: Send + Sync {
    /// Detects faces, with emotions and image quality, in `bucket/key`.
    async fn detect_faces(&self, bucket: &str, key: &str)
    -> Result<Vec<FaceRecord>, AnalysisError>;
}

/// Body of an analysis message, in the shape the controller parses.
#[derive(Debug, Serialize)]
struct AnalysisReport<'a> {
    #[serde(rename = "FaceDetails")]
    face_details: &'a [FaceRecord],
}

/// Topic an analysis of `key` is published on.
///
/// `{key_prefix}-` inside the key becomes a level separator, so
/// `cam1/romo-frame1` under prefix `romo` lands on
/// `{topic_prefix}/cam1/romo/frame1`.
pub fn analysis_topic(topic_prefix: &str, key_prefix: &str, key: &str) -> String {
    let path = if key_prefix.is_empty() {
        key.to_string()
    } else {
        key.replace(&format!("{key_prefix}-"), &format!("{key_prefix}/"))
    };
    format!(
        "{}/{}",
        topic_prefix.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// What one analysis published.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedAnalysis {
    pub topic: String,
    pub faces: usize,
}

pub struct FaceAnalyzer<D> {
    detector: D,
    bucket: String,
    topic_prefix: String,
    key_prefix: String,
}

impl<D: FaceDetector> FaceAnalyzer<D> {
    pub fn new(detector: D, bucket: &str, topic_prefix: &str, key_prefix: &str) -> Self {
        Self {
            detector,
            bucket: bucket.to_string(),
            topic_prefix: topic_prefix.to_string(),
            key_prefix: key_prefix.to_string(),
        }
    }

    /// Runs detection on `key` and publishes the result with direct delivery.
    ///
    /// An image without faces still publishes an empty `FaceDetails` list;
    /// the controller decides what to do with it. Nothing is sent when
    /// detection fails.
    pub async fn analyze(
        &self,
        connection: &dyn BrokerConnection,
        key: &str,
    ) -> Result<PublishedAnalysis, AnalysisError> {
        if key.is_empty() {
            return Err(AnalysisError::EmptyKey);
        }
        debug!("Detecting faces in s3://{}/{key}", self.bucket);
        let faces = self.detector.detect_faces(&self.bucket, key).await?;

        let payload = serde_json::to_vec(&AnalysisReport {
            face_details: &faces,
        })
        .map_err(PublishError::from)?;
        let topic = analysis_topic(&self.topic_prefix, &self.key_prefix, key);
        connection
            .send(OutboundMessage {
                topic: topic.clone(),
                payload,
                delivery_mode: DeliveryMode::Direct,
            })
            .map_err(PublishError::from)?;

        info!("Published analysis of {key} ({} face(s)) to {topic}", faces.len());
        Ok(PublishedAnalysis {
            topic,
            faces: faces.len(),
        })
    }
}
