use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_rekognition::Client;
use aws_sdk_rekognition::config::Region;
use aws_sdk_rekognition::error::DisplayErrorContext;
use aws_sdk_rekognition::types::{Attribute, FaceDetail, Image, S3Object};
use tracing::{debug, info};

use super::FaceDetector;
use crate::config::StorageSettings;
use crate::emotion::{EmotionScore, FaceQuality, FaceRecord};
use crate::utils::error::AnalysisError;

/// Amazon Rekognition face detection on objects in S3. The client runs in
/// the storage region, which has to be the bucket's region.
#[derive(Debug, Clone)]
pub struct RekognitionDetector {
    client: Client,
}

impl RekognitionDetector {
    pub async fn from_settings(settings: &StorageSettings) -> Self {
        let region = RegionProviderChain::first_try(Region::new(settings.region.clone()))
            .or_default_provider();
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(region)
            .load()
            .await;

        info!("Initializing Rekognition client in {}", settings.region);
        Self {
            client: Client::new(&shared),
        }
    }
}

#[async_trait]
impl FaceDetector for RekognitionDetector {
    async fn detect_faces(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<FaceRecord>, AnalysisError> {
        let image = Image::builder()
            .s3_object(S3Object::builder().bucket(bucket).name(key).build())
            .build();
        let output = self
            .client
            .detect_faces()
            .image(image)
            .attributes(Attribute::All)
            .send()
            .await
            .map_err(|e| AnalysisError::Detection {
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        let faces: Vec<FaceRecord> = output.face_details().iter().map(face_record).collect();
        debug!("Rekognition found {} face(s) in {key}", faces.len());
        Ok(faces)
    }
}

fn face_record(detail: &FaceDetail) -> FaceRecord {
    let emotions = detail
        .emotions()
        .iter()
        .filter_map(|emotion| {
            Some(EmotionScore {
                kind: emotion.r#type()?.as_str().to_string(),
                confidence: f64::from(emotion.confidence().unwrap_or_default()),
            })
        })
        .collect();
    let quality = detail
        .quality()
        .map(|q| FaceQuality {
            sharpness: f64::from(q.sharpness().unwrap_or_default()),
            brightness: f64::from(q.brightness().unwrap_or_default()),
        })
        .unwrap_or_default();
    FaceRecord { emotions, quality }
}
