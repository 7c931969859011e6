use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::utils::error::ProcessingError;

/// Source reported when the analysis topic is too short to carry one.
pub const DEFAULT_SOURCE: &str = "unknown-default";
/// Image key reported when the analysis topic is too short to carry one.
pub const DEFAULT_IMAGE_KEY: &str = "romo-some-image.jpg";

/// Top level of an image analysis result. Only the face details matter here.
#[derive(Debug, Deserialize)]
struct FaceAnalysis {
    #[serde(rename = "FaceDetails")]
    face_details: Option<Vec<FaceRecord>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceRecord {
    #[serde(default)]
    pub emotions: Vec<EmotionScore>,
    #[serde(default)]
    pub quality: FaceQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmotionScore {
    #[serde(rename = "Type")]
    pub kind: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FaceQuality {
    #[serde(default)]
    pub sharpness: f64,
    #[serde(default)]
    pub brightness: f64,
}

/// Extracts the face records of an analysis payload.
///
/// A payload without `FaceDetails` is malformed; an empty list is returned
/// as-is and left to [`aggregate`] to reject.
pub fn parse_faces(payload: &[u8]) -> Result<Vec<FaceRecord>, ProcessingError> {
    if payload.is_empty() {
        return Err(ProcessingError::EmptyPayload);
    }
    let analysis: FaceAnalysis = serde_json::from_slice(payload)?;
    analysis
        .face_details
        .ok_or(ProcessingError::MalformedAnalysis)
}

/// Where an analysed image came from, derived from the analysis topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageOrigin {
    pub source: String,
    pub image_key: String,
}

impl ImageOrigin {
    /// `T/imageAnalysis/cam1/romo/frame1` yields source `romo` and image key
    /// `cam1/romo-frame1`. Topics with four levels or fewer fall back to the
    /// defaults.
    pub fn from_topic(topic: &str) -> Self {
        let levels: Vec<&str> = topic.split('/').collect();
        if levels.len() > 4 {
            Self {
                source: levels[3].to_string(),
                image_key: format!("{}/{}-{}", levels[2], levels[3], levels[4]),
            }
        } else {
            Self {
                source: DEFAULT_SOURCE.to_string(),
                image_key: DEFAULT_IMAGE_KEY.to_string(),
            }
        }
    }
}

/// The single strongest emotion of one analysis, with the best image quality
/// seen across all faces.
#[derive(Debug, Clone, PartialEq)]
pub struct DominantEmotion {
    /// Emotion type as reported by the analyser, e.g. `HAPPY`. Empty when no
    /// face carried a positive confidence.
    pub kind: String,
    pub confidence: f64,
    pub max_sharpness: f64,
    pub max_brightness: f64,
    pub source: String,
    pub image_key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmotionSummary {
    pub dominant: DominantEmotion,
    /// Confidence summed per emotion type across all faces.
    pub totals: BTreeMap<String, f64>,
}

/// Reduces the faces of one analysis to its dominant emotion.
///
/// Returns `None` for an empty face list. The highest confidence is tracked
/// with a strict comparison, so on a tie the earlier face (then the earlier
/// emotion) wins. Sharpness and brightness maxima are tracked independently
/// of the face holding the dominant emotion.
pub fn aggregate(faces: &[FaceRecord], origin: ImageOrigin) -> Option<EmotionSummary> {
    if faces.is_empty() {
        return None;
    }

    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    let mut kind = String::new();
    let mut confidence = 0.0;
    let mut max_sharpness = 0.0;
    let mut max_brightness = 0.0;

    for face in faces {
        for score in &face.emotions {
            if score.confidence > confidence {
                kind = score.kind.clone();
                confidence = score.confidence;
            }
            *totals.entry(score.kind.clone()).or_insert(0.0) += score.confidence;
        }
        if face.quality.sharpness > max_sharpness {
            max_sharpness = face.quality.sharpness;
        }
        if face.quality.brightness > max_brightness {
            max_brightness = face.quality.brightness;
        }
    }

    Some(EmotionSummary {
        dominant: DominantEmotion {
            kind,
            confidence,
            max_sharpness,
            max_brightness,
            source: origin.source,
            image_key: origin.image_key,
        },
        totals,
    })
}
