use serde::Serialize;

use super::aggregate::DominantEmotion;
use super::mapping::expression_for;

/// Command published to the robot.
///
/// Field names, their order and the `higestConfidence` spelling are what
/// downstream consumers parse. Do not rename.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionCommand {
    pub expression: String,
    pub emotion: String,
    #[serde(rename = "highestEmotion")]
    pub highest_emotion: String,
    #[serde(rename = "higestConfidence")]
    pub confidence: f64,
    pub source: String,
    #[serde(rename = "Sharpness")]
    pub sharpness: f64,
    #[serde(rename = "Brightness")]
    pub brightness: f64,
    pub image: String,
}

impl ExpressionCommand {
    pub fn from_dominant(dominant: &DominantEmotion) -> Self {
        let mapped = expression_for(&dominant.kind);
        Self {
            expression: mapped.expression.to_string(),
            emotion: mapped.emotion.to_string(),
            highest_emotion: dominant.kind.to_lowercase(),
            confidence: dominant.confidence,
            source: dominant.source.clone(),
            sharpness: dominant.max_sharpness,
            brightness: dominant.max_brightness,
            image: dominant.image_key.clone(),
        }
    }

    /// Wire form: a JSON array holding this single command.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(std::slice::from_ref(self))
    }
}
