//! The `emotion` module turns a face analysis into a robot expression command.
//!
//! Everything here is pure: [`aggregate::aggregate`] picks the dominant
//! emotion of one analysis, [`mapping::expression_for`] looks up the matching
//! expression, and [`command::ExpressionCommand`] is the wire form published
//! to the robot. [`tally::EmotionTally`] keeps per-session counts for the
//! subscriber that owns it.

pub mod aggregate;
pub mod command;
pub mod mapping;
pub mod tally;

pub use aggregate::{
    DominantEmotion, EmotionScore, EmotionSummary, FaceQuality, FaceRecord, ImageOrigin,
    aggregate, parse_faces,
};
pub use command::ExpressionCommand;
pub use mapping::{Expression, expression_for};
pub use tally::EmotionTally;

#[cfg(test)]
mod tests;
