//! # emotion-bridge
//!
//! `emotion-bridge` connects a robot's camera pipeline to cloud storage and
//! back through a Solace-style message broker. Captured JPEGs arrive on a
//! durable queue and are uploaded to an object store; face analysis results
//! arrive on a topic and are turned into expression commands for the robot.
//!
//! ## Core Modules
//!
//! - `transport`: The broker capability (traits, events, messages) and its WebSocket client.
//! - `session`: Connection lifecycle shared by every broker user.
//! - `provision`: Idempotent queue and subscription setup over the SEMP management API.
//! - `consumer`: Guaranteed-delivery queue consumer that acknowledges only after processing.
//! - `storage`: Object store capability, the S3 client and the image uploader.
//! - `subscriber`: Topic subscriber that publishes expression commands.
//! - `emotion`: Pure aggregation of face emotions into a command.
//! - `analysis`: Face detection on stored images, published as analysis results.
//! - `broker`: In-process broker implementing the transport capability.
//! - `config`: Loading settings from files and the environment.
//! - `utils`: Error types and logging.

pub mod analysis;
pub mod broker;
pub mod config;
pub mod consumer;
pub mod emotion;
pub mod provision;
pub mod session;
pub mod storage;
pub mod subscriber;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
