//! Error types for the bridge.
//!
//! Each failure class has its own enum so callers can decide locally whether
//! it is fatal: provisioning errors abort startup, processing and publish
//! errors are logged and the message is left alone, transport connect errors
//! leave the session disconnected until an operator restarts the process.
//! Every variant carries the human-readable diagnostic reported by the broker
//! or transport.

use thiserror::Error;

/// Failures reported by a broker transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to message broker failed: {0}")]
    Connect(String),

    #[error("not connected to the message broker")]
    NotConnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("acknowledgement of {delivery_tag} failed: {reason}")]
    Ack {
        delivery_tag: String,
        reason: String,
    },

    #[error("could not bind to queue \"{queue}\": {reason}")]
    Bind { queue: String, reason: String },

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failures while creating broker resources over the management API.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioning request failed: {0}")]
    Transport(String),

    #[error("provisioning rejected with status {status} ({code}): {description}")]
    Rejected {
        status: u16,
        code: String,
        description: String,
    },
}

impl ProvisionError {
    pub const ALREADY_EXISTS: &'static str = "ALREADY_EXISTS";
    pub const NOT_FOUND: &'static str = "NOT_FOUND";

    /// True when the management API refused a create because the object is
    /// already there.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ProvisionError::Rejected { code, .. } if code == Self::ALREADY_EXISTS)
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ProvisionError::Rejected { status, code, .. } => {
                *status == 404 || code == Self::NOT_FOUND
            }
            ProvisionError::Transport(_) => false,
        }
    }
}

/// Failures of the object store capability.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload of \"{key}\" failed: {reason}")]
    Upload { key: String, reason: String },
}

/// Failures of a per-message processing callback. Never fatal.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("message payload is empty")]
    EmptyPayload,

    #[error("payload is not valid analysis JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("analysis payload has no FaceDetails")]
    MalformedAnalysis,

    #[error("analysis contains no faces")]
    NoFaces,

    #[error(transparent)]
    Upload(#[from] StorageError),
}

/// Failures publishing an outbound message. Logged, never retried.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize outbound message: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of the face analysis stage.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("object key is empty")]
    EmptyKey,

    #[error("face detection on \"{key}\" failed: {reason}")]
    Detection { key: String, reason: String },

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Top-level error for the binary's startup paths.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
