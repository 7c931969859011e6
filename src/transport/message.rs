//! Wire protocol spoken by [`super::WsTransport`].
//!
//! Every frame is a JSON text frame tagged by `"type"`. Payloads are carried
//! base64-encoded so binary images survive the JSON envelope.

use serde::{Deserialize, Serialize};

use super::{AckMode, DeliveryMode};

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "login")]
    Login {
        username: String,
        password: String,
        vpn: String,
    },
    #[serde(rename = "subscribe")]
    Subscribe {
        topic: String,
        correlation_key: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        topic: String,
        correlation_key: String,
    },
    #[serde(rename = "publish")]
    Publish {
        topic: String,
        #[serde(with = "base64_payload")]
        payload: Vec<u8>,
        message_id: String,
        delivery_mode: DeliveryMode,
    },
    #[serde(rename = "bind")]
    Bind { queue: String, ack_mode: AckMode },
    #[serde(rename = "unbind")]
    Unbind { queue: String },
    #[serde(rename = "ack")]
    Ack { queue: String, message_id: String },
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "authenticated")]
    Authenticated {},
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "subscription_ok")]
    SubscriptionOk { correlation_key: String },
    #[serde(rename = "subscription_error")]
    SubscriptionError {
        correlation_key: String,
        message: String,
    },
    #[serde(rename = "flow_up")]
    FlowUp { queue: String },
    #[serde(rename = "flow_error")]
    FlowError { queue: String, message: String },
    #[serde(rename = "flow_down")]
    FlowDown {
        queue: String,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(rename = "message")]
    Message {
        topic: String,
        #[serde(with = "base64_payload")]
        payload: Vec<u8>,
        timestamp: i64,
        message_id: String,
        /// Set when the message was delivered through a queue flow.
        #[serde(default)]
        queue: Option<String>,
        #[serde(default)]
        redelivered: bool,
    },
}

mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
