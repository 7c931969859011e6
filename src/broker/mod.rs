//! The `broker` module is an in-process message broker.
//!
//! It implements the same [`crate::transport::BrokerTransport`] capability as
//! the WebSocket client, so the consumer and subscriber can run embedded in
//! one process without any network infrastructure. It is a library utility
//! for embedding and testing: the `emotion-bridge` binary always talks to a
//! real broker over [`crate::transport::WsTransport`], while the crate's
//! end-to-end tests run every pipeline against a [`LoopbackTransport`].
//!
//! ```
//! use emotion_bridge::broker::LoopbackTransport;
//!
//! let broker = LoopbackTransport::new();
//! broker.provision_queue("image-ingress", "T/imageCapture/>")?;
//! broker.publish("T/imageCapture/cam1", vec![0xFF, 0xD8]);
//! assert_eq!(broker.queue_depth("image-ingress"), Some(1));
//! # Ok::<(), emotion_bridge::utils::error::TransportError>(())
//! ```
//!
//! - `engine`: routing of topic messages, durable queues and acknowledgements.
//! - `topic`: subscriptions with `*` and `>` wildcards.
//! - `queue`: spool, outstanding messages and the bound flow of one queue.
//! - `loopback`: the transport handing deliveries to connected sessions.

pub mod client;
pub mod engine;
pub mod loopback;
pub mod queue;
pub mod topic;

pub use engine::Broker;
pub use loopback::LoopbackTransport;
