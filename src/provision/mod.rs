//! Idempotent provisioning of the broker resources the image consumer needs:
//! a durable queue and its topic subscription.

pub mod http;
pub mod semp;

pub use http::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
pub use semp::{SempProvisioner, SubscriptionStatus};
