//! Queue provisioning over the broker's SEMP v2 management API.
//!
//! Provisioning is check-then-create and is not atomic: two provisioners
//! racing on the same queue may both issue the create. The create path
//! therefore treats `ALREADY_EXISTS` as success.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::http::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::transport::QueueDescriptor;
use crate::utils::error::ProvisionError;

/// Result of [`SempProvisioner::ensure_subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    AlreadyPresent,
    Created,
}

#[derive(Debug, Deserialize)]
struct SempBody {
    meta: Option<SempMeta>,
}

#[derive(Debug, Deserialize)]
struct SempMeta {
    error: Option<SempErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SempErrorDetail {
    status: Option<String>,
    description: Option<String>,
}

pub struct SempProvisioner<H: HttpTransport> {
    http: H,
    base_url: String,
    username: String,
    password: String,
}

impl<H: HttpTransport> SempProvisioner<H> {
    /// `endpoint` is the SEMP config root, e.g.
    /// `http://broker:8080/SEMP/v2/config`.
    pub fn new(http: H, endpoint: &str, msg_vpn: &str, username: &str, password: &str) -> Self {
        Self {
            http,
            base_url: format!(
                "{}/msgVpns/{}",
                endpoint.trim_end_matches('/'),
                urlencoding::encode(msg_vpn)
            ),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates or replaces a durable, consumable queue.
    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), ProvisionError> {
        info!("Provisioning queue \"{queue_name}\"...");
        let request = self.request(
            Method::Put,
            &format!("/queues/{}", urlencoding::encode(queue_name)),
            Some(json!({
                "egressEnabled": true,
                "ingressEnabled": true,
                "permission": "consume",
                "queueName": queue_name,
            })),
        );

        match check(self.http.execute(request).await?) {
            Ok(()) => {
                info!("Successfully provisioned queue \"{queue_name}\".");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                info!("Queue \"{queue_name}\" already exists.");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Makes sure `queue_name` carries a subscription to `topic`.
    pub async fn ensure_subscription(
        &self,
        queue_name: &str,
        topic: &str,
    ) -> Result<SubscriptionStatus, ProvisionError> {
        info!("Adding queue subscription \"{topic}\" to queue \"{queue_name}\"...");

        let lookup = self.request(
            Method::Get,
            &format!(
                "/queues/{}/subscriptions/{}",
                urlencoding::encode(queue_name),
                urlencoding::encode(topic)
            ),
            None,
        );
        match self.http.execute(lookup).await.and_then(check) {
            Ok(()) => {
                info!("Queue subscription \"{topic}\" already exists on queue \"{queue_name}\".");
                return Ok(SubscriptionStatus::AlreadyPresent);
            }
            Err(e) if e.is_not_found() => {
                debug!("Subscription \"{topic}\" not on queue \"{queue_name}\" yet: {e}")
            }
            // Left for the create to surface.
            Err(e) => warn!("Subscription lookup for \"{topic}\" failed: {e}"),
        }

        let create = self.request(
            Method::Post,
            &format!("/queues/{}/subscriptions", urlencoding::encode(queue_name)),
            Some(json!({ "subscriptionTopic": topic })),
        );
        match check(self.http.execute(create).await?) {
            Ok(()) => {
                info!("Successfully added queue subscription \"{topic}\" to queue \"{queue_name}\".");
                Ok(SubscriptionStatus::Created)
            }
            Err(e) if e.is_already_exists() => {
                info!("Queue subscription \"{topic}\" was added concurrently to \"{queue_name}\".");
                Ok(SubscriptionStatus::AlreadyPresent)
            }
            Err(e) => Err(e),
        }
    }

    /// Queue first, then its subscription. Any error is meant to abort
    /// startup.
    pub async fn provision(
        &self,
        queue_name: &str,
        topic: &str,
    ) -> Result<QueueDescriptor, ProvisionError> {
        self.ensure_queue(queue_name).await?;
        self.ensure_subscription(queue_name, topic).await?;
        Ok(QueueDescriptor {
            name: queue_name.to_string(),
            subscription_topic: topic.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, body: Option<serde_json::Value>) -> HttpRequest {
        HttpRequest {
            method,
            url: format!("{}{}", self.base_url, path),
            basic_auth: Some((self.username.clone(), self.password.clone())),
            body,
            headers: vec![("Accept".to_string(), "application/json".to_string())],
        }
    }
}

/// Maps a non-2xx SEMP response to a `ProvisionError` carrying the broker's
/// own status code and description.
fn check(response: HttpResponse) -> Result<(), ProvisionError> {
    if response.is_success() {
        return Ok(());
    }

    let detail = serde_json::from_value::<SempBody>(response.body)
        .ok()
        .and_then(|body| body.meta)
        .and_then(|meta| meta.error);

    let (code, description) = match detail {
        Some(SempErrorDetail {
            status,
            description,
        }) => (status.unwrap_or_default(), description.unwrap_or_default()),
        None => (String::new(), String::new()),
    };

    Err(ProvisionError::Rejected {
        status: response.status,
        code,
        description,
    })
}
