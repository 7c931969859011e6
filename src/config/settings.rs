use serde::Deserialize;

/// Top-level configuration for the bridge.
///
/// Every section has defaults so a bare environment still starts; secrets are
/// expected to arrive through the environment.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub semp: SempSettings,
    pub images: ImageSettings,
    pub storage: StorageSettings,
    pub controller: ControllerSettings,
    pub runtime: RuntimeSettings,
}

/// Connection parameters for the message broker session.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub url: String,
    pub vpn: String,
    pub username: String,
    pub password: String,
}

/// Management (SEMP) endpoint used to provision queues.
#[derive(Debug, Deserialize, Clone)]
pub struct SempSettings {
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub msg_vpn: String,
}

/// Image ingress: the durable queue and the topic it attracts.
#[derive(Debug, Deserialize, Clone)]
pub struct ImageSettings {
    pub queue_name: String,
    pub ingress_topic: String,
}

/// Object store destination for uploaded images.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageSettings {
    pub bucket: String,
    pub key_prefix: String,
    pub region: String,
    /// Custom endpoint for S3-compatible stores. `None` means AWS.
    pub endpoint: Option<String>,
}

/// Emotion controller topics.
#[derive(Debug, Deserialize, Clone)]
pub struct ControllerSettings {
    pub analysis_topic: String,
    /// Topic root the `analyze` command publishes face analyses under.
    pub analysis_prefix: String,
    pub command_topic: String,
    pub subscription_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeSettings {
    pub shutdown_grace_ms: u64,
    pub log_level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub semp: Option<PartialSempSettings>,
    pub images: Option<PartialImageSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub controller: Option<PartialControllerSettings>,
    pub runtime: Option<PartialRuntimeSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub url: Option<String>,
    pub vpn: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialSempSettings {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub msg_vpn: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialImageSettings {
    pub queue_name: Option<String>,
    pub ingress_topic: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialStorageSettings {
    pub bucket: Option<String>,
    pub key_prefix: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialControllerSettings {
    pub analysis_topic: Option<String>,
    pub analysis_prefix: Option<String>,
    pub command_topic: Option<String>,
    pub subscription_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRuntimeSettings {
    pub shutdown_grace_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                url: "ws://127.0.0.1:8008".to_string(),
                vpn: "default".to_string(),
                username: "default".to_string(),
                password: String::new(),
            },
            semp: SempSettings {
                endpoint: "http://127.0.0.1:8080/SEMP/v2/config".to_string(),
                username: "admin".to_string(),
                password: "admin".to_string(),
                msg_vpn: "default".to_string(),
            },
            images: ImageSettings {
                queue_name: "image-ingress".to_string(),
                ingress_topic: "T/imageCapture/>".to_string(),
            },
            storage: StorageSettings {
                bucket: "romo-robot-demo".to_string(),
                key_prefix: "romo".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
            },
            controller: ControllerSettings {
                analysis_topic: "T/imageAnalysis/>".to_string(),
                analysis_prefix: "T/imageAnalysis".to_string(),
                command_topic: "T/MQTTRomo/all/command/character".to_string(),
                subscription_timeout_ms: 10_000,
            },
            runtime: RuntimeSettings {
                shutdown_grace_ms: 1_000,
                log_level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every missing value of `partial` from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();

        let broker = partial.broker;
        let semp = partial.semp;
        let images = partial.images;
        let storage = partial.storage;
        let controller = partial.controller;
        let runtime = partial.runtime;

        Settings {
            broker: BrokerSettings {
                url: broker
                    .as_ref()
                    .and_then(|b| b.url.clone())
                    .unwrap_or(default.broker.url),
                vpn: broker
                    .as_ref()
                    .and_then(|b| b.vpn.clone())
                    .unwrap_or(default.broker.vpn),
                username: broker
                    .as_ref()
                    .and_then(|b| b.username.clone())
                    .unwrap_or(default.broker.username),
                password: broker
                    .as_ref()
                    .and_then(|b| b.password.clone())
                    .unwrap_or(default.broker.password),
            },
            semp: SempSettings {
                endpoint: semp
                    .as_ref()
                    .and_then(|s| s.endpoint.clone())
                    .unwrap_or(default.semp.endpoint),
                username: semp
                    .as_ref()
                    .and_then(|s| s.username.clone())
                    .unwrap_or(default.semp.username),
                password: semp
                    .as_ref()
                    .and_then(|s| s.password.clone())
                    .unwrap_or(default.semp.password),
                msg_vpn: semp
                    .as_ref()
                    .and_then(|s| s.msg_vpn.clone())
                    .unwrap_or(default.semp.msg_vpn),
            },
            images: ImageSettings {
                queue_name: images
                    .as_ref()
                    .and_then(|i| i.queue_name.clone())
                    .unwrap_or(default.images.queue_name),
                ingress_topic: images
                    .as_ref()
                    .and_then(|i| i.ingress_topic.clone())
                    .unwrap_or(default.images.ingress_topic),
            },
            storage: StorageSettings {
                bucket: storage
                    .as_ref()
                    .and_then(|s| s.bucket.clone())
                    .unwrap_or(default.storage.bucket),
                key_prefix: storage
                    .as_ref()
                    .and_then(|s| s.key_prefix.clone())
                    .unwrap_or(default.storage.key_prefix),
                region: storage
                    .as_ref()
                    .and_then(|s| s.region.clone())
                    .unwrap_or(default.storage.region),
                endpoint: storage
                    .as_ref()
                    .and_then(|s| s.endpoint.clone())
                    .or(default.storage.endpoint),
            },
            controller: ControllerSettings {
                analysis_topic: controller
                    .as_ref()
                    .and_then(|c| c.analysis_topic.clone())
                    .unwrap_or(default.controller.analysis_topic),
                analysis_prefix: controller
                    .as_ref()
                    .and_then(|c| c.analysis_prefix.clone())
                    .unwrap_or(default.controller.analysis_prefix),
                command_topic: controller
                    .as_ref()
                    .and_then(|c| c.command_topic.clone())
                    .unwrap_or(default.controller.command_topic),
                subscription_timeout_ms: controller
                    .as_ref()
                    .and_then(|c| c.subscription_timeout_ms)
                    .unwrap_or(default.controller.subscription_timeout_ms),
            },
            runtime: RuntimeSettings {
                shutdown_grace_ms: runtime
                    .as_ref()
                    .and_then(|r| r.shutdown_grace_ms)
                    .unwrap_or(default.runtime.shutdown_grace_ms),
                log_level: runtime
                    .as_ref()
                    .and_then(|r| r.log_level.clone())
                    .unwrap_or(default.runtime.log_level),
            },
        }
    }
}
