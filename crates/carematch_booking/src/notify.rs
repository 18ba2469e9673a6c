// --- File: crates/carematch_booking/src/notify.rs ---
//! Outbound booking notifications.
//!
//! Templates are rendered by the receiving service; this side only names the template and
//! ships the data.

use carematch_common::services::{BoxFuture, NotificationResult, NotificationService};
use carematch_common::HTTP_CLIENT;
use carematch_config::AppConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Notification service rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// Posts `{to, template, data}` as JSON to the configured endpoint.
#[derive(Clone)]
pub struct HttpNotifier {
    endpoint: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNotifier")
            .field("endpoint", &self.endpoint)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
        }
    }

    async fn post(&self, body: Value) -> Result<NotificationResult, NotificationError> {
        let mut request = HTTP_CLIENT.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        // Some providers answer 202 with an empty body
        let text = response.text().await?;
        let parsed: Option<SendResponse> = serde_json::from_str(&text).ok();
        Ok(NotificationResult {
            id: parsed
                .as_ref()
                .and_then(|r| r.id.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            status: parsed
                .and_then(|r| r.status)
                .unwrap_or_else(|| "accepted".to_string()),
        })
    }
}

impl NotificationService for HttpNotifier {
    type Error = NotificationError;

    fn send(
        &self,
        to: &str,
        template: &str,
        data: Value,
    ) -> BoxFuture<'_, NotificationResult, Self::Error> {
        let body = json!({ "to": to, "template": template, "data": data });
        Box::pin(async move { self.post(body).await })
    }
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

impl NotificationService for LoggingNotifier {
    type Error = NotificationError;

    fn send(
        &self,
        to: &str,
        template: &str,
        data: Value,
    ) -> BoxFuture<'_, NotificationResult, Self::Error> {
        info!(to = %to, template = %template, data = %data, "Notification (not sent, no endpoint configured)");
        Box::pin(async move {
            Ok(NotificationResult {
                id: Uuid::new_v4().to_string(),
                status: "logged".to_string(),
            })
        })
    }
}

/// The notifier selected by configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredNotifier {
    Http(HttpNotifier),
    Logging(LoggingNotifier),
}

impl ConfiguredNotifier {
    /// HTTP when `use_notifications` is set and an endpoint is configured, logging otherwise.
    pub fn from_config(config: &AppConfig) -> Self {
        let endpoint = config
            .notifications
            .as_ref()
            .filter(|_| config.use_notifications)
            .and_then(|n| n.endpoint.clone().map(|endpoint| (endpoint, n.api_key.clone())));

        match endpoint {
            Some((endpoint, api_key)) => {
                info!("Notifications will be posted to {}", endpoint);
                ConfiguredNotifier::Http(HttpNotifier::new(endpoint, api_key))
            }
            None => {
                debug!("No notification endpoint configured, logging notifications");
                ConfiguredNotifier::Logging(LoggingNotifier)
            }
        }
    }
}

impl NotificationService for ConfiguredNotifier {
    type Error = NotificationError;

    fn send(
        &self,
        to: &str,
        template: &str,
        data: Value,
    ) -> BoxFuture<'_, NotificationResult, Self::Error> {
        match self {
            ConfiguredNotifier::Http(n) => n.send(to, template, data),
            ConfiguredNotifier::Logging(n) => {
                if to.is_empty() {
                    warn!(template = %template, "Notification without recipient");
                }
                n.send(to, template, data)
            }
        }
    }
}
