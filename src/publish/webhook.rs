use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::{PublishMetadata, PublishReceipt, Publisher};
use crate::config::WebhookCredentials;
use crate::error::{Error, Result};

const SERVICE: &str = "webhook";

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    version: &'a str,
    content: &'a str,
    metadata: &'a PublishMetadata,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    repo: Option<&'a str>,
}

/// POSTs the whole document as JSON to an arbitrary endpoint.
pub struct WebhookPublisher {
    http: reqwest::Client,
    credentials: WebhookCredentials,
    default_repo: Option<String>,
}

impl WebhookPublisher {
    pub fn new(credentials: WebhookCredentials, default_repo: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            default_repo,
        }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    fn display_name(&self) -> &'static str {
        "Custom Webhook"
    }

    fn is_configured(&self) -> bool {
        self.credentials.url.is_some()
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["CUSTOM_WEBHOOK_URL"]
    }

    async fn publish(
        &self,
        version: &str,
        document: &str,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt> {
        let url = self
            .credentials
            .url
            .as_deref()
            .ok_or_else(|| Error::configuration("CUSTOM_WEBHOOK_URL is not set"))?;

        let envelope = Envelope {
            version,
            content: document,
            metadata,
            timestamp: Utc::now().to_rfc3339(),
            repo: metadata.repo.as_deref().or(self.default_repo.as_deref()),
        };

        let mut request = self.http.post(url).json(&envelope);
        if let Some(token) = &self.credentials.auth_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| Error::from_reqwest(SERVICE, e))?;

        let status = response.status();
        info!(%status, "webhook delivered");
        Ok(PublishReceipt {
            url: Some(url.to_string()),
            message: Some(format!("HTTP {}", status.as_u16())),
            ..PublishReceipt::default()
        })
    }
}
