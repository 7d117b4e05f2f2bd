//! Publishing coordinator.
//!
//! One rendered document fans out to any number of destinations. Every
//! destination call is independent: a failure is recorded against that
//! destination and never stops its siblings.

pub mod confluence;
pub mod email;
pub mod github_release;
pub mod slack;
pub mod webhook;

use async_trait::async_trait;
use futures::future::join_all;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{Config, Credentials};
use crate::error::{Error, Result};

pub use confluence::ConfluencePublisher;
pub use email::{EmailPublisher, MailTransport, SmtpMailer};
pub use github_release::GithubReleasePublisher;
pub use slack::SlackPublisher;
pub use webhook::WebhookPublisher;

/// Name recorded when auto-discovery finds nothing to publish to.
pub const NOTHING_CONFIGURED: &str = "general";

/// Caller-supplied context passed through to every destination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    /// Where the document was saved locally, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_path: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// What a destination hands back on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Page id, release id and so on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    fn display_name(&self) -> &'static str;

    /// Whether every credential this destination needs is present.
    fn is_configured(&self) -> bool;

    fn required_env(&self) -> &'static [&'static str];

    async fn publish(
        &self,
        version: &str,
        document: &str,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Destination {
    Wiki,
    Forge,
    Chat,
    Email,
    Webhook,
}

impl Destination {
    pub const ALL: [Destination; 5] = [
        Destination::Wiki,
        Destination::Forge,
        Destination::Chat,
        Destination::Email,
        Destination::Webhook,
    ];

    /// Accepts both the generic and the product names.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "wiki" | "confluence" => Some(Destination::Wiki),
            "forge" | "github" => Some(Destination::Forge),
            "chat" | "slack" => Some(Destination::Chat),
            "email" => Some(Destination::Email),
            "webhook" => Some(Destination::Webhook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Wiki => "confluence",
            Destination::Forge => "github",
            Destination::Chat => "slack",
            Destination::Email => "email",
            Destination::Webhook => "webhook",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Published,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub status: PublishStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<PublishReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Every attempted destination lands in exactly one of `published` / `failed`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatePublishResult {
    pub published: Vec<String>,
    pub failed: Vec<String>,
    pub details: BTreeMap<String, PublishOutcome>,
}

impl AggregatePublishResult {
    fn record(&mut self, name: String, outcome: std::result::Result<PublishReceipt, String>) {
        match outcome {
            Ok(receipt) => {
                info!(destination = %name, url = ?receipt.url, "published");
                self.published.push(name.clone());
                self.details.insert(
                    name,
                    PublishOutcome {
                        status: PublishStatus::Published,
                        receipt: Some(receipt),
                        error: None,
                    },
                );
            }
            Err(error) => {
                warn!(destination = %name, error = %error, "publish failed");
                self.failed.push(name.clone());
                self.details.insert(
                    name,
                    PublishOutcome {
                        status: PublishStatus::Failed,
                        receipt: None,
                        error: Some(error),
                    },
                );
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlatformStatus {
    pub name: &'static str,
    pub display_name: &'static str,
    pub configured: bool,
    pub required_env: &'static [&'static str],
}

pub struct PublishingCoordinator {
    publishers: HashMap<Destination, Arc<dyn Publisher>>,
    timeout: Duration,
}

impl PublishingCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            publishers: HashMap::new(),
            timeout,
        }
    }

    pub fn from_config(config: &Config, credentials: &Credentials) -> Self {
        Self::new(Duration::from_secs(config.publish.timeout_secs))
            .with_publisher(
                Destination::Wiki,
                Arc::new(ConfluencePublisher::new(
                    credentials.confluence.clone(),
                    &config.publish,
                )),
            )
            .with_publisher(
                Destination::Forge,
                Arc::new(GithubReleasePublisher::new(
                    credentials.github_token.clone(),
                    config.repo.clone(),
                )),
            )
            .with_publisher(
                Destination::Chat,
                Arc::new(SlackPublisher::new(
                    credentials.slack_webhook_url.clone(),
                    config.repo.clone(),
                )),
            )
            .with_publisher(
                Destination::Email,
                Arc::new(EmailPublisher::new(credentials.smtp.clone())),
            )
            .with_publisher(
                Destination::Webhook,
                Arc::new(WebhookPublisher::new(
                    credentials.webhook.clone(),
                    config.repo.clone(),
                )),
            )
    }

    pub fn with_publisher(mut self, destination: Destination, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.insert(destination, publisher);
        self
    }

    pub fn platform_status(&self) -> Vec<PlatformStatus> {
        Destination::ALL
            .iter()
            .filter_map(|d| self.publishers.get(d).map(|p| (d, p)))
            .map(|(d, p)| PlatformStatus {
                name: d.as_str(),
                display_name: p.display_name(),
                configured: p.is_configured(),
                required_env: p.required_env(),
            })
            .collect()
    }

    fn configured_destinations(&self) -> Vec<String> {
        Destination::ALL
            .iter()
            .filter(|d| self.publishers.get(d).map_or(false, |p| p.is_configured()))
            .map(|d| d.as_str().to_string())
            .collect()
    }

    /// Publishes to `destinations`, or to every configured destination when
    /// the list is empty. Never fails as a whole.
    pub async fn publish(
        &self,
        version: &str,
        document: &str,
        destinations: &[String],
        metadata: &PublishMetadata,
    ) -> AggregatePublishResult {
        let mut result = AggregatePublishResult::default();

        let requested = if destinations.is_empty() {
            let discovered = self.configured_destinations();
            if discovered.is_empty() {
                result.record(
                    NOTHING_CONFIGURED.to_string(),
                    Err("No destinations configured for publishing".to_string()),
                );
                return result;
            }
            info!(destinations = ?discovered, "auto-discovered destinations");
            discovered
        } else {
            destinations.to_vec()
        };

        // Aliases of one destination share a single call; each requested name
        // still gets its own entry in the result.
        let mut seen_names = HashSet::new();
        let mut plan: Vec<(Vec<String>, Option<(Destination, Arc<dyn Publisher>)>)> = Vec::new();
        for name in requested {
            if !seen_names.insert(name.clone()) {
                continue;
            }
            let Some(destination) = Destination::parse(&name) else {
                plan.push((vec![name], None));
                continue;
            };
            let existing = plan
                .iter_mut()
                .find(|(_, target)| matches!(target, Some((d, _)) if *d == destination));
            match existing {
                Some((aliases, _)) => aliases.push(name),
                None => {
                    let target = self.publishers.get(&destination).cloned().map(|p| (destination, p));
                    plan.push((vec![name], target));
                }
            }
        }

        let calls = plan.iter().map(|(aliases, target)| async move {
            let outcome = match target {
                None => Err(format!("unsupported destination: {}", aliases[0])),
                Some((destination, publisher)) => {
                    match tokio::time::timeout(
                        self.timeout,
                        publisher.publish(version, document, metadata),
                    )
                    .await
                    {
                        Ok(Ok(receipt)) => Ok(receipt),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(Error::timeout(destination.as_str(), self.timeout).to_string()),
                    }
                }
            };
            (aliases, outcome)
        });

        for (aliases, outcome) in join_all(calls).await {
            for name in aliases {
                result.record(name.clone(), outcome.clone());
            }
        }
        result
    }
}
