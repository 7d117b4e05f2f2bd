use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{PublishMetadata, PublishReceipt, Publisher};
use crate::error::{Error, Result};

const SERVICE: &str = "slack";
const MAX_HIGHLIGHTS: usize = 3;

/// Posts a short announcement to an incoming chat webhook.
pub struct SlackPublisher {
    http: reqwest::Client,
    webhook_url: Option<String>,
    default_repo: Option<String>,
}

impl SlackPublisher {
    pub fn new(webhook_url: Option<String>, default_repo: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            webhook_url,
            default_repo,
        }
    }

    fn message(&self, version: &str, document: &str, metadata: &PublishMetadata) -> Value {
        let repo = metadata.repo.as_deref().or(self.default_repo.as_deref());
        let title = match repo {
            Some(repo) => format!("🚀 {repo} - Release {version}"),
            None => format!("🚀 Release {version}"),
        };

        let mut blocks = vec![json!({
            "type": "header",
            "text": { "type": "plain_text", "text": title },
        })];

        let highlights = extract_highlights(document);
        if !highlights.is_empty() {
            let lines: Vec<String> = highlights.iter().map(|h| format!("• {h}")).collect();
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Highlights:*\n{}", lines.join("\n")) },
            }));
        }

        if let Some(repo) = repo {
            blocks.push(json!({
                "type": "actions",
                "elements": [{
                    "type": "button",
                    "text": { "type": "plain_text", "text": "View Full Release Notes" },
                    "url": format!("https://github.com/{repo}/releases/tag/{version}"),
                }],
            }));
        } else if let Some(path) = &metadata.document_path {
            blocks.push(json!({
                "type": "context",
                "elements": [{ "type": "mrkdwn", "text": format!("Full notes: `{}`", path.display()) }],
            }));
        }

        json!({
            "text": format!("🚀 New Release: {version}"),
            "blocks": blocks,
        })
    }
}

fn bullet(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix("- ")
        .or_else(|| trimmed.strip_prefix("* "))
        .or_else(|| trimmed.strip_prefix("• "))
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

/// Up to three bullets under the first heading that mentions highlights, or
/// the first three bullets anywhere when no such heading exists.
pub fn extract_highlights(document: &str) -> Vec<String> {
    let mut under_heading = Vec::new();
    let mut in_highlights = false;
    for line in document.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            if in_highlights {
                break;
            }
            in_highlights = trimmed.to_lowercase().contains("highlight");
            continue;
        }
        if in_highlights {
            if let Some(item) = bullet(line) {
                under_heading.push(item.to_string());
                if under_heading.len() == MAX_HIGHLIGHTS {
                    break;
                }
            }
        }
    }
    if !under_heading.is_empty() {
        return under_heading;
    }

    document
        .lines()
        .filter_map(bullet)
        .take(MAX_HIGHLIGHTS)
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Publisher for SlackPublisher {
    fn display_name(&self) -> &'static str {
        "Slack"
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["SLACK_WEBHOOK_URL"]
    }

    async fn publish(
        &self,
        version: &str,
        document: &str,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| Error::configuration("SLACK_WEBHOOK_URL is not set"))?;

        self.http
            .post(url)
            .json(&self.message(version, document, metadata))
            .send()
            .await
            .map_err(|e| Error::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| Error::from_reqwest(SERVICE, e))?;

        info!(version, "chat notification sent");
        Ok(PublishReceipt {
            message: Some("Notification sent".to_string()),
            ..PublishReceipt::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    #[test]
    fn highlights_come_from_the_highlights_section() {
        let doc = "# Release 1.2.0\n\n- stray\n\n## ✨ Highlights\n- One\n- Two\n* Three\n- Four\n\n## Bug Fixes\n- Fix\n";
        assert_eq!(extract_highlights(doc), vec!["One", "Two", "Three"]);
    }

    #[test]
    fn highlights_stop_at_the_next_heading() {
        let doc = "## Highlights\n- Only one\n## Features\n- Other\n";
        assert_eq!(extract_highlights(doc), vec!["Only one"]);
    }

    #[test]
    fn without_a_highlights_heading_the_first_bullets_are_used() {
        let doc = "## Features\n- A\n- B\n## Fixes\n- C\n- D\n";
        assert_eq!(extract_highlights(doc), vec!["A", "B", "C"]);
        assert!(extract_highlights("No bullets at all").is_empty());
    }

    #[test]
    fn message_links_to_the_release_page() {
        let publisher = SlackPublisher::new(None, Some("acme/widgets".into()));
        let message = publisher.message("v1.2.0", "## Highlights\n- Faster", &PublishMetadata::default());

        assert_eq!(message["text"], "🚀 New Release: v1.2.0");
        assert_eq!(message["blocks"][0]["text"]["text"], "🚀 acme/widgets - Release v1.2.0");
        assert_eq!(message["blocks"][1]["text"]["text"], "*Highlights:*\n• Faster");
        assert_eq!(
            message["blocks"][2]["elements"][0]["url"],
            "https://github.com/acme/widgets/releases/tag/v1.2.0"
        );
    }

    #[tokio::test]
    async fn posts_to_the_webhook() {
        let mut server = mockito::Server::new_async().await;
        let hook = server
            .mock("POST", "/services/T/B/X")
            .match_body(Matcher::PartialJson(json!({"text": "🚀 New Release: 2.0.0"})))
            .with_body("ok")
            .create_async()
            .await;

        let publisher = SlackPublisher::new(Some(format!("{}/services/T/B/X", server.url())), None);
        let receipt = publisher
            .publish("2.0.0", "- Thing", &PublishMetadata::default())
            .await
            .unwrap();

        hook.assert_async().await;
        assert_eq!(receipt.message.as_deref(), Some("Notification sent"));
    }

    #[tokio::test]
    async fn rejected_post_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _hook = server
            .mock("POST", "/hook")
            .with_status(403)
            .with_body("invalid_token")
            .create_async()
            .await;
        let publisher = SlackPublisher::new(Some(format!("{}/hook", server.url())), None);
        let err = publisher
            .publish("2.0.0", "doc", &PublishMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_auth_error");
    }
}
