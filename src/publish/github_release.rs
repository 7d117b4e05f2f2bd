use async_trait::async_trait;
use tracing::info;

use super::{PublishMetadata, PublishReceipt, Publisher};
use crate::error::{Error, Result};
use crate::github::client::GitHubClient;
use crate::github::types::ReleasePayload;

/// Creates the release object for a tag, or rewrites the body of an existing one.
pub struct GithubReleasePublisher {
    token: Option<String>,
    default_repo: Option<String>,
    base_uri: Option<String>,
}

impl GithubReleasePublisher {
    pub fn new(token: Option<String>, default_repo: Option<String>) -> Self {
        Self {
            token,
            default_repo,
            base_uri: None,
        }
    }

    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.base_uri = Some(uri.into());
        self
    }

    fn client(&self, repo: Option<&str>) -> Result<GitHubClient> {
        let repo = repo.or(self.default_repo.as_deref());
        let (Some(token), Some(repo)) = (self.token.as_deref(), repo) else {
            return Err(Error::configuration(
                "GITHUB_TOKEN and a repository are required to publish a release",
            ));
        };
        match &self.base_uri {
            Some(uri) => GitHubClient::with_base_uri(token, repo, uri, 1),
            None => GitHubClient::new(token, repo, 1),
        }
    }
}

/// Tags with a hyphen, `alpha` or `beta` are prereleases.
pub fn is_prerelease(tag: &str) -> bool {
    let lower = tag.to_lowercase();
    lower.contains('-') || lower.contains("alpha") || lower.contains("beta")
}

#[async_trait]
impl Publisher for GithubReleasePublisher {
    fn display_name(&self) -> &'static str {
        "GitHub Releases"
    }

    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["GITHUB_TOKEN"]
    }

    async fn publish(
        &self,
        version: &str,
        document: &str,
        metadata: &PublishMetadata,
    ) -> Result<PublishReceipt> {
        let client = self.client(metadata.repo.as_deref())?;
        let payload = ReleasePayload {
            tag_name: version.to_string(),
            name: format!("Release {version}"),
            body: document.to_string(),
            draft: false,
            prerelease: is_prerelease(version),
        };

        let (release, action) = match client.get_release(version).await? {
            Some(existing) => (client.update_release(existing.id, &payload).await?, "updated"),
            None => (client.create_release(&payload).await?, "created"),
        };

        info!(repo = %client.repository(), release_id = release.id, action, "github release published");
        Ok(PublishReceipt {
            url: release.html_url,
            identifier: Some(release.id.to_string()),
            title: release.name.or(Some(payload.name)),
            message: Some(format!("Release {action}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn publisher(server: &mockito::Server) -> GithubReleasePublisher {
        GithubReleasePublisher::new(Some("t".into()), Some("acme/widgets".into()))
            .with_base_uri(server.url())
    }

    #[test]
    fn prerelease_detection() {
        assert!(is_prerelease("v2.0.0-rc.1"));
        assert!(is_prerelease("1.0.0ALPHA"));
        assert!(is_prerelease("v3-Beta"));
        assert!(!is_prerelease("v1.2.0"));
    }

    #[tokio::test]
    async fn existing_release_is_updated_in_place() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/repos/acme/widgets/releases/tags/v1.2.0")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":17,"tag_name":"v1.2.0","name":"old","html_url":"https://github.com/acme/widgets/releases/tag/v1.2.0"}"#)
            .create_async()
            .await;
        let update = server
            .mock("PATCH", "/repos/acme/widgets/releases/17")
            .match_body(Matcher::PartialJson(json!({
                "tag_name": "v1.2.0",
                "name": "Release v1.2.0",
                "body": "## Highlights\n- New",
                "prerelease": false,
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":17,"tag_name":"v1.2.0","name":"Release v1.2.0","html_url":"https://github.com/acme/widgets/releases/tag/v1.2.0"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/repos/acme/widgets/releases")
            .expect(0)
            .create_async()
            .await;

        let receipt = publisher(&server)
            .publish("v1.2.0", "## Highlights\n- New", &PublishMetadata::default())
            .await
            .unwrap();

        update.assert_async().await;
        create.assert_async().await;
        assert_eq!(receipt.identifier.as_deref(), Some("17"));
        assert_eq!(receipt.message.as_deref(), Some("Release updated"));
        assert_eq!(
            receipt.url.as_deref(),
            Some("https://github.com/acme/widgets/releases/tag/v1.2.0")
        );
    }

    #[tokio::test]
    async fn missing_release_is_created_as_prerelease() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/repos/acme/gadgets/releases/tags/v2.0.0-beta.1")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"message":"Not Found"}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/repos/acme/gadgets/releases")
            .match_body(Matcher::PartialJson(json!({"prerelease": true, "draft": false})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":99,"tag_name":"v2.0.0-beta.1"}"#)
            .create_async()
            .await;

        let metadata = PublishMetadata {
            repo: Some("acme/gadgets".into()),
            ..PublishMetadata::default()
        };
        let receipt = publisher(&server)
            .publish("v2.0.0-beta.1", "notes", &metadata)
            .await
            .unwrap();

        create.assert_async().await;
        assert_eq!(receipt.identifier.as_deref(), Some("99"));
        assert_eq!(receipt.title.as_deref(), Some("Release v2.0.0-beta.1"));
    }

    #[tokio::test]
    async fn token_is_required() {
        let err = GithubReleasePublisher::new(None, Some("acme/widgets".into()))
            .publish("v1.0.0", "notes", &PublishMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }
}
