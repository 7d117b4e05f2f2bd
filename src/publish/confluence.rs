use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::{debug, info};

use super::{PublishMetadata, PublishReceipt, Publisher};
use crate::config::{ConfluenceCredentials, PublishConfig};
use crate::error::{Error, Result};

const SERVICE: &str = "confluence";

/// Creates or updates one wiki page per release.
pub struct ConfluencePublisher {
    http: reqwest::Client,
    credentials: ConfluenceCredentials,
    space: String,
    parent_page_id: Option<String>,
    update_existing: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    results: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    #[serde(default)]
    version: Option<PageVersion>,
    #[serde(default, rename = "_links")]
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct PageVersion {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(default)]
    webui: Option<String>,
}

impl ConfluencePublisher {
    pub fn new(credentials: ConfluenceCredentials, config: &PublishConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            space: config.confluence_space.clone(),
            parent_page_id: config.confluence_parent_page_id.clone(),
            update_existing: config.update_existing,
        }
    }

    fn base_url(&self) -> Result<&str> {
        self.credentials
            .base_url
            .as_deref()
            .map(|b| b.trim_end_matches('/'))
            .ok_or_else(|| Error::configuration("CONFLUENCE_BASE is not set"))
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match (&self.credentials.user, &self.credentials.api_token) {
            (Some(user), Some(token)) => Ok(request.basic_auth(user, Some(token))),
            _ => Err(Error::configuration(
                "CONFLUENCE_USER and CONFLUENCE_API_TOKEN are required",
            )),
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        self.auth(request)?
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| Error::from_reqwest(SERVICE, e))?
            .json::<T>()
            .await
            .map_err(|e| Error::from_reqwest(SERVICE, e))
    }

    async fn find_page(&self, base: &str, title: &str) -> Result<Option<Page>> {
        let request = self.http.get(format!("{base}/wiki/rest/api/content")).query(&[
            ("spaceKey", self.space.as_str()),
            ("title", title),
            ("expand", "version"),
        ]);
        let found: SearchResults = self.send(request).await?;
        Ok(found.results.into_iter().next())
    }

    async fn current_version(&self, base: &str, id: &str) -> Result<u64> {
        let request = self
            .http
            .get(format!("{base}/wiki/rest/api/content/{id}"))
            .query(&[("expand", "version")]);
        let page: Page = self.send(request).await?;
        Ok(page.version.map(|v| v.number).unwrap_or(1))
    }

    fn payload(&self, title: &str, storage: &str) -> Value {
        let mut payload = json!({
            "type": "page",
            "title": title,
            "space": { "key": self.space },
            "body": { "storage": { "value": storage, "representation": "storage" } },
        });
        if let Some(parent) = &self.parent_page_id {
            payload["ancestors"] = json!([{ "id": parent }]);
        }
        payload
    }

    fn page_url(base: &str, page: &Page) -> Option<String> {
        let webui = page.links.as_ref()?.webui.as_deref()?;
        if webui.starts_with("/wiki") || base.ends_with("/wiki") {
            Some(format!("{base}{webui}"))
        } else {
            Some(format!("{base}/wiki{webui}"))
        }
    }
}

#[async_trait]
impl Publisher for ConfluencePublisher {
    fn display_name(&self) -> &'static str {
        "Confluence"
    }

    fn is_configured(&self) -> bool {
        self.credentials.base_url.is_some()
            && self.credentials.user.is_some()
            && self.credentials.api_token.is_some()
    }

    fn required_env(&self) -> &'static [&'static str] {
        &["CONFLUENCE_BASE", "CONFLUENCE_USER", "CONFLUENCE_API_TOKEN"]
    }

    async fn publish(
        &self,
        version: &str,
        document: &str,
        _metadata: &PublishMetadata,
    ) -> Result<PublishReceipt> {
        let base = self.base_url()?;
        let mut title = format!("Release Notes - {version}");
        let storage = markdown_to_storage(document);
        let existing = self.find_page(base, &title).await?;

        let (page, action) = match existing {
            Some(page) if self.update_existing => {
                let revision = self.current_version(base, &page.id).await?;
                debug!(page_id = %page.id, revision, "updating existing page");
                let mut payload = self.payload(&title, &storage);
                payload["id"] = json!(page.id);
                payload["version"] = json!({ "number": revision + 1 });
                let request = self
                    .http
                    .put(format!("{base}/wiki/rest/api/content/{}", page.id))
                    .json(&payload);
                (self.send::<Page>(request).await?, "updated")
            }
            existing => {
                if existing.is_some() {
                    title = format!("{title} ({})", Utc::now().format("%Y%m%d-%H%M%S"));
                    debug!(title = %title, "page exists, creating with a timestamped title");
                }
                let request = self
                    .http
                    .post(format!("{base}/wiki/rest/api/content"))
                    .json(&self.payload(&title, &storage));
                (self.send::<Page>(request).await?, "created")
            }
        };

        info!(page_id = %page.id, action, "confluence page published");
        Ok(PublishReceipt {
            url: Self::page_url(base, &page),
            identifier: Some(page.id.clone()),
            title: Some(title),
            message: Some(format!("Page {action}")),
        })
    }
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(source).ok()).as_ref()
}

fn bold() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&RE, r"\*\*([^*]+)\*\*")
}

fn italic() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&RE, r"\*([^*]+)\*")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn emphasis(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(re) = bold() {
        out = re.replace_all(&out, "<strong>$1</strong>").into_owned();
    }
    if let Some(re) = italic() {
        out = re.replace_all(&out, "<em>$1</em>").into_owned();
    }
    out
}

fn inline(text: &str) -> String {
    let escaped = escape(text);
    let parts: Vec<&str> = escaped.split('`').collect();
    // An unmatched backtick is literal text.
    if parts.len() % 2 == 0 {
        return emphasis(&escaped);
    }
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            if i % 2 == 1 {
                format!("<code>{part}</code>")
            } else {
                emphasis(part)
            }
        })
        .collect()
}

/// Converts the markdown subset the renderers emit into Confluence storage
/// markup: headings, bullet lists, bold, italic, inline code and paragraphs.
pub fn markdown_to_storage(markdown: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_list = false;

    for line in markdown.lines() {
        let trimmed = line.trim();
        let bullet = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "));

        if bullet.is_none() && in_list {
            out.push("</ul>".to_string());
            in_list = false;
        }

        if let Some(item) = bullet {
            if !in_list {
                out.push("<ul>".to_string());
                in_list = true;
            }
            out.push(format!("<li>{}</li>", inline(item)));
        } else if trimmed.is_empty() {
            continue;
        } else if trimmed == "---" {
            out.push("<hr/>".to_string());
        } else if trimmed.starts_with('#') {
            let level = trimmed.chars().take_while(|c| *c == '#').count().min(6);
            let text = trimmed.trim_start_matches('#').trim();
            out.push(format!("<h{level}>{}</h{level}>", inline(text)));
        } else {
            out.push(format!("<p>{}</p>", inline(trimmed)));
        }
    }
    if in_list {
        out.push("</ul>".to_string());
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn publisher(base: &str, update_existing: bool) -> ConfluencePublisher {
        ConfluencePublisher::new(
            ConfluenceCredentials {
                base_url: Some(base.to_string()),
                user: Some("bot@acme.test".into()),
                api_token: Some("t0ken".into()),
            },
            &PublishConfig {
                confluence_space: "RN".into(),
                confluence_parent_page_id: Some("100".into()),
                update_existing,
                timeout_secs: 5,
            },
        )
    }

    #[test]
    fn converts_markdown_subset() {
        let storage = markdown_to_storage(
            "## Bug Fixes\n- **Fixed** crash in `main()`\n- Second\n\nDone *now* & <then>",
        );
        assert_eq!(
            storage,
            "<h2>Bug Fixes</h2>\n<ul>\n<li><strong>Fixed</strong> crash in <code>main()</code></li>\n\
             <li>Second</li>\n</ul>\n<p>Done <em>now</em> &amp; &lt;then&gt;</p>"
        );
    }

    #[test]
    fn code_spans_are_not_emphasised() {
        assert_eq!(
            markdown_to_storage("Use `a*b*c` here"),
            "<p>Use <code>a*b*c</code> here</p>"
        );
    }

    #[tokio::test]
    async fn second_publish_gets_a_distinct_title() {
        let mut server = mockito::Server::new_async().await;
        let empty = server
            .mock("GET", "/wiki/rest/api/content")
            .match_query(Matcher::UrlEncoded("title".into(), "Release Notes - 1.2.0".into()))
            .with_header("content-type", "application/json")
            .with_body(r#"{"results":[]}"#)
            .create_async()
            .await;
        let created = server
            .mock("POST", "/wiki/rest/api/content")
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .match_body(Matcher::PartialJson(json!({
                "space": {"key": "RN"},
                "ancestors": [{"id": "100"}],
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"555","_links":{"webui":"/spaces/RN/pages/555"}}"#)
            .expect(2)
            .create_async()
            .await;

        let publisher = publisher(&server.url(), false);
        let first = publisher
            .publish("1.2.0", "## Highlights\n- One", &PublishMetadata::default())
            .await
            .unwrap();
        assert_eq!(first.title.as_deref(), Some("Release Notes - 1.2.0"));
        assert_eq!(
            first.url,
            Some(format!("{}/wiki/spaces/RN/pages/555", server.url()))
        );

        empty.remove_async().await;
        let _found = server
            .mock("GET", "/wiki/rest/api/content")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results":[{"id":"555","version":{"number":1}}]}"#)
            .create_async()
            .await;

        let second = publisher
            .publish("1.2.0", "## Highlights\n- One", &PublishMetadata::default())
            .await
            .unwrap();
        let title = second.title.unwrap();
        assert_ne!(Some(title.clone()), first.title);
        assert!(title.starts_with("Release Notes - 1.2.0 ("));
        created.assert_async().await;
    }

    #[tokio::test]
    async fn update_bumps_revision() {
        let mut server = mockito::Server::new_async().await;
        let _search = server
            .mock("GET", "/wiki/rest/api/content")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results":[{"id":"77","version":{"number":4}}]}"#)
            .create_async()
            .await;
        let _current = server
            .mock("GET", "/wiki/rest/api/content/77")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"77","version":{"number":4}}"#)
            .create_async()
            .await;
        let updated = server
            .mock("PUT", "/wiki/rest/api/content/77")
            .match_body(Matcher::PartialJson(json!({
                "title": "Release Notes - 2.0.0",
                "version": {"number": 5},
            })))
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"77","_links":{"webui":"/wiki/spaces/RN/pages/77"}}"#)
            .create_async()
            .await;

        let receipt = publisher(&server.url(), true)
            .publish("2.0.0", "# Notes", &PublishMetadata::default())
            .await
            .unwrap();

        updated.assert_async().await;
        assert_eq!(receipt.identifier.as_deref(), Some("77"));
        assert_eq!(receipt.message.as_deref(), Some("Page updated"));
        assert_eq!(receipt.url, Some(format!("{}/wiki/spaces/RN/pages/77", server.url())));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _search = server
            .mock("GET", "/wiki/rest/api/content")
            .match_query(Matcher::Any)
            .with_status(500)
            .create_async()
            .await;
        let err = publisher(&server.url(), false)
            .publish("1.0.0", "doc", &PublishMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_transient_error");
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let publisher = ConfluencePublisher::new(ConfluenceCredentials::default(), &PublishConfig::default());
        assert!(!publisher.is_configured());
        let err = publisher
            .publish("1.0.0", "doc", &PublishMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }
}
