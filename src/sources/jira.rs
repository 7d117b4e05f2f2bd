use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{IssueQuery, IssueSource};
use crate::config::JiraCredentials;
use crate::error::{Error, Result};
use crate::model::{Issue, Origin};

const SERVICE: &str = "jira";
const PAGE_SIZE: usize = 100;
const FIELDS: &str = "summary,description,status,assignee,created,updated,resolutiondate,labels";

/// Issues from a Jira Cloud project, searched with JQL.
pub struct JiraSource {
    http: reqwest::Client,
    credentials: JiraCredentials,
    status: String,
    max_records: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPage {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    issues: Vec<JiraIssue>,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    #[serde(default)]
    fields: Fields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Fields {
    summary: String,
    description: Option<Value>,
    status: Option<Named>,
    assignee: Option<Assignee>,
    created: Option<String>,
    updated: Option<String>,
    resolutiondate: Option<String>,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Assignee {
    display_name: String,
}

impl JiraSource {
    pub fn new(credentials: JiraCredentials, status: impl Into<String>, max_records: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            status: status.into(),
            max_records,
        }
    }

    fn jql(&self, project_key: &str, since: Option<DateTime<Utc>>) -> String {
        let mut parts = vec![format!("project = \"{project_key}\"")];
        if !self.status.is_empty() {
            parts.push(format!("status = \"{}\"", self.status));
        }
        if let Some(since) = since {
            parts.push(format!("updated >= \"{}\"", since.format("%Y-%m-%d")));
        }
        parts.join(" AND ")
    }

    async fn search_page(
        &self,
        base_url: &str,
        jql: &str,
        start_at: usize,
        max_results: usize,
    ) -> Result<SearchPage> {
        let (Some(user), Some(token)) = (&self.credentials.username, &self.credentials.api_token) else {
            return Err(Error::configuration("JIRA_USERNAME and JIRA_API_TOKEN are required"));
        };
        let response = self
            .http
            .get(format!("{}/rest/api/3/search", base_url.trim_end_matches('/')))
            .basic_auth(user, Some(token))
            .header("Accept", "application/json")
            .query(&[
                ("jql", jql.to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", max_results.to_string()),
                ("fields", FIELDS.to_string()),
            ])
            .send()
            .await
            .map_err(|e| Error::from_reqwest(SERVICE, e))?
            .error_for_status()
            .map_err(|e| Error::from_reqwest(SERVICE, e))?;

        response
            .json::<SearchPage>()
            .await
            .map_err(|e| Error::from_reqwest(SERVICE, e))
    }

    fn to_issue(&self, base_url: &str, raw: JiraIssue) -> Issue {
        let fields = raw.fields;
        Issue {
            url: Some(format!("{}/browse/{}", base_url.trim_end_matches('/'), raw.key)),
            id: raw.key,
            title: fields.summary,
            body: fields.description.as_ref().map(flatten_description).unwrap_or_default(),
            state: fields.status.map(|s| s.name).unwrap_or_default(),
            labels: fields.labels.into_iter().collect(),
            assignee: fields.assignee.map(|a| a.display_name),
            created_at: fields.created.as_deref().and_then(parse_jira_date),
            updated_at: fields.updated.as_deref().and_then(parse_jira_date),
            closed_at: fields.resolutiondate.as_deref().and_then(parse_jira_date),
            source: Origin::Jira,
        }
    }
}

#[async_trait]
impl IssueSource for JiraSource {
    fn is_configured(&self) -> bool {
        self.credentials.base_url.is_some()
            && self.credentials.username.is_some()
            && self.credentials.api_token.is_some()
    }

    async fn fetch_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>> {
        let base_url = self
            .credentials
            .base_url
            .as_deref()
            .ok_or_else(|| Error::configuration("JIRA_BASE_URL is not set"))?;
        let project_key = query
            .project_key
            .as_deref()
            .or(self.credentials.project_key.as_deref())
            .ok_or_else(|| Error::configuration("no Jira project key given"))?;

        let jql = self.jql(project_key, query.since);
        debug!(jql = %jql, "searching jira");

        let mut issues = Vec::new();
        loop {
            let remaining = self.max_records.saturating_sub(issues.len());
            if remaining == 0 {
                debug!(max_records = self.max_records, "record cap reached, stopping pagination");
                break;
            }
            let page = self
                .search_page(base_url, &jql, issues.len(), remaining.min(PAGE_SIZE))
                .await?;
            let fetched = page.issues.len();
            issues.extend(page.issues.into_iter().map(|raw| self.to_issue(base_url, raw)));
            if fetched == 0 || issues.len() >= page.total {
                break;
            }
        }
        Ok(issues)
    }
}

fn parse_jira_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Plain text from either a legacy string description or an Atlassian
/// Document Format tree.
fn flatten_description(value: &Value) -> String {
    fn walk(node: &Value, out: &mut String) {
        match node {
            Value::String(text) => out.push_str(text),
            Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
            Value::Object(map) => {
                let kind = map.get("type").and_then(Value::as_str).unwrap_or_default();
                if kind == "hardBreak" {
                    out.push('\n');
                }
                if let Some(Value::String(text)) = map.get("text") {
                    out.push_str(text);
                }
                if let Some(content) = map.get("content") {
                    walk(content, out);
                }
                let block = matches!(
                    kind,
                    "paragraph" | "heading" | "listItem" | "codeBlock" | "blockquote"
                );
                if block && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }

    let mut out = String::new();
    walk(value, &mut out);
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;
    use serde_json::json;

    fn credentials(base_url: &str) -> JiraCredentials {
        JiraCredentials {
            base_url: Some(base_url.to_string()),
            username: Some("bot@example.com".into()),
            api_token: Some("secret".into()),
            project_key: Some("WID".into()),
        }
    }

    #[test]
    fn jql_includes_status_and_since() {
        let source = JiraSource::new(JiraCredentials::default(), "Done", 10);
        let since = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(
            source.jql("WID", Some(since)),
            r#"project = "WID" AND status = "Done" AND updated >= "2024-03-01""#
        );
    }

    #[test]
    fn flattens_document_format() {
        let adf = json!({
            "type": "doc",
            "content": [
                {"type": "paragraph", "content": [{"type": "text", "text": "Crash when "}, {"type": "text", "text": "saving."}]},
                {"type": "paragraph", "content": [{"type": "text", "text": "Steps follow."}]}
            ]
        });
        assert_eq!(flatten_description(&adf), "Crash when saving.\nSteps follow.");
        assert_eq!(flatten_description(&json!("plain")), "plain");
    }

    #[test]
    fn parses_jira_timestamps() {
        assert_eq!(
            parse_jira_date("2024-01-15T10:30:00.000+0000"),
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap())
        );
        assert_eq!(parse_jira_date("yesterday"), None);
    }

    #[tokio::test]
    async fn pages_until_total() {
        let mut server = mockito::Server::new_async().await;
        let issue = |key: &str, resolved: Option<&str>| {
            json!({
                "key": key,
                "fields": {
                    "summary": format!("Summary {key}"),
                    "status": {"name": "Done"},
                    "labels": ["backend"],
                    "assignee": {"displayName": "Grace"},
                    "updated": "2024-02-01T00:00:00.000+0000",
                    "resolutiondate": resolved
                }
            })
        };
        let _first = server
            .mock("GET", "/rest/api/3/search")
            .match_query(Matcher::UrlEncoded("startAt".into(), "0".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"total": 2, "issues": [issue("WID-1", Some("2024-02-02T09:00:00.000+0000"))]}).to_string())
            .create_async()
            .await;
        let _second = server
            .mock("GET", "/rest/api/3/search")
            .match_query(Matcher::UrlEncoded("startAt".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"total": 2, "issues": [issue("WID-2", None)]}).to_string())
            .create_async()
            .await;

        let source = JiraSource::new(credentials(&server.url()), "Done", 50);
        let issues = source.fetch_issues(&IssueQuery::default()).await.unwrap();

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].id, "WID-1");
        assert_eq!(issues[0].assignee.as_deref(), Some("Grace"));
        assert_eq!(issues[0].url, Some(format!("{}/browse/WID-1", server.url())));
        assert!(issues[0].closed_at.is_some());
        assert_eq!(issues[1].closed_at, None);
        assert_eq!(issues[1].source, Origin::Jira);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/rest/api/3/search")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;
        let source = JiraSource::new(credentials(&server.url()), "Done", 50);
        let err = source.fetch_issues(&IssueQuery::default()).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_auth_error");
    }

    #[tokio::test]
    async fn missing_project_key_is_configuration_error() {
        let mut creds = credentials("http://127.0.0.1:1");
        creds.project_key = None;
        let err = JiraSource::new(creds, "Done", 50)
            .fetch_issues(&IssueQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "configuration_error");
    }
}
