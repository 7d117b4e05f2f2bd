use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::{debug, warn};

use super::{parse_date, IssueQuery, IssueSource};
use crate::error::{Error, Result};
use crate::model::{Issue, Origin};

/// Issues uploaded as a JSON document, either a bare array or `{"issues": [...]}`.
#[derive(Debug, Default)]
pub struct JsonFileSource;

#[async_trait]
impl IssueSource for JsonFileSource {
    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>> {
        let path = query
            .json_file
            .as_deref()
            .ok_or_else(|| Error::validation("the json issue source needs a file path"))?;
        let raw = tokio::fs::read_to_string(path).await.map_err(Error::from_io)?;
        let issues = parse_issues(&raw)?;
        debug!(path = %path.display(), count = issues.len(), "loaded issues from file");
        Ok(issues)
    }
}

pub fn parse_issues(raw: &str) -> Result<Vec<Issue>> {
    let document: Value = serde_json::from_str(raw)
        .map_err(|e| Error::validation(format!("issues file is not valid JSON: {e}")))?;

    let entries = match document {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("issues") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(Error::validation(
                    "issues file must be an array or an object with an \"issues\" array",
                ))
            }
        },
        _ => return Err(Error::validation("issues file must hold an array of issues")),
    };

    Ok(entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let issue = to_issue(entry);
            if issue.is_none() {
                warn!(index, "issue entry without an identifier skipped");
            }
            issue
        })
        .collect())
}

fn text(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match entry.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn to_issue(entry: &Value) -> Option<Issue> {
    let id = text(entry, &["id", "number", "key"])?;
    let labels: BTreeSet<String> = entry
        .get("labels")
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|label| match label {
                    Value::String(name) => Some(name.clone()),
                    other => other.get("name").and_then(Value::as_str).map(str::to_string),
                })
                .collect()
        })
        .unwrap_or_default();
    let date = |key: &str| text(entry, &[key]).and_then(|raw| parse_date(&raw).ok());

    Some(Issue {
        id,
        title: text(entry, &["title", "summary"]).unwrap_or_default(),
        body: text(entry, &["body", "description"]).unwrap_or_default(),
        state: text(entry, &["state", "status"]).unwrap_or_default(),
        labels,
        assignee: text(entry, &["assignee"]),
        created_at: date("created_at"),
        updated_at: date("updated_at"),
        closed_at: date("closed_at"),
        url: text(entry, &["url", "html_url"]),
        source: Origin::Json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn accepts_wrapped_object_and_skips_entries_without_id() {
        let issues = parse_issues(
            r#"{"issues": [
                {"id": 12, "title": "Crash on save", "labels": ["bug", {"name": "p1"}],
                 "closed_at": "2024-02-01T00:00:00Z"},
                {"title": "no id here"},
                {"key": "OPS-3", "summary": "Rotate keys", "status": "Done"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].id, "12");
        assert_eq!(
            issues[0].labels.iter().cloned().collect::<Vec<_>>(),
            vec!["bug".to_string(), "p1".to_string()]
        );
        assert!(issues[0].closed_at.is_some());
        assert_eq!(issues[1].id, "OPS-3");
        assert_eq!(issues[1].title, "Rotate keys");
        assert_eq!(issues[1].state, "Done");
        assert!(issues.iter().all(|i| i.source == Origin::Json));
    }

    #[test]
    fn accepts_bare_array() {
        let issues = parse_issues(r#"[{"id": "A-1", "title": "One"}]"#).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].body, "");
    }

    #[test]
    fn rejects_other_shapes() {
        assert_eq!(parse_issues(r#"{"items": []}"#).unwrap_err().kind(), "validation_error");
        assert_eq!(parse_issues("not json").unwrap_err().kind(), "validation_error");
    }

    #[tokio::test]
    async fn reads_the_file_named_in_the_query() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"[{{"id": 1, "title": "From disk"}}]"#).unwrap();
        let query = IssueQuery {
            json_file: Some(file.path().to_path_buf()),
            ..IssueQuery::default()
        };
        let issues = JsonFileSource.fetch_issues(&query).await.unwrap();
        assert_eq!(issues[0].title, "From disk");
    }

    #[tokio::test]
    async fn missing_path_is_validation_error() {
        let err = JsonFileSource
            .fetch_issues(&IssueQuery::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}
