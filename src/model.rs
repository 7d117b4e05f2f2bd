//! Normalized records every source adapter produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// System a record was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Github,
    Jira,
    Json,
    Changelog,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Github => "github",
            Origin::Jira => "jira",
            Origin::Json => "json",
            Origin::Changelog => "changelog",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub full_hash: String,
    pub author: String,
    pub subject: String,
    pub body: String,
    pub authored_at: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    pub url: Option<String>,
    pub author_login: Option<String>,
}

impl Commit {
    /// Splits a raw message into subject (first line) and trimmed body.
    pub fn split_message(message: &str) -> (String, String) {
        let mut parts = message.splitn(2, '\n');
        let subject = parts.next().unwrap_or("").trim_end_matches('\r').trim().to_string();
        let body = parts.next().unwrap_or("").trim().to_string();
        (subject, body)
    }

    pub fn short_hash(full: &str) -> String {
        full.chars().take(7).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Numeric id or tracker key such as `PROJ-12`.
    pub id: String,
    pub title: String,
    pub body: String,
    pub state: String,
    pub labels: BTreeSet<String>,
    pub assignee: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub source: Origin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub name: String,
    pub body: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: Origin,
    pub url: Option<String>,
    pub prerelease: bool,
    pub draft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSummary {
    pub commits_count: usize,
    pub issues_count: usize,
    pub previous_releases_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionMetadata {
    pub repo: Option<String>,
    /// Data kind (`commits`, `issues`, `releases`) to the source that served it.
    pub sources: BTreeMap<String, String>,
    pub ingested_at: DateTime<Utc>,
}

/// Everything one generation request fetched. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub commits: Vec<Commit>,
    pub issues: Vec<Issue>,
    pub previous_releases: Vec<Release>,
    pub metadata: IngestionMetadata,
}

impl IngestionResult {
    pub fn summary(&self) -> DataSummary {
        DataSummary {
            commits_count: self.commits.len(),
            issues_count: self.issues.len(),
            previous_releases_count: self.previous_releases.len(),
        }
    }
}
