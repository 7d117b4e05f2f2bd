//! Source adapters.
//!
//! Each adapter reads one origin system and returns records already
//! normalized into the shapes in [`crate::model`]. Adapters are addressed by
//! [`SourceKind`] and implement one capability trait per data kind they can
//! serve.

pub mod changelog;
pub mod git_log;
pub mod github;
pub mod jira;
pub mod json_file;
pub mod local_releases;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::{Commit, Issue, Release};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Local,
    Github,
    Jira,
    Json,
    Changelog,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Local => "local",
            SourceKind::Github => "github",
            SourceKind::Jira => "jira",
            SourceKind::Json => "json",
            SourceKind::Changelog => "changelog",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's choice of source for one data kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceSelector {
    Auto,
    Named(SourceKind),
}

impl FromStr for SourceSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(SourceSelector::Auto),
            "local" => Ok(SourceSelector::Named(SourceKind::Local)),
            "github" => Ok(SourceSelector::Named(SourceKind::Github)),
            "jira" => Ok(SourceSelector::Named(SourceKind::Jira)),
            "json" => Ok(SourceSelector::Named(SourceKind::Json)),
            "changelog" => Ok(SourceSelector::Named(SourceKind::Changelog)),
            other => Err(Error::validation(format!("unknown source: {other}"))),
        }
    }
}

impl fmt::Display for SourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSelector::Auto => f.write_str("auto"),
            SourceSelector::Named(kind) => kind.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitQuery {
    pub repo: Option<String>,
    pub from_tag: Option<String>,
    pub to_tag: Option<String>,
    /// Inclusive lower bound on the commit date.
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IssueQuery {
    pub repo: Option<String>,
    pub milestone: Option<String>,
    pub labels: Vec<String>,
    /// Inclusive lower bound on the close date.
    pub since: Option<DateTime<Utc>>,
    pub project_key: Option<String>,
    pub json_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseQuery {
    pub repo: Option<String>,
    pub count: usize,
    pub current_version: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Whether the credentials this source needs are present.
    fn is_configured(&self) -> bool;

    async fn fetch_commits(&self, query: &CommitQuery) -> Result<Vec<Commit>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait IssueSource: Send + Sync {
    fn is_configured(&self) -> bool;

    async fn fetch_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Newest first, drafts and `current_version` excluded, at most `count`.
    async fn fetch_releases(&self, query: &ReleaseQuery) -> Result<Vec<Release>>;
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| Error::validation(format!("unrecognized date: {raw}")))
}

/// True when `at` lies inside the inclusive `since..=until` window.
pub(crate) fn within(at: DateTime<Utc>, since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> bool {
    since.map_or(true, |s| at >= s) && until.map_or(true, |u| at <= u)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_parse_case_insensitively() {
        assert_eq!("AUTO".parse::<SourceSelector>().unwrap(), SourceSelector::Auto);
        assert_eq!(
            "github".parse::<SourceSelector>().unwrap(),
            SourceSelector::Named(SourceKind::Github)
        );
        let err = "svn".parse::<SourceSelector>().unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn dates_accept_rfc3339_and_plain_days() {
        assert_eq!(
            parse_date("2024-03-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date("2024-03-01T12:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 30, 0).unwrap()
        );
        assert!(parse_date("last tuesday").is_err());
    }

    #[test]
    fn window_is_inclusive() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(within(t, Some(t), Some(t)));
        assert!(!within(t, Some(t + chrono::Duration::seconds(1)), None));
        assert!(within(t, None, None));
    }
}
