//! Ingestion coordinator: picks a source adapter per data kind, applies the
//! fallback policy and assembles one [`IngestionResult`].
//!
//! `auto` commit and release selection falls back to local data when the
//! forge is unusable. An explicitly named source never falls back.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, Credentials};
use crate::error::{Error, Result};
use crate::model::{Commit, IngestionMetadata, IngestionResult, Issue, Release};
use crate::sources::changelog::ChangelogSource;
use crate::sources::git_log::GitLogSource;
use crate::sources::github::GithubSource;
use crate::sources::jira::JiraSource;
use crate::sources::json_file::JsonFileSource;
use crate::sources::local_releases::LocalReleaseSource;
use crate::sources::{
    CommitQuery, CommitSource, IssueQuery, IssueSource, ReleaseQuery, ReleaseSource, SourceKind,
    SourceSelector,
};

/// Records returned by one ingestion call, tagged with the source that served them.
#[derive(Debug, Clone, PartialEq)]
pub struct Ingested<T> {
    pub source: SourceKind,
    pub records: Vec<T>,
}

/// One generation's worth of ingestion parameters.
///
/// `issue_source` and `release_source` are optional; `None` skips that kind.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub repo: Option<String>,
    pub commit_source: SourceSelector,
    pub issue_source: Option<SourceSelector>,
    pub release_source: Option<SourceSelector>,
    pub commits: CommitQuery,
    pub issues: IssueQuery,
    pub releases: ReleaseQuery,
}

pub struct IngestionCoordinator {
    commit_sources: HashMap<SourceKind, Arc<dyn CommitSource>>,
    issue_sources: HashMap<SourceKind, Arc<dyn IssueSource>>,
    release_sources: HashMap<SourceKind, Arc<dyn ReleaseSource>>,
    timeout: Duration,
}

impl IngestionCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            commit_sources: HashMap::new(),
            issue_sources: HashMap::new(),
            release_sources: HashMap::new(),
            timeout,
        }
    }

    /// Registers every built-in adapter.
    pub fn from_config(config: &Config, credentials: &Credentials) -> Self {
        let ingestion = &config.ingestion;
        let max = ingestion.max_records;
        let github = Arc::new(GithubSource::new(
            credentials.github_token.clone(),
            config.repo.clone(),
            max,
        ));

        Self::new(Duration::from_secs(ingestion.http_timeout_secs))
            .with_commit_source(SourceKind::Github, github.clone())
            .with_commit_source(
                SourceKind::Local,
                Arc::new(GitLogSource::new(&config.local_repo_path, max)),
            )
            .with_issue_source(SourceKind::Github, github.clone())
            .with_issue_source(
                SourceKind::Jira,
                Arc::new(JiraSource::new(
                    credentials.jira.clone(),
                    ingestion.jira_status.clone(),
                    max,
                )),
            )
            .with_issue_source(SourceKind::Json, Arc::new(JsonFileSource))
            .with_release_source(SourceKind::Github, github)
            .with_release_source(
                SourceKind::Local,
                Arc::new(LocalReleaseSource::new(&ingestion.releases_dir)),
            )
            .with_release_source(
                SourceKind::Changelog,
                Arc::new(ChangelogSource::new(&ingestion.changelog_path)),
            )
    }

    pub fn with_commit_source(mut self, kind: SourceKind, source: Arc<dyn CommitSource>) -> Self {
        self.commit_sources.insert(kind, source);
        self
    }

    pub fn with_issue_source(mut self, kind: SourceKind, source: Arc<dyn IssueSource>) -> Self {
        self.issue_sources.insert(kind, source);
        self
    }

    pub fn with_release_source(mut self, kind: SourceKind, source: Arc<dyn ReleaseSource>) -> Self {
        self.release_sources.insert(kind, source);
        self
    }

    async fn bounded<T, F>(&self, kind: SourceKind, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::timeout(kind.as_str(), self.timeout))?
    }

    fn lookup<'a, S: ?Sized>(
        sources: &'a HashMap<SourceKind, Arc<S>>,
        kind: SourceKind,
        data: &str,
    ) -> Result<&'a Arc<S>> {
        sources
            .get(&kind)
            .ok_or_else(|| Error::validation(format!("source {kind} cannot provide {data}")))
    }

    pub async fn ingest_commits(
        &self,
        selector: SourceSelector,
        query: &CommitQuery,
    ) -> Result<Ingested<Commit>> {
        let kind = match selector {
            SourceSelector::Named(kind) => kind,
            SourceSelector::Auto => {
                let forge = self
                    .commit_sources
                    .get(&SourceKind::Github)
                    .filter(|s| s.is_configured());
                if let Some(forge) = forge {
                    match self.bounded(SourceKind::Github, forge.fetch_commits(query)).await {
                        Ok(records) => {
                            return Ok(Ingested {
                                source: SourceKind::Github,
                                records,
                            })
                        }
                        Err(e) => {
                            warn!(error = %e, "forge commits unavailable, reading local history")
                        }
                    }
                }
                SourceKind::Local
            }
        };

        let source = Self::lookup(&self.commit_sources, kind, "commits")?;
        let records = self.bounded(kind, source.fetch_commits(query)).await?;
        debug!(source = %kind, count = records.len(), "commits ingested");
        Ok(Ingested {
            source: kind,
            records,
        })
    }

    pub async fn ingest_issues(
        &self,
        selector: SourceSelector,
        query: &IssueQuery,
    ) -> Result<Ingested<Issue>> {
        let SourceSelector::Named(kind) = selector else {
            return Err(Error::configuration(
                "issue ingestion needs an explicit source (github, jira or json)",
            ));
        };
        let source = Self::lookup(&self.issue_sources, kind, "issues")?;
        let records = self.bounded(kind, source.fetch_issues(query)).await?;
        debug!(source = %kind, count = records.len(), "issues ingested");
        Ok(Ingested {
            source: kind,
            records,
        })
    }

    pub async fn ingest_previous_releases(
        &self,
        selector: SourceSelector,
        query: &ReleaseQuery,
    ) -> Result<Ingested<Release>> {
        let kind = match selector {
            SourceSelector::Named(kind) => kind,
            SourceSelector::Auto => {
                let forge = self
                    .release_sources
                    .get(&SourceKind::Github)
                    .filter(|s| s.is_configured());
                if let Some(forge) = forge {
                    match self.bounded(SourceKind::Github, forge.fetch_releases(query)).await {
                        Ok(records) => {
                            return Ok(Ingested {
                                source: SourceKind::Github,
                                records,
                            })
                        }
                        Err(e) => {
                            warn!(error = %e, "forge releases unavailable, using saved documents")
                        }
                    }
                }
                SourceKind::Local
            }
        };

        let source = Self::lookup(&self.release_sources, kind, "releases")?;
        let records = self.bounded(kind, source.fetch_releases(query)).await?;
        debug!(source = %kind, count = records.len(), "previous releases ingested");
        Ok(Ingested {
            source: kind,
            records,
        })
    }

    /// Rejects selectors no registered adapter can serve, before any I/O.
    pub fn validate(&self, request: &IngestionRequest) -> Result<()> {
        let commit_kind = match request.commit_source {
            SourceSelector::Named(kind) => kind,
            SourceSelector::Auto => SourceKind::Local,
        };
        Self::lookup(&self.commit_sources, commit_kind, "commits")?;

        match request.issue_source {
            Some(SourceSelector::Named(kind)) => {
                Self::lookup(&self.issue_sources, kind, "issues")?;
            }
            Some(SourceSelector::Auto) => {
                return Err(Error::configuration(
                    "issue ingestion needs an explicit source (github, jira or json)",
                ))
            }
            None => {}
        }

        if let Some(selector) = request.release_source {
            let kind = match selector {
                SourceSelector::Named(kind) => kind,
                SourceSelector::Auto => SourceKind::Local,
            };
            Self::lookup(&self.release_sources, kind, "releases")?;
        }
        Ok(())
    }

    /// Fetches the three kinds concurrently; the first hard error wins.
    pub async fn ingest_all(&self, request: &IngestionRequest) -> Result<IngestionResult> {
        self.validate(request)?;

        let commits = self.ingest_commits(request.commit_source, &request.commits);
        let issues = async {
            match request.issue_source {
                Some(selector) => self.ingest_issues(selector, &request.issues).await.map(Some),
                None => Ok(None),
            }
        };
        let releases = async {
            match request.release_source {
                Some(selector) => self
                    .ingest_previous_releases(selector, &request.releases)
                    .await
                    .map(Some),
                None => Ok(None),
            }
        };

        let (commits, issues, releases) = tokio::try_join!(commits, issues, releases)?;

        let mut sources = BTreeMap::new();
        sources.insert("commits".to_string(), commits.source.to_string());
        sources.insert(
            "issues".to_string(),
            issues.as_ref().map_or("none".to_string(), |i| i.source.to_string()),
        );
        sources.insert(
            "releases".to_string(),
            releases.as_ref().map_or("none".to_string(), |r| r.source.to_string()),
        );

        let result = IngestionResult {
            commits: commits.records,
            issues: issues.map(|i| i.records).unwrap_or_default(),
            previous_releases: releases.map(|r| r.records).unwrap_or_default(),
            metadata: IngestionMetadata {
                repo: request.repo.clone(),
                sources,
                ingested_at: Utc::now(),
            },
        };
        let summary = result.summary();
        info!(
            commits = summary.commits_count,
            issues = summary.issues_count,
            previous_releases = summary.previous_releases_count,
            "ingestion complete"
        );
        Ok(result)
    }
}
