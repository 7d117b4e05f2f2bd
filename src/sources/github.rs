use async_trait::async_trait;
use tracing::{debug, warn};

use super::{CommitQuery, CommitSource, IssueQuery, IssueSource, ReleaseQuery, ReleaseSource};
use crate::error::{Error, Result};
use crate::github::client::{CommitFilter, GitHubClient, IssueFilter};
use crate::github::types::{CommitInfo, IssueInfo, Release as GhRelease};
use crate::model::{Commit, Issue, Origin, Release};

/// Reads commits, issues and releases from the GitHub REST API.
pub struct GithubSource {
    token: Option<String>,
    default_repo: Option<String>,
    base_uri: Option<String>,
    max_records: usize,
}

impl GithubSource {
    pub fn new(token: Option<String>, default_repo: Option<String>, max_records: usize) -> Self {
        Self {
            token,
            default_repo,
            base_uri: None,
            max_records,
        }
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    fn client(&self, repo: Option<&str>) -> Result<GitHubClient> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| Error::configuration("GITHUB_TOKEN is not set"))?;
        let repo = repo
            .or(self.default_repo.as_deref())
            .ok_or_else(|| Error::configuration("no GitHub repository configured"))?;
        match &self.base_uri {
            Some(uri) => GitHubClient::with_base_uri(token, repo, uri, self.max_records),
            None => GitHubClient::new(token, repo, self.max_records),
        }
    }

    async fn commits_between(
        &self,
        client: &GitHubClient,
        from: &str,
        to: &str,
    ) -> Result<Vec<CommitInfo>> {
        client.resolve_ref(from).await?;
        client.resolve_ref(to).await?;
        let mut commits = client.compare(from, to).await?;
        // compare lists oldest first; everything else from this adapter is newest first
        commits.reverse();
        Ok(commits)
    }
}

#[async_trait]
impl CommitSource for GithubSource {
    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn fetch_commits(&self, query: &CommitQuery) -> Result<Vec<Commit>> {
        let client = self.client(query.repo.as_deref())?;

        if let Some(from) = &query.from_tag {
            let to = query
                .to_tag
                .clone()
                .or_else(|| query.branch.clone())
                .unwrap_or_else(|| "HEAD".to_string());
            match self.commits_between(&client, from, &to).await {
                Ok(commits) => return Ok(commits.into_iter().filter_map(to_commit).collect()),
                Err(e) if e.is_not_found() => {
                    warn!(from = %from, to = %to, error = %e, "tag range unresolved, using date range");
                }
                Err(e) => return Err(e),
            }
        }

        let filter = CommitFilter {
            sha: query.branch.clone(),
            since: query.since,
            until: query.until,
        };
        let commits = client.list_commits(&filter).await?;
        debug!(repo = %client.repository(), count = commits.len(), "fetched commits");
        Ok(commits.into_iter().filter_map(to_commit).collect())
    }
}

#[async_trait]
impl IssueSource for GithubSource {
    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn fetch_issues(&self, query: &IssueQuery) -> Result<Vec<Issue>> {
        let client = self.client(query.repo.as_deref())?;

        let milestone = match &query.milestone {
            Some(m) => Some(
                client
                    .find_milestone(m)
                    .await?
                    .ok_or_else(|| Error::not_found("github", format!("milestone {m}")))?,
            ),
            None => None,
        };

        let filter = IssueFilter {
            milestone,
            labels: (!query.labels.is_empty()).then(|| query.labels.join(",")),
            since: query.since,
            ..IssueFilter::default()
        };

        let issues = client
            .list_issues(&filter)
            .await?
            .into_iter()
            .filter(|i| i.pull_request.is_none())
            .filter(|i| match query.since {
                Some(since) => i.closed_at.map_or(false, |closed| closed >= since),
                None => true,
            })
            .map(to_issue)
            .collect::<Vec<_>>();
        debug!(repo = %client.repository(), count = issues.len(), "fetched issues");
        Ok(issues)
    }
}

#[async_trait]
impl ReleaseSource for GithubSource {
    fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    async fn fetch_releases(&self, query: &ReleaseQuery) -> Result<Vec<Release>> {
        if query.count == 0 {
            return Ok(Vec::new());
        }
        let client = self.client(query.repo.as_deref())?;
        let current = query.current_version.as_deref();
        let releases = client
            .list_releases(query.count, |r| {
                !r.draft && current != Some(r.tag_name.as_str())
            })
            .await?;

        Ok(releases.into_iter().map(to_release).collect())
    }
}

fn to_commit(info: CommitInfo) -> Option<Commit> {
    if info.sha.is_empty() {
        return None;
    }
    let authored = info.commit.author.as_ref().and_then(|a| a.date);
    let committed = info.commit.committer.as_ref().and_then(|c| c.date);
    let (authored_at, committed_at) = match (authored, committed) {
        (Some(a), Some(c)) => (a, c),
        (Some(a), None) => (a, a),
        (None, Some(c)) => (c, c),
        (None, None) => {
            warn!(sha = %info.sha, "commit without timestamps skipped");
            return None;
        }
    };
    let (subject, body) = Commit::split_message(&info.commit.message);

    Some(Commit {
        hash: Commit::short_hash(&info.sha),
        full_hash: info.sha,
        author: info
            .commit
            .author
            .map(|a| a.name)
            .filter(|n| !n.is_empty())
            .or_else(|| info.author.as_ref().map(|u| u.login.clone()))
            .unwrap_or_default(),
        subject,
        body,
        authored_at,
        committed_at,
        url: info.html_url,
        author_login: info.author.map(|u| u.login),
    })
}

fn to_issue(info: IssueInfo) -> Issue {
    Issue {
        id: info.number.to_string(),
        title: info.title,
        body: info.body.unwrap_or_default(),
        state: info.state,
        labels: info.labels.into_iter().map(|l| l.name).collect(),
        assignee: info.assignee.map(|u| u.login),
        created_at: info.created_at,
        updated_at: info.updated_at,
        closed_at: info.closed_at,
        url: info.html_url,
        source: Origin::Github,
    }
}

fn to_release(release: GhRelease) -> Release {
    Release {
        name: release
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| release.tag_name.clone()),
        version: release.tag_name,
        body: release.body.unwrap_or_default(),
        published_at: release.published_at.or(release.created_at),
        source: Origin::Github,
        url: release.html_url,
        prerelease: release.prerelease,
        draft: release.draft,
    }
}
