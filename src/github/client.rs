use chrono::{DateTime, Utc};
use octocrab::{FromResponse, Octocrab, Page};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::{CommitInfo, Comparison, IssueInfo, Milestone, Release, ReleasePayload};
use crate::error::{Error, Result};

const SERVICE: &str = "github";
const PER_PAGE: usize = 100;

/// Octocrab wrapper bound to one `owner/name` repository.
pub struct GitHubClient {
    client: Octocrab,
    owner: String,
    repo: String,
    max_records: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct CommitFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueFilter {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub milestone: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    pub sort: String,
    pub direction: String,
}

impl Default for IssueFilter {
    fn default() -> Self {
        Self {
            state: "closed".to_string(),
            milestone: None,
            labels: None,
            since: None,
            sort: "updated".to_string(),
            direction: "desc".to_string(),
        }
    }
}

#[derive(Serialize)]
struct Paged<'a, P: Serialize> {
    per_page: usize,
    #[serde(flatten)]
    filter: &'a P,
}

#[derive(Debug, Clone, Copy)]
enum Verb {
    Get,
    Post,
    Patch,
}

impl GitHubClient {
    pub fn new(token: &str, repository: &str, max_records: usize) -> Result<Self> {
        Self::build(token, repository, None, max_records)
    }

    /// Points the client at another API root (GitHub Enterprise, test servers).
    pub fn with_base_uri(
        token: &str,
        repository: &str,
        base_uri: &str,
        max_records: usize,
    ) -> Result<Self> {
        Self::build(token, repository, Some(base_uri), max_records)
    }

    fn build(
        token: &str,
        repository: &str,
        base_uri: Option<&str>,
        max_records: usize,
    ) -> Result<Self> {
        let (owner, repo) = split_repository(repository)?;
        let mut builder = Octocrab::builder().personal_token(token.to_string());
        if let Some(uri) = base_uri {
            builder = builder.base_uri(uri.to_string())?;
        }
        let client = builder.build()?;
        Ok(Self {
            client,
            owner,
            repo,
            max_records,
        })
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn route(&self, tail: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner, self.repo, tail)
    }

    /// Sends one request and classifies a non-success status before decoding.
    async fn call<R, B>(&self, verb: Verb, uri: String, body: Option<&B>) -> Result<R>
    where
        R: FromResponse,
        B: Serialize + ?Sized + Sync,
    {
        let response = match verb {
            Verb::Get => self.client._get(uri).await?,
            Verb::Post => self.client._post(uri, body).await?,
            Verb::Patch => self.client._patch(uri, body).await?,
        };
        let status = response.status();
        if !status.is_success() {
            let text = self.client.body_to_string(response).await.unwrap_or_default();
            let reason = status.canonical_reason().unwrap_or("request failed");
            return Err(Error::from_status(
                SERVICE,
                status.as_u16(),
                error_message(&text, reason),
            ));
        }
        Ok(R::from_response(response).await?)
    }

    async fn get<R: FromResponse>(&self, route: String) -> Result<R> {
        self.call(Verb::Get, route, None::<&()>).await
    }

    /// Follows `next` links, keeping items that pass `keep`, until `limit`
    /// are held or `max_records` items have been scanned.
    async fn collect_pages<T, P, F>(
        &self,
        route: &str,
        filter: &P,
        limit: usize,
        keep: F,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        P: Serialize,
        F: Fn(&T) -> bool,
    {
        let params = Paged {
            per_page: self.max_records.clamp(1, PER_PAGE),
            filter,
        };
        let mut page: Page<T> = self.get(with_query(route, &params)?).await?;
        let mut items = Vec::new();
        let mut scanned = 0;
        loop {
            for item in page.take_items() {
                scanned += 1;
                if keep(&item) {
                    items.push(item);
                }
            }
            if items.len() >= limit {
                items.truncate(limit);
                break;
            }
            if scanned >= self.max_records {
                debug!(route, scanned, "record cap reached, stopping pagination");
                break;
            }
            match page.next.take() {
                Some(next) => page = self.get(next.to_string()).await?,
                None => break,
            }
        }
        Ok(items)
    }

    pub async fn list_commits(&self, filter: &CommitFilter) -> Result<Vec<CommitInfo>> {
        self.collect_pages(&self.route("commits"), filter, self.max_records, |_| true)
            .await
    }

    /// Resolves a tag, branch or sha to a full commit sha.
    pub async fn resolve_ref(&self, reference: &str) -> Result<String> {
        let commit: CommitInfo = self.get(self.route(&format!("commits/{reference}"))).await?;
        Ok(commit.sha)
    }

    pub async fn compare(&self, base: &str, head: &str) -> Result<Vec<CommitInfo>> {
        let comparison: Comparison = self
            .get(self.route(&format!("compare/{base}...{head}")))
            .await?;
        let mut commits = comparison.commits;
        commits.truncate(self.max_records);
        Ok(commits)
    }

    pub async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<IssueInfo>> {
        self.collect_pages(&self.route("issues"), filter, self.max_records, |_| true)
            .await
    }

    /// Finds a milestone number by title, or accepts a numeric identifier as is.
    pub async fn find_milestone(&self, title_or_number: &str) -> Result<Option<u64>> {
        #[derive(Serialize)]
        struct State {
            state: &'static str,
        }
        let milestones: Vec<Milestone> = self
            .collect_pages(
                &self.route("milestones"),
                &State { state: "all" },
                self.max_records,
                |_| true,
            )
            .await?;
        let wanted = title_or_number.parse::<u64>().ok();
        Ok(milestones
            .into_iter()
            .find(|m| m.title == title_or_number || Some(m.number) == wanted)
            .map(|m| m.number))
    }

    /// Newest first; pages past releases rejected by `keep` until `limit` are held.
    pub async fn list_releases<F>(&self, limit: usize, keep: F) -> Result<Vec<Release>>
    where
        F: Fn(&Release) -> bool,
    {
        #[derive(Serialize)]
        struct NoFilter {}
        self.collect_pages(&self.route("releases"), &NoFilter {}, limit, keep)
            .await
    }

    pub async fn get_release(&self, tag: &str) -> Result<Option<Release>> {
        match self.get(self.route(&format!("releases/tags/{tag}"))).await {
            Ok(release) => Ok(Some(release)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn create_release(&self, payload: &ReleasePayload) -> Result<Release> {
        self.call(Verb::Post, self.route("releases"), Some(payload))
            .await
    }

    pub async fn update_release(&self, id: u64, payload: &ReleasePayload) -> Result<Release> {
        self.call(Verb::Patch, self.route(&format!("releases/{id}")), Some(payload))
            .await
    }
}

fn with_query<P: Serialize + ?Sized>(route: &str, params: &P) -> Result<String> {
    let query = serde_urlencoded::to_string(params)
        .map_err(|e| Error::validation(format!("cannot encode query for {route}: {e}")))?;
    Ok(if query.is_empty() {
        route.to_string()
    } else {
        format!("{route}?{query}")
    })
}

/// GitHub error bodies carry a `message`; anything else is passed through.
fn error_message(body: &str, reason: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    match parsed.as_ref().and_then(|v| v["message"].as_str()) {
        Some(message) => message.to_string(),
        None if !body.trim().is_empty() => body.trim().to_string(),
        None => reason.to_string(),
    }
}

fn split_repository(repository: &str) -> Result<(String, String)> {
    match repository.trim().split_once('/') {
        Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => Err(Error::validation(format!(
            "repository must look like owner/name, got {repository:?}"
        ))),
    }
}
