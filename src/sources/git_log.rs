use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit as GitCommit, ErrorCode, Oid, Repository, Sort};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{within, CommitQuery, CommitSource};
use crate::error::{Error, Result};
use crate::model::Commit;

/// Walks the history of a local working copy.
pub struct GitLogSource {
    path: PathBuf,
    max_records: usize,
}

impl GitLogSource {
    pub fn new(path: impl Into<PathBuf>, max_records: usize) -> Self {
        Self {
            path: path.into(),
            max_records,
        }
    }
}

#[async_trait]
impl CommitSource for GitLogSource {
    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_commits(&self, query: &CommitQuery) -> Result<Vec<Commit>> {
        let path = self.path.clone();
        let query = query.clone();
        let max_records = self.max_records;
        tokio::task::spawn_blocking(move || walk(&path, &query, max_records))
            .await
            .map_err(|e| Error::transient("git", e.to_string()))?
    }
}

fn resolve(repo: &Repository, reference: &str) -> Result<Oid> {
    let object = repo.revparse_single(reference).map_err(Error::from_git)?;
    let commit = object.peel_to_commit().map_err(Error::from_git)?;
    Ok(commit.id())
}

fn walk(path: &std::path::Path, query: &CommitQuery, max_records: usize) -> Result<Vec<Commit>> {
    let repo = Repository::discover(path).map_err(Error::from_git)?;

    match repo.head() {
        Err(e) if e.code() == ErrorCode::UnbornBranch => {
            debug!(path = %path.display(), "repository has no commits yet");
            return Ok(Vec::new());
        }
        Err(e) => return Err(Error::from_git(e)),
        Ok(_) => {}
    }

    let mut revwalk = repo.revwalk().map_err(Error::from_git)?;
    revwalk.set_sorting(Sort::TIME).map_err(Error::from_git)?;

    let tip = query.to_tag.as_deref().or(query.branch.as_deref());
    let mut pushed = false;

    if let Some(from) = query.from_tag.as_deref() {
        let to = tip.unwrap_or("HEAD");
        match (resolve(&repo, from), resolve(&repo, to)) {
            (Ok(from_id), Ok(to_id)) => {
                revwalk.push(to_id).map_err(Error::from_git)?;
                revwalk.hide(from_id).map_err(Error::from_git)?;
                pushed = true;
            }
            (from_res, to_res) => {
                let reason = from_res.err().or(to_res.err()).map(|e| e.to_string());
                warn!(from, to, reason = ?reason, "tag range unresolved, using date range");
            }
        }
    }

    if !pushed {
        match tip {
            Some(tip) => revwalk.push(resolve(&repo, tip)?).map_err(Error::from_git)?,
            None => revwalk.push_head().map_err(Error::from_git)?,
        }
    }

    let mut commits = Vec::new();
    for id in revwalk {
        let id = id.map_err(Error::from_git)?;
        let commit = repo.find_commit(id).map_err(Error::from_git)?;
        let Some(record) = to_commit(&commit) else {
            continue;
        };
        if !within(record.committed_at, query.since, query.until) {
            continue;
        }
        commits.push(record);
        if commits.len() >= max_records {
            debug!(max_records, "record cap reached, stopping history walk");
            break;
        }
    }
    Ok(commits)
}

fn timestamp(time: git2::Time) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(time.seconds(), 0).single()
}

fn to_commit(commit: &GitCommit<'_>) -> Option<Commit> {
    let full_hash = commit.id().to_string();
    let author = commit.author();
    let committed_at = timestamp(commit.time())?;
    let authored_at = timestamp(author.when()).unwrap_or(committed_at);
    let (subject, body) = Commit::split_message(&String::from_utf8_lossy(commit.message_bytes()));

    Some(Commit {
        hash: Commit::short_hash(&full_hash),
        full_hash,
        author: author.name().unwrap_or_default().to_string(),
        subject,
        body,
        authored_at,
        committed_at,
        url: None,
        author_login: None,
    })
}
