use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

use super::{ReleaseQuery, ReleaseSource};
use crate::error::{Error, Result};
use crate::model::{Origin, Release};

const PREFIX: &str = "release_";
const SUFFIX: &str = ".md";

/// The `<version>` part of `release_<version>.md`: trimmed, with path
/// separators replaced so a branch-style version stays one file name.
pub fn file_version(version: &str) -> String {
    version.trim().replace(['/', '\\'], "_")
}

/// Previously generated documents saved as `release_<version>.md`.
pub struct LocalReleaseSource {
    dir: PathBuf,
}

impl LocalReleaseSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn version_of(path: &Path) -> Option<String> {
        let name = path.file_name()?.to_str()?;
        let version = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
        (!version.is_empty()).then(|| version.to_string())
    }

    async fn candidates(&self) -> Result<Vec<(SystemTime, PathBuf, String)>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "no releases directory");
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::from_io(e)),
        };

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(Error::from_io)? {
            let path = entry.path();
            let Some(version) = Self::version_of(&path) else {
                continue;
            };
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(Error::from_io)?;
            found.push((modified, path, version));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found)
    }
}

#[async_trait]
impl ReleaseSource for LocalReleaseSource {
    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_releases(&self, query: &ReleaseQuery) -> Result<Vec<Release>> {
        let current = query.current_version.as_deref().map(file_version);
        let mut releases = Vec::new();
        for (modified, path, version) in self.candidates().await? {
            if releases.len() >= query.count {
                break;
            }
            if current.as_deref() == Some(version.as_str()) {
                continue;
            }
            let body = match fs::read_to_string(&path).await {
                Ok(body) => body,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable release document skipped");
                    continue;
                }
            };
            let name = body
                .lines()
                .next()
                .map(|line| line.trim_start_matches('#').trim().to_string())
                .filter(|line| !line.is_empty())
                .unwrap_or_else(|| version.clone());

            releases.push(Release {
                version,
                name,
                body,
                published_at: Some(modified.into()),
                source: Origin::Local,
                url: Some(path.display().to_string()),
                prerelease: false,
                draft: false,
            });
        }
        Ok(releases)
    }
}
