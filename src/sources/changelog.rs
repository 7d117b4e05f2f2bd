use async_trait::async_trait;
use regex::Regex;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::debug;

use super::{parse_date, ReleaseQuery, ReleaseSource};
use crate::error::{Error, Result};
use crate::model::{Origin, Release};

/// Previous releases read from a Keep a Changelog style file.
pub struct ChangelogSource {
    path: PathBuf,
}

fn heading() -> Option<&'static Regex> {
    static HEADING: OnceLock<Option<Regex>> = OnceLock::new();
    HEADING
        .get_or_init(|| Regex::new(r"^##\s*\[([^\]]+)\](?:\s*-\s*(\d{4}-\d{2}-\d{2}))?").ok())
        .as_ref()
}

impl ChangelogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Splits changelog text into releases in file order.
pub fn parse_changelog(content: &str) -> Vec<Release> {
    let mut releases: Vec<Release> = Vec::new();
    for line in content.lines() {
        if let Some(caps) = heading().and_then(|re| re.captures(line)) {
            releases.push(Release {
                version: caps[1].trim().to_string(),
                name: line.trim_start_matches('#').trim().to_string(),
                body: String::new(),
                published_at: caps.get(2).and_then(|d| parse_date(d.as_str()).ok()),
                source: Origin::Changelog,
                url: None,
                prerelease: false,
                draft: false,
            });
        } else if let Some(current) = releases.last_mut() {
            current.body.push_str(line);
            current.body.push('\n');
        }
    }
    for release in &mut releases {
        release.body = release.body.trim().to_string();
    }
    releases
}

#[async_trait]
impl ReleaseSource for ChangelogSource {
    fn is_configured(&self) -> bool {
        true
    }

    async fn fetch_releases(&self, query: &ReleaseQuery) -> Result<Vec<Release>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no changelog file");
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::from_io(e)),
        };

        Ok(parse_changelog(&content)
            .into_iter()
            .filter(|r| r.version != "Unreleased")
            .filter(|r| query.current_version.as_deref() != Some(r.version.as_str()))
            .take(query.count)
            .collect())
    }
}
