use async_trait::async_trait;
use chrono::Utc;
use handlebars::Handlebars;
use serde_json::{json, Value};
use std::collections::BTreeSet;

use super::{RenderMetadata, RenderRequest, RenderedDocument, Renderer};
use crate::aggregator::commit_analyzer::{CommitAnalyzer, CommitType, EnrichedCommit};
use crate::error::{Error, Result};
use crate::model::Issue;

const TEMPLATE_NAME: &str = "release_notes";
const MAX_HIGHLIGHTS: usize = 5;

/// Deterministic rendering with no model behind it.
pub struct TemplateRenderer {
    engine: Handlebars<'static>,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self> {
        Self::with_template(include_str!("../../templates/release_notes.md.hbs"))
    }

    /// Uses caller-supplied handlebars source instead of the built-in layout.
    pub fn with_template(source: &str) -> Result<Self> {
        let mut engine = Handlebars::new();
        engine.register_escape_fn(handlebars::no_escape);
        engine
            .register_template_string(TEMPLATE_NAME, source)
            .map_err(|e| Error::configuration(format!("invalid release notes template: {e}")))?;
        Ok(Self { engine })
    }

    fn context(&self, request: &RenderRequest<'_>) -> Value {
        let data = request.data;
        let enriched = CommitAnalyzer::analyze_commits(&data.commits);
        let grouped = CommitAnalyzer::group_commits_by_type(&enriched);

        let mut highlights: Vec<String> = grouped
            .iter()
            .filter(|(kind, _)| matches!(kind, CommitType::Feature | CommitType::Fix))
            .flat_map(|(_, commits)| commits.iter().map(|c| c.message.clone()))
            .take(MAX_HIGHLIGHTS)
            .collect();
        if highlights.is_empty() {
            highlights = enriched
                .iter()
                .take(MAX_HIGHLIGHTS)
                .map(|c| c.message.clone())
                .collect();
        }

        let breaking: Vec<String> = enriched
            .iter()
            .filter(|c| c.breaking)
            .map(|c| c.message.clone())
            .collect();

        let show_author = request.audience == super::Audience::Developers;
        let groups: Vec<Value> = grouped
            .iter()
            .map(|(kind, commits)| {
                json!({
                    "title": kind.to_string(),
                    "commits": commits.iter().map(|c| commit_entry(c, show_author)).collect::<Vec<_>>(),
                })
            })
            .collect();

        let contributors: BTreeSet<&str> = enriched.iter().map(|c| c.author.as_str()).collect();

        json!({
            "version": request.version,
            "date": Utc::now().format("%Y-%m-%d").to_string(),
            "audience": request.audience.as_str(),
            "highlights": highlights,
            "breaking": breaking,
            "groups": groups,
            "issues": data.issues.iter().map(issue_entry).collect::<Vec<_>>(),
            "stats": {
                "commits": data.commits.len(),
                "issues": data.issues.len(),
                "contributors": contributors.len(),
            },
            "previous": data.previous_releases.first().map(|r| r.version.clone()),
        })
    }
}

fn commit_entry(commit: &EnrichedCommit, show_author: bool) -> Value {
    let message = match commit.scope.as_deref() {
        Some(scope) => format!("**{scope}:** {}", commit.message),
        None => commit.message.clone(),
    };
    json!({
        "message": message,
        "hash": commit.hash,
        "author": show_author.then(|| commit.author.clone()),
    })
}

fn issue_entry(issue: &Issue) -> Value {
    let reference = if issue.id.chars().all(|c| c.is_ascii_digit()) {
        format!("#{}", issue.id)
    } else {
        issue.id.clone()
    };
    json!({ "title": issue.title, "reference": reference })
}

#[async_trait]
impl Renderer for TemplateRenderer {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedDocument> {
        let body = self
            .engine
            .render(TEMPLATE_NAME, &self.context(request))
            .map_err(|e| Error::configuration(format!("release notes template failed: {e}")))?;

        Ok(RenderedDocument::assemble(
            &body,
            RenderMetadata {
                model: request.model.to_string(),
                temperature: request.temperature,
                audience: request.audience,
                prompt_length: 0,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Commit, IngestionMetadata, IngestionResult, Origin, Release};
    use crate::render::Audience;
    use std::collections::BTreeMap;

    fn commit(hash: &str, subject: &str) -> Commit {
        Commit {
            hash: hash.into(),
            full_hash: format!("{hash}ffffff"),
            author: "Ada".into(),
            subject: subject.into(),
            body: String::new(),
            authored_at: Utc::now(),
            committed_at: Utc::now(),
            url: None,
            author_login: None,
        }
    }

    fn data(commits: Vec<Commit>, issues: Vec<Issue>) -> IngestionResult {
        IngestionResult {
            commits,
            issues,
            previous_releases: vec![Release {
                version: "1.1.0".into(),
                name: "1.1.0".into(),
                body: String::new(),
                published_at: None,
                source: Origin::Local,
                url: None,
                prerelease: false,
                draft: false,
            }],
            metadata: IngestionMetadata {
                repo: None,
                sources: BTreeMap::new(),
                ingested_at: Utc::now(),
            },
        }
    }

    async fn render(data: &IngestionResult, audience: Audience) -> RenderedDocument {
        let request = RenderRequest {
            version: "1.2.0",
            data,
            audience,
            sections: vec![],
            model: "template-basic",
            temperature: 0.0,
        };
        TemplateRenderer::new().unwrap().render(&request).await.unwrap()
    }

    #[tokio::test]
    async fn single_fix_is_mentioned_and_grouped() {
        let data = data(vec![commit("abc1234", "Fix crash on startup")], vec![]);
        let doc = render(&data, Audience::Users).await;

        assert!(doc.text.contains("# Release 1.2.0"));
        assert!(doc.text.contains("- Fix crash on startup (`abc1234`)"));
        assert!(doc.sections["bug_fixes"].contains("Fix crash on startup"));
        assert!(doc.sections["highlights"].contains("Fix crash on startup"));
        assert!(!doc.sections.contains_key("issues_addressed"));
        assert!(doc.text.contains("*Generated with AI model: template-basic*"));
    }

    #[tokio::test]
    async fn issues_and_breaking_changes_get_sections() {
        let issue = Issue {
            id: "42".into(),
            title: "Export hangs".into(),
            body: String::new(),
            state: "closed".into(),
            labels: Default::default(),
            assignee: None,
            created_at: None,
            updated_at: None,
            closed_at: None,
            url: None,
            source: Origin::Github,
        };
        let data = data(
            vec![
                commit("1111111", "feat(api)!: remove v1 endpoints"),
                commit("2222222", "chore: bump deps"),
            ],
            vec![issue],
        );
        let doc = render(&data, Audience::Developers).await;

        assert!(doc.sections["breaking_changes"].contains("Remove v1 endpoints"));
        assert!(doc.sections["features"].contains("**api:** Remove v1 endpoints"));
        assert!(doc.sections["features"].contains("by Ada"));
        assert_eq!(doc.sections["issues_addressed"], "- Export hangs (#42)");
        assert!(doc.sections["technical_details"].contains("Previous release: 1.1.0"));
    }

    #[tokio::test]
    async fn empty_release_still_renders() {
        let data = data(vec![], vec![]);
        let doc = render(&data, Audience::Managers).await;
        assert!(doc.sections["highlights"].contains("Maintenance release"));
        assert!(doc.sections["technical_details"].contains("Commits included: 0"));
    }
}
