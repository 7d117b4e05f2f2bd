use async_trait::async_trait;
use chrono::Utc;
use handlebars::Handlebars;
#[cfg(test)]
use mockall::automock;
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{Audience, RenderMetadata, RenderRequest, RenderedDocument, Renderer};
use crate::aggregator::commit_analyzer::CommitAnalyzer;
use crate::error::{Error, Result};
use crate::model::{Commit, Issue, Release};

const PROMPT_TEMPLATE: &str = "prompt";

/// Produces document text from a prompt. The model behind it is opaque.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, model: &str, temperature: f32) -> Result<String>;
}

/// Builds an audience-aware prompt and hands it to a [`TextGenerator`].
pub struct PromptRenderer {
    generator: Arc<dyn TextGenerator>,
    engine: Handlebars<'static>,
}

impl PromptRenderer {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Result<Self> {
        let mut engine = Handlebars::new();
        engine.register_escape_fn(handlebars::no_escape);
        engine
            .register_template_string(PROMPT_TEMPLATE, include_str!("../../templates/prompt.md.hbs"))
            .map_err(|e| Error::configuration(format!("invalid prompt template: {e}")))?;
        Ok(Self { generator, engine })
    }

    pub fn build_prompt(&self, request: &RenderRequest<'_>) -> Result<String> {
        let data = request.data;
        let sections = if request.sections.is_empty() {
            "Highlights, New Features, Improvements, Bug Fixes".to_string()
        } else {
            request.sections.join(", ")
        };

        let context = json!({
            "version": request.version,
            "date": Utc::now().format("%Y-%m-%d").to_string(),
            "audience": request.audience.as_str(),
            "instructions": request.audience.instructions(),
            "sections": sections,
            "commits": format_commits(&data.commits, request.audience),
            "issues": format_issues(&data.issues, request.audience),
            "previous_releases": format_previous(&data.previous_releases),
        });

        self.engine
            .render(PROMPT_TEMPLATE, &context)
            .map_err(|e| Error::configuration(format!("prompt template failed: {e}")))
    }
}

#[async_trait]
impl Renderer for PromptRenderer {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedDocument> {
        let prompt = self.build_prompt(request)?;
        debug!(model = request.model, prompt_length = prompt.len(), "prompt built");

        let body = self
            .generator
            .generate(&prompt, request.model, request.temperature)
            .await?;

        Ok(RenderedDocument::assemble(
            &body,
            RenderMetadata {
                model: request.model.to_string(),
                temperature: request.temperature,
                audience: request.audience,
                prompt_length: prompt.len(),
            },
        ))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn pretty(items: Vec<Value>, empty: &str) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| empty.to_string())
}

fn format_commits(commits: &[Commit], audience: Audience) -> String {
    let limit = match audience {
        Audience::Developers => 50,
        _ => 30,
    };
    let items = commits
        .iter()
        .take(limit)
        .map(|commit| {
            let kind = format!("{:?}", CommitAnalyzer::classify(&commit.subject)).to_lowercase();
            match audience {
                Audience::Developers => json!({
                    "hash": commit.hash,
                    "author": commit.author,
                    "subject": commit.subject,
                    "body": truncate(&commit.body, 200),
                    "type": kind,
                    "url": commit.url,
                }),
                _ => json!({
                    "subject": commit.subject,
                    "type": kind,
                    "author": commit.author,
                }),
            }
        })
        .collect();
    pretty(items, "No commits provided")
}

fn format_issues(issues: &[Issue], audience: Audience) -> String {
    let items = issues
        .iter()
        .take(30)
        .map(|issue| {
            let mut item = json!({
                "title": issue.title,
                "number": issue.id,
                "labels": issue.labels,
                "state": issue.state,
            });
            if audience == Audience::Developers {
                item["body"] = json!(truncate(&issue.body, 300));
                item["url"] = json!(issue.url);
            }
            item
        })
        .collect();
    pretty(items, "No issues provided")
}

fn format_previous(releases: &[Release]) -> String {
    let items = releases
        .iter()
        .take(3)
        .map(|release| {
            json!({
                "version": release.version,
                "name": release.name,
                "summary": truncate(&release.body, 500),
            })
        })
        .collect();
    pretty(items, "None")
}

/// Runs an external program with the prompt on stdin and takes stdout as the
/// document, e.g. `ollama run llama3`.
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn parse(command_line: &str) -> Result<Self> {
        let mut words = command_line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| Error::configuration("[llm] command is empty"))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

#[async_trait]
impl TextGenerator for CommandGenerator {
    async fn generate(&self, prompt: &str, model: &str, temperature: f32) -> Result<String> {
        info!(program = %self.program, model, "running text generator");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("RELEASE_NOTES_MODEL", model)
            .env("RELEASE_NOTES_TEMPERATURE", temperature.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::configuration(format!("cannot start {}: {e}", self.program)))?;

        // stdin is fed from its own task so a program that writes before it
        // has read everything cannot block on a full stdout pipe
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = prompt.to_owned();
            tokio::spawn(async move { stdin.write_all(prompt.as_bytes()).await })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::transient("llm", e.to_string()))?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!(program = %self.program, "generator exited before reading the whole prompt");
                }
                Ok(Err(e)) => return Err(Error::transient("llm", e.to_string())),
                Err(e) => return Err(Error::transient("llm", e.to_string())),
            }
        }
        if !output.status.success() {
            return Err(Error::transient(
                "llm",
                format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
