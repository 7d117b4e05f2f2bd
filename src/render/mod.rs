//! Document rendering.
//!
//! A [`Renderer`] turns an [`IngestionResult`] into markdown. Models named
//! `template-*` render locally with handlebars; anything else goes through
//! [`PromptRenderer`] and a [`TextGenerator`].

pub mod prompt;
pub mod template;

pub use prompt::{CommandGenerator, PromptRenderer, TextGenerator};
pub use template::TemplateRenderer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::model::IngestionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Users,
    Developers,
    Managers,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Users => "users",
            Audience::Developers => "developers",
            Audience::Managers => "managers",
        }
    }

    pub fn instructions(&self) -> &'static str {
        match self {
            Audience::Users => {
                "Focus on user-facing changes and benefits. Use simple language and explain the impact. \
                 Avoid technical jargon and implementation details."
            }
            Audience::Developers => {
                "Include technical details, API changes, breaking changes, and implementation notes. \
                 Reference commit hashes, PR numbers, and provide code examples where relevant."
            }
            Audience::Managers => {
                "Focus on business value, feature completeness, and high-level improvements. \
                 Emphasize outcomes and benefits rather than technical implementation."
            }
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Audience {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "users" => Ok(Audience::Users),
            "developers" => Ok(Audience::Developers),
            "managers" => Ok(Audience::Managers),
            other => Err(Error::validation(format!("unknown audience: {other}"))),
        }
    }
}

pub struct RenderRequest<'a> {
    pub version: &'a str,
    pub data: &'a IngestionResult,
    pub audience: Audience,
    /// Section headings the document should use.
    pub sections: Vec<String>,
    pub model: &'a str,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderMetadata {
    pub model: String,
    pub temperature: f32,
    pub audience: Audience,
    pub prompt_length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedDocument {
    pub text: String,
    /// snake_case heading to section body.
    pub sections: BTreeMap<String, String>,
    pub metadata: RenderMetadata,
}

impl RenderedDocument {
    /// Builds the section map from `body`, then appends the model footer.
    pub fn assemble(body: &str, metadata: RenderMetadata) -> Self {
        let sections = parse_sections(body);
        let text = format!(
            "{}\n\n---\n*Generated with AI model: {}*\n",
            body.trim_end(),
            metadata.model
        );
        Self {
            text,
            sections,
            metadata,
        }
    }
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest<'_>) -> Result<RenderedDocument>;
}

/// Picks the renderer for `model`.
pub fn renderer_for(model: &str, generator: Option<Arc<dyn TextGenerator>>) -> Result<Box<dyn Renderer>> {
    if model.starts_with("template") {
        return Ok(Box::new(TemplateRenderer::new()?));
    }
    match generator {
        Some(generator) => Ok(Box::new(PromptRenderer::new(generator)?)),
        None => Err(Error::configuration(format!(
            "model {model} needs [llm] command to be set"
        ))),
    }
}

fn section_key(heading: &str) -> String {
    let mut key = String::new();
    for c in heading.chars() {
        if c.is_alphanumeric() {
            key.extend(c.to_lowercase());
        } else if !key.is_empty() && !key.ends_with('_') {
            key.push('_');
        }
    }
    key.trim_end_matches('_').to_string()
}

/// Maps every markdown heading to the trimmed text below it.
///
/// Text before the first heading is dropped. A document without headings
/// maps to a single `content` entry.
pub fn parse_sections(document: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    for line in document.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            if let Some(key) = current.take() {
                sections.insert(key, buffer.join("\n").trim().to_string());
            }
            current = Some(section_key(trimmed.trim_start_matches('#')));
            buffer.clear();
        } else {
            buffer.push(line);
        }
    }
    if let Some(key) = current {
        sections.insert(key, buffer.join("\n").trim().to_string());
    }

    if sections.is_empty() {
        sections.insert("content".to_string(), document.trim().to_string());
    }
    sections
}
