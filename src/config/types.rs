use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default `owner/name` forge repository.
    pub repo: Option<String>,
    pub local_repo_path: PathBuf,
    pub llm: LlmConfig,
    pub ingestion: IngestionConfig,
    pub publish: PublishConfig,
    /// Audience name to its default section list.
    pub audiences: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub temperature: f32,
    /// Program that reads a prompt on stdin and prints the document, used for
    /// any model not named `template-*` (for example `ollama run llama3`).
    pub command: Option<String>,
    pub generation_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Cap on records per kind when following paged APIs.
    pub max_records: usize,
    pub http_timeout_secs: u64,
    pub releases_dir: PathBuf,
    pub changelog_path: PathBuf,
    pub previous_release_count: usize,
    pub jira_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub confluence_space: String,
    pub confluence_parent_page_id: Option<String>,
    pub update_existing: bool,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "template-basic".to_string(),
            temperature: 0.0,
            command: None,
            generation_timeout_secs: 120,
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_records: 500,
            http_timeout_secs: 20,
            releases_dir: PathBuf::from("releases"),
            changelog_path: PathBuf::from("CHANGELOG.md"),
            previous_release_count: 3,
            jira_status: "Done".to_string(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            confluence_space: "RN".to_string(),
            confluence_parent_page_id: None,
            update_existing: false,
            timeout_secs: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut audiences = HashMap::new();
        audiences.insert(
            "users".to_string(),
            sections(&["Highlights", "New Features", "Improvements", "Bug Fixes", "Known Issues"]),
        );
        audiences.insert(
            "developers".to_string(),
            sections(&[
                "Highlights",
                "New Features",
                "API Changes",
                "Bug Fixes",
                "Breaking Changes",
                "Technical Improvements",
                "Dependencies",
            ]),
        );
        audiences.insert(
            "managers".to_string(),
            sections(&[
                "Executive Summary",
                "Key Features",
                "Business Impact",
                "Improvements",
                "Known Issues",
            ]),
        );

        Config {
            repo: None,
            local_repo_path: PathBuf::from("."),
            llm: LlmConfig::default(),
            ingestion: IngestionConfig::default(),
            publish: PublishConfig::default(),
            audiences,
        }
    }
}

fn sections(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
