pub mod credentials;
pub mod types;

pub use credentials::{
    is_placeholder, ConfluenceCredentials, Credentials, JiraCredentials, SmtpCredentials,
    WebhookCredentials,
};
pub use types::{Config, IngestionConfig, LlmConfig, PublishConfig};

use crate::error::{Error, Result};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "release-notes.toml";

impl Config {
    /// Loads `path`, or the default file when `path` is `None`.
    ///
    /// A missing default file yields `Config::default()`; a missing file the
    /// caller named explicitly is a configuration error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p, true),
            None => (Path::new(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if explicit {
                return Err(Error::configuration(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "no config file found, using defaults");
            return Ok(Config::default());
        }

        let raw = std::fs::read_to_string(path).map_err(Error::from_io)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)
            .map_err(|e| Error::configuration(format!("invalid config: {e}")))?;

        // Audiences missing from the file keep their built-in sections.
        for (audience, sections) in Config::default().audiences {
            config.audiences.entry(audience).or_insert(sections);
        }
        Ok(config)
    }

    pub fn sections_for(&self, audience: &str) -> Vec<String> {
        self.audiences.get(audience).cloned().unwrap_or_default()
    }
}
