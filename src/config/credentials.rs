//! Secrets read once at process start.
//!
//! Values that are empty or still look like a template placeholder are
//! dropped at construction, so every `is_configured` check downstream is a
//! plain `Option` test.

use std::fmt;

#[derive(Clone, Default)]
pub struct Credentials {
    pub github_token: Option<String>,
    pub jira: JiraCredentials,
    pub confluence: ConfluenceCredentials,
    pub slack_webhook_url: Option<String>,
    pub smtp: SmtpCredentials,
    pub webhook: WebhookCredentials,
}

#[derive(Clone, Default)]
pub struct JiraCredentials {
    pub base_url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    pub project_key: Option<String>,
}

#[derive(Clone, Default)]
pub struct ConfluenceCredentials {
    pub base_url: Option<String>,
    pub user: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Clone, Default)]
pub struct SmtpCredentials {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub recipients: Vec<String>,
}

#[derive(Clone, Default)]
pub struct WebhookCredentials {
    pub url: Option<String>,
    pub auth_token: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds credentials from an arbitrary key lookup; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !is_placeholder(v));

        let recipients = get("EMAIL_RECIPIENTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            github_token: get("GITHUB_TOKEN"),
            jira: JiraCredentials {
                base_url: get("JIRA_BASE_URL"),
                username: get("JIRA_USERNAME"),
                api_token: get("JIRA_API_TOKEN"),
                project_key: get("JIRA_PROJECT_KEY"),
            },
            confluence: ConfluenceCredentials {
                base_url: get("CONFLUENCE_BASE"),
                user: get("CONFLUENCE_USER"),
                api_token: get("CONFLUENCE_API_TOKEN"),
            },
            slack_webhook_url: get("SLACK_WEBHOOK_URL"),
            smtp: SmtpCredentials {
                host: get("SMTP_HOST"),
                port: get("SMTP_PORT").and_then(|p| p.trim().parse().ok()),
                username: get("SMTP_USER"),
                password: get("SMTP_PASSWORD"),
                recipients,
            },
            webhook: WebhookCredentials {
                url: get("CUSTOM_WEBHOOK_URL"),
                auth_token: get("WEBHOOK_AUTH_TOKEN"),
            },
        }
    }
}

/// True for values nobody would deliberately configure: blanks and the
/// sample values shipped in example env files.
pub fn is_placeholder(value: &str) -> bool {
    let v = value.trim();
    if v.is_empty() {
        return true;
    }
    let lower = v.to_lowercase();
    lower.starts_with("your_")
        || lower.starts_with("your-")
        || lower == "changeme"
        || lower.starts_with("xxx")
        || (v.starts_with('<') && v.ends_with('>'))
}

fn state(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "set"
    } else {
        "unset"
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("github_token", &state(&self.github_token))
            .field("jira_api_token", &state(&self.jira.api_token))
            .field("confluence_api_token", &state(&self.confluence.api_token))
            .field("slack_webhook_url", &state(&self.slack_webhook_url))
            .field("smtp_password", &state(&self.smtp.password))
            .field("webhook_url", &state(&self.webhook.url))
            .finish()
    }
}
