//! Error taxonomy shared by every ingestion and publishing component.
//!
//! Transport failures (octocrab, reqwest, git2, io) are translated into one of
//! these variants before they leave an adapter.

use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required credential or setting is absent or still a placeholder.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{service} rejected the credentials: {message}")]
    UpstreamAuth { service: String, message: String },

    #[error("{service} returned not found: {message}")]
    UpstreamNotFound { service: String, message: String },

    #[error("{service} request failed: {message}")]
    UpstreamTransient { service: String, message: String },

    /// Caller-supplied parameters failed basic checks; raised before any I/O.
    #[error("invalid request: {0}")]
    Validation(String),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transient(service: &str, message: impl Into<String>) -> Self {
        Self::UpstreamTransient {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(service: &str, message: impl Into<String>) -> Self {
        Self::UpstreamNotFound {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(service: &str, after: Duration) -> Self {
        Self::transient(service, format!("timed out after {}s", after.as_secs()))
    }

    /// Maps an HTTP status code from `service` onto the taxonomy.
    pub fn from_status(service: &str, status: u16, message: impl Into<String>) -> Self {
        let service = service.to_string();
        let message = message.into();
        match status {
            401 | 403 => Self::UpstreamAuth { service, message },
            404 | 422 => Self::UpstreamNotFound { service, message },
            _ => Self::UpstreamTransient { service, message },
        }
    }

    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::from_status(service, status.as_u16(), err.to_string()),
            None => Self::transient(service, err.to_string()),
        }
    }

    pub fn from_io(err: std::io::Error) -> Self {
        Self::transient("filesystem", err.to_string())
    }

    pub fn from_git(err: git2::Error) -> Self {
        if err.code() == git2::ErrorCode::NotFound {
            Self::not_found("git", err.message())
        } else {
            Self::transient("git", err.message())
        }
    }

    /// Stable name used in structured responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::UpstreamAuth { .. } => "upstream_auth_error",
            Self::UpstreamNotFound { .. } => "upstream_not_found_error",
            Self::UpstreamTransient { .. } => "upstream_transient_error",
            Self::Validation(_) => "validation_error",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::UpstreamNotFound { .. })
    }
}

impl From<octocrab::Error> for Error {
    /// HTTP statuses are classified by `GitHubClient` before the body is
    /// decoded, so what arrives here is transport or decoding trouble.
    fn from(err: octocrab::Error) -> Self {
        Self::transient("github", err.to_string())
    }
}
