//! Typed error hierarchy for the narrator server.
//!
//! One enum per subsystem:
//! - `RepoUrlError`: repository URL validation
//! - `ScriptError`: external analysis script invocation
//! - `ArtifactError`: locating and reading generated files
//! - `GitHubError`: GitHub REST / GitHub App calls
//! - `WebhookError`: webhook delivery verification and decoding
//! - `ConfigError`: configuration loading

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from parsing a user-supplied repository URL.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoUrlError {
    #[error("Please enter a valid GitHub repository URL.")]
    Empty,

    #[error("Invalid URL format. Please enter a valid GitHub repository URL.")]
    Malformed,

    #[error("Not a GitHub URL. Please enter a valid GitHub repository URL.")]
    NotGitHub,

    #[error(
        "Invalid GitHub repository URL format. URL should be in the format: https://github.com/owner/repo"
    )]
    MissingSegments,
}

/// Errors from running an external analysis script.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Script {script} timed out after {}s", timeout.as_secs())]
    TimedOut { script: String, timeout: Duration },

    #[error("Failed to collect output of {script}: {source}")]
    Io {
        script: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from resolving a generated artifact on disk.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("No generated file found (tried {tried} location(s))")]
    NotFound { tried: usize },

    #[error("Invalid scan pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from talking to the GitHub API.
#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("GitHub App credentials are not configured")]
    AppNotConfigured,

    #[error("Failed to sign GitHub App token: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("GitHub request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl GitHubError {
    /// HTTP status reported by GitHub, if the request got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            GitHubError::Status { status, .. } => Some(*status),
            GitHubError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors from verifying or decoding a webhook delivery.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Webhook secret is not configured")]
    SecretNotConfigured,

    #[error("Missing header {0}")]
    MissingHeader(&'static str),

    #[error("Malformed signature header")]
    MalformedSignature,

    #[error("Signature does not match payload")]
    SignatureMismatch,

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}

/// Errors from loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("Failed to read GitHub App private key at {path}: {source}")]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
