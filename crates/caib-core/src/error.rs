//! Error types for the caib build client

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Reason codes the build API uses for "try again later" responses.
const NOT_READY_REASONS: &[&str] = &["NotReady", "UploadPodNotReady", "ArtifactNotReady"];

/// Message fragments that mean the same thing when no reason code is sent.
/// Older servers only report readiness in free text.
const NOT_READY_PHRASES: &[&str] = &["not ready", "service unavailable"];

/// Main error type for the caib client
#[derive(Error, Debug)]
pub enum CaibError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid {kind} '{value}' (expected one of: {expected})")]
    InvalidValue {
        kind: &'static str,
        value: String,
        expected: String,
    },

    #[error("unsafe source path '{path}': {reason}")]
    UnsafePath { path: String, reason: String },

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("referenced file {} does not exist", .0.display())]
    MissingLocalFile(PathBuf),

    #[error("HTTP {status}: {message}")]
    Api {
        status: u16,
        message: String,
        reason: Option<String>,
    },

    #[error("Request failed: {0}")]
    Transport(String),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("timed out after {:?} waiting for {operation}{}", .waited, last_seen(.last))]
    Timeout {
        operation: String,
        waited: Duration,
        /// Last transient condition observed before giving up
        last: Option<String>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CaibError>;

impl CaibError {
    /// HTTP status carried by a remote error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            CaibError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote side said it is not ready yet.
    ///
    /// The structured `reason` wins when present; the message text is only
    /// consulted for servers that do not send one.
    pub fn is_not_ready(&self) -> bool {
        match self {
            CaibError::Api {
                reason: Some(reason),
                ..
            } => NOT_READY_REASONS
                .iter()
                .any(|r| r.eq_ignore_ascii_case(reason)),
            CaibError::Api { message, .. } | CaibError::Transport(message) => {
                let lower = message.to_lowercase();
                NOT_READY_PHRASES.iter().any(|p| lower.contains(p))
            }
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CaibError::Timeout { .. })
    }
}

fn last_seen(last: &Option<String>) -> String {
    match last {
        Some(why) => format!(" (last: {})", why),
        None => String::new(),
    }
}
