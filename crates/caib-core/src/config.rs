//! Configuration values for one invocation of the client

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Remote directory under which uploaded files are placed
pub const WORKSPACE_ROOT: &str = "/workspace/shared";

/// Default builder container image
pub const DEFAULT_BUILDER_IMAGE: &str =
    "quay.io/centos-sig-automotive/automotive-image-builder:1.0.0";

/// Default directory for downloaded artifacts
pub const DEFAULT_OUTPUT_DIR: &str = "./output";

/// Default overall wait for a build, in minutes
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 60;

/// Persisted user settings (`$CAIB_HOME/settings.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server_url: Option<String>,
    #[serde(default)]
    pub safe_directories: Vec<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT_DIR)
}

fn default_timeout_minutes() -> u64 {
    DEFAULT_TIMEOUT_MINUTES
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            safe_directories: Vec::new(),
            output_dir: default_output_dir(),
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        }
    }
}

/// Every interval and deadline used while talking to the build API
#[derive(Debug, Clone)]
pub struct Timings {
    /// Tick of the lifecycle monitor
    pub poll_interval: Duration,
    /// Overall wait for a terminal phase
    pub wait_timeout: Duration,
    /// Per-call bound on a status fetch inside the monitor
    pub status_call_timeout: Duration,
    /// Wait for the Uploading phase
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
    pub readiness_call_timeout: Duration,
    /// Retry of the upload batch
    pub upload_timeout: Duration,
    pub upload_retry_interval: Duration,
    /// Time allowed for the log endpoint to start responding
    pub log_response_timeout: Duration,
    /// Longest single log stream before a fresh fetch is issued
    pub log_stream_timeout: Duration,
    /// Wait for the artifact to materialize
    pub artifact_timeout: Duration,
    pub artifact_retry_interval: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            wait_timeout: Duration::from_secs(DEFAULT_TIMEOUT_MINUTES * 60),
            status_call_timeout: Duration::from_secs(120),
            readiness_timeout: Duration::from_secs(600),
            readiness_interval: Duration::from_secs(3),
            readiness_call_timeout: Duration::from_secs(15),
            upload_timeout: Duration::from_secs(600),
            upload_retry_interval: Duration::from_secs(5),
            log_response_timeout: Duration::from_secs(30),
            log_stream_timeout: Duration::from_secs(600),
            artifact_timeout: Duration::from_secs(1800),
            artifact_retry_interval: Duration::from_secs(3),
        }
    }
}

impl Timings {
    pub fn with_wait_minutes(mut self, minutes: u64) -> Self {
        self.wait_timeout = Duration::from_secs(minutes.saturating_mul(60));
        self
    }
}

/// Rules for finding and rewriting local file references in a manifest
#[derive(Debug, Clone)]
pub struct ManifestPolicy {
    /// Remote directory uploads are anchored under
    pub workspace_root: String,
    /// Absolute local directories whose files may be referenced
    pub safe_directories: Vec<PathBuf>,
    /// Key paths of the add-file lists inside the manifest
    pub add_files_locations: Vec<Vec<String>>,
}

impl Default for ManifestPolicy {
    fn default() -> Self {
        Self {
            workspace_root: WORKSPACE_ROOT.to_string(),
            safe_directories: Vec::new(),
            add_files_locations: vec![
                vec!["content".to_string(), "add_files".to_string()],
                vec![
                    "qm".to_string(),
                    "content".to_string(),
                    "add_files".to_string(),
                ],
            ],
        }
    }
}

impl ManifestPolicy {
    pub fn with_safe_directories(mut self, dirs: Vec<PathBuf>) -> Self {
        self.safe_directories = dirs;
        self
    }
}

/// Connection details for the build API
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub token: Option<String>,
}

impl ServerConfig {
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            token: token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        }
    }
}

/// Everything a command needs, built once at start-up and passed down
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    pub server: ServerConfig,
    pub timings: Timings,
    pub manifest_policy: ManifestPolicy,
    pub output_dir: PathBuf,
    /// Show progress bars while downloading
    pub progress: bool,
}
