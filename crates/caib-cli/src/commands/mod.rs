//! Command implementations

pub mod build;
pub mod config;
pub mod download;
pub mod list;

use crate::auth::CredentialResolver;
use crate::config::SettingsManager;
use anyhow::{Context, Result};
use caib_core::{CaibError, InvocationConfig, ManifestPolicy, ServerConfig, Timings};
use clap::Args;
use std::path::PathBuf;

/// Connection flags shared by every remote command
#[derive(Args, Debug, Clone, Default)]
pub struct ServerArgs {
    /// Build API base URL
    #[arg(long, env = "CAIB_SERVER")]
    pub server: Option<String>,

    /// Bearer token (default: kubeconfig credentials, then `oc whoami -t`)
    #[arg(long, env = "CAIB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

/// Per-command values that take precedence over the settings file
#[derive(Debug, Default)]
pub struct Overrides {
    pub timeout_minutes: Option<u64>,
    pub safe_directories: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

/// Fold flags, environment and settings into one configuration value
pub async fn invocation(server: &ServerArgs, overrides: Overrides) -> Result<InvocationConfig> {
    let settings = SettingsManager::load().context("Failed to load settings")?;

    let url = server
        .server
        .clone()
        .or(settings.server_url)
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or(CaibError::MissingField("--server (or CAIB_SERVER)"))?;
    validate_url(&url)?;

    let token = CredentialResolver::from_env()
        .resolve(server.token.as_deref())
        .await;

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let mut safe_directories: Vec<PathBuf> = overrides
        .safe_directories
        .into_iter()
        .chain(settings.safe_directories)
        .map(|dir| if dir.is_absolute() { dir } else { cwd.join(dir) })
        .collect();
    safe_directories.dedup();

    Ok(InvocationConfig {
        server: ServerConfig::new(&url, token),
        timings: Timings::default()
            .with_wait_minutes(overrides.timeout_minutes.unwrap_or(settings.timeout_minutes)),
        manifest_policy: ManifestPolicy::default().with_safe_directories(safe_directories),
        output_dir: overrides.output_dir.unwrap_or(settings.output_dir),
        progress: true,
    })
}

pub fn validate_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!(
            "Invalid URL: {}. URL must start with http:// or https://",
            url
        );
    }
    Ok(())
}
