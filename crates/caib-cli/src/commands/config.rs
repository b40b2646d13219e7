//! Config command - Manage persisted client settings

use super::validate_url;
use crate::config::SettingsManager;
use anyhow::{Context, Result};
use caib_core::{Settings, Timings, WORKSPACE_ROOT};
use colored::Colorize;
use std::path::Path;

/// Set the default build API URL
pub async fn set_server(url: &str) -> Result<()> {
    let mut settings = SettingsManager::load().context("Failed to load settings")?;

    let url = url.trim().trim_end_matches('/');
    validate_url(url)?;
    settings.server_url = Some(url.to_string());

    SettingsManager::save(&settings).context("Failed to save settings")?;

    println!("{} Server URL set to: {}", "✓".green(), url.cyan());
    Ok(())
}

/// Allow files under `dir` to be referenced by absolute path
pub async fn add_safe_dir(dir: &Path) -> Result<()> {
    let mut settings = SettingsManager::load().context("Failed to load settings")?;

    let dir = std::fs::canonicalize(dir)
        .with_context(|| format!("Cannot use {} as a safe directory", dir.display()))?;
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    if settings.safe_directories.contains(&dir) {
        println!(
            "{}",
            format!("{} is already a safe directory.", dir.display()).yellow()
        );
        return Ok(());
    }
    settings.safe_directories.push(dir.clone());
    SettingsManager::save(&settings).context("Failed to save settings")?;

    println!(
        "{} Added safe directory: {}",
        "✓".green(),
        dir.display().to_string().cyan()
    );
    Ok(())
}

/// Show current configuration
pub async fn show() -> Result<()> {
    let settings = SettingsManager::load().context("Failed to load settings")?;

    println!("{}", "caib Configuration".bold().underline());
    println!();

    println!("{}", "Server Settings:".cyan().bold());
    match &settings.server_url {
        Some(url) => println!("  API URL: {}", url),
        None => println!("  API URL: {}", "not set (use --server or CAIB_SERVER)".yellow()),
    }
    println!();

    println!("{}", "Builds:".cyan().bold());
    println!("  Output dir:     {}", settings.output_dir.display());
    println!("  Wait timeout:   {} min", settings.timeout_minutes);
    println!("  Workspace root: {}", WORKSPACE_ROOT);
    println!();

    println!("{}", "Safe Directories:".cyan().bold());
    if settings.safe_directories.is_empty() {
        println!("  {}", "None (absolute source paths are rejected)".dimmed());
    } else {
        for dir in &settings.safe_directories {
            println!("  {}", dir.display());
        }
    }
    println!();

    let timings = Timings::default();
    println!("{}", "Retry Deadlines:".cyan().bold());
    println!("  Upload server readiness: {:?}", timings.readiness_timeout);
    println!("  File upload:             {:?}", timings.upload_timeout);
    println!("  Artifact:                {:?}", timings.artifact_timeout);
    println!();

    println!("{}", "Config Files:".cyan().bold());
    println!(
        "  Settings: {}",
        SettingsManager::settings_path()?.display().to_string().dimmed()
    );

    Ok(())
}

/// Reset configuration to defaults
pub async fn reset(yes: bool) -> Result<()> {
    use dialoguer::Confirm;

    let confirm = yes
        || Confirm::new()
            .with_prompt("Reset all caib settings to defaults?")
            .default(false)
            .interact()?;

    if !confirm {
        println!("{}", "Reset cancelled.".yellow());
        return Ok(());
    }

    SettingsManager::save(&Settings::default()).context("Failed to save default settings")?;

    println!("{} Configuration reset to defaults.", "✓".green());
    Ok(())
}
