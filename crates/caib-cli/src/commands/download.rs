//! Download command - fetch the artifact of a completed build

use super::{invocation, Overrides, ServerArgs};
use crate::api::Client;
use crate::artifact::{self, ArtifactRetriever};
use anyhow::{Context, Result};
use caib_core::{BuildApi, CaibError, InvocationConfig, Phase};
use clap::{ArgAction, Args};
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct DownloadArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Build whose artifact to download
    #[arg(long)]
    pub name: Option<String>,

    /// Directory for the downloaded artifact
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Keep the artifact compressed instead of expanding archives
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub compress: bool,
}

pub async fn run(args: DownloadArgs) -> Result<()> {
    let name = args
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or(CaibError::MissingField("--name"))?
        .to_string();
    let config = invocation(
        &args.server,
        Overrides {
            output_dir: args.output_dir.clone(),
            ..Default::default()
        },
    )
    .await?;
    let api = Client::new(&config.server)?;

    execute(&api, &config, &name, !args.compress).await
}

/// Refuse unless the build has completed, then retrieve its artifact
pub async fn execute<A: BuildApi + ?Sized>(
    api: &A,
    config: &InvocationConfig,
    name: &str,
    extract: bool,
) -> Result<()> {
    let status = api
        .get_build(name)
        .await
        .with_context(|| format!("Failed to get status of build {}", name))?;
    if status.phase != Phase::Completed {
        anyhow::bail!(
            "Build {} is not completed (status: {}). Cannot download artifacts.",
            name,
            status.phase
        );
    }

    let downloaded = ArtifactRetriever::new(api, &config.timings, &config.output_dir)
        .extract(extract)
        .progress(config.progress)
        .retrieve(name)
        .await
        .context("Artifact download failed")?;
    artifact::print_summary(&downloaded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fast_timings, status, FakeArtifact, Reply, Script, ScriptedApi};
    use caib_core::{ArtifactInfo, ManifestPolicy, ServerConfig};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> InvocationConfig {
        InvocationConfig {
            server: ServerConfig::new("http://unused", None),
            timings: fast_timings(),
            manifest_policy: ManifestPolicy::default(),
            output_dir: dir.path().to_path_buf(),
            progress: false,
        }
    }

    #[tokio::test]
    async fn test_refuses_unfinished_build() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi {
            status: Script::new(vec![Reply::Ok(status(Phase::Building, ""))]),
            ..Default::default()
        };

        let err = execute(&api, &config(&dir), "demo", false).await.unwrap_err();

        assert!(err.to_string().contains("is not completed (status: Building)"));
        assert_eq!(api.artifact.calls(), 0);
    }

    #[tokio::test]
    async fn test_downloads_completed_build() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi {
            status: Script::new(vec![Reply::Ok(status(Phase::Completed, ""))]),
            artifact: Script::new(vec![Reply::Ok(FakeArtifact::new(
                ArtifactInfo {
                    content_length: Some(5),
                    ..Default::default()
                },
                "image",
            ))]),
            ..Default::default()
        };

        execute(&api, &config(&dir), "demo", false).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("demo.artifact")).unwrap(), b"image");
    }
}
