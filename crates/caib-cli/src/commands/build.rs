//! Build command - submit a build and optionally follow it to completion

use super::{invocation, Overrides, ServerArgs};
use crate::api::Client;
use crate::artifact::{self, ArtifactRetriever};
use crate::monitor::LifecycleMonitor;
use crate::upload::{self, UploadOrchestrator};
use anyhow::{Context, Result};
use caib_core::{
    Architecture, BuildApi, BuildRequest, CaibError, Compression, Distro, ExportFormat,
    InvocationConfig, ManifestPreprocessor, Mode, Target, DEFAULT_BUILDER_IMAGE,
};
use clap::{ArgAction, Args};
use colored::Colorize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;
use tracing::debug;

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Path to the build manifest
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Name for the build
    #[arg(long)]
    pub name: Option<String>,

    /// Distribution to build
    #[arg(long, default_value = "autosd")]
    pub distro: String,

    /// Hardware target
    #[arg(long, default_value = "qemu")]
    pub target: String,

    /// Architecture (amd64, arm64)
    #[arg(long)]
    pub arch: Option<String>,

    /// Export format
    #[arg(long, default_value = "image")]
    pub export: String,

    /// Build mode (image, package)
    #[arg(long, default_value = "image")]
    pub mode: String,

    /// Builder container image
    #[arg(long = "automotive-image-builder", default_value = DEFAULT_BUILDER_IMAGE)]
    pub builder_image: String,

    /// Storage class for the build workspace
    #[arg(long)]
    pub storage_class: Option<String>,

    /// Minutes to wait for the build to finish
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Wait for the build to finish
    #[arg(short, long)]
    pub wait: bool,

    /// Stream build logs while waiting
    #[arg(short, long)]
    pub follow: bool,

    /// Download the artifact when the build completes
    #[arg(short, long)]
    pub download: bool,

    /// Keep the artifact compressed instead of expanding archives
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub compress: bool,

    /// Custom definition KEY=VALUE (repeatable)
    #[arg(long = "define")]
    pub defines: Vec<String>,

    /// Extra arguments passed to automotive-image-builder
    #[arg(long = "aib-args", allow_hyphen_values = true)]
    pub aib_args: Option<String>,

    /// Replace the builder's default arguments
    #[arg(long = "override", allow_hyphen_values = true)]
    pub override_args: Option<String>,

    /// Artifact compression (gzip, lz4)
    #[arg(long, default_value = "gzip")]
    pub compression: String,

    /// Local directory whose files may be referenced by absolute path (repeatable)
    #[arg(long = "safe-dir")]
    pub safe_dirs: Vec<PathBuf>,

    /// Directory for downloaded artifacts
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

/// Validated build parameters
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub manifest: PathBuf,
    pub name: String,
    pub distro: Distro,
    pub target: Target,
    pub architecture: Architecture,
    pub export_format: ExportFormat,
    pub mode: Mode,
    pub builder_image: String,
    pub storage_class: String,
    pub defines: Vec<String>,
    pub aib_args: Vec<String>,
    pub override_args: Option<Vec<String>>,
    pub compression: Compression,
    pub wait: bool,
    pub follow: bool,
    pub download: bool,
    pub compress: bool,
}

impl TryFrom<&BuildArgs> for BuildOptions {
    type Error = CaibError;

    /// Required fields are checked in flag order before anything else
    fn try_from(args: &BuildArgs) -> Result<Self, CaibError> {
        let manifest = args
            .manifest
            .clone()
            .filter(|m| !m.as_os_str().is_empty())
            .ok_or(CaibError::MissingField("--manifest"))?;
        let name = required(args.name.as_deref(), "--name")?;
        let arch = required(args.arch.as_deref(), "--arch")?;

        Ok(Self {
            manifest,
            name,
            distro: args.distro.parse()?,
            target: args.target.parse()?,
            architecture: arch.parse()?,
            export_format: args.export.parse()?,
            mode: args.mode.parse()?,
            builder_image: args.builder_image.trim().to_string(),
            storage_class: args.storage_class.clone().unwrap_or_default(),
            defines: args.defines.clone(),
            aib_args: split_args(args.aib_args.as_deref()).unwrap_or_default(),
            override_args: split_args(args.override_args.as_deref()),
            compression: args.compression.parse()?,
            wait: args.wait,
            follow: args.follow,
            download: args.download,
            compress: args.compress,
        })
    }
}

impl BuildOptions {
    fn request(&self, manifest: String) -> BuildRequest {
        let manifest_file_name = self
            .manifest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        BuildRequest {
            name: self.name.clone(),
            manifest,
            manifest_file_name,
            distro: self.distro,
            target: self.target,
            architecture: self.architecture,
            export_format: self.export_format,
            mode: self.mode,
            automotive_image_builder: self.builder_image.clone(),
            storage_class: self.storage_class.clone(),
            custom_defs: self.defines.clone(),
            aib_extra_args: self.aib_args.clone(),
            aib_override_args: self.override_args.clone(),
            serve_artifact: self.download,
            compression: self.compression,
        }
    }

    fn monitors(&self) -> bool {
        self.wait || self.follow || self.download
    }
}

fn required(value: Option<&str>, flag: &'static str) -> Result<String, CaibError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or(CaibError::MissingField(flag))
}

/// Whitespace-separated argument list; `None` when empty
fn split_args(value: Option<&str>) -> Option<Vec<String>> {
    let args: Vec<String> = value?.split_whitespace().map(str::to_string).collect();
    (!args.is_empty()).then_some(args)
}

pub async fn run(args: BuildArgs) -> Result<()> {
    let options = BuildOptions::try_from(&args)?;
    let config = invocation(
        &args.server,
        Overrides {
            timeout_minutes: args.timeout,
            safe_directories: args.safe_dirs.clone(),
            output_dir: args.output_dir.clone(),
        },
    )
    .await?;
    let api = Client::new(&config.server)?;

    execute(&api, &config, &options, tokio::io::stdout()).await
}

/// Submit, upload, monitor and download, writing build output to `out`
pub async fn execute<A, W>(
    api: &A,
    config: &InvocationConfig,
    options: &BuildOptions,
    out: W,
) -> Result<()>
where
    A: BuildApi + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    let raw = tokio::fs::read_to_string(&options.manifest)
        .await
        .with_context(|| format!("Failed to read manifest {}", options.manifest.display()))?;
    let base_dir = match options.manifest.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };

    let prepared = ManifestPreprocessor::new(&config.manifest_policy, base_dir)
        .process(&raw)
        .context("Failed to prepare manifest")?;
    let uploads = prepared.uploads(&config.manifest_policy.workspace_root);
    upload::preflight(&uploads).await?;
    debug!(
        local_files = uploads.len(),
        rewritten = prepared.rewritten,
        "Manifest prepared"
    );

    let accepted = api
        .create_build(&options.request(prepared.content))
        .await
        .context("Failed to submit build")?;
    let name = if accepted.name.is_empty() {
        options.name.clone()
    } else {
        accepted.name.clone()
    };
    println!(
        "{} Build {} accepted: {} - {}",
        "✓".green(),
        name.cyan(),
        accepted.phase,
        accepted.message
    );

    if !uploads.is_empty() {
        println!("Waiting for upload server to be ready...");
        UploadOrchestrator::new(api, &config.timings)
            .run(&name, &uploads)
            .await
            .context("Upload failed")?;
        println!(
            "{} Local files uploaded. Build will proceed.",
            "✓".green()
        );
    }

    if !options.monitors() {
        return Ok(());
    }

    println!("Waiting for build to complete...");
    let mut monitor = LifecycleMonitor::new(api, &config.timings, options.follow, out);
    let status = monitor
        .wait(&name)
        .await
        .with_context(|| format!("Build {} did not complete", name))?;
    println!("{} Build {} completed", "✓".green(), status.name.cyan());

    if options.download {
        let downloaded = ArtifactRetriever::new(api, &config.timings, &config.output_dir)
            .extract(!options.compress)
            .progress(config.progress)
            .retrieve(&name)
            .await
            .context("Artifact download failed")?;
        artifact::print_summary(&downloaded);
    }

    Ok(())
}
