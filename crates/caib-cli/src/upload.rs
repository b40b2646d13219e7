//! Delivery of local manifest files to the build's upload server

use caib_core::{
    BuildApi, BuildStatus, CaibError, Phase, Result, RetryPolicy, Timings, Upload, Verdict,
};
use tokio::time::error::Elapsed;
use tracing::{debug, info};

/// Fail fast if any upload source is missing locally
pub async fn preflight(uploads: &[Upload]) -> Result<()> {
    for upload in uploads {
        match tokio::fs::metadata(&upload.source_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(CaibError::MissingLocalFile(upload.source_path.clone())),
        }
    }
    Ok(())
}

pub struct UploadOrchestrator<'a, A: ?Sized> {
    api: &'a A,
    timings: &'a Timings,
}

impl<'a, A: BuildApi + ?Sized> UploadOrchestrator<'a, A> {
    pub fn new(api: &'a A, timings: &'a Timings) -> Self {
        Self { api, timings }
    }

    /// Wait for the upload server, then send every file in one batch
    pub async fn run(&self, build: &str, uploads: &[Upload]) -> Result<()> {
        if uploads.is_empty() {
            debug!("No local files to upload");
            return Ok(());
        }
        preflight(uploads).await?;

        info!("Waiting for upload server to be ready...");
        self.wait_until_ready(build).await?;

        info!("Uploading {} local file(s)", uploads.len());
        self.transfer(build, uploads).await
    }

    async fn wait_until_ready(&self, build: &str) -> Result<()> {
        let policy = RetryPolicy::new(
            "upload server readiness",
            self.timings.readiness_interval,
            self.timings.readiness_timeout,
        );
        let call_timeout = self.timings.readiness_call_timeout;

        policy
            .run(
                || tokio::time::timeout(call_timeout, self.api.get_build(build)),
                classify_readiness,
            )
            .await
            .map_err(CaibError::from)
    }

    async fn transfer(&self, build: &str, uploads: &[Upload]) -> Result<()> {
        let policy = RetryPolicy::new(
            "file upload",
            self.timings.upload_retry_interval,
            self.timings.upload_timeout,
        );

        policy
            .run(|| self.api.upload_files(build, uploads), classify_upload)
            .await
            .map_err(CaibError::from)
    }
}

fn classify_readiness(
    outcome: std::result::Result<Result<BuildStatus>, Elapsed>,
) -> Verdict<(), CaibError> {
    match outcome {
        Ok(Ok(status)) => match status.phase {
            Phase::Uploading => Verdict::Success(()),
            Phase::Failed => Verdict::Fatal(CaibError::BuildFailed(format!(
                "build failed while waiting for upload server: {}",
                status.message
            ))),
            phase => Verdict::Transient(format!("build is {}", phase)),
        },
        Ok(Err(e)) => Verdict::Transient(format!("status check failed: {}", e)),
        Err(_) => Verdict::Transient("status check timed out".to_string()),
    }
}

fn classify_upload(outcome: Result<()>) -> Verdict<(), CaibError> {
    match outcome {
        Ok(()) => Verdict::Success(()),
        Err(e) if e.status() == Some(503) || e.is_not_ready() => Verdict::Transient(e.to_string()),
        Err(e) => Verdict::Fatal(e),
    }
}
