//! Port to the remote build-management API

use crate::error::Result;
use crate::types::{ArtifactInfo, BuildRequest, BuildResponse, BuildStatus, BuildSummary, Upload};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Body of a streaming response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// A successful artifact response: metadata plus the body still to be read
pub struct ArtifactDownload {
    pub info: ArtifactInfo,
    pub body: ByteStream,
}

/// Operations the client needs from the build API.
///
/// Non-success responses are reported as [`crate::CaibError::Api`] so
/// callers can classify them by status and reason.
#[async_trait]
pub trait BuildApi: Send + Sync {
    async fn create_build(&self, request: &BuildRequest) -> Result<BuildResponse>;

    async fn get_build(&self, name: &str) -> Result<BuildStatus>;

    async fn list_builds(&self) -> Result<Vec<BuildSummary>>;

    /// Send the whole batch in one request
    async fn upload_files(&self, name: &str, uploads: &[Upload]) -> Result<()>;

    /// Open the build log; the stream ends when the server closes it
    async fn stream_logs(&self, name: &str, follow: bool) -> Result<ByteStream>;

    async fn fetch_artifact(&self, name: &str) -> Result<ArtifactDownload>;
}
