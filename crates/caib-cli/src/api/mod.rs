//! HTTP client for the build API

use async_trait::async_trait;
use caib_core::{
    ArtifactDownload, ArtifactInfo, BuildApi, BuildRequest, BuildResponse, BuildStatus,
    BuildSummary, ByteStream, CaibError, Result, ServerConfig, Upload,
};
use futures::StreamExt;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Characters escaped in a build name used as a path segment
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Bound on plain JSON calls; streaming calls are bounded by their callers
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error body returned by the API
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct Client {
    http: ReqwestClient,
    base_url: String,
    token: Option<String>,
}

impl Client {
    pub fn new(server: &ServerConfig) -> Result<Self> {
        let http = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("caib/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(transport)?;

        Ok(Self {
            http,
            base_url: server.base_url.clone(),
            token: server.token.clone(),
        })
    }

    fn builds_url(&self) -> String {
        format!("{}/v1/builds", self.base_url)
    }

    fn build_url(&self, name: &str, suffix: &str) -> String {
        format!(
            "{}/v1/builds/{}{}",
            self.base_url,
            utf8_percent_encode(name, PATH_SEGMENT),
            suffix
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await.map_err(transport)?;
        check_status(response).await
    }
}

#[async_trait]
impl BuildApi for Client {
    async fn create_build(&self, request: &BuildRequest) -> Result<BuildResponse> {
        let builder = self
            .request(Method::POST, &self.builds_url())
            .timeout(REQUEST_TIMEOUT)
            .json(request);
        let response = self.send(builder).await?;
        response.json().await.map_err(transport)
    }

    async fn get_build(&self, name: &str) -> Result<BuildStatus> {
        let builder = self
            .request(Method::GET, &self.build_url(name, ""))
            .timeout(REQUEST_TIMEOUT);
        let response = self.send(builder).await?;
        response.json().await.map_err(transport)
    }

    async fn list_builds(&self) -> Result<Vec<BuildSummary>> {
        let builder = self
            .request(Method::GET, &self.builds_url())
            .timeout(REQUEST_TIMEOUT);
        let response = self.send(builder).await?;
        response.json().await.map_err(transport)
    }

    async fn upload_files(&self, name: &str, uploads: &[Upload]) -> Result<()> {
        let mut form = Form::new();
        for upload in uploads {
            let data = tokio::fs::read(&upload.source_path).await?;
            debug!(
                source = %upload.source_path.display(),
                dest = %upload.dest_path,
                bytes = data.len(),
                "Adding file to upload batch"
            );
            form = form.part("file", Part::bytes(data).file_name(upload.dest_path.clone()));
        }

        let builder = self
            .request(Method::POST, &self.build_url(name, "/uploads"))
            .multipart(form);
        self.send(builder).await?;
        Ok(())
    }

    async fn stream_logs(&self, name: &str, follow: bool) -> Result<ByteStream> {
        let mut builder = self.request(Method::GET, &self.build_url(name, "/logs"));
        if follow {
            builder = builder.query(&[("follow", "1")]);
        }
        let response = self.send(builder).await?;
        Ok(body_stream(response))
    }

    async fn fetch_artifact(&self, name: &str) -> Result<ArtifactDownload> {
        let builder = self.request(Method::GET, &self.build_url(name, "/artifact"));
        let response = self.send(builder).await?;
        let info = artifact_info(response.headers());
        Ok(ArtifactDownload {
            info,
            body: body_stream(response),
        })
    }
}

fn transport(e: reqwest::Error) -> CaibError {
    CaibError::Transport(e.to_string())
}

/// Turn a non-success response into [`CaibError::Api`]
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
    let message = body
        .error
        .or(body.message)
        .unwrap_or_else(|| text.trim().to_string());
    let message = if message.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        message
    };

    Err(CaibError::Api {
        status: status.as_u16(),
        message,
        reason: body.reason,
    })
}

fn body_stream(response: Response) -> ByteStream {
    Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(transport)))
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn artifact_info(headers: &HeaderMap) -> ArtifactInfo {
    ArtifactInfo {
        content_type: header_text(headers, CONTENT_TYPE.as_str()),
        content_length: header_text(headers, CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok()),
        content_disposition: header_text(headers, CONTENT_DISPOSITION.as_str()),
        artifact_type: header_text(headers, "x-aib-artifact-type"),
        compression: header_text(headers, "x-aib-compression"),
        archive_root: header_text(headers, "x-aib-archive-root"),
    }
}
