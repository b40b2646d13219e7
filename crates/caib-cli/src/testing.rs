//! Scripted in-memory build API for tests

use async_trait::async_trait;
use bytes::Bytes;
use caib_core::{
    ArtifactDownload, ArtifactInfo, BuildApi, BuildRequest, BuildResponse, BuildStatus,
    BuildSummary, ByteStream, CaibError, Phase, Result, Timings, Upload,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted reply
#[derive(Clone, Debug)]
pub enum Reply<T> {
    Ok(T),
    Api(u16, &'static str),
    Transport(&'static str),
    /// Never answers
    Stall,
}

impl<T> Reply<T> {
    fn into_result(self) -> Result<T> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Api(status, message) => Err(CaibError::Api {
                status,
                message: message.to_string(),
                reason: None,
            }),
            Reply::Transport(message) => Err(CaibError::Transport(message.to_string())),
            Reply::Stall => unreachable!("stalled replies never resolve"),
        }
    }
}

/// Replies handed out in order; the last one repeats forever
pub struct Script<T> {
    steps: Mutex<VecDeque<Reply<T>>>,
    calls: AtomicUsize,
}

impl<T> Default for Script<T> {
    fn default() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl<T: Clone> Script<T> {
    pub fn new(steps: Vec<Reply<T>>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        }
    }

    async fn next(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = {
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            }
        };
        match reply.unwrap_or(Reply::Api(500, "no scripted reply")) {
            Reply::Stall => std::future::pending().await,
            reply => reply.into_result(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Artifact body as a list of chunks, optionally cut short by an error
#[derive(Clone, Debug, Default)]
pub struct FakeArtifact {
    pub info: ArtifactInfo,
    pub chunks: Vec<Bytes>,
    pub fail_midway: bool,
}

impl FakeArtifact {
    pub fn new(info: ArtifactInfo, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let mid = body.len() / 2;
        Self {
            info,
            chunks: vec![body.slice(..mid), body.slice(mid..)],
            fail_midway: false,
        }
    }
}

#[derive(Default)]
pub struct ScriptedApi {
    pub create: Script<BuildResponse>,
    pub status: Script<BuildStatus>,
    pub list: Script<Vec<BuildSummary>>,
    pub upload: Script<()>,
    pub logs: Script<Vec<Bytes>>,
    pub artifact: Script<FakeArtifact>,
    pub submitted: Mutex<Vec<BuildRequest>>,
    pub uploaded: Mutex<Vec<Vec<Upload>>>,
}

#[async_trait]
impl BuildApi for ScriptedApi {
    async fn create_build(&self, request: &BuildRequest) -> Result<BuildResponse> {
        self.submitted.lock().unwrap().push(request.clone());
        self.create.next().await
    }

    async fn get_build(&self, _name: &str) -> Result<BuildStatus> {
        self.status.next().await
    }

    async fn list_builds(&self) -> Result<Vec<BuildSummary>> {
        self.list.next().await
    }

    async fn upload_files(&self, _name: &str, uploads: &[Upload]) -> Result<()> {
        self.uploaded.lock().unwrap().push(uploads.to_vec());
        self.upload.next().await
    }

    async fn stream_logs(&self, _name: &str, _follow: bool) -> Result<ByteStream> {
        let chunks = self.logs.next().await?;
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }

    async fn fetch_artifact(&self, _name: &str) -> Result<ArtifactDownload> {
        let artifact = self.artifact.next().await?;
        let mut items: Vec<Result<Bytes>> = artifact.chunks.into_iter().map(Ok).collect();
        if artifact.fail_midway {
            items.truncate(1);
            items.push(Err(CaibError::Transport("connection reset".to_string())));
        }
        Ok(ArtifactDownload {
            info: artifact.info,
            body: Box::pin(futures::stream::iter(items)),
        })
    }
}

pub fn status(phase: Phase, message: &str) -> BuildStatus {
    BuildStatus {
        name: "demo".to_string(),
        phase,
        message: message.to_string(),
        created_at: None,
        start_time: None,
        completion_time: None,
    }
}

/// Millisecond-scale timings so retry loops finish quickly
pub fn fast_timings() -> Timings {
    let ms = Duration::from_millis;
    Timings {
        poll_interval: ms(5),
        wait_timeout: ms(2_000),
        status_call_timeout: ms(500),
        readiness_timeout: ms(1_000),
        readiness_interval: ms(5),
        readiness_call_timeout: ms(500),
        upload_timeout: ms(1_000),
        upload_retry_interval: ms(5),
        log_response_timeout: ms(500),
        log_stream_timeout: ms(500),
        artifact_timeout: ms(1_000),
        artifact_retry_interval: ms(5),
    }
}

/// Collects formatted log lines emitted on the current thread
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route info-and-above events here until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
