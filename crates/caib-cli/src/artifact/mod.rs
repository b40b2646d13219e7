//! Artifact retrieval
//!
//! Waits for the artifact to be served, streams it to a `.partial` file next
//! to its final path, renames it into place once complete and optionally
//! expands tar archives.

mod extract;

use extract::{destination_for, extract_archive, is_archive};

use caib_core::{
    ArtifactDownload, ArtifactInfo, BuildApi, CaibError, Result, RetryPolicy, Timings, Verdict,
};
use colored::Colorize;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Result of one retrieval
#[derive(Debug)]
pub struct DownloadedArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    pub info: ArtifactInfo,
    /// Directory the archive was expanded into, if it was
    pub extracted_to: Option<PathBuf>,
}

/// Removes the temporary file unless the download was committed
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!("Could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

pub struct ArtifactRetriever<'a, A: ?Sized> {
    api: &'a A,
    timings: &'a Timings,
    output_dir: &'a Path,
    extract: bool,
    progress: bool,
}

impl<'a, A: BuildApi + ?Sized> ArtifactRetriever<'a, A> {
    pub fn new(api: &'a A, timings: &'a Timings, output_dir: &'a Path) -> Self {
        Self {
            api,
            timings,
            output_dir,
            extract: false,
            progress: true,
        }
    }

    /// Expand tar archives after download
    pub fn extract(mut self, extract: bool) -> Self {
        self.extract = extract;
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub async fn retrieve(&self, build: &str) -> Result<DownloadedArtifact> {
        tokio::fs::create_dir_all(self.output_dir).await?;

        let policy = RetryPolicy::new(
            "artifact",
            self.timings.artifact_retry_interval,
            self.timings.artifact_timeout,
        );
        let download = policy
            .run(|| self.api.fetch_artifact(build), classify_artifact)
            .await
            .map_err(CaibError::from)?;

        let filename = download
            .info
            .suggested_filename()
            .unwrap_or_else(|| format!("{}.artifact", build));
        let path = self.output_dir.join(&filename);
        let info = download.info.clone();

        let bytes = self.write_atomically(download, &path).await?;
        info!(path = %path.display(), bytes, "Artifact written");

        let extracted_to = if self.extract && is_archive(&info, &filename) {
            let dest = destination_for(&path);
            let (archive, target) = (path.clone(), dest.clone());
            let summary = tokio::task::spawn_blocking(move || extract_archive(&archive, &target))
                .await
                .map_err(|e| CaibError::Io(std::io::Error::other(e)))??;
            debug!(?summary, "Archive expanded");
            Some(dest)
        } else {
            None
        };

        Ok(DownloadedArtifact {
            path,
            bytes,
            info,
            extracted_to,
        })
    }

    async fn write_atomically(&self, download: ArtifactDownload, path: &Path) -> Result<u64> {
        let mut partial_name = path.as_os_str().to_owned();
        partial_name.push(".partial");
        let mut guard = PartialFile::new(PathBuf::from(partial_name));

        let expected = download.info.content_length;
        let bar = progress_bar(expected, self.progress);

        let file = tokio::fs::File::create(&guard.path).await?;
        let mut writer = BufWriter::new(file);
        let mut body = download.body;
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
            bar.inc(chunk.len() as u64);
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        bar.finish_and_clear();

        if let Some(expected) = expected {
            if written != expected {
                return Err(CaibError::Transport(format!(
                    "artifact truncated: received {} of {} bytes",
                    written, expected
                )));
            }
        }

        tokio::fs::rename(&guard.path, path).await?;
        guard.committed = true;
        Ok(written)
    }
}

fn classify_artifact(outcome: Result<ArtifactDownload>) -> Verdict<ArtifactDownload, CaibError> {
    match outcome {
        Ok(download) => Verdict::Success(download),
        Err(e) if matches!(e.status(), Some(503) | Some(409)) || e.is_not_ready() => {
            Verdict::Transient(format!("not ready yet ({})", e))
        }
        Err(CaibError::Transport(message)) => Verdict::Transient(message),
        Err(e) => Verdict::Fatal(e),
    }
}

fn progress_bar(total: Option<u64>, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }
    match total {
        Some(len) => {
            let bar = ProgressBar::new(len);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("Downloading [{bar:30.cyan/blue}] {percent}% {bytes}/{total_bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} Downloading {bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            bar.enable_steady_tick(Duration::from_millis(100));
            bar
        }
    }
}

/// Print where the artifact went and what the server said about it
pub fn print_summary(artifact: &DownloadedArtifact) {
    println!(
        "{} Artifact downloaded to {} ({} bytes)",
        "✓".green(),
        artifact.path.display().to_string().cyan(),
        artifact.bytes
    );
    let info = &artifact.info;
    if let Some(kind) = &info.artifact_type {
        println!("  Type:         {}", kind);
    }
    if let Some(compression) = &info.compression {
        println!("  Compression:  {}", compression);
    }
    if let Some(root) = &info.archive_root {
        println!("  Archive root: {}", root);
    }
    if let Some(dir) = &artifact.extracted_to {
        println!("  Extracted to: {}", dir.display().to_string().cyan());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Client;
    use crate::testing::{fast_timings, FakeArtifact, LogCapture, Reply, Script, ScriptedApi};
    use caib_core::ServerConfig;
    use httpmock::prelude::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    fn named(name: &str, len: Option<u64>) -> ArtifactInfo {
        ArtifactInfo {
            content_disposition: Some(format!("attachment; filename=\"{}\"", name)),
            content_length: len,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_declared_length_is_written_exactly() {
        let dir = TempDir::new().unwrap();
        let body = vec![7u8; 4096];
        let api = ScriptedApi {
            artifact: Script::new(vec![Reply::Ok(FakeArtifact::new(
                named("disk.qcow2", Some(4096)),
                body.clone(),
            ))]),
            ..Default::default()
        };
        let timings = fast_timings();

        let artifact = assert_ok!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert_eq!(artifact.path, dir.path().join("disk.qcow2"));
        assert_eq!(std::fs::metadata(&artifact.path).unwrap().len(), 4096);
        assert_eq!(leftovers(dir.path()), vec!["disk.qcow2".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_length_falls_back_to_build_name() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi {
            artifact: Script::new(vec![Reply::Ok(FakeArtifact::new(
                ArtifactInfo::default(),
                "raw image bytes",
            ))]),
            ..Default::default()
        };
        let timings = fast_timings();

        let artifact = assert_ok!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert_eq!(artifact.path, dir.path().join("b1.artifact"));
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"raw image bytes");
        assert_eq!(artifact.bytes, 15);
    }

    #[tokio::test]
    async fn test_interrupted_stream_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let mut broken = FakeArtifact::new(named("disk.img", None), vec![1u8; 64]);
        broken.fail_midway = true;
        let api = ScriptedApi {
            artifact: Script::new(vec![Reply::Ok(broken)]),
            ..Default::default()
        };
        let timings = fast_timings();

        assert_err!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_short_body_is_rejected() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi {
            artifact: Script::new(vec![Reply::Ok(FakeArtifact::new(
                named("disk.img", Some(100)),
                vec![1u8; 60],
            ))]),
            ..Default::default()
        };
        let timings = fast_timings();

        let err = assert_err!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert!(err.to_string().contains("60 of 100"));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_not_ready_until_deadline_is_a_timeout() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi {
            artifact: Script::new(vec![Reply::Api(503, "artifact not ready")]),
            ..Default::default()
        };
        let mut timings = fast_timings();
        timings.artifact_timeout = Duration::from_millis(40);

        let err = assert_err!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert!(err.is_timeout());
        assert_eq!(err.status(), None);
        assert!(api.artifact.calls() > 1);
    }

    #[tokio::test]
    async fn test_conflict_is_retried_and_not_found_is_fatal() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi {
            artifact: Script::new(vec![
                Reply::Api(409, "artifact is being packaged"),
                Reply::Ok(FakeArtifact::new(named("a.img", None), "ok")),
            ]),
            ..Default::default()
        };
        let timings = fast_timings();
        assert_ok!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert_eq!(api.artifact.calls(), 2);

        let missing = ScriptedApi {
            artifact: Script::new(vec![Reply::Api(404, "build b1 not found")]),
            ..Default::default()
        };
        let err = assert_err!(
            ArtifactRetriever::new(&missing, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert_eq!(err.status(), Some(404));
        assert_eq!(missing.artifact.calls(), 1);
    }

    #[tokio::test]
    async fn test_archive_is_expanded_only_when_requested() {
        let dir = TempDir::new().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_path("rootfs/etc/hostname").unwrap();
        header.set_size(4);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &b"car\n"[..]).unwrap();
        let tarball = builder.into_inner().unwrap();

        let api = ScriptedApi {
            artifact: Script::new(vec![Reply::Ok(FakeArtifact::new(
                named("rootfs.tar", Some(tarball.len() as u64)),
                tarball,
            ))]),
            ..Default::default()
        };
        let timings = fast_timings();

        let raw = assert_ok!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert!(raw.extracted_to.is_none());

        let expanded = assert_ok!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .extract(true)
                .progress(false)
                .retrieve("b1")
                .await
        );
        let dest = expanded.extracted_to.unwrap();
        assert_eq!(dest, dir.path().join("rootfs"));
        assert_eq!(
            std::fs::read_to_string(dest.join("rootfs/etc/hostname")).unwrap(),
            "car\n"
        );
    }

    #[tokio::test]
    async fn test_only_first_not_ready_response_is_logged() {
        let dir = TempDir::new().unwrap();
        let api = ScriptedApi {
            artifact: Script::new(vec![
                Reply::Api(503, "artifact not ready"),
                Reply::Api(503, "artifact not ready"),
                Reply::Api(503, "artifact not ready"),
                Reply::Ok(FakeArtifact::new(named("a.img", None), "ok")),
            ]),
            ..Default::default()
        };
        let timings = fast_timings();
        let logs = LogCapture::default();
        let _guard = logs.install();

        assert_ok!(
            ArtifactRetriever::new(&api, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert_eq!(api.artifact.calls(), 4);
        let text = logs.contents();
        assert_eq!(text.matches("artifact not ready").count(), 1);
        assert_eq!(text.matches("Retrying").count(), 1);
    }

    #[tokio::test]
    async fn test_stalled_server_cannot_outlast_the_deadline() {
        let dir = TempDir::new().unwrap();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/builds/b1/artifact");
                then.status(503)
                    .json_body(serde_json::json!({"error": "artifact not ready"}))
                    .delay(Duration::from_secs(3));
            })
            .await;
        let client = Client::new(&ServerConfig::new(&server.base_url(), None)).unwrap();
        let mut timings = fast_timings();
        timings.artifact_timeout = Duration::from_millis(200);

        let started = tokio::time::Instant::now();
        let err = assert_err!(
            ArtifactRetriever::new(&client, &timings, dir.path())
                .progress(false)
                .retrieve("b1")
                .await
        );
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(leftovers(dir.path()).is_empty());
    }
}
