//! Lifecycle monitor
//!
//! One fixed-interval loop drives two independent pieces of state: the log
//! follower and the status tracker. The loop ends on a terminal phase or when
//! the overall wait deadline passes.

use caib_core::{BuildApi, BuildStatus, CaibError, Phase, Result, Timings};
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Log following state
#[derive(Debug)]
struct LogFollower {
    active: bool,
    warned_unavailable: bool,
    announced: bool,
}

impl LogFollower {
    fn new(active: bool) -> Self {
        Self {
            active,
            warned_unavailable: false,
            announced: false,
        }
    }

    /// One fetch of the log endpoint, copying whatever it sends to `out`
    async fn tick<A, W>(&mut self, api: &A, build: &str, timings: &Timings, out: &mut W)
    where
        A: BuildApi + ?Sized,
        W: AsyncWrite + Unpin + Send,
    {
        if !self.active {
            return;
        }

        let stream = match tokio::time::timeout(
            timings.log_response_timeout,
            api.stream_logs(build, true),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if matches!(e.status(), Some(503) | Some(504)) => {
                self.warn_unavailable(&e.to_string());
                return;
            }
            Ok(Err(CaibError::Transport(message))) => {
                debug!("Log request failed: {}", message);
                return;
            }
            Ok(Err(e)) => {
                warn!("Log streaming stopped: {}", e);
                self.active = false;
                return;
            }
            Err(_) => {
                self.warn_unavailable("no response from log endpoint");
                return;
            }
        };

        if !self.announced {
            let _ = out.write_all(b"Streaming logs...\n").await;
            self.announced = true;
        }

        let copy = async {
            let mut stream = stream;
            while let Some(chunk) = stream.next().await {
                out.write_all(&chunk?).await?;
            }
            out.flush().await?;
            Ok::<_, CaibError>(())
        };
        match tokio::time::timeout(timings.log_stream_timeout, copy).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Log stream interrupted: {}", e),
            Err(_) => debug!("Log stream exceeded {:?}; reopening", timings.log_stream_timeout),
        }
    }

    fn warn_unavailable(&mut self, detail: &str) {
        if self.warned_unavailable {
            debug!("Log stream not available yet: {}", detail);
        } else {
            warn!("Log stream not available yet ({}). Retrying...", detail);
            self.warned_unavailable = true;
        }
    }
}

/// Deduplicates status reports
#[derive(Debug, Default)]
struct StatusTracker {
    last: Option<(Phase, String)>,
}

impl StatusTracker {
    /// True if phase or message differ from the previous observation
    fn observe(&mut self, status: &BuildStatus) -> bool {
        let current = (status.phase.clone(), status.message.clone());
        if self.last.as_ref() == Some(&current) {
            return false;
        }
        self.last = Some(current);
        true
    }
}

pub struct LifecycleMonitor<'a, A: ?Sized, W> {
    api: &'a A,
    timings: &'a Timings,
    out: W,
    logs: LogFollower,
    status: StatusTracker,
    report_status: bool,
}

impl<'a, A, W> LifecycleMonitor<'a, A, W>
where
    A: BuildApi + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    /// With `follow_logs`, log output replaces the status lines
    pub fn new(api: &'a A, timings: &'a Timings, follow_logs: bool, out: W) -> Self {
        Self {
            api,
            timings,
            out,
            logs: LogFollower::new(follow_logs),
            status: StatusTracker::default(),
            report_status: !follow_logs,
        }
    }

    /// Poll until the build completes, fails or the wait deadline passes
    pub async fn wait(&mut self, build: &str) -> Result<BuildStatus> {
        let deadline = self.timings.wait_timeout;
        match tokio::time::timeout(deadline, self.poll(build)).await {
            Ok(result) => result,
            Err(_) => Err(CaibError::Timeout {
                operation: format!("build {} to finish", build),
                waited: deadline,
                last: self
                    .status
                    .last
                    .as_ref()
                    .map(|(phase, message)| format!("{} - {}", phase, message)),
            }),
        }
    }

    async fn poll(&mut self, build: &str) -> Result<BuildStatus> {
        let interval = self.timings.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            self.logs
                .tick(self.api, build, self.timings, &mut self.out)
                .await;

            let status = match tokio::time::timeout(
                self.timings.status_call_timeout,
                self.api.get_build(build),
            )
            .await
            {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    self.say(&format!("status check failed: {}", e)).await;
                    continue;
                }
                Err(_) => {
                    self.say("status check timed out").await;
                    continue;
                }
            };

            if self.status.observe(&status) {
                debug!(phase = %status.phase, "Build status changed");
                if self.report_status {
                    self.say(&format!("status: {} - {}", status.phase, status.message))
                        .await;
                }
            }

            match status.phase {
                Phase::Completed => return Ok(status),
                Phase::Failed => return Err(CaibError::BuildFailed(status.message)),
                _ => {}
            }
        }
    }

    async fn say(&mut self, line: &str) {
        let _ = self.out.write_all(format!("{}\n", line).as_bytes()).await;
        let _ = self.out.flush().await;
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.out
    }
}
