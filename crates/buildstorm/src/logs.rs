//! Log streaming for in-flight builds.
//!
//! One probe per running build: connect to the step's log stream, read the
//! first frame, record it. Probes are launched no faster than the
//! configured spacing but run in parallel once launched. A failed probe is
//! recorded and never cancels its siblings.
//!
//! The first frame is a sampling probe of server behaviour under load, not a
//! complete copy of the log.

use crate::build::BuildRecord;
use crate::client::LogProbe;
use crate::config::{LogProbeConfig, RepoSlug};
use crate::result::{StressError, StressResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of one log probe
#[derive(Debug)]
pub struct LogSample {
    /// Build number probed
    pub number: u64,
    /// Launch offset from the start of the sweep
    pub launched_after: Duration,
    /// First frame (truncated) or the failure
    pub outcome: StressResult<String>,
}

impl LogSample {
    /// Whether the probe read a frame
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Results of one fan-out over the running set.
///
/// Samples are in completion order, not launch order.
#[derive(Debug, Default)]
pub struct LogSweep {
    /// Probes launched
    pub launched: usize,
    /// Probes whose task panicked or was aborted
    pub lost: usize,
    /// Completed probes
    pub samples: Vec<LogSample>,
}

impl LogSweep {
    /// Probes that read a frame
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.samples.iter().filter(|s| s.is_ok()).count()
    }

    /// Probes that failed, including lost tasks
    #[must_use]
    pub fn failed(&self) -> usize {
        self.samples.len() - self.succeeded() + self.lost
    }
}

/// Launches rate-limited log probes for a set of running builds
#[derive(Debug, Clone)]
pub struct LogStreamer {
    probe: Arc<dyn LogProbe>,
    repo: RepoSlug,
    spacing: Duration,
    config: LogProbeConfig,
}

impl LogStreamer {
    /// Create a streamer for builds of `repo`
    pub fn new(
        probe: Arc<dyn LogProbe>,
        repo: RepoSlug,
        spacing: Duration,
        config: LogProbeConfig,
    ) -> Self {
        Self {
            probe,
            repo,
            spacing,
            config,
        }
    }

    /// Probe every build in `running` and wait for all probes to finish.
    ///
    /// Cancelling `cancel` stops further launches and resolves in-flight
    /// probes as [`StressError::Cancelled`].
    pub async fn sweep(&self, running: &[BuildRecord], cancel: &CancellationToken) -> LogSweep {
        let started = Instant::now();
        let mut tasks = JoinSet::new();
        let mut sweep = LogSweep::default();

        for (i, build) in running.iter().enumerate() {
            if i > 0 && !self.spacing.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.spacing) => {}
                }
            }
            if cancel.is_cancelled() {
                break;
            }

            let number = build.number;
            let launched_after = started.elapsed();
            tracing::info!(number, step = self.config.step, "reading logs");

            let probe = Arc::clone(&self.probe);
            let repo = self.repo.clone();
            let config = self.config;
            let cancel = cancel.child_token();
            tasks.spawn(async move {
                let outcome = probe_once(probe.as_ref(), &repo, number, config, &cancel).await;
                LogSample {
                    number,
                    launched_after,
                    outcome,
                }
            });
            sweep.launched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(sample) => {
                    match &sample.outcome {
                        Ok(frame) => tracing::info!(number = sample.number, frame = %frame, "received"),
                        Err(e) => tracing::warn!(number = sample.number, error = %e, "log probe failed"),
                    }
                    sweep.samples.push(sample);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "log probe task lost");
                    sweep.lost += 1;
                }
            }
        }

        sweep
    }
}

async fn probe_once(
    probe: &dyn LogProbe,
    repo: &RepoSlug,
    number: u64,
    config: LogProbeConfig,
    cancel: &CancellationToken,
) -> StressResult<String> {
    let read = probe.first_frame(repo, number, config.step);
    let frame = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(StressError::Cancelled),
        frame = bounded(read, config.read_timeout) => frame?,
    };
    Ok(truncate_to(frame, config.sample_bytes))
}

async fn bounded<F>(read: F, limit: Option<Duration>) -> StressResult<String>
where
    F: std::future::Future<Output = StressResult<String>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, read)
            .await
            .map_err(|_| StressError::Timeout {
                ms: limit.as_millis() as u64,
            })?,
        None => read.await,
    }
}

/// Keep at most `max` bytes, cut on a char boundary
fn truncate_to(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
