//! Completion watcher.
//!
//! Polls the build population until nothing is running and nothing is
//! queued, sampling the logs of running builds on every pass.
//!
//! ```text
//! POLLING --running > 0--> DRAINING --(logs, sleep)--> POLLING
//! POLLING --running = 0--> CHECKING_PENDING --pending > 0--> FAILED
//!                                           --pending = 0--> DONE
//! ```
//!
//! Pending work with nothing running is a stalled server, not a transient
//! state, and is never retried. Deadline and poll budget end the watch as
//! [`StressError::DeadlineExceeded`].

use crate::build::BuildPopulation;
use crate::classify::{classify, Classified};
use crate::client::BuildSource;
use crate::config::{RepoSlug, WatchLimits, WatchScope};
use crate::logs::{LogStreamer, LogSweep};
use crate::result::{StressError, StressResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Watcher state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Fetching and classifying a snapshot
    #[default]
    Polling,
    /// Builds are running: sample logs, then sleep
    Draining,
    /// Nothing running: check the queue
    CheckingPending,
    /// Population drained
    Done,
    /// Queued work with no runner
    Failed,
}

impl WatchState {
    /// Whether the watch has ended
    #[must_use]
    pub const fn is_final(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for WatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Polling => write!(f, "POLLING"),
            Self::Draining => write!(f, "DRAINING"),
            Self::CheckingPending => write!(f, "CHECKING_PENDING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Transition function of the watcher, given the latest classified snapshot
#[must_use]
pub fn next_state(state: WatchState, snapshot: &Classified) -> WatchState {
    match state {
        WatchState::Polling if snapshot.running.is_empty() => WatchState::CheckingPending,
        WatchState::Polling => WatchState::Draining,
        WatchState::Draining => WatchState::Polling,
        WatchState::CheckingPending if snapshot.pending.is_empty() => WatchState::Done,
        WatchState::CheckingPending => WatchState::Failed,
        WatchState::Done | WatchState::Failed => state,
    }
}

/// Statistics of one watch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchReport {
    /// Snapshots fetched
    pub polls: u32,
    /// Largest running set observed
    pub peak_running: usize,
    /// Largest pending set observed
    pub peak_pending: usize,
    /// Log probes that read a frame
    pub probes_ok: usize,
    /// Log probes that failed or were lost
    pub probes_failed: usize,
    /// Wall time spent watching
    pub elapsed: Duration,
    /// Last state reached
    pub state: WatchState,
}

impl WatchReport {
    fn observe(&mut self, snapshot: &Classified) {
        self.polls += 1;
        self.peak_running = self.peak_running.max(snapshot.running.len());
        self.peak_pending = self.peak_pending.max(snapshot.pending.len());
    }

    fn absorb(&mut self, sweep: &LogSweep) {
        self.probes_ok += sweep.succeeded();
        self.probes_failed += sweep.failed();
    }
}

/// Polls a [`BuildSource`] until the population drains
#[derive(Debug, Clone)]
pub struct CompletionWatcher {
    source: Arc<dyn BuildSource>,
    streamer: LogStreamer,
    repo: RepoSlug,
    scope: WatchScope,
    poll_interval: Duration,
    limits: WatchLimits,
}

impl CompletionWatcher {
    /// Create an unbounded watcher over the whole server
    pub fn new(
        source: Arc<dyn BuildSource>,
        streamer: LogStreamer,
        repo: RepoSlug,
        poll_interval: Duration,
    ) -> Self {
        Self {
            source,
            streamer,
            repo,
            scope: WatchScope::Server,
            poll_interval,
            limits: WatchLimits::unbounded(),
        }
    }

    /// Set the snapshot scope
    #[must_use]
    pub const fn with_scope(mut self, scope: WatchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set deadline and poll budget
    #[must_use]
    pub const fn with_limits(mut self, limits: WatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Watch until the population drains; see [`Self::watch_into`]
    pub async fn watch(&self, cancel: &CancellationToken) -> StressResult<WatchReport> {
        let mut report = WatchReport::default();
        self.watch_into(&mut report, cancel).await?;
        Ok(report)
    }

    /// Watch until the population drains, recording statistics into `report`.
    ///
    /// `report` holds partial statistics when this returns an error.
    pub async fn watch_into(
        &self,
        report: &mut WatchReport,
        cancel: &CancellationToken,
    ) -> StressResult<()> {
        let started = Instant::now();
        let deadline_at = self.limits.deadline.and_then(|d| started.checked_add(d));
        let mut state = WatchState::Polling;
        let mut snapshot = Classified::default();

        let outcome = loop {
            report.state = state;
            report.elapsed = started.elapsed();

            match state {
                WatchState::Polling => {
                    if let Err(e) = self.check_limits(report, deadline_at, started) {
                        break Err(e);
                    }
                    let population = tokio::select! {
                        biased;
                        () = cancel.cancelled() => break Err(StressError::Cancelled),
                        () = sleep_until(deadline_at) => break Err(exceeded(report, started)),
                        population = self.snapshot() => population,
                    };
                    snapshot = match population {
                        Ok(population) => classify(&population),
                        Err(e) => break Err(e),
                    };
                    report.observe(&snapshot);
                    tracing::info!(
                        poll = report.polls,
                        running = snapshot.running.len(),
                        pending = snapshot.pending.len(),
                        "waiting for builds to finish running"
                    );
                }
                WatchState::Draining => {
                    let probes = cancel.child_token();
                    let sweep = self.streamer.sweep(&snapshot.running, &probes);
                    tokio::pin!(sweep);
                    let timed_out = tokio::select! {
                        sweep = &mut sweep => {
                            report.absorb(&sweep);
                            false
                        }
                        () = sleep_until(deadline_at) => true,
                    };
                    if timed_out {
                        probes.cancel();
                        report.absorb(&sweep.await);
                        break Err(exceeded(report, started));
                    }
                    if cancel.is_cancelled() {
                        break Err(StressError::Cancelled);
                    }
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break Err(StressError::Cancelled),
                        () = sleep_until(deadline_at) => break Err(exceeded(report, started)),
                        () = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                WatchState::CheckingPending => {
                    tracing::info!(pending = snapshot.pending.len(), "checking for pending builds");
                }
                WatchState::Done => break Ok(()),
                WatchState::Failed => {
                    let numbers: Vec<u64> = snapshot.pending.iter().map(|b| b.number).collect();
                    tracing::error!(?numbers, "builds still queued with nothing running");
                    break Err(StressError::PolicyViolation {
                        pending: snapshot.pending.len(),
                    });
                }
            }

            let next = next_state(state, &snapshot);
            tracing::debug!(from = %state, to = %next, "watch transition");
            state = next;
        };

        report.elapsed = started.elapsed();
        outcome
    }

    async fn snapshot(&self) -> StressResult<BuildPopulation> {
        match self.scope {
            WatchScope::Server => self.source.server_builds().await,
            WatchScope::Repo => self.source.repo_builds(&self.repo).await,
        }
    }

    fn check_limits(
        &self,
        report: &WatchReport,
        deadline_at: Option<Instant>,
        started: Instant,
    ) -> StressResult<()> {
        let out_of_polls = self
            .limits
            .max_polls
            .is_some_and(|max| report.polls >= max);
        let past_deadline = deadline_at.is_some_and(|at| Instant::now() >= at);
        if out_of_polls || past_deadline {
            return Err(exceeded(report, started));
        }
        Ok(())
    }
}

fn exceeded(report: &WatchReport, started: Instant) -> StressError {
    StressError::DeadlineExceeded {
        polls: report.polls,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

/// Sleep until `at`, or forever when there is no deadline
async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::build::{BuildRecord, BuildStatus};
    use crate::client::LogProbe;
    use crate::config::LogProbeConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays snapshots in order, repeating the last one forever
    struct ScriptedSource {
        snapshots: Mutex<VecDeque<StressResult<BuildPopulation>>>,
        last: Mutex<BuildPopulation>,
        server_calls: Mutex<u32>,
        repo_calls: Mutex<u32>,
    }

    impl ScriptedSource {
        fn new(snapshots: Vec<StressResult<BuildPopulation>>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots.into()),
                last: Mutex::new(Vec::new()),
                server_calls: Mutex::new(0),
                repo_calls: Mutex::new(0),
            }
        }

        fn next(&self) -> StressResult<BuildPopulation> {
            match self.snapshots.lock().unwrap().pop_front() {
                Some(Ok(population)) => {
                    self.last.lock().unwrap().clone_from(&population);
                    Ok(population)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    #[async_trait]
    impl BuildSource for ScriptedSource {
        async fn server_builds(&self) -> StressResult<BuildPopulation> {
            *self.server_calls.lock().unwrap() += 1;
            self.next()
        }

        async fn repo_builds(&self, _repo: &RepoSlug) -> StressResult<BuildPopulation> {
            *self.repo_calls.lock().unwrap() += 1;
            self.next()
        }
    }

    #[derive(Default)]
    struct CountingProbe {
        probed: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl LogProbe for CountingProbe {
        async fn first_frame(&self, _repo: &RepoSlug, number: u64, _step: u32) -> StressResult<String> {
            self.probed.lock().unwrap().push(number);
            Ok("+ echo hello".to_string())
        }
    }

    fn build(id: i64, status: BuildStatus) -> BuildRecord {
        BuildRecord::new(id, id as u64, status)
    }

    fn junk() -> RepoSlug {
        RepoSlug::new("drone-dev-test", "junk")
    }

    fn watcher(source: Arc<ScriptedSource>, probe: Arc<CountingProbe>) -> CompletionWatcher {
        let streamer = LogStreamer::new(
            probe,
            junk(),
            Duration::from_millis(250),
            LogProbeConfig::default(),
        );
        CompletionWatcher::new(source, streamer, junk(), Duration::from_secs(2))
    }

    mod transition_tests {
        use super::*;

        fn snapshot(running: usize, pending: usize) -> Classified {
            Classified {
                running: (0..running).map(|i| build(i as i64, BuildStatus::Running)).collect(),
                pending: (0..pending).map(|i| build(i as i64, BuildStatus::Pending)).collect(),
                terminal: Vec::new(),
            }
        }

        #[test]
        fn test_polling_with_running_drains() {
            assert_eq!(next_state(WatchState::Polling, &snapshot(2, 5)), WatchState::Draining);
        }

        #[test]
        fn test_polling_without_running_checks_pending() {
            assert_eq!(
                next_state(WatchState::Polling, &snapshot(0, 5)),
                WatchState::CheckingPending
            );
        }

        #[test]
        fn test_draining_returns_to_polling() {
            assert_eq!(next_state(WatchState::Draining, &snapshot(1, 0)), WatchState::Polling);
        }

        #[test]
        fn test_checking_pending_outcomes() {
            assert_eq!(
                next_state(WatchState::CheckingPending, &snapshot(0, 1)),
                WatchState::Failed
            );
            assert_eq!(
                next_state(WatchState::CheckingPending, &snapshot(0, 0)),
                WatchState::Done
            );
        }

        #[test]
        fn test_final_states_are_absorbing() {
            for state in [WatchState::Done, WatchState::Failed] {
                assert!(state.is_final());
                assert_eq!(next_state(state, &snapshot(3, 3)), state);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_drains_to_done() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![build(1, BuildStatus::Running), build(2, BuildStatus::Success)]),
            Ok(vec![build(1, BuildStatus::Success), build(2, BuildStatus::Success)]),
        ]));
        let probe = Arc::new(CountingProbe::default());
        let report = watcher(Arc::clone(&source), Arc::clone(&probe))
            .watch(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.state, WatchState::Done);
        assert_eq!(report.polls, 2);
        assert_eq!(report.peak_running, 1);
        assert_eq!(report.probes_ok, 1);
        assert_eq!(*probe.probed.lock().unwrap(), vec![1]);
        assert!(report.elapsed >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_without_running_fails() {
        let source = Arc::new(ScriptedSource::new(vec![
            Ok(vec![build(1, BuildStatus::Running), build(2, BuildStatus::Pending)]),
            Ok(vec![build(1, BuildStatus::Success), build(2, BuildStatus::Pending)]),
        ]));
        let probe = Arc::new(CountingProbe::default());
        let mut report = WatchReport::default();
        let err = watcher(source, probe)
            .watch_into(&mut report, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StressError::PolicyViolation { pending: 1 }));
        assert_eq!(report.state, WatchState::Failed);
        assert_eq!(report.polls, 2);
        assert_eq!(report.peak_pending, 1);
    }

    #[tokio::test]
    async fn test_immediately_drained_population() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(Vec::new())]));
        let probe = Arc::new(CountingProbe::default());
        let report = watcher(source, Arc::clone(&probe))
            .watch(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.polls, 1);
        assert!(probe.probed.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_budget_exceeded() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![build(
            1,
            BuildStatus::Running,
        )])]));
        let probe = Arc::new(CountingProbe::default());
        let limits = WatchLimits {
            deadline: None,
            max_polls: Some(3),
        };
        let mut report = WatchReport::default();
        let err = watcher(source, probe)
            .with_limits(limits)
            .watch_into(&mut report, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StressError::DeadlineExceeded { polls: 3, .. }));
        assert_eq!(report.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wall_deadline_exceeded() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![build(
            1,
            BuildStatus::Running,
        )])]));
        let probe = Arc::new(CountingProbe::default());
        let limits = WatchLimits {
            deadline: Some(Duration::from_secs(9)),
            max_polls: None,
        };
        let err = watcher(source, probe)
            .with_limits(limits)
            .watch(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            StressError::DeadlineExceeded { polls, elapsed_ms } => {
                assert!(polls >= 4);
                assert!(elapsed_ms >= 9000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unrepresentable_deadline_is_unbounded() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(Vec::new())]));
        let probe = Arc::new(CountingProbe::default());
        let limits = WatchLimits {
            deadline: Some(Duration::from_secs(u64::MAX)),
            max_polls: None,
        };
        let report = watcher(source, probe)
            .with_limits(limits)
            .watch(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.state, WatchState::Done);
        assert_eq!(report.polls, 1);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let source = Arc::new(ScriptedSource::new(vec![Err(StressError::transport(
            "connection refused",
        ))]));
        let probe = Arc::new(CountingProbe::default());
        let err = watcher(source, probe)
            .watch(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StressError::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_watch() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(vec![build(
            1,
            BuildStatus::Running,
        )])]));
        let probe = Arc::new(CountingProbe::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            trigger.cancel();
        });

        let err = watcher(source, probe).watch(&cancel).await.unwrap_err();
        assert!(matches!(err, StressError::Cancelled));
    }

    #[tokio::test]
    async fn test_repo_scope_uses_repo_snapshot() {
        let source = Arc::new(ScriptedSource::new(vec![Ok(Vec::new())]));
        let probe = Arc::new(CountingProbe::default());
        watcher(Arc::clone(&source), probe)
            .with_scope(WatchScope::Repo)
            .watch(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*source.repo_calls.lock().unwrap(), 1);
        assert_eq!(*source.server_calls.lock().unwrap(), 0);
    }
}
