//! Session orchestration.
//!
//! ```text
//! [stimulus] -> rebuild -> watch -> (pause) -> rebuild -> watch -> ...
//! ```
//!
//! The stimulus runs at most once per session and is skipped when an
//! explicit build range is given. Every round restarts the same numbers.

use crate::client::{BuildRestarter, BuildSource, CiClient, LogProbe};
use crate::config::{BuildRange, RunConfig};
use crate::github::SourceMutator;
use crate::logs::LogStreamer;
use crate::rebuild::trigger_rebuilds;
use crate::report::{RoundReport, RunOutcome, RunReport};
use crate::result::{StimulusStep, StressError, StressResult};
use crate::stimulus::{StimulusDriver, StimulusPlan};
use crate::watcher::{CompletionWatcher, WatchReport};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where the builds to restart come from
#[derive(Debug, Clone)]
pub enum Workload {
    /// Push fresh commits, then restart the builds they triggered
    Commits(StimulusPlan),
    /// Restart an explicit `(start, last]` range
    Range(BuildRange),
}

/// How many rebuild/watch rounds to run
///
/// A forever run keeps only the most recent rounds in its report; see
/// [`RunReport::push_round`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounds {
    /// Stop after this many rounds
    Limited(u32),
    /// Run until a round fails or the session is cancelled
    Forever,
}

impl Rounds {
    fn allows(self, round: u64) -> bool {
        match self {
            Self::Limited(max) => round <= u64::from(max),
            Self::Forever => true,
        }
    }
}

/// Stimulus + rebuild + watch against one CI server
pub struct StressSession {
    config: RunConfig,
    source: Arc<dyn BuildSource>,
    restarter: Arc<dyn BuildRestarter>,
    probe: Arc<dyn LogProbe>,
    mutator: Option<Arc<dyn SourceMutator>>,
}

impl std::fmt::Debug for StressSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StressSession")
            .field("config", &self.config)
            .field("has_mutator", &self.mutator.is_some())
            .finish_non_exhaustive()
    }
}

impl StressSession {
    /// Assemble a session from its collaborators
    pub fn new(
        config: RunConfig,
        source: Arc<dyn BuildSource>,
        restarter: Arc<dyn BuildRestarter>,
        probe: Arc<dyn LogProbe>,
    ) -> Self {
        Self {
            config,
            source,
            restarter,
            probe,
            mutator: None,
        }
    }

    /// Session talking to the configured CI server over HTTP and WebSocket
    #[must_use]
    pub fn connect(config: RunConfig) -> Self {
        let client = Arc::new(CiClient::new(config.ci.clone()));
        Self::new(
            config,
            Arc::clone(&client) as Arc<dyn BuildSource>,
            Arc::clone(&client) as Arc<dyn BuildRestarter>,
            client,
        )
    }

    /// Attach the source mutator used by [`Workload::Commits`]
    #[must_use]
    pub fn with_mutator(mut self, mutator: Arc<dyn SourceMutator>) -> Self {
        self.mutator = Some(mutator);
        self
    }

    /// Run configuration
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the session and return its report; the outcome is in the report
    pub async fn run(
        &self,
        workload: &Workload,
        rounds: Rounds,
        cancel: &CancellationToken,
    ) -> RunReport {
        let mut report = RunReport::new(&self.config.ci.server, self.config.repo.clone());
        // the outcome is recorded in the report
        let _ = self.run_into(workload, rounds, &mut report, cancel).await;
        report
    }

    /// Run the session, recording progress into `report`.
    ///
    /// `report.outcome` is set before returning, and `report` keeps the
    /// rounds completed so far when this returns an error.
    pub async fn run_into(
        &self,
        workload: &Workload,
        rounds: Rounds,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> StressResult<()> {
        let result = self.drive(workload, rounds, report, cancel).await;
        report.outcome = match &result {
            Ok(()) => RunOutcome::Passed,
            Err(e) => RunOutcome::from(e),
        };
        result
    }

    async fn drive(
        &self,
        workload: &Workload,
        rounds: Rounds,
        report: &mut RunReport,
        cancel: &CancellationToken,
    ) -> StressResult<()> {
        tracing::info!(server = %self.config.ci.server, repo = %self.config.repo, "stress testing");

        let (start, count) = match workload {
            Workload::Range(range) => (range.start, range.count()),
            Workload::Commits(plan) => {
                let mutator = self.mutator.as_deref().ok_or_else(|| {
                    StressError::stimulus(StimulusStep::CheckBranch, "no source mutator configured")
                })?;
                let driver =
                    StimulusDriver::new(mutator, self.source.as_ref(), &self.config.repo);
                let outcome = driver.run(plan, cancel).await?;
                let baseline = outcome.baseline;
                report.stimulus = Some(outcome);
                (baseline, u64::from(plan.commits))
            }
        };

        let watcher = self.watcher();
        let mut round: u64 = 1;
        while rounds.allows(round) {
            if round > 1 {
                self.pause(cancel).await?;
            }
            tracing::info!(round, start, count, "starting round");

            let mut restarted = Vec::new();
            let mut watch = WatchReport::default();
            if let Err(e) = trigger_rebuilds(
                self.restarter.as_ref(),
                &self.config.repo,
                start,
                count,
                &mut restarted,
            )
            .await
            {
                report.push_round(RoundReport::from_watch(round, restarted, &watch));
                return Err(e);
            }
            let watched = watcher.watch_into(&mut watch, cancel).await;
            report.push_round(RoundReport::from_watch(round, restarted, &watch));
            watched?;

            tracing::info!(round, polls = watch.polls, "round finished");
            round += 1;
        }
        Ok(())
    }

    fn watcher(&self) -> CompletionWatcher {
        let timing = &self.config.timing;
        let streamer = LogStreamer::new(
            Arc::clone(&self.probe),
            self.config.repo.clone(),
            timing.log_spacing,
            self.config.logs,
        );
        CompletionWatcher::new(
            Arc::clone(&self.source),
            streamer,
            self.config.repo.clone(),
            timing.poll_interval,
        )
        .with_scope(self.config.scope)
        .with_limits(self.config.limits)
    }

    async fn pause(&self, cancel: &CancellationToken) -> StressResult<()> {
        let pause = self.config.timing.round_pause;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(StressError::Cancelled),
            () = tokio::time::sleep(pause) => Ok(()),
        }
    }
}
