//! Run reports: per-round statistics plus a text and a JSON rendering.

use crate::config::RepoSlug;
use crate::result::StressError;
use crate::stimulus::StimulusOutcome;
use crate::watcher::{WatchReport, WatchState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

// =============================================================================
// Round and run reports
// =============================================================================

/// One rebuild + watch round
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoundReport {
    /// Round number, starting at 1
    pub round: u64,
    /// Build numbers restarted in this round
    pub restarted: Vec<u64>,
    /// Snapshots fetched
    pub polls: u32,
    /// Largest running set observed
    pub peak_running: usize,
    /// Largest pending set observed
    pub peak_pending: usize,
    /// Log probes that read a frame
    pub probes_ok: usize,
    /// Log probes that failed
    pub probes_failed: usize,
    /// Watch wall time in milliseconds
    pub elapsed_ms: u64,
    /// Last watcher state
    pub final_state: WatchState,
}

impl RoundReport {
    /// Combine restarted numbers with the watcher's statistics
    #[must_use]
    pub fn from_watch(round: u64, restarted: Vec<u64>, watch: &WatchReport) -> Self {
        Self {
            round,
            restarted,
            polls: watch.polls,
            peak_running: watch.peak_running,
            peak_pending: watch.peak_pending,
            probes_ok: watch.probes_ok,
            probes_failed: watch.probes_failed,
            elapsed_ms: watch.elapsed.as_millis() as u64,
            final_state: watch.state,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every round drained
    Passed,
    /// Queued work with no runner
    PolicyViolation {
        /// Pending builds in the final snapshot
        pending: usize,
    },
    /// Watch deadline or poll budget exhausted
    DeadlineExceeded {
        /// Error message
        message: String,
    },
    /// Interrupted from outside
    Cancelled,
    /// Transport, API, decode or stimulus failure
    Error {
        /// Error message
        message: String,
    },
}

impl RunOutcome {
    /// Whether the run passed
    #[must_use]
    pub const fn is_pass(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

impl From<&StressError> for RunOutcome {
    fn from(err: &StressError) -> Self {
        match err {
            StressError::PolicyViolation { pending } => Self::PolicyViolation { pending: *pending },
            StressError::DeadlineExceeded { .. } => Self::DeadlineExceeded {
                message: err.to_string(),
            },
            StressError::Cancelled => Self::Cancelled,
            other => Self::Error {
                message: other.to_string(),
            },
        }
    }
}

/// Most recent rounds kept in [`RunReport::rounds`]; older rounds only
/// count towards the run totals.
pub const RETAINED_ROUNDS: usize = 1000;

/// Full run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// CI server address
    pub server: String,
    /// Target repository
    pub repo: RepoSlug,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Stimulus result, if commits were generated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stimulus: Option<StimulusOutcome>,
    /// Rounds started, including any no longer retained
    #[serde(default)]
    pub rounds_run: u64,
    /// Builds restarted across all rounds
    #[serde(default)]
    pub restarted_total: usize,
    /// Failed log probes across all rounds
    #[serde(default)]
    pub probe_failures_total: usize,
    /// The most recent completed or interrupted rounds
    pub rounds: Vec<RoundReport>,
    /// Final outcome
    pub outcome: RunOutcome,
}

impl RunReport {
    /// Start an empty report
    #[must_use]
    pub fn new(server: impl Into<String>, repo: RepoSlug) -> Self {
        Self {
            server: server.into(),
            repo,
            started_at: Utc::now(),
            stimulus: None,
            rounds_run: 0,
            restarted_total: 0,
            probe_failures_total: 0,
            rounds: Vec::new(),
            outcome: RunOutcome::Passed,
        }
    }

    /// Record a round, dropping the oldest once [`RETAINED_ROUNDS`] are held
    pub fn push_round(&mut self, round: RoundReport) {
        self.rounds_run += 1;
        self.restarted_total += round.restarted.len();
        self.probe_failures_total += round.probes_failed;
        if self.rounds.len() >= RETAINED_ROUNDS {
            self.rounds.remove(0);
        }
        self.rounds.push(round);
    }

    /// Total builds restarted across rounds
    #[must_use]
    pub const fn total_restarted(&self) -> usize {
        self.restarted_total
    }

    /// Total failed log probes across rounds
    #[must_use]
    pub const fn total_probe_failures(&self) -> usize {
        self.probe_failures_total
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render a run report as human-readable text
#[must_use]
pub fn render_run_report(report: &RunReport) -> String {
    let mut output = String::new();

    let status = if report.outcome.is_pass() {
        "✅ PASS"
    } else {
        "❌ FAIL"
    };

    let _ = writeln!(output, "BUILDSTORM: {} [{}]", report.repo, status);
    output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

    let _ = writeln!(output, "Server:  {}", report.server);
    let _ = writeln!(output, "Started: {}", report.started_at.to_rfc3339());
    let _ = writeln!(output, "Rounds:  {}", report.rounds_run);
    let _ = writeln!(output, "Rebuilt: {}\n", report.total_restarted());

    if let Some(stimulus) = &report.stimulus {
        output.push_str("Stimulus:\n");
        let _ = writeln!(output, "  Baseline build: {}", stimulus.baseline);
        let _ = writeln!(output, "  Commits:        {}\n", stimulus.commits.len());
    }

    if !report.rounds.is_empty() {
        output.push_str("Rounds:\n");
        for round in &report.rounds {
            let _ = writeln!(
                output,
                "  #{:<3} rebuilt {:>3}  polls {:>4}  peak running {:>3}  peak pending {:>3}  logs {}/{}  {:.1}s  {}",
                round.round,
                round.restarted.len(),
                round.polls,
                round.peak_running,
                round.peak_pending,
                round.probes_ok,
                round.probes_ok + round.probes_failed,
                round.elapsed_ms as f64 / 1000.0,
                round.final_state,
            );
        }
        output.push('\n');
    }

    output.push_str("Outcome:\n");
    let line = match &report.outcome {
        RunOutcome::Passed => "all builds finished".to_string(),
        RunOutcome::PolicyViolation { pending } => {
            format!("{pending} build(s) pending with nothing running")
        }
        RunOutcome::DeadlineExceeded { message } | RunOutcome::Error { message } => message.clone(),
        RunOutcome::Cancelled => "cancelled".to_string(),
    };
    let _ = writeln!(output, "  {line}");

    output
}

/// Render a run report as JSON
#[must_use]
pub fn render_run_json(report: &RunReport) -> String {
    serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
}
