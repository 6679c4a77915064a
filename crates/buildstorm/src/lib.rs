//! Buildstorm: load generation and completion tracking for Drone-style CI servers
//!
//! Pushes commits (or forces rebuilds of an existing range), then watches the
//! server's build population until it drains, sampling the live logs of
//! running builds along the way.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────────────────────┐
//! │ Stimulus     │    │ Rebuild      │    │ Completion Watcher           │
//! │ (commits via │───►│ Trigger      │───►│  fetch ─► classify ─► logs   │
//! │  GitHub API) │    │ (POST fork)  │    │    ▲                    │    │
//! └──────────────┘    └──────────────┘    │    └────── sleep ◄──────┘    │
//!                                         └──────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use buildstorm::{BuildRange, CiEndpoint, RepoSlug, Rounds, RunConfig, StressSession, Workload};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> buildstorm::StressResult<()> {
//! let config = RunConfig::new(
//!     CiEndpoint::new("http://drone.local", "token"),
//!     "drone-dev-test/junk".parse::<RepoSlug>()?,
//! );
//! let report = StressSession::connect(config)
//!     .run(
//!         &Workload::Range(BuildRange::new(100, 110)?),
//!         Rounds::Limited(1),
//!         &CancellationToken::new(),
//!     )
//!     .await;
//! println!("{}", buildstorm::render_run_report(&report));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
// Lints are configured in workspace Cargo.toml [workspace.lints.clippy]

mod build;
mod classify;
mod client;
mod config;
mod github;
mod logs;
mod rebuild;
mod report;
mod result;
mod session;
mod stimulus;
mod watcher;

pub use build::{decode_population, BuildPopulation, BuildRecord, BuildStatus};
pub use classify::{classify, latest_build, Classified};
pub use client::{BuildRestarter, BuildSource, CiClient, LogProbe};
pub use config::{
    BuildRange, CiEndpoint, LogProbeConfig, RepoSlug, RunConfig, Timing, WatchLimits, WatchScope,
};
pub use github::{CommitAuthor, FileChange, GitHubClient, GitHubConfig, SourceMutator};
pub use logs::{LogSample, LogStreamer, LogSweep};
pub use rebuild::trigger_rebuilds;
pub use report::{
    render_run_json, render_run_report, RoundReport, RunOutcome, RunReport, RETAINED_ROUNDS,
};
pub use result::{redact_token, StimulusStep, StressError, StressResult};
pub use session::{Rounds, StressSession, Workload};
pub use stimulus::{StimulusDriver, StimulusOutcome, StimulusPlan};
pub use watcher::{next_state, CompletionWatcher, WatchReport, WatchState};
