//! CLI configuration
//!
//! Settings resolve in order: command-line flag (or its environment
//! variable), then the `--config` YAML profile, then the built-in default.

use crate::commands::{ConnectionArgs, RangeArgs, WatchArgs};
use crate::error::{CliError, CliResult};
use buildstorm::{
    BuildRange, CiEndpoint, CommitAuthor, GitHubConfig, LogProbeConfig, RepoSlug, RunConfig,
    StimulusPlan, Timing, WatchLimits, WatchScope, Workload,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Repository used when none is configured
pub const DEFAULT_REPO: &str = "drone-dev-test/junk";

/// CLI verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// Quiet - warnings and errors only
    Quiet,
    /// Normal - progress lines
    #[default]
    Normal,
    /// Verbose - request-level detail
    Verbose,
    /// Debug - everything
    Debug,
}

impl Verbosity {
    /// Derive from `-v` count and `-q`
    #[must_use]
    pub const fn from_flags(verbose: u8, quiet: bool) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Default `tracing` filter directive for this level
    #[must_use]
    pub const fn filter_directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "buildstorm=debug,buildstorm_cli=debug,info",
            Self::Debug => "debug",
        }
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorChoice {
    /// Always use colors
    Always,
    /// Use colors when output is a terminal
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl ColorChoice {
    /// Should use colors based on output detection
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => console::Term::stdout().features().colors_supported(),
        }
    }
}

// =============================================================================
// YAML profile
// =============================================================================

/// `--config` profile. Every field is optional; flags win over it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    /// Drone server address
    pub server: Option<String>,
    /// Drone API token
    pub token: Option<String>,
    /// `org/name`
    pub repo: Option<String>,
    /// Source mutator settings
    pub github: GitHubProfile,
    /// Commit recipe settings
    pub stimulus: StimulusProfile,
    /// Watcher settings
    pub watch: WatchProfile,
    /// Pause between stress rounds, in seconds
    pub round_pause_secs: Option<u64>,
}

/// `github:` section of the profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GitHubProfile {
    /// API base URL
    pub base_url: Option<String>,
    /// API token
    pub token: Option<String>,
    /// Commit author name
    pub author_name: Option<String>,
    /// Commit author email
    pub author_email: Option<String>,
}

/// `stimulus:` section of the profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StimulusProfile {
    /// Working branch
    pub branch: Option<String>,
    /// Branch the working branch is cut from
    pub base_branch: Option<String>,
    /// File rewritten by every commit
    pub file_path: Option<String>,
    /// Commit message
    pub message: Option<String>,
}

/// `watch:` section of the profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchProfile {
    /// Sleep between polls
    pub poll_interval_ms: Option<u64>,
    /// Spacing between log-read launches
    pub log_spacing_ms: Option<u64>,
    /// Per-read log timeout
    pub log_timeout_secs: Option<u64>,
    /// Round deadline
    pub deadline_secs: Option<u64>,
    /// Round poll budget
    pub max_polls: Option<u32>,
    /// Snapshot scope
    pub scope: Option<WatchScope>,
}

impl Profile {
    /// Load a profile from a YAML file
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| CliError::config(format!("{}: {e}", path.display())))
    }

    /// Parse a profile from YAML text
    pub fn parse(text: &str) -> Result<Self, serde_yaml_ng::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(text)
    }
}

// =============================================================================
// Session plan
// =============================================================================

/// Commit count and pause chosen by the command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRequest {
    /// Commits to push
    pub commits: u32,
    /// Pause after each commit
    pub commit_wait: Duration,
}

/// Everything a handler needs to assemble a [`buildstorm::StressSession`]
#[derive(Debug, Clone)]
pub struct SessionPlan {
    /// Run configuration
    pub config: RunConfig,
    /// Commits or explicit range
    pub workload: Workload,
    /// Source mutator connection, present only for commit workloads
    pub github: Option<GitHubConfig>,
}

/// Resolve flags and profile into a validated session plan
pub fn plan_session(
    connection: &ConnectionArgs,
    profile: &Profile,
    watch: &WatchArgs,
    range: &RangeArgs,
    commits: CommitRequest,
    round_pause: Option<u64>,
) -> CliResult<SessionPlan> {
    let server = required(connection.server.as_ref(), profile.server.as_ref())
        .ok_or_else(|| CliError::config("Please provide a Drone Server (--server or DRONE_SERVER)"))?;
    let token = required(connection.token.as_ref(), profile.token.as_ref())
        .ok_or_else(|| CliError::config("Please provide a Drone Token (--token or DRONE_TOKEN)"))?;
    let repo: RepoSlug = connection
        .repo
        .as_deref()
        .or(profile.repo.as_deref())
        .unwrap_or(DEFAULT_REPO)
        .parse()?;

    let config = RunConfig::new(CiEndpoint::new(server, token), repo)
        .with_timing(timing(watch, &profile.watch, round_pause.or(profile.round_pause_secs)))
        .with_limits(limits(watch, &profile.watch))
        .with_scope(
            watch
                .scope
                .map(WatchScope::from)
                .or(profile.watch.scope)
                .unwrap_or_default(),
        )
        .with_logs(logs(watch, &profile.watch));

    if let Some(range) = resolve_range(range)? {
        return Ok(SessionPlan {
            config,
            workload: Workload::Range(range),
            github: None,
        });
    }

    let github = github_config(connection, &profile.github)?;
    let plan = stimulus_plan(&profile.stimulus, commits, github.author.clone());
    Ok(SessionPlan {
        config,
        workload: Workload::Commits(plan),
        github: Some(github),
    })
}

/// Both bounds or neither
pub fn resolve_range(range: &RangeArgs) -> CliResult<Option<BuildRange>> {
    match (range.start_build, range.last_build) {
        (None, None) => Ok(None),
        (Some(start), Some(last)) => Ok(Some(BuildRange::new(start, last)?)),
        _ => Err(CliError::invalid_argument(
            "--start-build and --last-build must be given together",
        )),
    }
}

fn required(flag: Option<&String>, profile: Option<&String>) -> Option<String> {
    flag.or(profile)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn timing(watch: &WatchArgs, profile: &WatchProfile, round_pause: Option<u64>) -> Timing {
    let defaults = Timing::default();
    Timing {
        poll_interval: watch
            .poll_interval
            .or(profile.poll_interval_ms)
            .map_or(defaults.poll_interval, Duration::from_millis),
        log_spacing: watch
            .log_spacing
            .or(profile.log_spacing_ms)
            .map_or(defaults.log_spacing, Duration::from_millis),
        round_pause: round_pause.map_or(defaults.round_pause, Duration::from_secs),
    }
}

fn limits(watch: &WatchArgs, profile: &WatchProfile) -> WatchLimits {
    WatchLimits {
        deadline: watch
            .deadline
            .or(profile.deadline_secs)
            .map(Duration::from_secs),
        max_polls: watch.max_polls.or(profile.max_polls),
    }
}

fn logs(watch: &WatchArgs, profile: &WatchProfile) -> LogProbeConfig {
    let defaults = LogProbeConfig::default();
    LogProbeConfig {
        read_timeout: watch
            .log_timeout
            .or(profile.log_timeout_secs)
            .map_or(defaults.read_timeout, |secs| Some(Duration::from_secs(secs))),
        ..defaults
    }
}

fn github_config(connection: &ConnectionArgs, profile: &GitHubProfile) -> CliResult<GitHubConfig> {
    let base_url = required(connection.github_baseurl.as_ref(), profile.base_url.as_ref())
        .ok_or_else(|| {
            CliError::config("Please provide a Github BaseURL (--github-baseurl or GITHUB_BASEURL)")
        })?;
    let token = required(connection.github_token.as_ref(), profile.token.as_ref())
        .ok_or_else(|| {
            CliError::config("Please provide a Github Token (--github-token or GITHUB_TOKEN)")
        })?;

    let defaults = CommitAuthor::default();
    let author = CommitAuthor {
        name: connection
            .github_author_name
            .clone()
            .or_else(|| profile.author_name.clone())
            .unwrap_or(defaults.name),
        email: connection
            .github_author_email
            .clone()
            .or_else(|| profile.author_email.clone())
            .unwrap_or(defaults.email),
    };
    Ok(GitHubConfig {
        base_url,
        token,
        author,
    })
}

fn stimulus_plan(profile: &StimulusProfile, commits: CommitRequest, author: CommitAuthor) -> StimulusPlan {
    let defaults = StimulusPlan::default();
    StimulusPlan {
        branch: profile.branch.clone().unwrap_or(defaults.branch),
        base_branch: profile.base_branch.clone().unwrap_or(defaults.base_branch),
        commits: commits.commits,
        commit_wait: commits.commit_wait,
        file_path: profile.file_path.clone().unwrap_or(defaults.file_path),
        message: profile.message.clone().unwrap_or(defaults.message),
        author,
    }
}
