//! Run configuration.
//!
//! Built once per run and shared read-only by every component.

use crate::result::{StressError, StressResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// `org/name` repository slug
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepoSlug {
    /// Owner or organisation
    pub org: String,
    /// Repository name
    pub name: String,
}

impl RepoSlug {
    /// Create a slug from its parts
    pub fn new(org: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            name: name.into(),
        }
    }
}

impl FromStr for RepoSlug {
    type Err = StressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(name), None) if !org.is_empty() && !name.is_empty() => {
                Ok(Self::new(org, name))
            }
            _ => Err(StressError::InvalidRepo {
                repo: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for RepoSlug {
    type Error = StressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RepoSlug> for String {
    fn from(slug: RepoSlug) -> Self {
        slug.to_string()
    }
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

/// CI server address and credential
#[derive(Clone, Serialize, Deserialize)]
pub struct CiEndpoint {
    /// Base address, e.g. `https://drone.example.com`
    pub server: String,
    /// Access token sent as `access_token`
    #[serde(skip_serializing)]
    pub token: String,
}

impl CiEndpoint {
    /// Create an endpoint, trimming any trailing slash from `server`
    pub fn new(server: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }
}

impl fmt::Debug for CiEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CiEndpoint")
            .field("server", &self.server)
            .field("token", &"***")
            .finish()
    }
}

/// Fixed pauses of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Sleep between completion-watcher polls
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Minimum spacing between log-probe launches
    #[serde(with = "millis")]
    pub log_spacing: Duration,
    /// Pause between repeated rebuild/watch rounds
    #[serde(with = "millis")]
    pub round_pause: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            log_spacing: Duration::from_millis(250),
            round_pause: Duration::ZERO,
        }
    }
}

/// Scope of the snapshot the completion watcher polls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchScope {
    /// Every build on the server (`/api/builds`)
    #[default]
    Server,
    /// Only the target repository
    Repo,
}

impl FromStr for WatchScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "server" => Ok(Self::Server),
            "repo" | "repository" => Ok(Self::Repo),
            _ => Err(format!("Unknown watch scope: {}", s)),
        }
    }
}

/// Bounds on the completion watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchLimits {
    /// Give up once this much time has passed since the first poll
    #[serde(with = "opt_millis")]
    pub deadline: Option<Duration>,
    /// Give up after this many polls
    pub max_polls: Option<u32>,
}

impl WatchLimits {
    /// No deadline and no poll budget
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            deadline: None,
            max_polls: None,
        }
    }

    /// Whether any bound is configured
    #[must_use]
    pub const fn is_bounded(&self) -> bool {
        self.deadline.is_some() || self.max_polls.is_some()
    }
}

/// Log sampling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogProbeConfig {
    /// Step (job) whose log is read
    pub step: u32,
    /// Bound on connect plus first read; `None` waits for cancellation only
    #[serde(with = "opt_millis")]
    pub read_timeout: Option<Duration>,
    /// Bytes of the first frame kept in the sample
    pub sample_bytes: usize,
}

impl Default for LogProbeConfig {
    fn default() -> Self {
        Self {
            step: 1,
            read_timeout: Some(Duration::from_secs(30)),
            sample_bytes: 512,
        }
    }
}

/// Complete configuration of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// CI server
    pub ci: CiEndpoint,
    /// Target repository
    pub repo: RepoSlug,
    /// Pauses
    pub timing: Timing,
    /// Watcher bounds
    pub limits: WatchLimits,
    /// Watcher snapshot scope
    pub scope: WatchScope,
    /// Log sampling
    pub logs: LogProbeConfig,
}

impl RunConfig {
    /// Create a configuration with default timing and no watch bounds
    #[must_use]
    pub fn new(ci: CiEndpoint, repo: RepoSlug) -> Self {
        Self {
            ci,
            repo,
            timing: Timing::default(),
            limits: WatchLimits::default(),
            scope: WatchScope::default(),
            logs: LogProbeConfig::default(),
        }
    }

    /// Set timing
    #[must_use]
    pub const fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Set watch bounds
    #[must_use]
    pub const fn with_limits(mut self, limits: WatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Set watch scope
    #[must_use]
    pub const fn with_scope(mut self, scope: WatchScope) -> Self {
        self.scope = scope;
        self
    }

    /// Set log sampling
    #[must_use]
    pub const fn with_logs(mut self, logs: LogProbeConfig) -> Self {
        self.logs = logs;
        self
    }
}

/// Explicit `(start, last]` build-number range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRange {
    /// Builds after this number are restarted
    pub start: u64,
    /// Last build number restarted
    pub last: u64,
}

impl BuildRange {
    /// Validate `last > start`
    pub fn new(start: u64, last: u64) -> StressResult<Self> {
        if last <= start {
            return Err(StressError::InvalidRange { start, last });
        }
        Ok(Self { start, last })
    }

    /// Number of builds covered
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.last - self.start
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
