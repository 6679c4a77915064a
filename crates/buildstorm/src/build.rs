//! Build records as reported by the CI server.
//!
//! A [`BuildRecord`] is one observed unit of CI work. The engine never
//! mutates records; each poll produces a fresh [`BuildPopulation`] that
//! supersedes the previous one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a build.
///
/// Transitions are monotonic: `pending -> running -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    /// Waiting in the queue for a runner
    Pending,
    /// Picked up by a runner and executing
    Running,
    /// Finished successfully
    Success,
    /// Finished with a failing step
    Failure,
    /// Killed by a user
    Killed,
    /// Errored before or while running
    Error,
    /// Skipped by the pipeline
    Skipped,
    /// Blocked awaiting approval
    Blocked,
    /// Declined by an approver
    Declined,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

impl BuildStatus {
    /// Whether the build has reached a state with no further transitions
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Killed => "killed",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::Blocked => "blocked",
            Self::Declined => "declined",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One build as returned by `/api/builds` or `/api/repos/{org}/{repo}/builds`.
///
/// `id`, `number` and `status` are required; everything else defaults when
/// the server omits it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    /// Global identifier, strictly increasing with creation order
    pub id: i64,
    /// Owning repository identifier
    #[serde(default)]
    pub repo_id: i64,
    /// Per-repository sequential build number
    pub number: u64,
    /// Number of the build this one was restarted from (0 if none)
    #[serde(default, rename = "parent")]
    pub parent_number: u64,
    /// Event kind (push, pull_request, tag, deployment)
    #[serde(default)]
    pub event: String,
    /// Current status
    pub status: BuildStatus,
    /// Unix time the build was enqueued
    #[serde(default, rename = "enqueued_at")]
    pub enqueued: i64,
    /// Unix time the build was created
    #[serde(default, rename = "created_at")]
    pub created: i64,
    /// Unix time the build started running
    #[serde(default, rename = "started_at")]
    pub started: i64,
    /// Unix time the build finished (0 while not terminal)
    #[serde(default, rename = "finished_at")]
    pub finished: i64,
    /// Deployment target, if any
    #[serde(default, rename = "deploy_to")]
    pub deploy: String,
    /// Commit SHA
    #[serde(default)]
    pub commit: String,
    /// Branch name
    #[serde(default)]
    pub branch: String,
    /// Git ref
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    /// Refspec
    #[serde(default)]
    pub refspec: String,
    /// Remote URL
    #[serde(default)]
    pub remote: String,
    /// Title (pull requests)
    #[serde(default)]
    pub title: String,
    /// Commit message
    #[serde(default)]
    pub message: String,
    /// Commit timestamp
    #[serde(default)]
    pub timestamp: i64,
    /// Author login/name
    #[serde(default)]
    pub author: String,
    /// Author avatar URL
    #[serde(default, rename = "author_avatar")]
    pub avatar: String,
    /// Author email
    #[serde(default, rename = "author_email")]
    pub email: String,
    /// Link to the change on the forge
    #[serde(default, rename = "link_url")]
    pub link: String,
    /// Whether the pipeline config is signed
    #[serde(default)]
    pub signed: bool,
    /// Whether the signature verified
    #[serde(default)]
    pub verified: bool,
}

impl BuildRecord {
    /// Minimal record, used by tests and scripted sources
    #[must_use]
    pub fn new(id: i64, number: u64, status: BuildStatus) -> Self {
        Self {
            id,
            repo_id: 0,
            number,
            parent_number: 0,
            event: String::new(),
            status,
            enqueued: 0,
            created: 0,
            started: 0,
            finished: 0,
            deploy: String::new(),
            commit: String::new(),
            branch: String::new(),
            git_ref: String::new(),
            refspec: String::new(),
            remote: String::new(),
            title: String::new(),
            message: String::new(),
            timestamp: 0,
            author: String::new(),
            avatar: String::new(),
            email: String::new(),
            link: String::new(),
            signed: false,
            verified: false,
        }
    }

    /// Set the owning repository
    #[must_use]
    pub const fn with_repo_id(mut self, repo_id: i64) -> Self {
        self.repo_id = repo_id;
        self
    }

    /// Whether the build is queued
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == BuildStatus::Pending
    }

    /// Whether the build is executing
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == BuildStatus::Running
    }

    /// Terminal builds must carry a finish time
    #[must_use]
    pub const fn has_consistent_finish(&self) -> bool {
        !self.status.is_terminal() || self.finished > 0
    }
}

/// One snapshot of the builds known to the server.
///
/// Disposable: classified on read and dropped after one poll.
pub type BuildPopulation = Vec<BuildRecord>;

/// Decode a snapshot payload into records
pub fn decode_population(payload: &[u8]) -> crate::StressResult<BuildPopulation> {
    Ok(serde_json::from_slice(payload)?)
}
