//! Stimulus driver: fresh commits that make the CI server enqueue builds.
//!
//! Recipe, each step completing before the next starts:
//! 1. reset the working branch (delete if present, recreate from the base branch)
//! 2. read the latest build number of the repository as a baseline
//! 3. push N commits, pausing after each one for the webhook to fire
//!
//! Any failure aborts the recipe. Nothing is compensated: a half-created
//! branch stays as it is.

use crate::classify::latest_build;
use crate::client::BuildSource;
use crate::config::RepoSlug;
use crate::github::{CommitAuthor, FileChange, SourceMutator};
use crate::result::{StimulusStep, StressError, StressResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What to commit, where, and how often
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StimulusPlan {
    /// Working branch, recreated on every run
    pub branch: String,
    /// Branch the working branch is cut from
    pub base_branch: String,
    /// Commits to push
    pub commits: u32,
    /// Pause after each commit
    #[serde(with = "secs")]
    pub commit_wait: Duration,
    /// File rewritten by each commit
    pub file_path: String,
    /// Commit message
    pub message: String,
    /// Commit author
    pub author: CommitAuthor,
}

impl Default for StimulusPlan {
    fn default() -> Self {
        Self {
            branch: "junk".to_string(),
            base_branch: "master".to_string(),
            commits: 1,
            commit_wait: Duration::from_secs(5),
            file_path: "hello_world.txt".to_string(),
            message: "commit via buildstorm".to_string(),
            author: CommitAuthor::default(),
        }
    }
}

impl StimulusPlan {
    /// File change for one commit; the content embeds the current time so
    /// every commit produces a distinct tree.
    #[must_use]
    pub fn change_now(&self) -> FileChange {
        let now = Utc::now();
        FileChange {
            path: self.file_path.clone(),
            content: format!("Hello.  It is now {}", now.to_rfc3339()),
            message: self.message.clone(),
            author: self.author.clone(),
            date: now,
        }
    }
}

/// Result of a completed stimulus run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StimulusOutcome {
    /// Latest build number before the first commit (0 for a fresh repository)
    pub baseline: u64,
    /// SHAs of the commits pushed, in order
    pub commits: Vec<String>,
}

/// Drives the stimulus recipe against a source mutator and a CI server
pub struct StimulusDriver<'a> {
    mutator: &'a dyn SourceMutator,
    builds: &'a dyn BuildSource,
    repo: &'a RepoSlug,
}

impl std::fmt::Debug for StimulusDriver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StimulusDriver")
            .field("repo", self.repo)
            .finish_non_exhaustive()
    }
}

impl<'a> StimulusDriver<'a> {
    /// Create a driver for `repo`
    pub fn new(
        mutator: &'a dyn SourceMutator,
        builds: &'a dyn BuildSource,
        repo: &'a RepoSlug,
    ) -> Self {
        Self {
            mutator,
            builds,
            repo,
        }
    }

    /// Run the whole recipe
    pub async fn run(
        &self,
        plan: &StimulusPlan,
        cancel: &CancellationToken,
    ) -> StressResult<StimulusOutcome> {
        self.reset_branch(plan).await?;
        let baseline = self.baseline().await?;
        tracing::info!(baseline, "latest build before stimulus");

        let mut outcome = StimulusOutcome {
            baseline,
            commits: Vec::new(),
        };
        tracing::info!(commits = plan.commits, "creating commits");
        for i in 1..=plan.commits {
            tracing::info!("[{}/{}] creating commit", i, plan.commits);
            let sha = self
                .mutator
                .commit_file(self.repo, &plan.branch, &plan.change_now())
                .await
                .map_err(|e| StressError::stimulus(StimulusStep::Commit, e))?;
            outcome.commits.push(sha);

            tracing::info!(
                wait_secs = plan.commit_wait.as_secs(),
                "waiting for webhook to trigger"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(StressError::Cancelled),
                () = tokio::time::sleep(plan.commit_wait) => {}
            }
        }
        Ok(outcome)
    }

    async fn reset_branch(&self, plan: &StimulusPlan) -> StressResult<()> {
        tracing::info!(branch = %plan.branch, "resetting branch");
        let existing = self
            .mutator
            .branch_head(self.repo, &plan.branch)
            .await
            .map_err(|e| StressError::stimulus(StimulusStep::CheckBranch, e))?;
        if existing.is_some() {
            self.mutator
                .delete_branch(self.repo, &plan.branch)
                .await
                .map_err(|e| StressError::stimulus(StimulusStep::DeleteBranch, e))?;
        }

        let base = self
            .mutator
            .branch_head(self.repo, &plan.base_branch)
            .await
            .map_err(|e| StressError::stimulus(StimulusStep::CreateBranch, e))?
            .ok_or_else(|| {
                StressError::stimulus(
                    StimulusStep::CreateBranch,
                    format!("base branch {} not found", plan.base_branch),
                )
            })?;
        self.mutator
            .create_branch(self.repo, &plan.branch, &base)
            .await
            .map_err(|e| StressError::stimulus(StimulusStep::CreateBranch, e))
    }

    async fn baseline(&self) -> StressResult<u64> {
        let population = self
            .builds
            .repo_builds(self.repo)
            .await
            .map_err(|e| StressError::stimulus(StimulusStep::Baseline, e))?;
        Ok(latest_build(&population).map_or(0, |b| b.number))
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::build::{BuildPopulation, BuildRecord, BuildStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory repository: branch name -> head SHA
    struct FakeRepo {
        branches: Mutex<HashMap<String, String>>,
        log: Mutex<Vec<String>>,
        fail_delete: bool,
        fail_commit_at: Option<usize>,
    }

    impl FakeRepo {
        fn with_branches(branches: &[(&str, &str)]) -> Self {
            Self {
                branches: Mutex::new(
                    branches
                        .iter()
                        .map(|(b, s)| ((*b).to_string(), (*s).to_string()))
                        .collect(),
                ),
                log: Mutex::new(Vec::new()),
                fail_delete: false,
                fail_commit_at: None,
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SourceMutator for FakeRepo {
        async fn branch_head(&self, _repo: &RepoSlug, branch: &str) -> StressResult<Option<String>> {
            self.log.lock().unwrap().push(format!("get {branch}"));
            Ok(self.branches.lock().unwrap().get(branch).cloned())
        }

        async fn delete_branch(&self, _repo: &RepoSlug, branch: &str) -> StressResult<()> {
            self.log.lock().unwrap().push(format!("delete {branch}"));
            if self.fail_delete {
                return Err(StressError::api(422, "Reference does not exist"));
            }
            self.branches.lock().unwrap().remove(branch);
            Ok(())
        }

        async fn create_branch(&self, _repo: &RepoSlug, branch: &str, sha: &str) -> StressResult<()> {
            self.log.lock().unwrap().push(format!("create {branch}@{sha}"));
            self.branches
                .lock()
                .unwrap()
                .insert(branch.to_string(), sha.to_string());
            Ok(())
        }

        async fn commit_file(
            &self,
            _repo: &RepoSlug,
            branch: &str,
            change: &FileChange,
        ) -> StressResult<String> {
            assert!(change.content.starts_with("Hello.  It is now "));
            let mut log = self.log.lock().unwrap();
            let n = log.iter().filter(|l| l.starts_with("commit")).count() + 1;
            log.push(format!("commit {branch} #{n}"));
            if self.fail_commit_at == Some(n) {
                return Err(StressError::transport("connection reset"));
            }
            let sha = format!("sha{n}");
            self.branches
                .lock()
                .unwrap()
                .insert(branch.to_string(), sha.clone());
            Ok(sha)
        }
    }

    struct FixedBuilds {
        population: BuildPopulation,
        calls: Mutex<u32>,
    }

    impl FixedBuilds {
        fn new(ids_and_numbers: &[(i64, u64)]) -> Self {
            Self {
                population: ids_and_numbers
                    .iter()
                    .map(|&(id, n)| BuildRecord::new(id, n, BuildStatus::Success))
                    .collect(),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BuildSource for FixedBuilds {
        async fn server_builds(&self) -> StressResult<BuildPopulation> {
            Err(StressError::transport("stimulus reads the repository snapshot only"))
        }

        async fn repo_builds(&self, _repo: &RepoSlug) -> StressResult<BuildPopulation> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.population.clone())
        }
    }

    fn plan(commits: u32) -> StimulusPlan {
        StimulusPlan {
            commits,
            commit_wait: Duration::from_secs(5),
            ..StimulusPlan::default()
        }
    }

    fn junk() -> RepoSlug {
        RepoSlug::new("drone-dev-test", "junk")
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_recipe() {
        let repo = FakeRepo::with_branches(&[("master", "m0"), ("junk", "old")]);
        let builds = FixedBuilds::new(&[(5, 40), (9, 42), (3, 39)]);
        let slug = junk();
        let outcome = StimulusDriver::new(&repo, &builds, &slug)
            .run(&plan(2), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.baseline, 42);
        assert_eq!(outcome.commits, vec!["sha1", "sha2"]);
        assert_eq!(
            repo.log(),
            vec![
                "get junk",
                "delete junk",
                "get master",
                "create junk@m0",
                "commit junk #1",
                "commit junk #2",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_branch_is_not_deleted() {
        let repo = FakeRepo::with_branches(&[("master", "m0")]);
        let builds = FixedBuilds::new(&[]);
        let slug = junk();
        let outcome = StimulusDriver::new(&repo, &builds, &slug)
            .run(&plan(1), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.baseline, 0);
        assert!(!repo.log().iter().any(|l| l.starts_with("delete")));
    }

    #[tokio::test]
    async fn test_delete_failure_stops_before_baseline_and_commits() {
        let mut repo = FakeRepo::with_branches(&[("master", "m0"), ("junk", "old")]);
        repo.fail_delete = true;
        let builds = FixedBuilds::new(&[(1, 1)]);
        let slug = junk();
        let err = StimulusDriver::new(&repo, &builds, &slug)
            .run(&plan(3), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StressError::Stimulus {
                step: StimulusStep::DeleteBranch,
                ..
            }
        ));
        assert!(!repo.log().iter().any(|l| l.starts_with("commit")));
        assert_eq!(*builds.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_huge_commit_count_fails_on_first_commit() {
        let mut repo = FakeRepo::with_branches(&[("master", "m0")]);
        repo.fail_commit_at = Some(1);
        let builds = FixedBuilds::new(&[]);
        let slug = junk();
        let err = StimulusDriver::new(&repo, &builds, &slug)
            .run(&plan(u32::MAX), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StressError::Stimulus {
                step: StimulusStep::Commit,
                ..
            }
        ));
        assert_eq!(repo.log().iter().filter(|l| l.starts_with("commit")).count(), 1);
    }

    #[tokio::test]
    async fn test_missing_base_branch() {
        let repo = FakeRepo::with_branches(&[]);
        let builds = FixedBuilds::new(&[]);
        let slug = junk();
        let err = StimulusDriver::new(&repo, &builds, &slug)
            .run(&plan(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("base branch master not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_aborts_remaining_commits() {
        let mut repo = FakeRepo::with_branches(&[("master", "m0")]);
        repo.fail_commit_at = Some(2);
        let builds = FixedBuilds::new(&[(1, 7)]);
        let slug = junk();
        let err = StimulusDriver::new(&repo, &builds, &slug)
            .run(&plan(5), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StressError::Stimulus {
                step: StimulusStep::Commit,
                ..
            }
        ));
        let commits = repo.log().iter().filter(|l| l.starts_with("commit")).count();
        assert_eq!(commits, 2);
        // the half-reset branch is left in place
        assert!(repo.branches.lock().unwrap().contains_key("junk"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_after_each_commit() {
        let repo = FakeRepo::with_branches(&[("master", "m0")]);
        let builds = FixedBuilds::new(&[]);
        let slug = junk();
        let started = tokio::time::Instant::now();
        StimulusDriver::new(&repo, &builds, &slug)
            .run(&plan(3), &CancellationToken::new())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[test]
    fn test_change_content_embeds_time() {
        let change = StimulusPlan::default().change_now();
        assert_eq!(change.path, "hello_world.txt");
        assert!(change.content.contains(&change.date.to_rfc3339()));
    }
}
