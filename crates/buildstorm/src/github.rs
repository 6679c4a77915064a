//! GitHub-compatible source mutator.
//!
//! Only used to produce build-triggering events: reset a working branch and
//! push commits onto it through the Git Data API (works against github.com
//! and GitHub Enterprise `/api/v3`).

use crate::config::RepoSlug;
use crate::result::{StressError, StressResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One file write pushed as a new commit
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Path of the file inside the repository
    pub path: String,
    /// Full new content
    pub content: String,
    /// Commit message
    pub message: String,
    /// Commit author
    pub author: CommitAuthor,
    /// Author date
    pub date: DateTime<Utc>,
}

/// Author identity attached to generated commits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitAuthor {
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "John Doe".to_string(),
            email: "johndoe@gmail.com".to_string(),
        }
    }
}

/// Mutates a source repository to trigger CI builds.
#[async_trait]
pub trait SourceMutator: Send + Sync {
    /// Head commit SHA of `branch`, or `None` if the branch does not exist
    async fn branch_head(&self, repo: &RepoSlug, branch: &str) -> StressResult<Option<String>>;

    /// Delete `refs/heads/{branch}`
    async fn delete_branch(&self, repo: &RepoSlug, branch: &str) -> StressResult<()>;

    /// Create `refs/heads/{branch}` pointing at `sha`
    async fn create_branch(&self, repo: &RepoSlug, branch: &str, sha: &str) -> StressResult<()>;

    /// Commit `change` on top of `branch` and advance it; returns the new SHA
    async fn commit_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        change: &FileChange,
    ) -> StressResult<String>;
}

/// GitHub REST client connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base, e.g. `https://api.github.com` or `https://ghe.example.com/api/v3`
    pub base_url: String,
    /// Personal access token
    #[serde(skip_serializing)]
    pub token: String,
    /// Author of generated commits
    #[serde(default)]
    pub author: CommitAuthor,
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("base_url", &self.base_url)
            .field("token", &"***")
            .field("author", &self.author)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BranchResponse {
    commit: ShaRef,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ShaRef,
}

#[derive(Debug, Serialize)]
struct TreeEntry<'a> {
    path: &'a str,
    mode: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateTree<'a> {
    base_tree: &'a str,
    tree: Vec<TreeEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct GitAuthor<'a> {
    name: &'a str,
    email: &'a str,
    date: String,
}

#[derive(Debug, Serialize)]
struct CreateCommit<'a> {
    message: &'a str,
    tree: &'a str,
    parents: Vec<&'a str>,
    author: GitAuthor<'a>,
}

#[derive(Debug, Serialize)]
struct CreateRef<'a> {
    #[serde(rename = "ref")]
    git_ref: String,
    sha: &'a str,
}

#[derive(Debug, Serialize)]
struct UpdateRef<'a> {
    sha: &'a str,
    force: bool,
}

/// GitHub Git Data API client
#[derive(Debug, Clone)]
pub struct GitHubClient {
    config: GitHubConfig,
    client: reqwest::Client,
}

impl GitHubClient {
    /// Create a client with a 30 second request timeout
    #[must_use]
    pub fn new(mut config: GitHubConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("buildstorm/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    /// Author attached to generated commits
    #[must_use]
    pub const fn author(&self) -> &CommitAuthor {
        &self.config.author
    }

    fn repo_url(&self, repo: &RepoSlug, path: &str) -> String {
        format!("{}/repos/{}/{}{}", self.config.base_url, repo.org, repo.name, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.config.token)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    async fn get_commit(&self, repo: &RepoSlug, sha: &str) -> StressResult<CommitResponse> {
        let url = self.repo_url(repo, &format!("/git/commits/{sha}"));
        let resp = self.request(reqwest::Method::GET, &url).send().await?;
        Ok(check(resp).await?.json().await?)
    }
}

async fn check(resp: reqwest::Response) -> StressResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().await.unwrap_or_default();
        Err(StressError::api(status.as_u16(), body))
    }
}

#[async_trait]
impl SourceMutator for GitHubClient {
    async fn branch_head(&self, repo: &RepoSlug, branch: &str) -> StressResult<Option<String>> {
        let url = self.repo_url(repo, &format!("/branches/{branch}"));
        let resp = self.request(reqwest::Method::GET, &url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let branch: BranchResponse = check(resp).await?.json().await?;
        Ok(Some(branch.commit.sha))
    }

    async fn delete_branch(&self, repo: &RepoSlug, branch: &str) -> StressResult<()> {
        let url = self.repo_url(repo, &format!("/git/refs/heads/{branch}"));
        check(self.request(reqwest::Method::DELETE, &url).send().await?).await?;
        tracing::info!(%repo, branch, "branch deleted");
        Ok(())
    }

    async fn create_branch(&self, repo: &RepoSlug, branch: &str, sha: &str) -> StressResult<()> {
        let url = self.repo_url(repo, "/git/refs");
        let body = CreateRef {
            git_ref: format!("refs/heads/{branch}"),
            sha,
        };
        check(
            self.request(reqwest::Method::POST, &url)
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        tracing::info!(%repo, branch, sha, "branch created");
        Ok(())
    }

    async fn commit_file(
        &self,
        repo: &RepoSlug,
        branch: &str,
        change: &FileChange,
    ) -> StressResult<String> {
        let head = self
            .branch_head(repo, branch)
            .await?
            .ok_or_else(|| StressError::api(404, format!("branch {branch} not found")))?;
        let parent = self.get_commit(repo, &head).await?;

        let tree_body = CreateTree {
            base_tree: &parent.tree.sha,
            tree: vec![TreeEntry {
                path: &change.path,
                mode: "100644",
                kind: "blob",
                content: &change.content,
            }],
        };
        let tree: ShaRef = check(
            self.request(reqwest::Method::POST, &self.repo_url(repo, "/git/trees"))
                .json(&tree_body)
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        let commit_body = CreateCommit {
            message: &change.message,
            tree: &tree.sha,
            parents: vec![&parent.sha],
            author: GitAuthor {
                name: &change.author.name,
                email: &change.author.email,
                date: change.date.to_rfc3339(),
            },
        };
        let commit: ShaRef = check(
            self.request(reqwest::Method::POST, &self.repo_url(repo, "/git/commits"))
                .json(&commit_body)
                .send()
                .await?,
        )
        .await?
        .json()
        .await?;

        let ref_url = self.repo_url(repo, &format!("/git/refs/heads/{branch}"));
        check(
            self.request(reqwest::Method::PATCH, &ref_url)
                .json(&UpdateRef {
                    sha: &commit.sha,
                    force: false,
                })
                .send()
                .await?,
        )
        .await?;

        tracing::info!(%repo, branch, sha = %commit.sha, "committed");
        Ok(commit.sha)
    }
}
