//! Drone-compatible CI server client.
//!
//! Three seams are defined here so the engine can run against a scripted
//! server in tests:
//! - [`BuildSource`]: build snapshots (whole server or one repository)
//! - [`BuildRestarter`]: restart/fork one build
//! - [`LogProbe`]: first frame of one build step's log stream
//!
//! [`CiClient`] implements all three over HTTP and WebSocket.

use crate::build::{decode_population, BuildPopulation};
use crate::config::{CiEndpoint, RepoSlug};
use crate::result::{redact_token, StressError, StressResult};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Source of build snapshots.
///
/// Read-only and retry-free: callers decide whether to poll again.
#[async_trait]
pub trait BuildSource: Send + Sync {
    /// Every build known to the server
    async fn server_builds(&self) -> StressResult<BuildPopulation>;

    /// Builds of a single repository
    async fn repo_builds(&self, repo: &RepoSlug) -> StressResult<BuildPopulation>;
}

/// Issues restart requests for existing builds.
#[async_trait]
pub trait BuildRestarter: Send + Sync {
    /// Restart build `number` of `repo`
    async fn restart_build(&self, repo: &RepoSlug, number: u64) -> StressResult<()>;
}

/// Reads the first log frame of a build step.
#[async_trait]
pub trait LogProbe: Send + Sync {
    /// Connect to the step's log stream and return the first inbound frame
    async fn first_frame(&self, repo: &RepoSlug, number: u64, step: u32) -> StressResult<String>;
}

impl std::fmt::Debug for dyn BuildSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn BuildSource")
    }
}

impl std::fmt::Debug for dyn LogProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn LogProbe")
    }
}

/// HTTP + WebSocket client for a Drone-compatible server
#[derive(Debug, Clone)]
pub struct CiClient {
    endpoint: CiEndpoint,
    client: reqwest::Client,
}

impl CiClient {
    /// Create a client with a default 30 second request timeout
    #[must_use]
    pub fn new(endpoint: CiEndpoint) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { endpoint, client }
    }

    /// Create a client around a preconfigured reqwest client
    #[must_use]
    pub const fn with_client(endpoint: CiEndpoint, client: reqwest::Client) -> Self {
        Self { endpoint, client }
    }

    /// Server base address
    #[must_use]
    pub fn server(&self) -> &str {
        &self.endpoint.server
    }

    /// `GET /api/builds`
    #[must_use]
    pub fn server_builds_url(&self) -> String {
        format!(
            "{}/api/builds?access_token={}",
            self.endpoint.server, self.endpoint.token
        )
    }

    /// `GET /api/repos/{org}/{repo}/builds`
    #[must_use]
    pub fn repo_builds_url(&self, repo: &RepoSlug) -> String {
        format!(
            "{}/api/repos/{}/builds?access_token={}",
            self.endpoint.server, repo, self.endpoint.token
        )
    }

    /// `POST /api/repos/{org}/{repo}/builds/{number}`
    #[must_use]
    pub fn restart_url(&self, repo: &RepoSlug, number: u64) -> String {
        format!(
            "{}/api/repos/{}/builds/{}?access_token={}",
            self.endpoint.server, repo, number, self.endpoint.token
        )
    }

    /// `ws(s)://.../ws/logs/{org}/{repo}/{number}/{step}`
    ///
    /// The HTTP scheme of the server address is swapped for its WebSocket
    /// counterpart (`http` -> `ws`, `https` -> `wss`).
    pub fn log_stream_url(&self, repo: &RepoSlug, number: u64, step: u32) -> StressResult<Url> {
        let raw = format!(
            "{}/ws/logs/{}/{}/{}?access_token={}",
            self.endpoint.server, repo, number, step, self.endpoint.token
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| StressError::transport(format!("{}: {e}", redact_token(&raw))))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| StressError::transport(format!("cannot use scheme {scheme}")))?;
        Ok(url)
    }

    async fn fetch_population(&self, url: String) -> StressResult<BuildPopulation> {
        tracing::debug!(url = %redact_token(&url), "fetching build snapshot");
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StressError::api(status.as_u16(), body));
        }
        let payload = resp.bytes().await?;
        decode_population(&payload)
    }
}

#[async_trait]
impl BuildSource for CiClient {
    async fn server_builds(&self) -> StressResult<BuildPopulation> {
        self.fetch_population(self.server_builds_url()).await
    }

    async fn repo_builds(&self, repo: &RepoSlug) -> StressResult<BuildPopulation> {
        self.fetch_population(self.repo_builds_url(repo)).await
    }
}

#[async_trait]
impl BuildRestarter for CiClient {
    // `fork=true` is sent, but the server restarts the build in place; true
    // fork semantics are not implemented.
    async fn restart_build(&self, repo: &RepoSlug, number: u64) -> StressResult<()> {
        let url = self.restart_url(repo, number);
        let resp = self
            .client
            .post(&url)
            .form(&[("fork", "true")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StressError::api(status.as_u16(), body));
        }
        if status != reqwest::StatusCode::ACCEPTED {
            tracing::debug!(number, status = status.as_u16(), "restart answered without 202");
        }
        Ok(())
    }
}

#[async_trait]
impl LogProbe for CiClient {
    async fn first_frame(&self, repo: &RepoSlug, number: u64, step: u32) -> StressResult<String> {
        let url = self.log_stream_url(repo, number, step)?;
        tracing::debug!(url = %redact_token(url.as_str()), "reading logs");
        let (mut stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let frame = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(StressError::transport("log stream closed before first frame")),
        };
        // best effort: the server may already have gone away
        let _ = stream.close(None).await;
        Ok(frame_text(frame))
    }
}

fn frame_text(message: Message) -> String {
    match message {
        Message::Text(text) => text.as_str().to_owned(),
        Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Message::Close(frame) => frame.map_or_else(String::new, |f| f.reason.as_str().to_owned()),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => String::new(),
    }
}
