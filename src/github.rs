//! GitHub REST API access: branch head lookup and commit tarball download.

use async_trait::async_trait;
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::archive;
use crate::config::Config;
use crate::error::{Result, WebhookError};

const USER_AGENT: &str = concat!("github_webhook/", env!("CARGO_PKG_VERSION"));

/// Source of commit trees for the build orchestrator.
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    /// Resolves `branch` of `full_name` (`owner/name`) to a commit sha.
    async fn resolve_branch_head(&self, full_name: &str, branch: &str) -> Result<String>;

    /// Downloads the tarball of `commit` and extracts it into `dest`.
    async fn fetch_and_extract_commit(
        &self,
        full_name: &str,
        commit: &str,
        dest: &Path,
    ) -> Result<()>;
}

#[derive(Debug, Default, Deserialize)]
struct RefResponse {
    #[serde(default)]
    object: RefObject,
}

#[derive(Debug, Default, Deserialize)]
struct RefObject {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    sha: String,
}

/// Blocking reqwest client driven from `spawn_blocking`, so the tarball body
/// can be handed to the extractor as a plain `Read`.
///
/// The HTTP client is shared by all clones. It is built on first use from a
/// blocking thread, as `reqwest::blocking` must not be set up on the runtime.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    api_url: String,
    token: Option<String>,
    http: Arc<OnceLock<Client>>,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token,
            http: Arc::new(OnceLock::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_url.clone(), config.github_token.clone())
    }

    fn token(&self) -> Result<String> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| WebhookError::ConfigError("GITHUB_TOKEN not defined".to_string()))
    }

    fn http(&self) -> Result<&Client> {
        if let Some(client) = self.http.get() {
            return Ok(client);
        }
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        // a concurrent first call may have won; either client will do
        Ok(self.http.get_or_init(|| client))
    }

    fn get(&self, url: &str, token: &str) -> Result<Response> {
        debug!("GET {}", url);
        let response = self
            .http()?
            .get(url)
            .header(AUTHORIZATION, format!("token {}", token))
            .header(ACCEPT, "application/vnd.github+json")
            .send()?;
        Ok(response)
    }

    fn branch_head_blocking(&self, token: &str, full_name: &str, branch: &str) -> Result<String> {
        let url = format!(
            "{}/repos/{}/git/refs/heads/{}",
            self.api_url, full_name, branch
        );
        let reference: RefResponse = self.get(&url, token)?.json()?;

        match reference.object.kind.as_str() {
            "" => Err(WebhookError::RemoteError(format!(
                "Invalid repository ({}) or branch ({})",
                full_name, branch
            ))),
            "commit" => Ok(reference.object.sha),
            other => Err(WebhookError::RemoteError(format!(
                "Invalid reference type: {}",
                other
            ))),
        }
    }

    fn extract_commit_blocking(
        &self,
        token: &str,
        full_name: &str,
        commit: &str,
        dest: &Path,
    ) -> Result<()> {
        let url = format!("{}/repos/{}/tarball/{}", self.api_url, full_name, commit);
        let response = self.get(&url, token)?.error_for_status()?;
        archive::extract(response, dest)?;
        Ok(())
    }
}

#[async_trait]
impl RemoteRepository for GitHubClient {
    async fn resolve_branch_head(&self, full_name: &str, branch: &str) -> Result<String> {
        let token = self.token()?;
        let client = self.clone();
        let full_name = full_name.to_string();
        let branch = branch.to_string();
        tokio::task::spawn_blocking(move || {
            client.branch_head_blocking(&token, &full_name, &branch)
        })
        .await?
    }

    async fn fetch_and_extract_commit(
        &self,
        full_name: &str,
        commit: &str,
        dest: &Path,
    ) -> Result<()> {
        let token = self.token()?;
        let client = self.clone();
        let full_name = full_name.to_string();
        let commit = commit.to_string();
        let dest: PathBuf = dest.to_path_buf();
        tokio::task::spawn_blocking(move || {
            client.extract_commit_blocking(&token, &full_name, &commit, &dest)
        })
        .await?
    }
}
