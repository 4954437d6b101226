//! Shared fixtures for driving the webhook router without network or builder.

use async_trait::async_trait;
use axum::Router;
use github_webhook::AppState;
use github_webhook::api::create_router;
use github_webhook::builder::Builder;
use github_webhook::config::Config;
use github_webhook::error::Result;
use github_webhook::github::RemoteRepository;
use github_webhook::orchestrator::Orchestrator;
use github_webhook::runner::{BuildRunner, DEFAULT_MAX_JOBS};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

pub const SECRET: &str = "mysecret";

/// Serves a one-file tree for any commit.
pub struct StubRemote;

#[async_trait]
impl RemoteRepository for StubRemote {
    async fn resolve_branch_head(&self, _full_name: &str, _branch: &str) -> Result<String> {
        Ok("4f2c1a9".to_string())
    }

    async fn fetch_and_extract_commit(
        &self,
        _full_name: &str,
        commit: &str,
        dest: &Path,
    ) -> Result<()> {
        std::fs::write(dest.join("COMMIT"), commit)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildCall {
    pub input: PathBuf,
    pub output: PathBuf,
    pub pointer: PathBuf,
}

/// Records invocations; optionally holds each build until released.
#[derive(Default)]
pub struct RecordingBuilder {
    pub calls: Mutex<Vec<BuildCall>>,
    pub hold: Option<Notify>,
}

#[async_trait]
impl Builder for RecordingBuilder {
    async fn build(&self, input: &Path, output: &Path, pointer: &Path) -> Result<()> {
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }
        self.calls.lock().unwrap().push(BuildCall {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
            pointer: pointer.to_path_buf(),
        });
        Ok(())
    }
}

pub struct TestApp {
    pub router: Router,
    pub runner: BuildRunner,
    pub builder: Arc<RecordingBuilder>,
    pub base: TempDir,
}

#[allow(dead_code)]
pub fn test_app(allowed_branches: &[&str]) -> TestApp {
    test_app_with(allowed_branches, Some(SECRET), RecordingBuilder::default())
}

pub fn test_app_with(
    allowed_branches: &[&str],
    secret: Option<&str>,
    builder: RecordingBuilder,
) -> TestApp {
    let base = tempfile::tempdir().unwrap();
    let config = Arc::new(Config {
        github_secret: secret.map(String::from),
        base_dir: Some(base.path().to_path_buf()),
        allowed_branches: allowed_branches.iter().map(|b| b.to_string()).collect(),
        ..Config::default()
    });

    let builder = Arc::new(builder);
    let runner = BuildRunner::new(
        Orchestrator::new(Arc::clone(&config), Arc::new(StubRemote), builder.clone()),
        DEFAULT_MAX_JOBS,
    );
    let state = Arc::new(AppState {
        config,
        runner: runner.clone(),
    });

    TestApp {
        router: create_router(state),
        runner,
        builder,
        base,
    }
}

#[allow(dead_code)]
pub fn push_body(git_ref: &str, deleted: bool) -> String {
    serde_json::json!({
        "ref": git_ref,
        "before": "0000000",
        "after": "4f2c1a9",
        "deleted": deleted,
        "repository": {
            "name": "site",
            "full_name": "octo/site",
            "owner": { "login": "octo", "id": 1 }
        },
        "pusher": { "name": "octo" }
    })
    .to_string()
}
