//! One build attempt: stage a commit snapshot, pick a build output path,
//! run the builder.

use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::builder::Builder;
use crate::config::Config;
use crate::error::{Result, WebhookError};
use crate::github::RemoteRepository;
use crate::notification::Notification;
use crate::publish::PublishTicket;

const SNAPSHOT_PREFIX: &str = "gw_";
const MAX_OUTPUT_ATTEMPTS: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    /// The builder succeeded and was told to point `pointer` at `output`.
    Published { output: PathBuf, pointer: PathBuf },
    /// A newer notification for the same repository+branch already published.
    Superseded,
}

/// Creates a fresh directory `<builds_dir>/<build_id>`, appending `-` to the
/// name until an unused one is found.
///
/// `create_dir` is the existence check, so two concurrent attempts can never
/// be handed the same directory.
pub async fn allocate_build_output(builds_dir: &Path, build_id: &str) -> Result<PathBuf> {
    fs::create_dir_all(builds_dir).await?;

    let mut name = build_id.to_string();
    for _ in 0..MAX_OUTPUT_ATTEMPTS {
        let candidate = builds_dir.join(&name);
        match fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => name.push('-'),
            Err(e) => return Err(e.into()),
        }
    }

    Err(WebhookError::IoError(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "no free build output for {} under {}",
            build_id,
            builds_dir.display()
        ),
    )))
}

/// `<base>/htdocs/<owner>/<name>--<branch>`
pub fn publish_pointer_path(base_dir: &Path, notification: &Notification) -> PathBuf {
    base_dir
        .join("htdocs")
        .join(&notification.repository.owner.login)
        .join(format!(
            "{}--{}",
            notification.repository.name,
            notification.branch()
        ))
}

pub struct Orchestrator {
    config: Arc<Config>,
    remote: Arc<dyn RemoteRepository>,
    builder: Arc<dyn Builder>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        remote: Arc<dyn RemoteRepository>,
        builder: Arc<dyn Builder>,
    ) -> Self {
        Self {
            config,
            remote,
            builder,
        }
    }

    pub fn remote(&self) -> &dyn RemoteRepository {
        self.remote.as_ref()
    }

    /// Runs one build attempt. The commit snapshot is removed when this
    /// returns, whatever the outcome.
    pub async fn run(
        &self,
        notification: &Notification,
        ticket: &PublishTicket,
    ) -> Result<BuildOutcome> {
        let repo = &notification.repository.full_name;
        info!(
            "{}: Processing payload: {} ({})",
            repo,
            notification.git_ref,
            notification.branch()
        );

        let snapshot = tempfile::Builder::new()
            .prefix(SNAPSHOT_PREFIX)
            .tempdir()?;

        info!(
            "{}: Retrieving files: {} ({})",
            repo, notification.git_ref, notification.commit
        );
        self.remote
            .fetch_and_extract_commit(repo, &notification.commit, snapshot.path())
            .await?;

        let base_dir = self.config.resolve_base_dir()?;

        let permit = ticket.acquire().await;
        if permit.is_superseded() {
            warn!(
                "{}: Skipping {}: a newer push for {} was already published",
                repo,
                notification.commit,
                ticket.key()
            );
            return Ok(BuildOutcome::Superseded);
        }

        let build_id = format!("{}-{}", notification.commit, Utc::now().timestamp());
        let output = allocate_build_output(&base_dir.join("builds"), &build_id).await?;
        let pointer = publish_pointer_path(&base_dir, notification);

        info!(
            "{}: Running builder: {} -> {}",
            repo,
            snapshot.path().display(),
            output.display()
        );
        self.builder
            .build(snapshot.path(), &output, &pointer)
            .await?;
        permit.commit();

        info!("{}: Success", repo);
        Ok(BuildOutcome::Published { output, pointer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::{EventKind, Owner, Repository};
    use crate::publish::PublishGate;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FakeRemote {
        fail: bool,
        staged: Mutex<Option<PathBuf>>,
    }

    impl FakeRemote {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                staged: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl RemoteRepository for FakeRemote {
        async fn resolve_branch_head(&self, _full_name: &str, _branch: &str) -> Result<String> {
            Ok("4f2c1a9".to_string())
        }

        async fn fetch_and_extract_commit(
            &self,
            _full_name: &str,
            _commit: &str,
            dest: &Path,
        ) -> Result<()> {
            *self.staged.lock().unwrap() = Some(dest.to_path_buf());
            if self.fail {
                return Err(WebhookError::RemoteError("tarball unavailable".to_string()));
            }
            std::fs::write(dest.join("index.md"), "# site")?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingBuilder {
        fail: bool,
        calls: Mutex<Vec<(PathBuf, PathBuf, PathBuf)>>,
        saw_snapshot: Mutex<bool>,
    }

    #[async_trait]
    impl Builder for RecordingBuilder {
        async fn build(&self, input: &Path, output: &Path, pointer: &Path) -> Result<()> {
            *self.saw_snapshot.lock().unwrap() = input.join("index.md").is_file();
            self.calls.lock().unwrap().push((
                input.to_path_buf(),
                output.to_path_buf(),
                pointer.to_path_buf(),
            ));
            if self.fail {
                return Err(WebhookError::BuildFailed("exit status: 1".to_string()));
            }
            Ok(())
        }
    }

    fn notification() -> Notification {
        Notification {
            event: EventKind::Push,
            zen: None,
            commit: "4f2c1a9".to_string(),
            deleted: false,
            git_ref: "refs/heads/main".to_string(),
            repository: Repository {
                name: "site".to_string(),
                full_name: "octo/site".to_string(),
                owner: Owner {
                    login: "octo".to_string(),
                },
            },
        }
    }

    fn config(base_dir: &Path) -> Arc<Config> {
        Arc::new(Config {
            base_dir: Some(base_dir.to_path_buf()),
            ..Config::default()
        })
    }

    #[tokio::test]
    async fn publishes_into_fresh_build_output() {
        let base = tempfile::tempdir().unwrap();
        let remote = FakeRemote::new(false);
        let builder = Arc::new(RecordingBuilder::default());
        let orchestrator = Orchestrator::new(config(base.path()), remote.clone(), builder.clone());
        let gate = PublishGate::new();
        let n = notification();

        let outcome = orchestrator
            .run(&n, &gate.ticket(&n.publish_key()))
            .await
            .unwrap();

        let BuildOutcome::Published { output, pointer } = outcome else {
            panic!("expected a publish");
        };
        assert_eq!(output.parent().unwrap(), base.path().join("builds"));
        let name = output.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("4f2c1a9-"));
        assert!(name["4f2c1a9-".len()..].parse::<i64>().is_ok());
        assert!(output.is_dir());
        assert_eq!(pointer, base.path().join("htdocs/octo/site--main"));

        assert!(*builder.saw_snapshot.lock().unwrap());
        let calls = builder.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, output);

        let staged = remote.staged.lock().unwrap().clone().unwrap();
        assert_eq!(calls[0].0, staged);
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn fetch_failure_still_removes_snapshot() {
        let base = tempfile::tempdir().unwrap();
        let remote = FakeRemote::new(true);
        let builder = Arc::new(RecordingBuilder::default());
        let orchestrator = Orchestrator::new(config(base.path()), remote.clone(), builder.clone());
        let gate = PublishGate::new();
        let n = notification();

        let err = orchestrator
            .run(&n, &gate.ticket(&n.publish_key()))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::RemoteError(_)));

        let staged = remote.staged.lock().unwrap().clone().unwrap();
        assert!(!staged.exists());
        assert!(builder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn relative_base_dir_aborts_before_building() {
        let remote = FakeRemote::new(false);
        let builder = Arc::new(RecordingBuilder::default());
        let config = Arc::new(Config {
            base_dir: Some(PathBuf::from("relative/base")),
            ..Config::default()
        });
        let orchestrator = Orchestrator::new(config, remote, builder.clone());
        let gate = PublishGate::new();
        let n = notification();

        let err = orchestrator
            .run(&n, &gate.ticket(&n.publish_key()))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::ConfigError(_)));
        assert!(builder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn builder_failure_is_returned() {
        let base = tempfile::tempdir().unwrap();
        let remote = FakeRemote::new(false);
        let builder = Arc::new(RecordingBuilder {
            fail: true,
            ..RecordingBuilder::default()
        });
        let orchestrator = Orchestrator::new(config(base.path()), remote.clone(), builder);
        let gate = PublishGate::new();
        let n = notification();
        let ticket = gate.ticket(&n.publish_key());

        let err = orchestrator.run(&n, &ticket).await.unwrap_err();
        assert!(matches!(err, WebhookError::BuildFailed(_)));
        assert!(!remote.staged.lock().unwrap().clone().unwrap().exists());

        // a failed build is not a publish
        let retry = gate.ticket(&n.publish_key());
        assert!(!ticket.acquire().await.is_superseded());
        assert!(!retry.acquire().await.is_superseded());
    }

    #[tokio::test]
    async fn superseded_attempt_skips_builder() {
        let base = tempfile::tempdir().unwrap();
        let builder = Arc::new(RecordingBuilder::default());
        let orchestrator =
            Orchestrator::new(config(base.path()), FakeRemote::new(false), builder.clone());
        let gate = PublishGate::new();
        let n = notification();

        let older = gate.ticket(&n.publish_key());
        let newer = gate.ticket(&n.publish_key());
        let first = orchestrator.run(&n, &newer).await.unwrap();
        assert!(matches!(first, BuildOutcome::Published { .. }));

        let second = orchestrator.run(&n, &older).await.unwrap();
        assert_eq!(second, BuildOutcome::Superseded);
        assert_eq!(builder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn colliding_build_output_gets_suffix() {
        let base = tempfile::tempdir().unwrap();
        let builds = base.path().join("builds");
        std::fs::create_dir_all(builds.join("4f2c1a9-1700000000")).unwrap();

        let first = allocate_build_output(&builds, "4f2c1a9-1700000000")
            .await
            .unwrap();
        assert_eq!(first, builds.join("4f2c1a9-1700000000-"));
        assert!(first.is_dir());

        let second = allocate_build_output(&builds, "4f2c1a9-1700000000")
            .await
            .unwrap();
        assert_eq!(second, builds.join("4f2c1a9-1700000000--"));
    }

    #[tokio::test]
    async fn concurrent_allocations_never_share_a_directory() {
        let base = tempfile::tempdir().unwrap();
        let builds = base.path().join("builds");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let builds = builds.clone();
                tokio::spawn(async move { allocate_build_output(&builds, "abc-1").await })
            })
            .collect();

        let mut paths = Vec::new();
        for handle in handles {
            paths.push(handle.await.unwrap().unwrap());
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 8);
    }
}
