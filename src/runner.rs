//! Spawns build attempts as independent tasks and keeps track of them.

use std::sync::Arc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::job::{Job, JobStore};
use crate::notification::Notification;
use crate::orchestrator::{BuildOutcome, Orchestrator};
use crate::publish::{PublishGate, PublishTicket};

pub const DEFAULT_MAX_JOBS: usize = 24;

/// Resolves once the spawned build attempt is over.
pub type BuildHandle = JoinHandle<Result<BuildOutcome>>;

/// Counts a spawned attempt as in flight until dropped, panics included.
struct InFlight(Arc<watch::Sender<usize>>);

impl InFlight {
    fn enter(counter: Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

#[derive(Clone)]
pub struct BuildRunner {
    orchestrator: Arc<Orchestrator>,
    gate: Arc<PublishGate>,
    jobs: Arc<Mutex<JobStore>>,
    in_flight: Arc<watch::Sender<usize>>,
}

impl BuildRunner {
    pub fn new(orchestrator: Orchestrator, max_jobs: usize) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            orchestrator: Arc::new(orchestrator),
            gate: Arc::new(PublishGate::new()),
            jobs: Arc::new(Mutex::new(JobStore::new(max_jobs))),
            in_flight: Arc::new(in_flight),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn jobs(&self) -> Arc<Mutex<JobStore>> {
        Arc::clone(&self.jobs)
    }

    /// Number of spawned attempts that have not finished yet.
    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Waits until every spawned attempt has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Runs one attempt to completion on the caller's task.
    pub async fn run(&self, notification: Notification) -> Result<BuildOutcome> {
        let ticket = self.gate.ticket(&notification.publish_key());
        self.execute(notification, ticket).await
    }

    /// Starts an attempt on its own task. The publish ticket is drawn here,
    /// so acceptance order decides which attempt may publish last.
    pub fn spawn(&self, notification: Notification) -> BuildHandle {
        let ticket = self.gate.ticket(&notification.publish_key());
        let guard = InFlight::enter(Arc::clone(&self.in_flight));
        let runner = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            runner.execute(notification, ticket).await
        })
    }

    async fn execute(
        &self,
        notification: Notification,
        ticket: PublishTicket,
    ) -> Result<BuildOutcome> {
        let mut job = Job::from_notification(&notification);
        let job_id = job.id.clone();
        job.mark_running();
        self.jobs.lock().await.add_job(job);

        info!(
            "Job {} - Push event for '{}' branch '{}' at {}. Starting build.",
            job_id,
            notification.repository.full_name,
            notification.branch(),
            notification.commit
        );

        let result = self.orchestrator.run(&notification, &ticket).await;

        let mut jobs = self.jobs.lock().await;
        match &result {
            Ok(BuildOutcome::Published { output, .. }) => {
                info!("Job {} completed successfully.", job_id);
                jobs.update_job(&job_id, |j| j.mark_success(output.clone()));
            }
            Ok(BuildOutcome::Superseded) => {
                warn!("Job {} superseded by a newer push.", job_id);
                jobs.update_job(&job_id, |j| j.mark_superseded());
            }
            Err(e) => {
                error!("Job {} failed: {}", job_id, e);
                jobs.update_job(&job_id, |j| j.mark_failed(e.to_string()));
            }
        }

        result
    }
}
