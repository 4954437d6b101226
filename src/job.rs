use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::path::PathBuf;
use uuid::Uuid;

use crate::notification::Notification;

/// Represents the status of a build attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Superseded,
    Failed,
}

/// One build attempt for an accepted notification
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub repository: String,
    pub branch: String,
    pub commit: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

impl Job {
    /// Create a new job in Queued status
    pub fn from_notification(notification: &Notification) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            repository: notification.repository.full_name.clone(),
            branch: notification.branch().to_string(),
            commit: notification.commit.clone(),
            status: JobStatus::Queued,
            started_at: Utc::now(),
            completed_at: None,
            output: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
    }

    pub fn mark_success(&mut self, output: PathBuf) {
        self.status = JobStatus::Success;
        self.completed_at = Some(Utc::now());
        self.output = Some(output);
    }

    pub fn mark_superseded(&mut self) {
        self.status = JobStatus::Superseded;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.status, JobStatus::Queued | JobStatus::Running)
    }
}

/// Recent jobs kept in memory, oldest evicted first once `max_jobs` is reached.
/// Unfinished jobs are never evicted.
pub struct JobStore {
    jobs: VecDeque<Job>,
    max_jobs: usize,
}

impl JobStore {
    pub fn new(max_jobs: usize) -> Self {
        Self {
            jobs: VecDeque::new(),
            max_jobs,
        }
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push_back(job);
        while self.jobs.len() > self.max_jobs {
            match self.jobs.iter().position(Job::is_finished) {
                Some(idx) => {
                    self.jobs.remove(idx);
                }
                None => break,
            }
        }
    }

    pub fn update_job(&mut self, id: &str, update: impl FnOnce(&mut Job)) -> bool {
        match self.jobs.iter_mut().find(|j| j.id == id) {
            Some(job) => {
                update(job);
                true
            }
            None => false,
        }
    }

    /// Most recent first
    pub fn get_recent_jobs(&self, limit: usize) -> Vec<Job> {
        self.jobs.iter().rev().take(limit).cloned().collect()
    }

    pub fn get_jobs_by_status(&self, status: JobStatus) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|j| j.status == status)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
