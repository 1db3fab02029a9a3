//! In-memory registry of live and recently finished jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::job::{Job, JobState};

/// How long a successful job stays queryable after completion.
pub const RETAIN_SUCCESS: Duration = Duration::from_secs(5 * 60);
/// How long a failed job stays queryable.
pub const RETAIN_FAILURE: Duration = Duration::from_secs(2 * 60);

/// Per-state job totals for the stats endpoint.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct JobCounts {
    pub total: usize,
    pub starting: usize,
    pub queued: usize,
    pub downloading: usize,
    pub converting: usize,
    pub uploading: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Owns every [`Job`]. Reads take the map lock shared; writes take it
/// exclusive. Job mutation happens through the job's own lock, never while
/// holding the map lock.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<Uuid, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, book_id: impl Into<String>) -> Arc<Job> {
        let job = Arc::new(Job::new(book_id));
        self.jobs.write().await.insert(job.id, job.clone());
        debug!(job_id = %job.id, book_id = %job.book_id, "job created");
        job
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<Job>> {
        self.jobs.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<Job>> {
        self.jobs.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    /// Drop the job after `after` elapses. Lookups past that point return
    /// `None`, which the front door maps to 404.
    pub fn schedule_removal(self: &Arc<Self>, id: Uuid, after: Duration) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if registry.remove(id).await.is_some() {
                info!(job_id = %id, "retention elapsed, job removed");
            }
        });
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs: Vec<Arc<Job>> = self.jobs.read().await.values().cloned().collect();
        let mut counts = JobCounts {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            match job.read(|d| d.state).await {
                JobState::Starting => counts.starting += 1,
                JobState::Queued => counts.queued += 1,
                JobState::Downloading => counts.downloading += 1,
                JobState::Converting => counts.converting += 1,
                JobState::Uploading => counts.uploading += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
