//! Job records and their update broadcast.
//!
//! A [`Job`] is the tracked unit of work mapping one book id to one
//! artifact. Mutable fields live behind a per-job lock distinct from the
//! registry's map lock, so a broadcast never holds the map lock.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ErrorKind, PipelineError};

/// Capacity of each subscriber channel. Broadcasts that would block are
/// dropped; the next update supersedes the lost one.
pub const SUBSCRIBER_BUFFER: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Starting,
    Queued,
    Downloading,
    Converting,
    Uploading,
    Completed,
    #[serde(rename = "error")]
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Snapshot broadcast to subscribers on every job mutation.
#[derive(Debug, Clone, Serialize)]
pub struct JobUpdate {
    pub status: JobState,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epub_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epub_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minio_url: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cached: bool,
}

/// Mutable job fields, guarded by the job's own lock.
#[derive(Debug)]
pub struct JobData {
    pub state: JobState,
    pub progress: u8,
    pub message: String,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub book_title: Option<String>,
    pub artifact_size: Option<i64>,
    pub artifact_key: Option<String>,
    pub presigned_url: Option<String>,
    pub cached: bool,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

type Subscriber = (u64, mpsc::Sender<JobUpdate>);

pub struct Job {
    pub id: Uuid,
    pub book_id: String,
    pub created_at: DateTime<Utc>,
    data: RwLock<JobData>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_token: AtomicU64,
}

impl Job {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            book_id: book_id.into(),
            created_at: Utc::now(),
            data: RwLock::new(JobData {
                state: JobState::Starting,
                progress: 0,
                message: "Initializing download...".to_string(),
                error: None,
                error_kind: None,
                book_title: None,
                artifact_size: None,
                artifact_key: None,
                presigned_url: None,
                cached: false,
                uploaded_at: None,
                completed_at: None,
            }),
            subscribers: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Apply a mutation and broadcast the resulting snapshot.
    ///
    /// Terminal states are sticky: once `Completed` or `Failed` the mutation
    /// is a no-op and nothing is broadcast. Progress never decreases. Returns
    /// whether the mutation was applied.
    pub async fn apply<F>(&self, mutate: F) -> bool
    where
        F: FnOnce(&mut JobData),
    {
        let mut data = self.data.write().await;
        if data.state.is_terminal() {
            debug!(job_id = %self.id, "ignoring update to terminal job");
            return false;
        }

        let prev_progress = data.progress;
        mutate(&mut data);
        if data.progress < prev_progress {
            data.progress = prev_progress;
        }
        data.progress = data.progress.min(100);

        let update = snapshot(&data);
        let terminal = data.state.is_terminal();

        // Broadcast while still holding the data lock so subscribers observe
        // updates in the order they were applied.
        let mut subs = self.subscribers.lock().await;
        subs.retain(|(_, tx)| match tx.try_send(update.clone()) {
            Ok(()) => true,
            // Slow subscriber: drop this update, keep the channel.
            Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Closed(_)) => false,
        });
        if terminal {
            // The terminal update is the last one; dropping the senders
            // closes every subscriber channel.
            subs.clear();
        }
        true
    }

    pub async fn update_status(&self, state: JobState, message: impl Into<String>, progress: u8) {
        let message = message.into();
        self.apply(|data| {
            data.state = state;
            data.message = message;
            data.progress = progress;
        })
        .await;
    }

    /// Transition into `Failed` with the error's client-facing message.
    pub async fn fail(&self, err: &PipelineError) {
        let message = err.client_message();
        let kind = err.kind();
        self.apply(|data| {
            data.state = JobState::Failed;
            data.message = message.clone();
            data.error = Some(message);
            data.error_kind = Some(kind);
            data.completed_at = Some(Utc::now());
        })
        .await;
    }

    pub async fn snapshot(&self) -> JobUpdate {
        let data = self.data.read().await;
        snapshot(&data)
    }

    /// Read access to the full mutable state.
    pub async fn read<R>(&self, f: impl FnOnce(&JobData) -> R) -> R {
        let data = self.data.read().await;
        f(&data)
    }

    /// Register a subscriber channel. The current state is delivered as the
    /// first update. For a job already in a terminal state the channel is
    /// closed right after that snapshot, so the subscriber sees exactly one
    /// final update.
    pub async fn subscribe(&self) -> (u64, mpsc::Receiver<JobUpdate>) {
        let data = self.data.read().await;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let _ = tx.try_send(snapshot(&data));
        if !data.state.is_terminal() {
            self.subscribers.lock().await.push((token, tx));
        }
        (token, rx)
    }

    /// Remove and close a subscriber channel. Safe to call after the
    /// broadcast already pruned it.
    pub async fn unsubscribe(&self, token: u64) {
        self.subscribers.lock().await.retain(|(t, _)| *t != token);
    }

    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("book_id", &self.book_id)
            .finish_non_exhaustive()
    }
}

fn snapshot(data: &JobData) -> JobUpdate {
    JobUpdate {
        status: data.state,
        progress: data.progress,
        message: data.message.clone(),
        error: data.error.clone(),
        book_title: data.book_title.clone(),
        file_size: data.artifact_size,
        epub_size: data.artifact_size,
        epub_url: data.presigned_url.clone(),
        minio_url: data.presigned_url.clone(),
        cached: data.cached,
    }
}
