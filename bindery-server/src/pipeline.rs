//! Per-job pipeline: cache lookup, fetch, convert, upload, cache write.
//!
//! One orchestrator task runs per created job. Capacity comes from the
//! shared stage pools; the fetch permit is held from the start of the
//! download through the upload so the fetch cap bounds the whole
//! network-heavy span, while the convert permit only covers the subprocess.

use std::path::PathBuf;
use std::sync::Arc;

use bindery_core::{
    safe_filename, CacheRecord, Job, JobState, PipelineError, RETAIN_FAILURE, RETAIN_SUCCESS,
};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Drive one job to a terminal state and schedule its retention.
pub async fn run(state: AppState, job: Arc<Job>) {
    let registry = state.registry().clone();
    match execute(&state, &job).await {
        Ok(()) => {
            registry.schedule_removal(job.id, RETAIN_SUCCESS);
        }
        Err(err) => {
            error!(job_id = %job.id, book_id = %job.book_id, error = %err, "pipeline failed");
            job.fail(&err).await;
            registry.schedule_removal(job.id, RETAIN_FAILURE);
        }
    }
}

async fn execute(state: &AppState, job: &Arc<Job>) -> Result<(), PipelineError> {
    let book_id = job.book_id.clone();
    let ttl = state.config().presigned_ttl();

    // Cache lookup. Any cache error counts as a miss; a record whose URL
    // cannot be minted is treated as stale and the job falls through to a
    // full fetch.
    if let Some(store) = state.store() {
        let record = match state.cache() {
            Some(cache) => cache.get(&book_id).await.unwrap_or_else(|err| {
                warn!(book_id, error = %err, "cache read failed, treating as miss");
                None
            }),
            None => None,
        };

        if let Some(record) = record {
            match store.presign_get(&record.artifact_key, ttl).await {
                Ok(url) => {
                    info!(job_id = %job.id, book_id, "serving from cache");
                    complete_from_cache(job, &record, url).await;
                    return Ok(());
                }
                Err(err) => {
                    warn!(book_id, error = %err, "stale cache record, fetching fresh copy");
                }
            }
        } else if let Some(record) = find_existing_artifact(state, store, &book_id).await {
            match store.presign_get(&record.artifact_key, ttl).await {
                Ok(url) => {
                    info!(job_id = %job.id, book_id, "serving existing artifact found by prefix");
                    complete_from_cache(job, &record, url).await;
                    return Ok(());
                }
                Err(err) => {
                    warn!(book_id, error = %err, "failed to presign existing artifact");
                }
            }
        }
    }

    // Without an object store the artifact could not be delivered after the
    // retention window, so the job is rejected outright.
    let store = state
        .store()
        .cloned()
        .ok_or(PipelineError::StorageUnavailable)?;

    // Fetch slot. `Queued` is only reported when the pool would make us
    // wait; with a free slot the job goes straight to `Downloading`.
    let pools = state.pools().clone();
    let _fetch_permit = match pools.try_acquire_fetch() {
        Some(permit) => permit,
        None => {
            info!(job_id = %job.id, "waiting for a fetch slot");
            job.update_status(JobState::Queued, "Waiting for a download slot...", 0)
                .await;
            pools.acquire_fetch().await
        }
    };

    job.update_status(JobState::Downloading, "Connecting to provider...", 10)
        .await;

    // Forward fetch progress through a channel so updates reach the job in
    // the order the fetcher reported them.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(u8, String)>();
    let progress_job = job.clone();
    let forwarder = tokio::spawn(async move {
        while let Some((pct, message)) = progress_rx.recv().await {
            progress_job
                .update_status(JobState::Downloading, message, pct)
                .await;
        }
    });

    let fetched = {
        let progress = move |pct: u8, message: &str| {
            let _ = progress_tx.send((pct, message.to_string()));
        };
        state
            .provider()
            .fetch(&book_id, &state.config().books_dir, &progress)
            .await
    };
    let _ = forwarder.await;

    let fetched = fetched.map_err(PipelineError::from)?;
    // The fetched book directory is removed on every exit path from here on.
    let _book_dir_guard = DirGuard::new(fetched.path.parent().map(PathBuf::from));

    // Convert slot covers only the subprocess.
    let convert_permit = pools.acquire_convert().await;
    job.update_status(JobState::Converting, "Converting book to EPUB...", 80)
        .await;

    let scratch_dir = state.config().scratch_dir.clone();
    tokio::fs::create_dir_all(&scratch_dir)
        .await
        .map_err(|e| PipelineError::Conversion(format!("scratch dir unavailable: {e}")))?;
    let output_path = scratch_dir.join(format!(
        "{}_{}.epub",
        safe_filename(&fetched.title),
        book_id
    ));

    if let Err(err) = state.converter().convert(&fetched.path, &output_path).await {
        warn!(job_id = %job.id, error = %err, "conversion failed, falling back to byte copy");
        tokio::fs::copy(&fetched.path, &output_path)
            .await
            .map_err(|e| PipelineError::Conversion(e.to_string()))?;
    }
    drop(convert_permit);

    // Upload and mint the download URL.
    job.update_status(JobState::Uploading, "Uploading to storage...", 90)
        .await;
    let (artifact_key, artifact_size) = store
        .upload(&book_id, &output_path)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;
    let presigned_url = store
        .presign_get(&artifact_key, ttl)
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?;

    if let Err(err) = tokio::fs::remove_file(&output_path).await {
        warn!(path = %output_path.display(), error = %err, "failed to remove local artifact");
    }

    // Cache write is best-effort; a failure costs the next request a fetch.
    let uploaded_at = Utc::now();
    if let Some(cache) = state.cache() {
        let record = CacheRecord {
            book_id: book_id.clone(),
            book_title: fetched.title.clone(),
            artifact_key: artifact_key.clone(),
            artifact_size,
            uploaded_at,
        };
        if let Err(err) = cache.put(&record).await {
            warn!(book_id, error = %err, "failed to write cache record");
        }
    }

    info!(job_id = %job.id, book_id, key = %artifact_key, size = artifact_size, "job completed");
    job.apply(|data| {
        data.state = JobState::Completed;
        data.progress = 100;
        data.message = "Download complete!".to_string();
        data.book_title = Some(fetched.title.clone());
        data.artifact_size = Some(artifact_size);
        data.artifact_key = Some(artifact_key.clone());
        data.presigned_url = Some(presigned_url.clone());
        data.uploaded_at = Some(uploaded_at);
        data.completed_at = Some(uploaded_at);
    })
    .await;

    Ok(())
}

/// Complete a job directly from a cache record. Used both by the pipeline's
/// own lookup and by the front door's synchronous probe; consumes no
/// capacity from either pool.
pub async fn complete_from_cache(job: &Job, record: &CacheRecord, presigned_url: String) {
    let record = record.clone();
    job.apply(move |data| {
        data.state = JobState::Completed;
        data.progress = 100;
        data.message = "Book retrieved from cache".to_string();
        data.cached = true;
        data.book_title = Some(record.book_title);
        data.artifact_size = Some(record.artifact_size);
        data.artifact_key = Some(record.artifact_key);
        data.presigned_url = Some(presigned_url);
        data.uploaded_at = Some(record.uploaded_at);
        data.completed_at = Some(Utc::now());
    })
    .await;
}

/// Fallback for a cold cache: any `.epub` already sitting under the book's
/// prefix is reused, and the repaired record is written back best-effort.
async fn find_existing_artifact(
    state: &AppState,
    store: &Arc<dyn bindery_core::ArtifactStore>,
    book_id: &str,
) -> Option<CacheRecord> {
    let (artifact_key, artifact_size) = match store.find_artifact(book_id).await {
        Ok(Some(found)) => found,
        Ok(None) => return None,
        Err(err) => {
            warn!(book_id, error = %err, "prefix lookup failed");
            return None;
        }
    };

    let record = CacheRecord {
        book_id: book_id.to_string(),
        book_title: title_from_key(&artifact_key),
        artifact_key,
        artifact_size,
        uploaded_at: Utc::now(),
    };
    if let Some(cache) = state.cache() {
        if let Err(err) = cache.put(&record).await {
            warn!(book_id, error = %err, "failed to repair cache record");
        }
    }
    Some(record)
}

fn title_from_key(key: &str) -> String {
    std::path::Path::new(key)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| key.to_string())
}

/// Removes a directory when dropped. Stands in for the original's deferred
/// cleanup of the per-book download directory.
struct DirGuard {
    dir: Option<PathBuf>,
}

impl DirGuard {
    fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

impl Drop for DirGuard {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "failed to remove book directory");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_from_key_strips_prefix_and_extension() {
        assert_eq!(
            title_from_key("9781491936153/Designing Data-Intensive Applications.epub"),
            "Designing Data-Intensive Applications"
        );
        assert_eq!(title_from_key("id/book.epub"), "book");
    }
}
