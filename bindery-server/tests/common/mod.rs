//! Shared fixtures for the server integration tests: a scriptable stub
//! provider plus an app state wired to in-memory backends.
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bindery_core::{
    safe_filename, ArtifactStore, BookMetadata, BookProvider, CacheRecord, Converter, FetchError,
    FetchedBook, JobCounts, JobRegistry, MemoryArtifactStore, MemoryCache, MetadataCache,
    PersonRef, ProgressFn,
};
use bindery_server::{AppState, Config};
use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const STUB_EPUB_BYTES: &[u8] = b"stub epub payload";
pub const STUB_TITLE: &str = "Stubbed Book Title";

#[derive(Clone)]
pub enum StubBehavior {
    /// Write a small epub and succeed.
    Succeed,
    /// Upstream 404.
    NotFound,
    /// Upstream 401.
    AuthRejected,
    /// Block inside the fetch until the test releases a permit.
    Gated(Arc<Semaphore>),
}

pub struct StubProvider {
    behavior: StubBehavior,
    fetches: AtomicUsize,
}

impl StubProvider {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BookProvider for StubProvider {
    async fn metadata(&self, book_id: &str) -> Result<BookMetadata, FetchError> {
        match &self.behavior {
            StubBehavior::NotFound => Err(FetchError::NotFound { status: 404 }),
            StubBehavior::AuthRejected => Err(FetchError::Auth { status: 401 }),
            _ => Ok(BookMetadata {
                id: book_id.to_string(),
                isbn: book_id.to_string(),
                title: STUB_TITLE.to_string(),
                description: "A book that exists only in tests.".to_string(),
                authors: vec![PersonRef {
                    name: "Test Author".to_string(),
                }],
                publishers: vec![PersonRef {
                    name: "Test Press".to_string(),
                }],
                issued: "2024-01-01".to_string(),
                cover: String::new(),
            }),
        }
    }

    async fn fetch(
        &self,
        book_id: &str,
        dest_root: &Path,
        progress: &ProgressFn,
    ) -> Result<FetchedBook, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        progress(20, "Downloading book content...");

        match &self.behavior {
            StubBehavior::NotFound => return Err(FetchError::NotFound { status: 404 }),
            StubBehavior::AuthRejected => return Err(FetchError::Auth { status: 401 }),
            StubBehavior::Gated(gate) => {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|_| FetchError::Protocol("gate closed".to_string()))?;
                permit.forget();
            }
            StubBehavior::Succeed => {}
        }

        let dir_name = safe_filename(STUB_TITLE);
        let book_dir = dest_root.join(&dir_name);
        tokio::fs::create_dir_all(&book_dir).await?;
        let path = book_dir.join(format!("{dir_name}.epub"));
        tokio::fs::write(&path, STUB_EPUB_BYTES).await?;

        progress(70, "Download complete, preparing conversion...");
        Ok(FetchedBook {
            path,
            title: STUB_TITLE.to_string(),
        })
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub store: Arc<MemoryArtifactStore>,
    pub cache: Arc<MemoryCache>,
    pub provider: Arc<StubProvider>,
    // Holds the scratch/books directories alive for the test's duration.
    pub tmp: TempDir,
}

pub struct TestEnvBuilder {
    behavior: StubBehavior,
    with_store: bool,
    convert_command: String,
}

impl TestEnvBuilder {
    pub fn new() -> Self {
        Self {
            behavior: StubBehavior::Succeed,
            with_store: true,
            // `cp` keeps converted output byte-identical to the input.
            convert_command: "cp".to_string(),
        }
    }

    pub fn behavior(mut self, behavior: StubBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn without_store(mut self) -> Self {
        self.with_store = false;
        self
    }

    pub fn convert_command(mut self, command: impl Into<String>) -> Self {
        self.convert_command = command.into();
        self
    }

    pub fn build(self) -> TestEnv {
        let tmp = TempDir::new().expect("tempdir");

        let mut config = Config::from_env();
        config.scratch_dir = tmp.path().join("scratch");
        config.books_dir = tmp.path().join("books");
        config.presigned_ttl_hours = 1;
        config.convert_command = self.convert_command.clone();

        let store = Arc::new(MemoryArtifactStore::new());
        let cache = Arc::new(MemoryCache::new());
        let provider = Arc::new(StubProvider::new(self.behavior));

        let store_arg: Option<Arc<dyn ArtifactStore>> = if self.with_store {
            Some(store.clone())
        } else {
            None
        };
        let cache_arg: Option<Arc<dyn MetadataCache>> = Some(cache.clone());

        let state = AppState::new(
            config,
            cache_arg,
            store_arg,
            provider.clone(),
            Converter::new(self.convert_command),
        );

        TestEnv {
            state,
            store,
            cache,
            provider,
            tmp,
        }
    }
}

pub fn cached_record(book_id: &str) -> CacheRecord {
    CacheRecord {
        book_id: book_id.to_string(),
        book_title: "Previously Fetched Book".to_string(),
        artifact_key: format!("{book_id}/Previously Fetched Book.epub"),
        artifact_size: 2048,
        uploaded_at: Utc::now(),
    }
}

/// Poll the registry until its per-state counts satisfy `predicate`, or the
/// deadline passes.
pub async fn wait_for_counts(
    registry: &Arc<JobRegistry>,
    timeout: Duration,
    predicate: impl Fn(&JobCounts) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let counts = registry.counts().await;
        if predicate(&counts) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
