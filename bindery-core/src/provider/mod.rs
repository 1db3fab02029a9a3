//! Upstream book provider seam.
//!
//! The pipeline only depends on [`BookProvider`]: metadata for a book id,
//! and a fetch that lands a packaged EPUB on local disk while reporting
//! progress. The production client lives in [`client`].

mod client;

pub use client::ProviderClient;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Progress callback: percent in [0,100] plus a human-readable step.
pub type ProgressFn = dyn Fn(u8, &str) + Send + Sync;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonRef {
    pub name: String,
}

/// Book metadata as served by the upstream catalog API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookMetadata {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub isbn: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub authors: Vec<PersonRef>,
    #[serde(default)]
    pub publishers: Vec<PersonRef>,
    #[serde(default)]
    pub issued: String,
    #[serde(default)]
    pub cover: String,
}

/// A fetched book on local disk.
#[derive(Debug, Clone)]
pub struct FetchedBook {
    /// Path of the packaged EPUB; its parent directory is owned by the job
    /// and removed once the pipeline is done with it.
    pub path: PathBuf,
    pub title: String,
}

#[async_trait]
pub trait BookProvider: Send + Sync {
    async fn metadata(&self, book_id: &str) -> Result<BookMetadata, FetchError>;

    /// Download the packaged book under `dest_root`, reporting progress.
    async fn fetch(
        &self,
        book_id: &str,
        dest_root: &Path,
        progress: &ProgressFn,
    ) -> Result<FetchedBook, FetchError>;
}

/// Strip characters that are unsafe in filenames; ASCII alphanumerics,
/// space, dash and underscore survive, everything else is dropped. Capped
/// at 100 characters.
pub fn safe_filename(name: &str) -> String {
    let mut result: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    result.truncate(100);
    let trimmed = result.trim();
    if trimmed.is_empty() {
        "book".to_string()
    } else {
        trimmed.to_string()
    }
}
