//! Two-pool capacity scheduler for the pipeline.
//!
//! The fetch pool bounds how many jobs may run the upstream fetch at once;
//! the convert pool bounds concurrent converter subprocesses. Permits are
//! released by drop, so every exit path gives the slot back, and a waiter
//! cancelled mid-acquire never consumes one.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrent upstream fetches.
pub const FETCH_SLOTS: usize = 3;
/// Concurrent converter subprocesses.
pub const CONVERT_SLOTS: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct PoolUsage {
    pub total: usize,
    pub used: usize,
    pub free: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub fetch: PoolUsage,
    pub convert: PoolUsage,
}

pub struct StagePools {
    fetch: Arc<Semaphore>,
    convert: Arc<Semaphore>,
    fetch_cap: usize,
    convert_cap: usize,
}

impl Default for StagePools {
    fn default() -> Self {
        Self::with_caps(FETCH_SLOTS, CONVERT_SLOTS)
    }
}

impl StagePools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caps(fetch_cap: usize, convert_cap: usize) -> Self {
        Self {
            fetch: Arc::new(Semaphore::new(fetch_cap)),
            convert: Arc::new(Semaphore::new(convert_cap)),
            fetch_cap,
            convert_cap,
        }
    }

    /// Grab a fetch slot without waiting; `None` means the pool is full and
    /// the caller should report itself queued before blocking.
    pub fn try_acquire_fetch(&self) -> Option<OwnedSemaphorePermit> {
        self.fetch.clone().try_acquire_owned().ok()
    }

    pub async fn acquire_fetch(&self) -> OwnedSemaphorePermit {
        self.fetch
            .clone()
            .acquire_owned()
            .await
            .expect("fetch pool should not be closed")
    }

    pub async fn acquire_convert(&self) -> OwnedSemaphorePermit {
        self.convert
            .clone()
            .acquire_owned()
            .await
            .expect("convert pool should not be closed")
    }

    pub fn stats(&self) -> PoolStats {
        let fetch_free = self.fetch.available_permits();
        let convert_free = self.convert.available_permits();
        PoolStats {
            fetch: PoolUsage {
                total: self.fetch_cap,
                used: self.fetch_cap - fetch_free,
                free: fetch_free,
            },
            convert: PoolUsage {
                total: self.convert_cap,
                used: self.convert_cap - convert_free,
                free: convert_free,
            },
        }
    }
}
