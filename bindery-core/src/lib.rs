//! # bindery-core
//!
//! Domain types and backend adapters for the bindery book retrieval
//! service: the job registry and its update broadcast, the two-pool
//! capacity scheduler, the artifact store and metadata cache adapters, the
//! converter gateway, and the upstream provider seam. The HTTP front door
//! and the pipeline orchestrator live in `bindery-server`.

pub mod cache;
pub mod convert;
pub mod error;
pub mod job;
pub mod provider;
pub mod registry;
pub mod scheduler;
pub mod storage;

pub use cache::{CacheRecord, MemoryCache, MetadataCache, RedisCache};
pub use convert::{ConvertError, Converter, CONVERT_TIMEOUT};
pub use error::{ErrorKind, FetchError, PipelineError, Result};
pub use job::{Job, JobState, JobUpdate, SUBSCRIBER_BUFFER};
pub use provider::{
    safe_filename, BookMetadata, BookProvider, FetchedBook, PersonRef, ProgressFn, ProviderClient,
};
pub use registry::{JobCounts, JobRegistry, RETAIN_FAILURE, RETAIN_SUCCESS};
pub use scheduler::{PoolStats, PoolUsage, StagePools, CONVERT_SLOTS, FETCH_SLOTS};
pub use storage::{
    ArtifactStore, MemoryArtifactStore, S3ArtifactStore, S3Config, StoreError,
};
