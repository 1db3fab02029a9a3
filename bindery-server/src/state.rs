use std::sync::Arc;

use bindery_core::{
    ArtifactStore, BookProvider, Converter, JobRegistry, MetadataCache, StagePools,
};

use crate::config::Config;

/// Shared application state. Built once in `main` and handed to handlers by
/// extraction; nothing in the service reaches for globals.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<StateInner>,
}

struct StateInner {
    config: Config,
    registry: Arc<JobRegistry>,
    pools: Arc<StagePools>,
    cache: Option<Arc<dyn MetadataCache>>,
    store: Option<Arc<dyn ArtifactStore>>,
    provider: Arc<dyn BookProvider>,
    converter: Arc<Converter>,
}

impl AppState {
    pub fn new(
        config: Config,
        cache: Option<Arc<dyn MetadataCache>>,
        store: Option<Arc<dyn ArtifactStore>>,
        provider: Arc<dyn BookProvider>,
        converter: Converter,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                config,
                registry: Arc::new(JobRegistry::new()),
                pools: Arc::new(StagePools::new()),
                cache,
                store,
                provider,
                converter: Arc::new(converter),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    pub fn pools(&self) -> &Arc<StagePools> {
        &self.inner.pools
    }

    pub fn cache(&self) -> Option<&Arc<dyn MetadataCache>> {
        self.inner.cache.as_ref()
    }

    pub fn store(&self) -> Option<&Arc<dyn ArtifactStore>> {
        self.inner.store.as_ref()
    }

    pub fn provider(&self) -> &Arc<dyn BookProvider> {
        &self.inner.provider
    }

    pub fn converter(&self) -> &Arc<Converter> {
        &self.inner.converter
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
