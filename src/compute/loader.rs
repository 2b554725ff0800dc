//! Resolves a module variant to a live capability object.
//!
//! Bytes come from the module cache when present, otherwise from the fetcher,
//! in which case they are written back to the cache once the module has been
//! instantiated. Concurrent loads of the same cache key share one in-flight
//! future, so a second caller never triggers a second fetch or compile.

use std::{collections::HashMap, sync::Arc, time::Instant};

use anyhow::Context;
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use super::{
    capability::Capability,
    fetch::{HttpFetcher, ModuleFetcher},
    module_cache::{MemoryModuleCache, ModuleCache, SqliteModuleCache},
    runtime::{default_runtime, ModuleRuntime},
    variant::{CacheKey, ModuleVariant},
};
use crate::config::HostConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("fetch {location} failed: {message}")]
    Fetch { location: String, message: String },

    #[error("compile {key} failed: {message}")]
    Compile { key: String, message: String },

    #[error("instantiate {key} failed: {message}")]
    Instantiate { key: String, message: String },
}

pub type LoadResult = Result<Arc<dyn Capability>, LoadError>;

type InFlight = Arc<Mutex<HashMap<CacheKey, Shared<BoxFuture<'static, LoadResult>>>>>;

#[derive(Clone)]
pub struct ModuleLoader {
    cache: Arc<dyn ModuleCache>,
    fetcher: Arc<dyn ModuleFetcher>,
    runtime: Arc<dyn ModuleRuntime>,
    in_flight: InFlight,
}

impl ModuleLoader {
    pub fn new(
        cache: Arc<dyn ModuleCache>,
        fetcher: Arc<dyn ModuleFetcher>,
        runtime: Arc<dyn ModuleRuntime>,
    ) -> Self {
        Self {
            cache,
            fetcher,
            runtime,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Production wiring: SQLite cache (in-memory when disabled), the
    /// HTTP/file fetcher and the default runtime.
    pub fn from_config(config: &HostConfig) -> anyhow::Result<Self> {
        let cache: Arc<dyn ModuleCache> = if config.cache_disabled {
            Arc::new(MemoryModuleCache::new())
        } else {
            Arc::new(SqliteModuleCache::new(config.cache_db_path()))
        };
        let http = reqwest::Client::builder()
            .user_agent(concat!("cue-worker/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        let fetcher = Arc::new(HttpFetcher::new(http, config.max_module_bytes));
        let runtime = default_runtime(config)?;
        Ok(Self::new(cache, fetcher, runtime))
    }

    /// Load `variant` from cache or `location`, joining an identical load
    /// that is already in progress.
    pub async fn load(&self, variant: &ModuleVariant, location: &str) -> LoadResult {
        let key = variant.cache_key();
        let pending = {
            let mut table = self.in_flight.lock();
            if let Some(existing) = table.get(&key) {
                tracing::debug!(target: "cue_worker", key = %key, "joining in-flight module load");
                existing.clone()
            } else {
                let fut = self
                    .clone()
                    .resolve(variant.clone(), location.to_string())
                    .boxed()
                    .shared();
                table.insert(key, fut.clone());
                fut
            }
        };
        pending.await
    }

    async fn resolve(self, variant: ModuleVariant, location: String) -> LoadResult {
        let key = variant.cache_key();
        let started = Instant::now();
        let result = self.load_once(&variant, &location).await;
        self.in_flight.lock().remove(&key);

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => tracing::info!(
                target: "cue_worker",
                key = %key,
                duration_ms,
                "module ready"
            ),
            Err(err) => tracing::warn!(
                target: "cue_worker",
                key = %key,
                duration_ms,
                error = %err,
                "module load failed"
            ),
        }
        result
    }

    async fn load_once(
        &self,
        variant: &ModuleVariant,
        location: &str,
    ) -> LoadResult {
        let key = variant.cache_key();
        if let Some(bytes) = self.cache.get(&key).await {
            tracing::info!(
                target: "cue_worker",
                key = %key,
                bytes = bytes.len(),
                "loading cached module"
            );
            match self.runtime.instantiate(variant, bytes).await {
                Ok(capability) => return Ok(capability),
                // Fall through to a fresh fetch.
                Err(err) => tracing::warn!(
                    target: "cue_worker",
                    key = %key,
                    error = %err,
                    "cached module unusable; refetching"
                ),
            }
        }

        tracing::info!(target: "cue_worker", key = %key, location, "fetching module");
        let bytes: Bytes = self.fetcher.fetch(location).await?;
        let capability = self.runtime.instantiate(variant, bytes.clone()).await?;
        self.cache.put(variant, bytes).await;
        Ok(capability)
    }

    /// Number of loads currently in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}
