//! Configuration constants and structures for the worker host
//!
//! Values are read once from the environment when a host is built; everything
//! downstream receives a plain `HostConfig` snapshot.

pub mod errors;
pub mod limits;
pub mod paths;

use std::path::PathBuf;

use crate::core::DATA_DIR;

/// Snapshot of the host's tunables.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Directory holding the persistent module cache.
    pub data_dir: PathBuf,
    /// When true the host keeps module bytes in memory only.
    pub cache_disabled: bool,
    /// Upper bound for a fetched module body.
    pub max_module_bytes: usize,
    /// Fuel granted to every capability call.
    pub call_fuel: u64,
    /// Guest linear memory limit.
    pub memory_limit_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: DATA_DIR.clone(),
            cache_disabled: false,
            max_module_bytes: limits::DEFAULT_MAX_MODULE_MB * 1024 * 1024,
            call_fuel: limits::DEFAULT_CALL_FUEL,
            memory_limit_bytes: limits::DEFAULT_MEMORY_LIMIT_MB * 1024 * 1024,
        }
    }
}

impl HostConfig {
    /// Load configuration from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - CUE_WORKER_DATA_DIR: cache directory (default: platform data dir)
    /// - CUE_WORKER_CACHE_DISABLED: keep module bytes in memory only (default: false)
    /// - CUE_WORKER_MAX_MODULE_MB: largest accepted module download (default: 128)
    /// - CUE_WORKER_FUEL: fuel per capability call
    /// - CUE_WORKER_MEMORY_MB: guest memory limit (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_module_mb = read_env_parsed("CUE_WORKER_MAX_MODULE_MB")
            .unwrap_or(limits::DEFAULT_MAX_MODULE_MB);
        let memory_mb =
            read_env_parsed("CUE_WORKER_MEMORY_MB").unwrap_or(limits::DEFAULT_MEMORY_LIMIT_MB);

        Self {
            // DATA_DIR already honours CUE_WORKER_DATA_DIR.
            data_dir: defaults.data_dir,
            cache_disabled: read_bool_env("CUE_WORKER_CACHE_DISABLED"),
            max_module_bytes: max_module_mb.saturating_mul(1024 * 1024),
            call_fuel: read_env_parsed("CUE_WORKER_FUEL").unwrap_or(limits::DEFAULT_CALL_FUEL),
            memory_limit_bytes: memory_mb.saturating_mul(1024 * 1024),
        }
    }

    /// Path of the SQLite file backing the module cache.
    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join(paths::MODULE_CACHE_DB)
    }

    /// Human-readable summary for diagnostics.
    pub fn summary(&self) -> String {
        format!(
            "data_dir={}, cache_disabled={}, max_module_bytes={}, call_fuel={}, memory_limit_bytes={}",
            self.data_dir.display(),
            self.cache_disabled,
            self.max_module_bytes,
            self.call_fuel,
            self.memory_limit_bytes,
        )
    }
}

pub(crate) fn read_bool_env(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

fn read_env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
}
