//! Persistent store for compiled-module bytes, keyed by variant and version.
//!
//! Every failure mode degrades to a miss: `get` returns `None` and `put`
//! returns nothing. Only one version is retained at a time; storing bytes for
//! version V evicts the entries of every other version, while the reader and
//! engine of V live side by side.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use sha2::{Digest, Sha256};

use super::variant::{CacheKey, ModuleVariant};
use crate::core::configure_sqlite;

#[async_trait]
pub trait ModuleCache: Send + Sync {
    /// Cached bytes for `key`, or `None` on a miss or any storage failure.
    async fn get(&self, key: &CacheKey) -> Option<Bytes>;

    /// Best-effort store under `variant.cache_key()`.
    async fn put(&self, variant: &ModuleVariant, bytes: Bytes);
}

pub fn digest_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ----------------------------------------------------------------------------
// SQLite-backed cache
// ----------------------------------------------------------------------------

/// Cache persisted in a single SQLite file. Each operation opens its own
/// connection on the blocking pool, so a fresh instance over the same path
/// sees everything earlier sessions stored.
#[derive(Debug, Clone)]
pub struct SqliteModuleCache {
    path: PathBuf,
}

impl SqliteModuleCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(path: &Path) -> anyhow::Result<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create cache dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite for module cache {}", path.display()))?;
        configure_sqlite(&conn).context("configure sqlite (module cache)")?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS module_cache (
                key TEXT PRIMARY KEY,
                version TEXT NOT NULL,
                kind TEXT NOT NULL,
                bytes BLOB NOT NULL,
                digest_sha256 TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .context("ensure module_cache schema")?;
        Ok(conn)
    }

    fn lookup_blocking(path: &Path, key: &str) -> anyhow::Result<Option<Bytes>> {
        let conn = Self::open(path)?;
        let row: Option<(Vec<u8>, String)> = conn
            .query_row(
                "SELECT bytes, digest_sha256 FROM module_cache WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("select cached module")?;
        let Some((bytes, expected)) = row else {
            return Ok(None);
        };
        if !expected.eq_ignore_ascii_case(&digest_hex(&bytes)) {
            tracing::warn!(
                target: "cue_worker",
                key,
                "cached module digest mismatch; treating as miss"
            );
            return Ok(None);
        }
        Ok(Some(Bytes::from(bytes)))
    }

    fn store_blocking(path: &Path, variant: &ModuleVariant, bytes: &[u8]) -> anyhow::Result<()> {
        let mut conn = Self::open(path)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("begin module cache write")?;
        let evicted = tx
            .execute(
                "DELETE FROM module_cache WHERE version <> ?1",
                params![variant.version],
            )
            .context("evict other module versions")?;
        tx.execute(
            "INSERT INTO module_cache (key, version, kind, bytes, digest_sha256, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(key) DO UPDATE SET version = excluded.version, kind = excluded.kind,
                bytes = excluded.bytes, digest_sha256 = excluded.digest_sha256,
                created_at = excluded.created_at",
            params![
                variant.cache_key().as_str(),
                variant.version,
                variant.kind.as_str(),
                bytes,
                digest_hex(bytes),
                Utc::now().timestamp(),
            ],
        )
        .context("upsert cached module")?;
        tx.commit().context("commit module cache write")?;
        if evicted > 0 {
            tracing::debug!(target: "cue_worker", evicted, version = %variant.version, "evicted stale module versions");
        }
        Ok(())
    }
}

#[async_trait]
impl ModuleCache for SqliteModuleCache {
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let path = self.path.clone();
        let key_str = key.as_str().to_string();
        let res = tokio::task::spawn_blocking(move || Self::lookup_blocking(&path, &key_str))
            .await
            .context("join module cache lookup");
        match res {
            Ok(Ok(hit)) => hit,
            Ok(Err(err)) | Err(err) => {
                tracing::debug!(target: "cue_worker", key = %key, error = %format!("{err:#}"), "module cache lookup failed");
                None
            }
        }
    }

    async fn put(&self, variant: &ModuleVariant, bytes: Bytes) {
        let path = self.path.clone();
        let owned = variant.clone();
        let res =
            tokio::task::spawn_blocking(move || Self::store_blocking(&path, &owned, &bytes))
                .await
                .context("join module cache store");
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) | Err(err) => {
                tracing::debug!(target: "cue_worker", key = %variant.cache_key(), error = %format!("{err:#}"), "module cache store failed");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// In-memory cache
// ----------------------------------------------------------------------------

/// Process-local cache with the same retention rule as the SQLite one.
#[derive(Debug, Default)]
pub struct MemoryModuleCache {
    entries: Mutex<HashMap<CacheKey, (String, Bytes)>>,
}

impl MemoryModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ModuleCache for MemoryModuleCache {
    async fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.entries.lock().get(key).map(|(_, bytes)| bytes.clone())
    }

    async fn put(&self, variant: &ModuleVariant, bytes: Bytes) {
        let mut entries = self.entries.lock();
        entries.retain(|_, (version, _)| *version == variant.version);
        entries.insert(variant.cache_key(), (variant.version.clone(), bytes));
    }
}
