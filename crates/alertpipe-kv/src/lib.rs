#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
// crates/alertpipe-kv/src/lib.rs
// ============================================================================
// Module: Key/Value Store
// Description: Byte-blob KV trait with compare-and-swap, plus a counter
//              store, and an in-memory implementation of both.
// Purpose: Give the Snapshot Builder a way to publish a new snapshot blob
//          only if no one else has published a newer one since it read the
//          current version (§4.1), and give every stage a place to flush
//          periodic counters (§10) without depending on a specific KV
//          product.
// Dependencies: async-trait, bytes, dashmap, thiserror
// ============================================================================

//! ## Overview
//! [`KvStore`] is the snapshot publish/read seam: [`KvStore::compare_and_swap`]
//! is what makes "publish the new snapshot" race-safe when a Snapshot
//! Builder deployment briefly runs two replicas during a rollout. A real
//! deployment backs this with Redis (`SET ... GET` / `WATCH`/`MULTI`), etcd
//! (version-fenced `Txn`), or an equivalent; this crate does not assume a
//! specific product.
//!
//! [`CounterStore`] is deliberately separate from [`KvStore`]: metrics
//! counters are fire-and-forget increments, never read-modify-write against
//! caller-supplied bytes, so they get their own narrower trait rather than
//! being encoded as blobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;

/// Errors raised by a KV or counter store.
#[derive(Debug, Error)]
pub enum KvError {
    /// The store backend is unavailable. Transient.
    #[error("kv store unavailable: {0}")]
    Unavailable(String),
}

/// A versioned value: the blob plus the version it was written with.
#[derive(Debug, Clone)]
pub struct VersionedValue {
    /// Raw stored bytes.
    pub value: Bytes,
    /// Monotonic version assigned at write time.
    pub version: u64,
}

/// Byte-blob storage with optimistic compare-and-swap.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Reads the current value and version for `key`, if any.
    ///
    /// # Errors
    /// Returns [`KvError::Unavailable`] on a transient backend failure.
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, KvError>;

    /// Writes `value` for `key` only if the key's current version equals
    /// `expected_version` (`None` meaning "key must not exist yet"). On
    /// success the key's new version is `expected_version.unwrap_or(0) + 1`.
    /// Returns `false` without writing if the expectation did not hold.
    ///
    /// # Errors
    /// Returns [`KvError::Unavailable`] on a transient backend failure.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Bytes,
    ) -> Result<bool, KvError>;

    /// Unconditionally overwrites `key`, bumping its version regardless of
    /// the current one. Used for data that has no concurrent-writer race
    /// (a single-writer stage writing its own keys).
    ///
    /// # Errors
    /// Returns [`KvError::Unavailable`] on a transient backend failure.
    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError>;
}

/// Monotonic counters, grouped under a namespace (one per §10 metrics
/// service label).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds `delta` to `namespace:name` and returns the new total.
    ///
    /// # Errors
    /// Returns [`KvError::Unavailable`] on a transient backend failure.
    async fn increment(&self, namespace: &str, name: &str, delta: i64) -> Result<i64, KvError>;

    /// Snapshots every counter currently recorded under `namespace`.
    ///
    /// # Errors
    /// Returns [`KvError::Unavailable`] on a transient backend failure.
    async fn snapshot(&self, namespace: &str) -> Result<HashMap<String, i64>, KvError>;
}

#[derive(Default)]
struct Entry {
    value: Bytes,
    version: u64,
}

/// In-memory implementation of both [`KvStore`] and [`CounterStore`], used
/// by service-level tests and by the single-process `alertpipe` CLI demo
/// mode.
#[derive(Clone, Default)]
pub struct InMemoryKv {
    blobs: Arc<DashMap<String, Entry>>,
    counters: Arc<DashMap<(String, String), i64>>,
}

impl InMemoryKv {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>, KvError> {
        Ok(self.blobs.get(key).map(|entry| VersionedValue {
            value: entry.value.clone(),
            version: entry.version,
        }))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Bytes,
    ) -> Result<bool, KvError> {
        let current_version = self.blobs.get(key).map(|entry| entry.version);
        if current_version != expected_version {
            return Ok(false);
        }
        let new_version = expected_version.unwrap_or(0) + 1;
        self.blobs.insert(key.to_string(), Entry { value, version: new_version });
        Ok(true)
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<(), KvError> {
        let new_version = self.blobs.get(key).map_or(1, |entry| entry.version + 1);
        self.blobs.insert(key.to_string(), Entry { value, version: new_version });
        Ok(())
    }
}

#[async_trait]
impl CounterStore for InMemoryKv {
    async fn increment(&self, namespace: &str, name: &str, delta: i64) -> Result<i64, KvError> {
        let key = (namespace.to_string(), name.to_string());
        let mut entry = self.counters.entry(key).or_insert(0);
        *entry += delta;
        Ok(*entry)
    }

    async fn snapshot(&self, namespace: &str) -> Result<HashMap<String, i64>, KvError> {
        Ok(self
            .counters
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| (entry.key().1.clone(), *entry.value()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_expectation() {
        let kv = InMemoryKv::new();
        assert!(kv.compare_and_swap("snapshot:tenant-a", None, Bytes::from_static(b"v1")).await.unwrap());
        assert!(!kv.compare_and_swap("snapshot:tenant-a", None, Bytes::from_static(b"v2")).await.unwrap());
        assert!(kv.compare_and_swap("snapshot:tenant-a", Some(1), Bytes::from_static(b"v2")).await.unwrap());
        let current = kv.get("snapshot:tenant-a").await.unwrap().unwrap();
        assert_eq!(current.value, Bytes::from_static(b"v2"));
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn put_is_unconditional_and_bumps_version() {
        let kv = InMemoryKv::new();
        kv.put("k", Bytes::from_static(b"a")).await.unwrap();
        kv.put("k", Bytes::from_static(b"b")).await.unwrap();
        let current = kv.get("k").await.unwrap().unwrap();
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn counters_accumulate_per_namespace() {
        let kv = InMemoryKv::new();
        kv.increment("matcher", "alerts_matched_total", 1).await.unwrap();
        kv.increment("matcher", "alerts_matched_total", 4).await.unwrap();
        kv.increment("dispatcher", "alerts_matched_total", 9).await.unwrap();

        let snapshot = kv.snapshot("matcher").await.unwrap();
        assert_eq!(snapshot.get("alerts_matched_total"), Some(&5));
        assert_eq!(snapshot.len(), 1);
    }
}
