//! TTL-cached catalog snapshots with single-flight reflection (spec §3
//! Lifecycle, §4.1 Failure semantics).
//!
//! Modeled on the teacher's liveness/degradation machinery
//! (`src/orchestration/health.rs`, `src/orchestration/circuit_breaker.rs`):
//! an `Arc<RwLock<...>>` guarded snapshot plus an atomic generation counter,
//! rather than anything resembling a general-purpose cache crate, since the
//! cache here holds exactly one entry per schema and needs single-flight
//! semantics a generic cache wouldn't give for free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio_postgres::Client;
use tracing::{debug, warn};

use crate::common::Catalog;
use crate::error::Result;
use crate::catalog::reflector::Reflector;

struct Snapshot {
    catalog: Arc<Catalog>,
    fetched_at: Instant,
}

/// Caches one [`Catalog`] snapshot per schema, evicting on TTL expiry or
/// explicit invalidation and serving a stale snapshot while reflection
/// failures persist (spec §4.1 Failure semantics).
pub struct CatalogCache {
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
    /// Ensures concurrent misses for the same key trigger exactly one
    /// reflection (spec §4.1 single-flight guarantee).
    refresh_lock: Mutex<()>,
    epoch: AtomicU64,
}

impl CatalogCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            snapshot: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Returns a fresh-enough catalog, reflecting if necessary. On
    /// reflection failure, returns the stale snapshot if one is present
    /// (spec §4.1: "a stale snapshot, if present, continues to serve until
    /// TTL"); only errors out if there is nothing to fall back on.
    pub async fn get(&self, client: &Client, schema: &str) -> Result<Arc<Catalog>> {
        if let Some(catalog) = self.fresh_snapshot().await {
            return Ok(catalog);
        }

        // Single-flight: only one concurrent caller actually reflects.
        let _permit = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited for the lock.
        if let Some(catalog) = self.fresh_snapshot().await {
            return Ok(catalog);
        }

        match Reflector::reflect(client, schema).await {
            Ok(mut catalog) => {
                let id = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                catalog.snapshot_id = id;
                let catalog = Arc::new(catalog);
                *self.snapshot.write().await = Some(Snapshot {
                    catalog: catalog.clone(),
                    fetched_at: Instant::now(),
                });
                debug!(snapshot_id = id, "catalog reflected");
                Ok(catalog)
            }
            Err(err) => {
                warn!(error = %err, "reflection failed, falling back to stale snapshot");
                if let Some(stale) = self.snapshot.read().await.as_ref() {
                    Ok(stale.catalog.clone())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Drops the cached snapshot atomically — readers either see the whole
    /// old snapshot or `None`, never a half-updated one (spec §3 invariant:
    /// cache entries are immutable, dropped atomically).
    pub async fn invalidate(&self) {
        *self.snapshot.write().await = None;
    }

    async fn fresh_snapshot(&self) -> Option<Arc<Catalog>> {
        let guard = self.snapshot.read().await;
        match guard.as_ref() {
            Some(snap) if snap.fetched_at.elapsed() < self.ttl => Some(snap.catalog.clone()),
            _ => None,
        }
    }

    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_cache_has_no_fresh_snapshot() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        assert!(cache.fresh_snapshot().await.is_none());
    }

    #[tokio::test]
    async fn invalidate_clears_snapshot() {
        let cache = CatalogCache::new(Duration::from_secs(60));
        *cache.snapshot.write().await = Some(Snapshot {
            catalog: Arc::new(Catalog::default()),
            fetched_at: Instant::now(),
        });
        assert!(cache.fresh_snapshot().await.is_some());
        cache.invalidate().await;
        assert!(cache.fresh_snapshot().await.is_none());
    }
}
