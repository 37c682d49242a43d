// =============================================================================
// Model Cache — single-flight, LRU-bounded artifact cache keyed by URI
// =============================================================================
//
// Each URI owns a `tokio::sync::OnceCell`. The first caller to reach an empty
// cell runs the load while every other caller for that URI awaits the same
// cell, so at most one physical load per URI is ever in flight. A failed load
// leaves the cell empty and the next waiter retries; failures are never
// cached.
//
// Invalidating a URI whose load is still in flight marks the slot; the load
// completes for its waiters and the slot is then dropped instead of kept.
//
// The slot map sits behind a `parking_lot::Mutex` that is never held across
// an `.await`.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactLoader, ModelHandle};
use crate::error::{CoreError, CoreResult};

struct Slot {
    cell: Arc<OnceCell<ModelHandle>>,
    last_used: u64,
    invalidated: bool,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    /// Logical clock for LRU ordering; bumped on every access.
    clock: u64,
}

impl Inner {
    fn loaded(&self) -> usize {
        self.slots.values().filter(|s| s.cell.initialized()).count()
    }
}

/// Point-in-time counters for dashboards and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub capacity: usize,
    pub entries: usize,
    pub hits: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
}

pub struct ModelCache {
    loader: Arc<dyn ArtifactLoader>,
    capacity: usize,
    inner: Mutex<Inner>,
    hits: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

impl ModelCache {
    pub fn new(loader: Arc<dyn ArtifactLoader>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        info!(capacity, "model cache initialised");
        Self {
            loader,
            capacity,
            inner: Mutex::new(Inner::default()),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the loaded model for `uri`, loading it once if needed.
    pub async fn get(&self, uri: &str) -> CoreResult<ModelHandle> {
        if uri.trim().is_empty() {
            return Err(CoreError::InvalidInput("model URI must not be empty".into()));
        }

        let cell = {
            let mut inner = self.inner.lock();
            inner.clock += 1;
            let tick = inner.clock;
            let slot = inner.slots.entry(uri.to_string()).or_insert_with(|| Slot {
                cell: Arc::new(OnceCell::new()),
                last_used: tick,
                invalidated: false,
            });
            slot.last_used = tick;
            slot.cell.clone()
        };

        if let Some(handle) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle.clone());
        }

        let mut loaded_here = false;
        let handle = cell
            .get_or_try_init(|| {
                loaded_here = true;
                self.load(uri)
            })
            .await?
            .clone();

        if loaded_here {
            self.settle_after_load(uri, &cell);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(handle)
    }

    async fn load(&self, uri: &str) -> CoreResult<ModelHandle> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        debug!(uri, "model cache miss, loading artifact");
        match self.loader.load(uri).await {
            Ok(model) => Ok(Arc::new(model)),
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                warn!(uri, error = %e, "model artifact load failed");
                Err(e)
            }
        }
    }

    fn settle_after_load(&self, keep: &str, cell: &Arc<OnceCell<ModelHandle>>) {
        let mut inner = self.inner.lock();

        let invalidated = inner
            .slots
            .get(keep)
            .map_or(false, |s| s.invalidated && Arc::ptr_eq(&s.cell, cell));
        if invalidated {
            inner.slots.remove(keep);
            info!(uri = keep, "model invalidated while loading, not retained");
        }

        // Empty cells nobody is waiting on are leftovers of failed loads.
        inner
            .slots
            .retain(|_, s| s.cell.initialized() || Arc::strong_count(&s.cell) > 1);

        while inner.loaded() > self.capacity {
            let victim = inner
                .slots
                .iter()
                .filter(|(uri, s)| s.cell.initialized() && uri.as_str() != keep)
                .min_by_key(|(_, s)| s.last_used)
                .map(|(uri, _)| uri.clone());
            match victim {
                Some(uri) => {
                    inner.slots.remove(&uri);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(uri = %uri, "evicted least recently used model");
                }
                None => break,
            }
        }
    }

    /// Drop the artifact for `uri` so the next `get` reloads it. A load still
    /// in flight completes for the callers already waiting on it and is then
    /// discarded. Returns `false` when there was nothing to invalidate.
    pub fn invalidate(&self, uri: &str) -> bool {
        let mut inner = self.inner.lock();
        let in_flight = match inner.slots.get_mut(uri) {
            None => return false,
            Some(slot) if slot.cell.initialized() => Some(false),
            Some(slot) if Arc::strong_count(&slot.cell) > 1 => {
                slot.invalidated = true;
                Some(true)
            }
            // Leftover of a failed load.
            Some(_) => None,
        };

        match in_flight {
            Some(true) => {
                info!(uri, "model load in flight, entry will be dropped once it completes");
                true
            }
            Some(false) => {
                inner.slots.remove(uri);
                info!(uri, "model cache entry invalidated");
                true
            }
            None => {
                inner.slots.remove(uri);
                false
            }
        }
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.inner
            .lock()
            .slots
            .get(uri)
            .map_or(false, |s| s.cell.initialized())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().loaded()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            capacity: self.capacity,
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingLoader;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_gets_share_one_load() {
        let loader = Arc::new(CountingLoader::with_delay(Duration::from_millis(50)));
        let cache = Arc::new(ModelCache::new(loader.clone(), 4));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.get("models/a.json").await }));
        }
        let mut handles = Vec::new();
        for t in tasks {
            handles.push(t.await.unwrap().unwrap());
        }

        assert_eq!(loader.loads("models/a.json"), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        let stats = cache.stats();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.hits, 15);
    }

    #[tokio::test]
    async fn cached_handle_is_reused() {
        let loader = Arc::new(CountingLoader::new());
        let cache = ModelCache::new(loader.clone(), 4);
        let a = cache.get("models/a.json").await.unwrap();
        let b = cache.get("models/a.json").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loader.loads("models/a.json"), 1);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let loader = Arc::new(CountingLoader::new());
        loader.fail_uri("models/missing.json");
        let cache = ModelCache::new(loader.clone(), 4);

        let err = cache.get("models/missing.json").await.unwrap_err();
        assert_eq!(
            err,
            CoreError::ArtifactNotFound {
                uri: "models/missing.json".into()
            }
        );
        assert!(!cache.contains("models/missing.json"));

        // Artifact appears; the next call retries and succeeds.
        loader.heal_uri("models/missing.json");
        cache.get("models/missing.json").await.unwrap();
        assert_eq!(loader.loads("models/missing.json"), 2);
        assert_eq!(cache.stats().load_failures, 1);
    }

    #[tokio::test]
    async fn least_recently_used_entry_is_evicted() {
        let loader = Arc::new(CountingLoader::new());
        let cache = ModelCache::new(loader.clone(), 2);

        cache.get("a").await.unwrap();
        cache.get("b").await.unwrap();
        cache.get("a").await.unwrap(); // b is now least recently used
        cache.get("c").await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.stats().evictions, 1);

        cache.get("b").await.unwrap();
        assert_eq!(loader.loads("b"), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let loader = Arc::new(CountingLoader::new());
        let cache = ModelCache::new(loader.clone(), 4);
        let first = cache.get("models/a.json").await.unwrap();

        assert!(cache.invalidate("models/a.json"));
        assert!(!cache.invalidate("models/a.json"));
        assert!(!cache.invalidate("never-loaded"));

        let second = cache.get("models/a.json").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads("models/a.json"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_during_load_discards_the_result() {
        let loader = Arc::new(CountingLoader::with_delay(Duration::from_millis(100)));
        let cache = Arc::new(ModelCache::new(loader.clone(), 4));

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("models/a.json").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.invalidate("models/a.json"));

        let first = pending.await.unwrap().unwrap();
        assert!(!cache.contains("models/a.json"));
        assert_eq!(loader.loads("models/a.json"), 1);

        let second = cache.get("models/a.json").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(loader.loads("models/a.json"), 2);
        assert!(cache.contains("models/a.json"));
    }

    #[tokio::test]
    async fn empty_uri_is_rejected_without_loading() {
        let loader = Arc::new(CountingLoader::new());
        let cache = ModelCache::new(loader.clone(), 4);
        assert!(matches!(cache.get(" ").await, Err(CoreError::InvalidInput(_))));
        assert_eq!(cache.stats().loads, 0);
    }
}
