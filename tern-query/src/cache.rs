//! Concurrent result cache.
//!
//! Shared, bounded memoisation of computed result tables, keyed by the
//! deterministic cache key of the producing operator subtree. Three
//! guarantees:
//!
//! - **Single-flight**: at most one concurrent computation per key.
//!   Late callers wait on a per-key watch channel and receive the same
//!   value (or the same error kind). A computation that fails is erased
//!   before its waiters are signalled, so the next caller retries.
//! - **Bounded LRU** on the non-pinned segment: a maximum total size in
//!   the `rows × columns` metric and a maximum entry count. Entries
//!   larger than the single-entry limit are returned but never inserted.
//! - **Pinning**: pinned entries are exempt from eviction and never count
//!   toward the LRU budget; their sizes are tracked in a separate table
//!   behind an independent reader-writer lock.
//!
//! Locking discipline: the cache mutex protects the LRU/pinned/in-flight
//! maps and is never held across a computation, an `.await`, or the
//! `pinned_sizes` lock. `AllocationLimitExceeded` results are never
//! cached.

use crate::error::{QueryError, Result};
use crate::runtime_info::{CacheStatus, RuntimeInformation};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tern_core::{AllocError, ResultTable};
use tokio::sync::watch;
use tracing::{debug, trace};

/// A memoised computation result: the frozen table plus the statistics of
/// the computation that produced it.
#[derive(Debug)]
pub struct CacheValue {
    pub table: Arc<ResultTable>,
    pub runtime: RuntimeInformation,
}

impl CacheValue {
    pub fn new(table: ResultTable, runtime: RuntimeInformation) -> Self {
        Self {
            table: Arc::new(table),
            runtime,
        }
    }

    /// The `rows × columns` metric the LRU budget is measured in.
    pub fn size_metric(&self) -> usize {
        self.table.size_metric()
    }
}

/// Cloneable error kind delivered to single-flight waiters.
#[derive(Debug, Clone)]
enum CacheErrorKind {
    Cancelled,
    AllocationLimitExceeded(AllocError),
    Other(Arc<str>),
}

impl CacheErrorKind {
    fn of(error: &QueryError) -> Self {
        match error {
            QueryError::Cancelled => CacheErrorKind::Cancelled,
            QueryError::AllocationLimitExceeded(e) => {
                CacheErrorKind::AllocationLimitExceeded(e.clone())
            }
            other => CacheErrorKind::Other(Arc::from(other.to_string())),
        }
    }

    fn into_error(self) -> QueryError {
        match self {
            CacheErrorKind::Cancelled => QueryError::Cancelled,
            CacheErrorKind::AllocationLimitExceeded(e) => QueryError::AllocationLimitExceeded(e),
            CacheErrorKind::Other(msg) => QueryError::Internal(msg.to_string()),
        }
    }
}

type InFlightResult = std::result::Result<Arc<CacheValue>, CacheErrorKind>;
type InFlightSender = watch::Sender<Option<InFlightResult>>;

struct LruEntry {
    value: Arc<CacheValue>,
    tick: u64,
}

#[derive(Default)]
struct CacheState {
    unpinned: FxHashMap<String, LruEntry>,
    /// Eviction order: tick -> key; lowest tick is least recently used.
    order: BTreeMap<u64, String>,
    pinned: FxHashMap<String, Arc<CacheValue>>,
    in_flight: FxHashMap<String, InFlightSender>,
    /// Sum of `size_metric` over the unpinned segment.
    total_size: usize,
    tick: u64,
}

impl CacheState {
    fn touch(&mut self, key: &str) {
        if let Some(entry) = self.unpinned.get_mut(key) {
            self.order.remove(&entry.tick);
            self.tick += 1;
            entry.tick = self.tick;
            self.order.insert(self.tick, key.to_owned());
        }
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (&tick, _) = self.order.iter().next()?;
        let key = self.order.remove(&tick)?;
        if let Some(entry) = self.unpinned.remove(&key) {
            self.total_size -= entry.value.size_metric();
        }
        Some(key)
    }
}

/// Counters for cache behaviour, updated lock-free.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub in_flight_waits: AtomicU64,
    pub evictions: AtomicU64,
}

/// Snapshot of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub in_flight_waits: u64,
    pub evictions: u64,
}

/// Concurrent, bounded, LRU-ordered result cache with pinning.
pub struct ResultCache {
    state: Mutex<CacheState>,
    pinned_sizes: RwLock<FxHashMap<String, usize>>,
    max_size: usize,
    max_num_entries: usize,
    max_size_single_entry: usize,
    stats: CacheStats,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("ResultCache")
            .field("unpinned", &state.unpinned.len())
            .field("pinned", &state.pinned.len())
            .field("in_flight", &state.in_flight.len())
            .field("total_size", &state.total_size)
            .finish()
    }
}

/// Removes the in-flight entry if the computing task is dropped before it
/// finishes, so waiters observe channel closure and retry instead of
/// hanging.
struct InFlightGuard<'a> {
    key: &'a str,
    cache: &'a ResultCache,
    tx: InFlightSender,
    finished: bool,
}

impl InFlightGuard<'_> {
    fn finish(mut self, result: InFlightResult) {
        // Send before removing so late subscribers still observe it.
        let _ = self.tx.send(Some(result));
        self.cache
            .state
            .lock()
            .unwrap()
            .in_flight
            .remove(self.key);
        self.finished = true;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache
                .state
                .lock()
                .unwrap()
                .in_flight
                .remove(self.key);
        }
    }
}

enum Action {
    Hit(Arc<CacheValue>, CacheStatus),
    Wait(watch::Receiver<Option<InFlightResult>>),
    Compute(InFlightSender),
}

impl ResultCache {
    /// Create a cache with the given bounds: `max_size` and
    /// `max_size_single_entry` are in the `rows × columns` metric,
    /// `max_num_entries` counts non-pinned entries.
    pub fn new(max_size: usize, max_size_single_entry: usize, max_num_entries: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            pinned_sizes: RwLock::new(FxHashMap::default()),
            max_size,
            max_num_entries,
            max_size_single_entry,
            stats: CacheStats::default(),
        }
    }

    /// Look up `key`, or run `compute` with at-most-one-concurrent-call
    /// semantics. Returns the value and how it was obtained.
    ///
    /// `pin` requests the result be stored in the pinned segment; a
    /// non-pinned entry hit under `pin` is promoted.
    pub async fn compute_if_absent<F, Fut>(
        &self,
        key: &str,
        pin: bool,
        compute: F,
    ) -> Result<(Arc<CacheValue>, CacheStatus)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheValue>>,
    {
        let mut compute = Some(compute);
        loop {
            let action = self.lookup_or_register(key, pin);
            match action {
                Action::Hit(value, status) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    trace!(key, ?status, "cache hit");
                    return Ok((value, status));
                }
                Action::Wait(mut rx) => {
                    self.stats.in_flight_waits.fetch_add(1, Ordering::Relaxed);
                    loop {
                        let ready = rx.borrow().clone();
                        if let Some(result) = ready {
                            self.stats.hits.fetch_add(1, Ordering::Relaxed);
                            return match result {
                                Ok(value) => Ok((value, CacheStatus::CachedNotPinned)),
                                Err(kind) => Err(kind.into_error()),
                            };
                        }
                        if rx.changed().await.is_err() {
                            // The computing task was dropped; retry.
                            break;
                        }
                    }
                }
                Action::Compute(tx) => {
                    self.stats.misses.fetch_add(1, Ordering::Relaxed);
                    let guard = InFlightGuard {
                        key,
                        cache: self,
                        tx,
                        finished: false,
                    };
                    let run = compute
                        .take()
                        .expect("compute closure invoked more than once");
                    match run().await {
                        Ok(value) => {
                            let value = Arc::new(value);
                            let size = value.size_metric();
                            self.insert(key, value.clone(), pin, size);
                            guard.finish(Ok(value.clone()));
                            return Ok((value, CacheStatus::Computed));
                        }
                        Err(error) => {
                            // Never cache errors; erase the in-flight
                            // entry before signalling waiters.
                            debug!(key, %error, "compute failed, not cached");
                            guard.finish(Err(CacheErrorKind::of(&error)));
                            return Err(error);
                        }
                    }
                }
            }
        }
    }

    fn lookup_or_register(&self, key: &str, pin: bool) -> Action {
        let mut promoted_size = None;
        let action = {
            let mut state = self.state.lock().unwrap();
            if let Some(value) = state.pinned.get(key) {
                Action::Hit(value.clone(), CacheStatus::CachedPinned)
            } else if state.unpinned.contains_key(key) {
                if pin {
                    // Promote to the pinned segment.
                    let entry = state.unpinned.remove(key).unwrap();
                    state.order.remove(&entry.tick);
                    state.total_size -= entry.value.size_metric();
                    promoted_size = Some(entry.value.size_metric());
                    state.pinned.insert(key.to_owned(), entry.value.clone());
                    Action::Hit(entry.value, CacheStatus::CachedNotPinned)
                } else {
                    state.touch(key);
                    let value = state.unpinned[key].value.clone();
                    Action::Hit(value, CacheStatus::CachedNotPinned)
                }
            } else if let Some(tx) = state.in_flight.get(key) {
                Action::Wait(tx.subscribe())
            } else {
                let (tx, _rx) = watch::channel(None);
                state.in_flight.insert(key.to_owned(), tx.clone());
                Action::Compute(tx)
            }
        };
        // The pinned-sizes lock is independent and never nested inside
        // the cache mutex.
        if let Some(size) = promoted_size {
            self.pinned_sizes
                .write()
                .unwrap()
                .insert(key.to_owned(), size);
        }
        action
    }

    fn insert(&self, key: &str, value: Arc<CacheValue>, pin: bool, size: usize) {
        if pin {
            {
                let mut state = self.state.lock().unwrap();
                state.pinned.insert(key.to_owned(), value);
            }
            self.pinned_sizes
                .write()
                .unwrap()
                .insert(key.to_owned(), size);
            return;
        }
        if size > self.max_size_single_entry {
            debug!(key, size, "result exceeds single-entry limit, not cached");
            return;
        }
        let mut evicted = 0u64;
        {
            let mut state = self.state.lock().unwrap();
            state.tick += 1;
            let tick = state.tick;
            state.order.insert(tick, key.to_owned());
            state.unpinned.insert(key.to_owned(), LruEntry { value, tick });
            state.total_size += size;
            while state.total_size > self.max_size || state.unpinned.len() > self.max_num_entries {
                if state.evict_lru().is_none() {
                    break;
                }
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    /// Evict every non-pinned entry.
    pub fn clear_unpinned_only(&self) {
        let mut state = self.state.lock().unwrap();
        state.unpinned.clear();
        state.order.clear();
        state.total_size = 0;
    }

    /// Evict everything including pinned entries, and clear the pinned
    /// size accounting under its exclusive writer lock.
    pub fn clear_all(&self) {
        {
            let mut sizes = self.pinned_sizes.write().unwrap();
            sizes.clear();
        }
        let mut state = self.state.lock().unwrap();
        state.unpinned.clear();
        state.order.clear();
        state.pinned.clear();
        state.total_size = 0;
    }

    /// The tracked size of a pinned entry, if `key` is pinned.
    pub fn pinned_size(&self, key: &str) -> Option<usize> {
        self.pinned_sizes.read().unwrap().get(key).copied()
    }

    /// Number of cached entries (pinned and not).
    pub fn num_entries(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.unpinned.len() + state.pinned.len()
    }

    /// Current total size of the non-pinned segment.
    pub fn non_pinned_size(&self) -> usize {
        self.state.lock().unwrap().total_size
    }

    /// Whether `key` is currently cached (either segment).
    pub fn contains(&self, key: &str) -> bool {
        let state = self.state.lock().unwrap();
        state.pinned.contains_key(key) || state.unpinned.contains_key(key)
    }

    /// Lock-free statistics snapshot.
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            in_flight_waits: self.stats.in_flight_waits.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tern_core::{IdTable, LocalVocab, MemoryBudget};

    fn value_with_rows(rows: usize) -> CacheValue {
        let budget = MemoryBudget::unlimited();
        let mut table = IdTable::new(1, &budget);
        for i in 0..rows {
            table.push_row(&[tern_core::Id::from_int(i as i64)]).unwrap();
        }
        CacheValue::new(
            ResultTable::freeze(table, vec![0], LocalVocab::new()),
            RuntimeInformation::not_computed("test"),
        )
    }

    fn cache() -> ResultCache {
        ResultCache::new(100, 50, 10)
    }

    #[tokio::test]
    async fn test_compute_then_hit() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        for expected in [CacheStatus::Computed, CacheStatus::CachedNotPinned] {
            let (_, status) = cache
                .compute_if_absent("k", false, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(value_with_rows(3)) }
                })
                .await
                .unwrap();
            assert_eq!(status, expected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_flight() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(tokio::sync::Barrier::new(2));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let cache = cache.clone();
            let calls = calls.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let (value, _) = cache
                    .compute_if_absent("shared", false, || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(value_with_rows(2))
                    })
                    .await
                    .unwrap();
                Arc::as_ptr(&value) as usize
            }));
        }
        let ptrs: Vec<usize> = futures::future::try_join_all(handles)
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ptrs[0], ptrs[1], "both callers observe the same value");
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        let err = cache
            .compute_if_absent("k", false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(QueryError::Cancelled) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert!(!cache.contains("k"));

        // Next caller recomputes.
        cache
            .compute_if_absent("k", false, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(value_with_rows(1)) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction_respects_budget() {
        let cache = ResultCache::new(10, 10, 10);
        for i in 0..5 {
            cache
                .compute_if_absent(&format!("k{i}"), false, || async {
                    Ok(value_with_rows(4))
                })
                .await
                .unwrap();
        }
        assert!(cache.non_pinned_size() <= 10);
        assert!(cache.stats().evictions > 0);
        // The most recent entry survives.
        assert!(cache.contains("k4"));
    }

    #[tokio::test]
    async fn test_lru_order() {
        let cache = ResultCache::new(8, 8, 10);
        for key in ["a", "b"] {
            cache
                .compute_if_absent(key, false, || async { Ok(value_with_rows(4)) })
                .await
                .unwrap();
        }
        // Touch "a" so "b" becomes the eviction victim.
        cache
            .compute_if_absent("a", false, || async { panic!("cached") })
            .await
            .unwrap();
        cache
            .compute_if_absent("c", false, || async { Ok(value_with_rows(4)) })
            .await
            .unwrap();
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[tokio::test]
    async fn test_pinned_entries_ignore_eviction() {
        let cache = ResultCache::new(4, 4, 1);
        cache
            .compute_if_absent("pinned", true, || async { Ok(value_with_rows(40)) })
            .await
            .unwrap();
        assert_eq!(cache.pinned_size("pinned"), Some(40));
        assert_eq!(cache.non_pinned_size(), 0);

        cache
            .compute_if_absent("small", false, || async { Ok(value_with_rows(2)) })
            .await
            .unwrap();
        assert!(cache.contains("pinned"));

        cache.clear_unpinned_only();
        assert!(cache.contains("pinned"));
        assert!(!cache.contains("small"));

        cache.clear_all();
        assert!(!cache.contains("pinned"));
        assert_eq!(cache.pinned_size("pinned"), None);
    }

    #[tokio::test]
    async fn test_promotion_to_pinned() {
        let cache = cache();
        cache
            .compute_if_absent("k", false, || async { Ok(value_with_rows(3)) })
            .await
            .unwrap();
        assert_eq!(cache.pinned_size("k"), None);
        cache
            .compute_if_absent("k", true, || async { panic!("cached") })
            .await
            .unwrap();
        assert_eq!(cache.pinned_size("k"), Some(3));
        cache.clear_unpinned_only();
        assert!(cache.contains("k"));
    }

    #[tokio::test]
    async fn test_oversized_entries_not_inserted() {
        let cache = ResultCache::new(1000, 5, 10);
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            cache
                .compute_if_absent("big", false, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(value_with_rows(50)) }
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!cache.contains("big"));
    }
}
