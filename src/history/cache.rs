//! Dual-indexed in-memory history of prediction results
//!
//! Two indices share each record through an `Arc`:
//!
//! - a capacity-bounded LRU keyed by record id, for global lookup;
//! - an unbounded per-owner sequence, newest first, for history reads.
//!
//! Only the LRU evicts. A user's own history is kept for the life of the
//! process; durable storage stays authoritative and is consulted whenever
//! an owner has no entry here.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::model::PredictionRecord;

/// Default bound of the id index
pub const DEFAULT_CAPACITY: usize = 1000;

struct Inner {
    by_id: LruCache<Uuid, Arc<PredictionRecord>>,
    by_owner: HashMap<Uuid, VecDeque<Arc<PredictionRecord>>>,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time view of the cache counters
#[derive(Debug, Clone, Serialize)]
pub struct ResultCacheStats {
    /// Lookups answered from memory
    pub hits: u64,
    /// Lookups that found nothing (cold owner or unknown id)
    pub misses: u64,
    /// Records pushed out of the id index
    pub evictions: u64,
    /// Records currently in the id index
    pub size: usize,
    /// Owners with a history sequence
    pub owners: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

/// Thread-safe result cache behind a single reader/writer lock
pub struct ResultCache {
    inner: RwLock<Inner>,
    counters: CacheCounters,
}

impl ResultCache {
    /// Create a cache whose id index holds at most `capacity` records
    /// (values below 1 are raised to 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(Inner {
                by_id: LruCache::new(capacity),
                by_owner: HashMap::new(),
            }),
            counters: CacheCounters::default(),
        }
    }

    /// Record `record` as the newest entry of `owner`'s history.
    ///
    /// Zero outcomes are ignored.
    pub fn save(&self, owner: Uuid, record: PredictionRecord) {
        if !record.is_meaningful() {
            trace!(%owner, "Skipping zero outcome");
            return;
        }

        let record = Arc::new(record);
        let mut inner = self.inner.write();
        inner
            .by_owner
            .entry(owner)
            .or_default()
            .push_front(Arc::clone(&record));
        if Self::index(&mut inner.by_id, record) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy out `owner`'s history, newest first.
    ///
    /// `None` means this cache has never seen the owner (cold miss), which
    /// is different from `Some(vec![])`.
    pub fn get_for_owner(&self, owner: Uuid) -> Option<Vec<PredictionRecord>> {
        let inner = self.inner.read();
        let Some(history) = inner.by_owner.get(&owner) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(
            history
                .iter()
                .filter(|r| r.is_meaningful())
                .map(|r| PredictionRecord::clone(r))
                .collect(),
        )
    }

    /// Replace the owner index wholesale and rebuild the id index from it.
    ///
    /// Each sequence is expected newest first, as returned by the store.
    pub fn bulk_load(&self, histories: HashMap<Uuid, Vec<PredictionRecord>>) {
        let mut by_owner = HashMap::with_capacity(histories.len());
        let mut records = 0usize;
        for (owner, history) in histories {
            let history: VecDeque<_> = history
                .into_iter()
                .filter(PredictionRecord::is_meaningful)
                .map(Arc::new)
                .collect();
            records += history.len();
            by_owner.insert(owner, history);
        }

        let mut inner = self.inner.write();
        inner.by_id.clear();
        // Oldest first so the newest records end up most recently used
        let mut all: Vec<_> = by_owner.values().flatten().cloned().collect();
        all.sort_by_key(|r| r.created_at);
        for record in all {
            Self::index(&mut inner.by_id, record);
        }
        let owners = by_owner.len();
        inner.by_owner = by_owner;
        drop(inner);

        debug!(owners, records, "Loaded result history");
    }

    /// Look up one record by id, marking it most recently used.
    pub fn get(&self, id: Uuid) -> Option<PredictionRecord> {
        let mut inner = self.inner.write();
        if let Some(record) = inner.by_id.get(&id) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            Some(PredictionRecord::clone(record))
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Records currently in the id index
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether the id index is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }

    /// Owners with a history sequence
    #[must_use]
    pub fn owners(&self) -> usize {
        self.inner.read().by_owner.len()
    }

    /// Get cache statistics
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> ResultCacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let inner = self.inner.read();
        ResultCacheStats {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            size: inner.by_id.len(),
            owners: inner.by_owner.len(),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Insert into the id index. Returns whether another record was evicted.
    fn index(by_id: &mut LruCache<Uuid, Arc<PredictionRecord>>, record: Arc<PredictionRecord>) -> bool {
        let id = record.id;
        matches!(by_id.push(id, record), Some((evicted, _)) if evicted != id)
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::model::fixtures::sample_request;
    use crate::model::{PredictionOutcome, RequestPayload};

    fn record(owner: Uuid, price: f64, sales: f64) -> PredictionRecord {
        PredictionRecord::new(
            owner,
            RequestPayload::Full(sample_request()),
            PredictionOutcome::new(price, sales),
        )
    }

    #[test]
    fn cold_owner_is_a_miss_not_empty() {
        let cache = ResultCache::default();
        let owner = Uuid::new_v4();
        assert_eq!(cache.get_for_owner(owner), None);

        let r = record(owner, 19.99, 42.0);
        cache.save(owner, r.clone());
        assert_eq!(cache.get_for_owner(owner), Some(vec![r]));
    }

    #[test]
    fn history_is_newest_first() {
        let cache = ResultCache::default();
        let owner = Uuid::new_v4();
        let r1 = record(owner, 1.0, 2.0);
        let r2 = record(owner, 3.0, 4.0);
        cache.save(owner, r1.clone());
        cache.save(owner, r2.clone());

        assert_eq!(cache.get_for_owner(owner), Some(vec![r2, r1]));
    }

    #[test]
    fn zero_outcome_is_ignored_everywhere() {
        let cache = ResultCache::default();
        let owner = Uuid::new_v4();
        let zero = record(owner, 0.0, 0.0);
        cache.save(owner, zero.clone());

        assert_eq!(cache.get_for_owner(owner), None);
        assert_eq!(cache.get(zero.id), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn half_zero_outcome_is_kept() {
        let cache = ResultCache::default();
        let owner = Uuid::new_v4();
        cache.save(owner, record(owner, 0.0, 5.0));
        assert_eq!(cache.get_for_owner(owner).map(|h| h.len()), Some(1));
    }

    #[test]
    fn lru_evicts_but_owner_history_does_not() {
        let cache = ResultCache::new(2);
        let owner = Uuid::new_v4();
        let records: Vec<_> = (1..=3).map(|i| record(owner, f64::from(i), 1.0)).collect();
        for r in &records {
            cache.save(owner, r.clone());
        }

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(records[0].id), None);
        assert!(cache.get(records[2].id).is_some());
        assert_eq!(cache.get_for_owner(owner).map(|h| h.len()), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn get_promotes_recency() {
        let cache = ResultCache::new(2);
        let owner = Uuid::new_v4();
        let a = record(owner, 1.0, 1.0);
        let b = record(owner, 2.0, 2.0);
        let c = record(owner, 3.0, 3.0);
        cache.save(owner, a.clone());
        cache.save(owner, b.clone());
        assert!(cache.get(a.id).is_some());
        cache.save(owner, c);

        assert!(cache.get(a.id).is_some());
        assert_eq!(cache.get(b.id), None);
    }

    #[test]
    fn capacity_zero_is_raised_to_one() {
        let cache = ResultCache::new(0);
        let owner = Uuid::new_v4();
        cache.save(owner, record(owner, 1.0, 1.0));
        cache.save(owner, record(owner, 2.0, 2.0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn bulk_load_replaces_everything() {
        let cache = ResultCache::new(10);
        let stale_owner = Uuid::new_v4();
        cache.save(stale_owner, record(stale_owner, 9.0, 9.0));

        let owner = Uuid::new_v4();
        let mut older = record(owner, 1.0, 1.0);
        older.created_at = Utc::now() - Duration::hours(1);
        let newer = record(owner, 2.0, 2.0);
        let zero = record(owner, 0.0, 0.0);

        let mut histories = HashMap::new();
        histories.insert(owner, vec![newer.clone(), zero, older.clone()]);
        cache.bulk_load(histories);

        assert_eq!(cache.get_for_owner(stale_owner), None);
        assert_eq!(cache.get_for_owner(owner), Some(vec![newer.clone(), older.clone()]));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.owners(), 1);
        assert!(cache.get(older.id).is_some());
    }

    #[test]
    fn bulk_load_keeps_newest_when_over_capacity() {
        let cache = ResultCache::new(1);
        let owner = Uuid::new_v4();
        let mut older = record(owner, 1.0, 1.0);
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = record(owner, 2.0, 2.0);

        cache.bulk_load(HashMap::from([(owner, vec![newer.clone(), older.clone()])]));

        assert!(cache.get(newer.id).is_some());
        assert_eq!(cache.get(older.id), None);
        assert_eq!(cache.get_for_owner(owner).map(|h| h.len()), Some(2));
    }

    #[test]
    fn stats_track_hits_and_misses() {
        let cache = ResultCache::default();
        let owner = Uuid::new_v4();
        assert_eq!(cache.get_for_owner(owner), None);
        cache.save(owner, record(owner, 1.0, 1.0));
        let _ = cache.get_for_owner(owner);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn concurrent_saves_for_one_owner_are_all_kept() {
        let cache = Arc::new(ResultCache::new(10_000));
        let owner = Uuid::new_v4();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        cache.save(owner, record(owner, f64::from(t * 100 + i + 1), 1.0));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(cache.get_for_owner(owner).map(|h| h.len()), Some(800));
        assert_eq!(cache.len(), 800);
    }
}
