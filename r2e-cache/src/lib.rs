//! Multi-level (L1 hot / L2 warm / L3 cold) cache manager.
//!
//! L1 holds decoded objects, L2 holds serialised byte blobs, L3 holds only
//! a presence marker (no payload) — a hint that the backing repository
//! likely has the key, not an authoritative cache hit. Reads are
//! read-through: a full miss across all three tiers falls through to the
//! caller-supplied fetch function and populates every tier on success.
//!
//! Tier maps are `DashMap`s (lock-free concurrent reads); per-entry
//! counters are plain atomics, following the familiar `DashMap`-backed
//! `InMemoryStore` pattern generalised to three tiers instead of one.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Read-through fetch function: repository lookup on a full cache miss.
pub type FetchFn<V> =
    Arc<dyn Fn(String) -> Pin<Box<dyn Future<Output = Option<V>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub l1_max_entries: usize,
    pub l1_idle_evict: Duration,
    /// Idle age at which an evicted L1 entry is dropped instead of
    /// demoted to L2 (spec: "younger than a demote threshold (30 min)").
    pub l1_demote_deadline: Duration,
    pub l2_max_entries: usize,
    pub l2_idle_evict: Duration,
    pub l2_demote_deadline: Duration,
    pub l3_max_entries: usize,
    pub l3_idle_evict: Duration,
    pub maintenance_interval: Duration,
    pub warming_interval: Duration,
    pub warming_top_k: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: 10_000,
            l1_idle_evict: Duration::from_secs(15 * 60),
            l1_demote_deadline: Duration::from_secs(30 * 60),
            l2_max_entries: 50_000,
            l2_idle_evict: Duration::from_secs(2 * 60 * 60),
            l2_demote_deadline: Duration::from_secs(4 * 60 * 60),
            l3_max_entries: 100_000,
            l3_idle_evict: Duration::from_secs(24 * 60 * 60),
            maintenance_interval: Duration::from_secs(5 * 60),
            warming_interval: Duration::from_secs(10 * 60),
            warming_top_k: 100,
        }
    }
}

struct L1Entry<V> {
    value: V,
    last_accessed: AtomicU64,
    access_count: AtomicU64,
}

struct L2Entry {
    bytes: Vec<u8>,
    last_accessed: AtomicU64,
    access_count: AtomicU64,
}

struct L3Entry {
    last_accessed: AtomicU64,
}

/// Counts of what the last maintenance/warming pass did, for observability
/// and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub l1_demoted: usize,
    pub l1_dropped: usize,
    pub l2_demoted: usize,
    pub l2_dropped: usize,
    pub l3_dropped: usize,
}

/// Serves topic metadata and latest data points with tiered freshness
///. Generic over the cached value type `V`.
pub struct MultiLevelCache<V> {
    l1: DashMap<String, L1Entry<V>>,
    l2: DashMap<String, L2Entry>,
    l3: DashMap<String, L3Entry>,
    config: CacheConfig,
    fetch: FetchFn<V>,
}

impl<V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static> MultiLevelCache<V> {
    pub fn new(config: CacheConfig, fetch: FetchFn<V>) -> Self {
        Self {
            l1: DashMap::new(),
            l2: DashMap::new(),
            l3: DashMap::new(),
            config,
            fetch,
        }
    }

    /// Read path: L1 → L2 → L3 (hint only) → repository read-through.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = now_millis();

        if let Some(entry) = self.l1.get(key) {
            let idle = now.saturating_sub(entry.last_accessed.load(Ordering::Relaxed));
            if idle < self.config.l1_idle_evict.as_millis() as u64 {
                entry.last_accessed.store(now, Ordering::Relaxed);
                entry.access_count.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
        }

        if let Some(entry) = self.l2.get(key) {
            let idle = now.saturating_sub(entry.last_accessed.load(Ordering::Relaxed));
            if idle < self.config.l2_idle_evict.as_millis() as u64 {
                if let Ok(value) = serde_json::from_slice::<V>(&entry.bytes) {
                    entry.last_accessed.store(now, Ordering::Relaxed);
                    entry.access_count.fetch_add(1, Ordering::Relaxed);
                    drop(entry);
                    self.insert_l1(key, value.clone(), now);
                    return Some(value);
                }
            }
        }

        // L3 presence is a hint the repository likely has it; it never
        // short-circuits the read-through below.
        let _ = self.l3.get(key);

        let fetched = (self.fetch)(key.to_string()).await;
        if let Some(value) = &fetched {
            self.populate_all_tiers(key, value.clone(), now);
        }
        fetched
    }

    fn insert_l1(&self, key: &str, value: V, now: u64) {
        self.l1.insert(
            key.to_string(),
            L1Entry {
                value,
                last_accessed: AtomicU64::new(now),
                access_count: AtomicU64::new(1),
            },
        );
    }

    fn populate_all_tiers(&self, key: &str, value: V, now: u64) {
        self.insert_l1(key, value.clone(), now);
        if let Ok(bytes) = serde_json::to_vec(&value) {
            self.l2.insert(
                key.to_string(),
                L2Entry {
                    bytes,
                    last_accessed: AtomicU64::new(now),
                    access_count: AtomicU64::new(1),
                },
            );
        }
        self.l3.insert(
            key.to_string(),
            L3Entry {
                last_accessed: AtomicU64::new(now),
            },
        );
    }

    /// Insert into L1 (and, if `also_l2`, L2 too) without a repository
    /// round trip.
    pub fn warm(&self, key: &str, value: V, also_l2: bool) {
        let now = now_millis();
        self.insert_l1(key, value.clone(), now);
        if also_l2 {
            if let Ok(bytes) = serde_json::to_vec(&value) {
                self.l2.insert(
                    key.to_string(),
                    L2Entry {
                        bytes,
                        last_accessed: AtomicU64::new(now),
                        access_count: AtomicU64::new(0),
                    },
                );
            }
        }
    }

    /// Remove `key` from every tier.
    pub fn invalidate(&self, key: &str) {
        self.l1.remove(key);
        self.l2.remove(key);
        self.l3.remove(key);
    }

    pub fn l1_len(&self) -> usize {
        self.l1.len()
    }

    pub fn l2_len(&self) -> usize {
        self.l2.len()
    }

    pub fn l3_len(&self) -> usize {
        self.l3.len()
    }

    pub fn contains_l1(&self, key: &str) -> bool {
        self.l1.contains_key(key)
    }

    pub fn contains_l2(&self, key: &str) -> bool {
        self.l2.contains_key(key)
    }

    /// Periodic maintenance: evict expired or
    /// over-cap items at each tier; items young enough are demoted to the
    /// next tier down rather than dropped.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let now = now_millis();
        let mut report = MaintenanceReport::default();

        let l1_evict = self.collect_evictions(&self.l1, self.config.l1_max_entries, self.config.l1_idle_evict, now);
        for key in l1_evict {
            if let Some((_, entry)) = self.l1.remove(&key) {
                let idle = now.saturating_sub(entry.last_accessed.load(Ordering::Relaxed));
                if idle < self.config.l1_demote_deadline.as_millis() as u64 {
                    if let Ok(bytes) = serde_json::to_vec(&entry.value) {
                        self.l2.insert(
                            key,
                            L2Entry {
                                bytes,
                                last_accessed: AtomicU64::new(entry.last_accessed.load(Ordering::Relaxed)),
                                access_count: AtomicU64::new(entry.access_count.load(Ordering::Relaxed)),
                            },
                        );
                        report.l1_demoted += 1;
                    }
                } else {
                    report.l1_dropped += 1;
                }
            }
        }

        let l2_evict = self.collect_evictions(&self.l2, self.config.l2_max_entries, self.config.l2_idle_evict, now);
        for key in l2_evict {
            if let Some((_, entry)) = self.l2.remove(&key) {
                let idle = now.saturating_sub(entry.last_accessed.load(Ordering::Relaxed));
                if idle < self.config.l2_demote_deadline.as_millis() as u64 {
                    self.l3.insert(
                        key,
                        L3Entry {
                            last_accessed: AtomicU64::new(entry.last_accessed.load(Ordering::Relaxed)),
                        },
                    );
                    report.l2_demoted += 1;
                } else {
                    report.l2_dropped += 1;
                }
            }
        }

        let l3_evict = self.collect_evictions(&self.l3, self.config.l3_max_entries, self.config.l3_idle_evict, now);
        for key in l3_evict {
            self.l3.remove(&key);
            report.l3_dropped += 1;
        }

        report
    }

    /// Keys to evict at this tier: every entry idle past `max_age`, plus
    /// (if the tier is over `max_entries` after those) the
    /// least-recently-accessed remainder down to the cap.
    fn collect_evictions<T>(
        &self,
        tier: &DashMap<String, T>,
        max_entries: usize,
        max_age: Duration,
        now: u64,
    ) -> Vec<String>
    where
        T: LastAccessed,
    {
        let mut entries: Vec<(String, u64)> = tier
            .iter()
            .map(|e| (e.key().clone(), e.value().last_accessed_ms()))
            .collect();
        entries.sort_by_key(|(_, last)| *last);

        let max_age_ms = max_age.as_millis() as u64;
        let mut evict: Vec<String> = entries
            .iter()
            .filter(|(_, last)| now.saturating_sub(*last) >= max_age_ms)
            .map(|(k, _)| k.clone())
            .collect();

        let already: std::collections::HashSet<&String> = evict.iter().collect();
        let remaining = entries.len() - evict.len();
        if remaining > max_entries {
            let need = remaining - max_entries;
            let mut added = 0;
            for (k, _) in &entries {
                if added >= need {
                    break;
                }
                if already.contains(k) {
                    continue;
                }
                evict.push(k.clone());
                added += 1;
            }
        }
        evict
    }

    /// Promote the top-`k` L2 entries by access count that aren't already
    /// in L1. Returns the number promoted.
    pub fn warm_top_k(&self, k: usize) -> usize {
        let mut candidates: Vec<(String, u64)> = self
            .l2
            .iter()
            .filter(|e| !self.l1.contains_key(e.key()))
            .map(|e| (e.key().clone(), e.value().access_count.load(Ordering::Relaxed)))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let mut promoted = 0;
        let now = now_millis();
        for (key, _) in candidates.into_iter().take(k) {
            if let Some(entry) = self.l2.get(&key) {
                if let Ok(value) = serde_json::from_slice::<V>(&entry.bytes) {
                    drop(entry);
                    self.insert_l1(&key, value, now);
                    promoted += 1;
                }
            }
        }
        promoted
    }
}

trait LastAccessed {
    fn last_accessed_ms(&self) -> u64;
}

impl<V> LastAccessed for L1Entry<V> {
    fn last_accessed_ms(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }
}

impl LastAccessed for L2Entry {
    fn last_accessed_ms(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }
}

impl LastAccessed for L3Entry {
    fn last_accessed_ms(&self) -> u64 {
        self.last_accessed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Stub(String);

    fn no_repo() -> FetchFn<Stub> {
        Arc::new(|_key: String| Box::pin(async { None }))
    }

    fn repo_with(value: Stub, hits: Arc<AtomicUsize>) -> FetchFn<Stub> {
        Arc::new(move |_key: String| {
            let value = value.clone();
            let hits = hits.clone();
            Box::pin(async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Some(value)
            })
        })
    }

    #[tokio::test]
    async fn first_get_populates_all_tiers_then_hits_l1() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cache = MultiLevelCache::new(
            CacheConfig::default(),
            repo_with(Stub("v1".into()), hits.clone()),
        );

        let first = cache.get("T").await;
        assert_eq!(first, Some(Stub("v1".into())));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(cache.contains_l1("T"));
        assert!(cache.contains_l2("T"));
        assert_eq!(cache.l3_len(), 1);

        // Second get is an L1 hit — no repository call.
        let second = cache.get("T").await;
        assert_eq!(second, Some(Stub("v1".into())));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn l3_hit_is_not_authoritative_and_still_reads_through() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cache = MultiLevelCache::new(
            CacheConfig::default(),
            repo_with(Stub("v1".into()), hits.clone()),
        );
        cache.get("T").await; // populates all tiers
        cache.invalidate("T");
        // Re-insert only an L3 marker to simulate a stale hint.
        cache.l3.insert(
            "T".into(),
            L3Entry {
                last_accessed: AtomicU64::new(now_millis()),
            },
        );
        let got = cache.get("T").await;
        assert_eq!(got, Some(Stub("v1".into())));
        assert_eq!(hits.load(Ordering::SeqCst), 2, "L3 hint must not short-circuit the repository read");
    }

    #[tokio::test]
    async fn miss_with_no_repository_value_returns_none() {
        let cache = MultiLevelCache::new(CacheConfig::default(), no_repo());
        assert_eq!(cache.get("missing").await, None);
        assert!(!cache.contains_l1("missing"));
    }

    #[test]
    fn warm_inserts_without_repository_round_trip() {
        let cache = MultiLevelCache::new(CacheConfig::default(), no_repo());
        cache.warm("T", Stub("direct".into()), true);
        assert!(cache.contains_l1("T"));
        assert!(cache.contains_l2("T"));
    }

    #[test]
    fn invalidate_clears_every_tier() {
        let cache = MultiLevelCache::new(CacheConfig::default(), no_repo());
        cache.warm("T", Stub("x".into()), true);
        cache.l3.insert(
            "T".into(),
            L3Entry {
                last_accessed: AtomicU64::new(now_millis()),
            },
        );
        cache.invalidate("T");
        assert!(!cache.contains_l1("T"));
        assert!(!cache.contains_l2("T"));
        assert_eq!(cache.l3_len(), 0);
    }

    #[test]
    fn idle_l1_entry_demotes_to_l2_on_maintenance() {
        let config = CacheConfig {
            l1_idle_evict: Duration::from_millis(10),
            l1_demote_deadline: Duration::from_millis(1000),
            ..CacheConfig::default()
        };
        let cache = MultiLevelCache::new(config, no_repo());
        cache.warm("T", Stub("x".into()), false);
        // Backdate the entry so it reads as idle past l1_idle_evict.
        if let Some(entry) = cache.l1.get("T") {
            entry.last_accessed.store(0, Ordering::Relaxed);
        }
        let report = cache.run_maintenance();
        assert_eq!(report.l1_demoted, 1);
        assert!(!cache.contains_l1("T"));
        assert!(cache.contains_l2("T"));
    }

    #[test]
    fn very_old_l1_entry_is_dropped_not_demoted() {
        let config = CacheConfig {
            l1_idle_evict: Duration::from_millis(10),
            l1_demote_deadline: Duration::from_millis(20),
            ..CacheConfig::default()
        };
        let cache = MultiLevelCache::new(config, no_repo());
        cache.warm("T", Stub("x".into()), false);
        if let Some(entry) = cache.l1.get("T") {
            entry.last_accessed.store(0, Ordering::Relaxed);
        }
        let report = cache.run_maintenance();
        assert_eq!(report.l1_dropped, 1);
        assert!(!cache.contains_l1("T"));
        assert!(!cache.contains_l2("T"));
    }

    #[test]
    fn warm_top_k_promotes_most_accessed_l2_entries() {
        let cache = MultiLevelCache::new(CacheConfig::default(), no_repo());
        cache.warm("hot", Stub("hot".into()), true);
        cache.warm("cold", Stub("cold".into()), true);
        // Simulate access-count history, then demote both to L2-only.
        cache.l1.remove("hot");
        cache.l1.remove("cold");
        if let Some(entry) = cache.l2.get("hot") {
            entry.access_count.store(50, Ordering::Relaxed);
        }
        if let Some(entry) = cache.l2.get("cold") {
            entry.access_count.store(1, Ordering::Relaxed);
        }
        let promoted = cache.warm_top_k(1);
        assert_eq!(promoted, 1);
        assert!(cache.contains_l1("hot"));
        assert!(!cache.contains_l1("cold"));
    }
}
