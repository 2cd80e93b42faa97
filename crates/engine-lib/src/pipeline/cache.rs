//! TTL cache of entity reports keyed by analysis window

use crate::report::EntityReport;
use dashmap::DashMap;
use std::time::{Duration, Instant};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity_id: String,
    pub window_days: u32,
    pub step: String,
}

impl CacheKey {
    pub fn new(entity_id: impl Into<String>, window_days: u32, step: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            window_days,
            step: step.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedReport {
    report: EntityReport,
    stored_at: Instant,
}

/// Latest report per (entity, window, step), expired after a fixed TTL
#[derive(Debug)]
pub struct ResultCache {
    entries: DashMap<CacheKey, CachedReport>,
    ttl: Duration,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn insert(&self, key: CacheKey, report: EntityReport) {
        self.entries.insert(
            key,
            CachedReport {
                report,
                stored_at: Instant::now(),
            },
        );
    }

    /// Fresh report for `key`; an expired entry is evicted
    pub fn get(&self, key: &CacheKey) -> Option<EntityReport> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => {
                return Some(entry.report.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Most recently stored fresh report for an entity, under any window
    pub fn latest_for(&self, entity_id: &str) -> Option<EntityReport> {
        self.entries
            .iter()
            .filter(|e| e.key().entity_id == entity_id && e.stored_at.elapsed() <= self.ttl)
            .max_by_key(|e| e.stored_at)
            .map(|e| e.report.clone())
    }

    /// All fresh reports, one per entity, sorted by entity id
    pub fn latest(&self) -> Vec<EntityReport> {
        let mut newest: std::collections::BTreeMap<String, (Instant, EntityReport)> =
            std::collections::BTreeMap::new();
        for entry in self.entries.iter() {
            if entry.stored_at.elapsed() > self.ttl {
                continue;
            }
            let replace = newest
                .get(&entry.key().entity_id)
                .map_or(true, |(stored_at, _)| entry.stored_at > *stored_at);
            if replace {
                newest.insert(
                    entry.key().entity_id.clone(),
                    (entry.stored_at, entry.report.clone()),
                );
            }
        }
        newest.into_values().map(|(_, report)| report).collect()
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, v| v.stored_at.elapsed() <= ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn report(entity: &str) -> EntityReport {
        EntityReport::empty(entity, Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap())
    }

    #[test]
    fn test_insert_and_get() {
        let cache = ResultCache::default();
        let key = CacheKey::new("hdfc", 7, "15m");
        cache.insert(key.clone(), report("hdfc"));

        assert_eq!(cache.get(&key).unwrap().entity_id, "hdfc");
        assert!(cache.get(&CacheKey::new("hdfc", 1, "15m")).is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_evicted() {
        let cache = ResultCache::new(Duration::from_millis(20));
        let key = CacheKey::new("hdfc", 7, "15m");
        cache.insert(key.clone(), report("hdfc"));
        cache.insert(CacheKey::new("sbi", 7, "15m"), report("sbi"));

        std::thread::sleep(Duration::from_millis(40));

        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 1);
        assert!(cache.latest().is_empty());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_latest_one_per_entity() {
        let cache = ResultCache::default();
        cache.insert(CacheKey::new("sbi", 7, "15m"), report("sbi"));
        cache.insert(CacheKey::new("hdfc", 7, "15m"), report("hdfc"));
        cache.insert(CacheKey::new("hdfc", 1, "5m"), report("hdfc"));

        let latest = cache.latest();
        let ids: Vec<&str> = latest.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["hdfc", "sbi"]);
        assert!(cache.latest_for("hdfc").is_some());
        assert!(cache.latest_for("axis").is_none());
    }
}
