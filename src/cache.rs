//! Directory-listing cache and the invalidation seam the tree sync drives.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::config::Settings;

/// Something holding data keyed by tree path that must be dropped when the
/// filesystem changes underneath it.
pub trait CacheInvalidator: Send + Sync {
    fn delete(&self, key: &str);

    /// Drop every key starting with `prefix`.
    fn delete_prefix(&self, prefix: &str);
}

struct CacheEntry<V> {
    value: V,
    inserted: Instant,
}

/// Concurrent map with a fixed time-to-live per entry.
pub struct ListingCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> ListingCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn from_config(config: &Settings) -> Self {
        Self::new(config.client.cache_ttl())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.inserted.elapsed() < self.ttl {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.entries.remove(key);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    /// Drop expired entries, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.inserted.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<V: Clone + Send + Sync> CacheInvalidator for ListingCache<V> {
    fn delete(&self, key: &str) {
        if self.remove(key) {
            crate::debug_event!("cache", "delete", "{key:?}");
        }
    }

    fn delete_prefix(&self, prefix: &str) {
        let removed = self.remove_prefix(prefix);
        if removed > 0 {
            crate::debug_event!("cache", "delete prefix", "{prefix:?} ({removed} entries)");
        }
    }
}

/// Invalidate what a change at `key` makes stale: the listing of its parent
/// and anything cached for the node itself or below it.
pub fn invalidate_path(cache: &dyn CacheInvalidator, namespace: &str, key: &str) {
    let parent = crate::tree::parent_key(key);
    cache.delete(&format!("{namespace}{parent}"));
    cache.delete(&format!("{namespace}{key}"));
    if key.is_empty() {
        cache.delete_prefix(namespace);
    } else {
        cache.delete_prefix(&format!("{namespace}{key}/"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = ListingCache::new(Duration::from_secs(30));
        cache.insert("src", vec!["lib.rs".to_string()]);
        assert!(cache.get("src").is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get("src").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = ListingCache::new(Duration::from_secs(10));
        cache.insert("a", 1);
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.insert("b", 2);
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get("b"), Some(2));
    }

    #[test]
    fn test_invalidate_path_hits_parent_and_subtree() {
        let cache = ListingCache::new(Duration::from_secs(60));
        for key in ["", "src", "src/a", "src/a/deep", "src/ab", "docs"] {
            cache.insert(key, ());
        }

        invalidate_path(&cache, "", "src/a");

        assert!(cache.get("src").is_none());
        assert!(cache.get("src/a").is_none());
        assert!(cache.get("src/a/deep").is_none());
        assert!(cache.get("src/ab").is_some());
        assert!(cache.get("docs").is_some());
        assert!(cache.get("").is_some());
    }

    #[test]
    fn test_namespaced_keys() {
        let cache = ListingCache::new(Duration::from_secs(60));
        cache.insert("/proj:", ());
        cache.insert("/proj:lib", ());
        cache.insert("/other:", ());

        invalidate_path(&cache, "/proj:", "lib");

        assert_eq!(cache.len(), 1);
        assert!(cache.get("/other:").is_some());
    }
}
