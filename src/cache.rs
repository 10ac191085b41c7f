//! Parsed template cache.
//!
//! Parsing is deterministic, so a template text only needs to be parsed once
//! per process. Trees are shared as `Arc<NodeTree>`; parse failures are never
//! cached. When the cache is full the least recently used template makes room.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Deserialize;

use crate::error::TwoSqlResult;
use crate::node::NodeTree;
use crate::parser;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    tree: Arc<NodeTree>,
    /// Value of the cache clock at the last hit or insert.
    last_used: AtomicU64,
}

/// Thread-safe cache of parsed templates, keyed by template text.
#[derive(Debug)]
pub struct TemplateCache {
    entries: DashMap<String, CacheEntry>,
    config: CacheConfig,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl TemplateCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries),
            config,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, template: &str) -> Option<Arc<NodeTree>> {
        if !self.config.enabled {
            return None;
        }
        if let Some(entry) = self.entries.get(template) {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&entry.tree));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Return the cached tree for `template`, parsing and caching it on a miss.
    pub fn get_or_parse(&self, template: &str) -> TwoSqlResult<Arc<NodeTree>> {
        if let Some(tree) = self.get(template) {
            return Ok(tree);
        }
        let tree = Arc::new(parser::parse(template)?);
        self.insert(template, Arc::clone(&tree));
        Ok(tree)
    }

    fn insert(&self, template: &str, tree: Arc<NodeTree>) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }
        while self.entries.len() >= self.config.max_entries
            && !self.entries.contains_key(template)
        {
            if !self.evict_least_recent() {
                break;
            }
        }
        self.entries.insert(
            template.to_string(),
            CacheEntry {
                tree,
                last_used: AtomicU64::new(self.tick()),
            },
        );
    }

    fn evict_least_recent(&self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.last_used.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());
        let Some(key) = oldest else {
            return false;
        };
        if self.entries.remove(&key).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                "template cache full ({} entries), evicted least recently used",
                self.config.max_entries
            );
        }
        true
    }

    pub fn contains(&self, template: &str) -> bool {
        self.entries.contains_key(template)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_once() {
        let cache = TemplateCache::default();
        let a = cache.get_or_parse("SELECT /*#id*/1").unwrap();
        let b = cache.get_or_parse("SELECT /*#id*/1").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_parse_errors_not_cached() {
        let cache = TemplateCache::default();
        assert!(cache.get_or_parse("SELECT 1 /*END*/").is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_bounded() {
        let cache = TemplateCache::new(CacheConfig {
            enabled: true,
            max_entries: 1,
        });
        cache.get_or_parse("SELECT 1").unwrap();
        cache.get_or_parse("SELECT 2").unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("SELECT 2"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_full_cache_evicts_least_recently_used() {
        let cache = TemplateCache::new(CacheConfig {
            enabled: true,
            max_entries: 2,
        });
        cache.get_or_parse("SELECT 1").unwrap();
        cache.get_or_parse("SELECT 2").unwrap();
        // touch the older entry so the other one is evicted
        cache.get_or_parse("SELECT 1").unwrap();
        cache.get_or_parse("SELECT 3").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("SELECT 1"));
        assert!(!cache.contains("SELECT 2"));
        assert!(cache.contains("SELECT 3"));
    }

    #[test]
    fn test_keeps_caching_past_the_bound() {
        let cache = TemplateCache::new(CacheConfig {
            enabled: true,
            max_entries: 10,
        });
        for i in 0..100 {
            cache.get_or_parse(&format!("SELECT {}", i)).unwrap();
        }
        assert_eq!(cache.len(), 10);
        let tree = cache.get_or_parse("SELECT 99").unwrap();
        assert!(Arc::ptr_eq(&tree, &cache.get_or_parse("SELECT 99").unwrap()));
        assert_eq!(cache.stats().evictions, 90);
    }

    #[test]
    fn test_disabled_cache_still_parses() {
        let cache = TemplateCache::new(CacheConfig {
            enabled: false,
            max_entries: 10,
        });
        assert!(!cache.is_enabled());
        let a = cache.get_or_parse("SELECT 1").unwrap();
        let b = cache.get_or_parse("SELECT 1").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(cache.is_empty());
    }
}
