// src/validation/cache.rs

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::domain::Configuration;
use crate::ops::{elapsed_between, Clock, SystemClock};

/// Recently validated configurations keyed by fingerprint, with a TTL.
pub struct ValidationCache {
    cache: Mutex<LruCache<String, CachedConfig>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

#[derive(Clone)]
struct CachedConfig {
    config: Configuration,
    cached_at: DateTime<Utc>,
}

impl ValidationCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::with_clock(capacity, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        ValidationCache {
            cache: Mutex::new(LruCache::new(cap)),
            ttl,
            clock,
        }
    }

    /// Returns the cached configuration if it is fresh and still passes
    /// `revalidate`; stale or failing entries are evicted.
    pub fn get<F>(&self, key: &str, revalidate: F) -> Option<Configuration>
    where
        F: FnOnce(&Configuration) -> bool,
    {
        let now = self.clock.now();
        let candidate = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            match cache.get(key) {
                Some(entry) if elapsed_between(entry.cached_at, now) < self.ttl => {
                    Some(entry.config.clone())
                }
                Some(_) => {
                    cache.pop(key);
                    None
                }
                None => None,
            }
        };

        let config = candidate?;
        if revalidate(&config) {
            log::debug!("validation cache hit");
            Some(config)
        } else {
            self.invalidate(key);
            None
        }
    }

    pub fn set(&self, key: impl Into<String>, config: Configuration) {
        let entry = CachedConfig {
            config,
            cached_at: self.clock.now(),
        };
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.put(key.into(), entry);
    }

    pub fn invalidate(&self, key: &str) {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.pop(key);
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
