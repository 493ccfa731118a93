//! # Memory State Cache
//!
//! Bounded LRU map from ledger location to serialized state. Evicted entries
//! are simply reloaded from the ledger on next use.

use crate::domain::state::CachedState;
use crate::domain::value_objects::Location;
use crate::errors::CacheError;
use crate::ports::outbound::StateCache;
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Default number of cached versions.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// In-memory state cache.
#[derive(Debug)]
pub struct MemoryCache {
    entries: Mutex<LruCache<Location, CachedState>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl MemoryCache {
    /// Create with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a custom capacity (at least one entry).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Number of cached versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl StateCache for MemoryCache {
    async fn get(&self, location: &Location) -> Result<Option<CachedState>, CacheError> {
        Ok(self.entries.lock().get(location).cloned())
    }

    async fn set(&self, location: &Location, state: CachedState) -> Result<(), CacheError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(location) {
            if *existing != state {
                return Err(CacheError::Conflict(location.to_string()));
            }
            return Ok(());
        }
        entries.put(location.clone(), state);
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Txid;
    use std::collections::BTreeMap;

    fn code(text: &str) -> CachedState {
        CachedState::Code {
            text: text.to_string(),
            deps: BTreeMap::new(),
            props: serde_json::json!({}),
            owner: "alice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_set_is_content_stable() {
        let cache = MemoryCache::new();
        let loc = Location::ledger(Txid::new([1; 32]), 1);
        cache.set(&loc, code("a")).await.unwrap();
        cache.set(&loc, code("a")).await.unwrap();
        assert_eq!(cache.get(&loc).await.unwrap(), Some(code("a")));

        let err = cache.set(&loc, code("b")).await.unwrap_err();
        assert!(matches!(err, CacheError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_eviction() {
        let cache = MemoryCache::with_capacity(1);
        let a = Location::ledger(Txid::new([1; 32]), 1);
        let b = Location::ledger(Txid::new([2; 32]), 1);
        cache.set(&a, code("a")).await.unwrap();
        cache.set(&b, code("b")).await.unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&a).await.unwrap(), None);
    }
}
