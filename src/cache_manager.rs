use std::{collections::BTreeMap, sync::Arc};

use anyhow::{anyhow, Result};
use log::{debug, info};
use parking_lot::RwLock;

use crate::cache::ClearableCache;

#[derive(Default)]
pub struct CacheManager {
    caches: RwLock<BTreeMap<String, Arc<dyn ClearableCache>>>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the cache under `id`, replacing a previously registered one.
    pub fn add(&self, id: impl Into<String>, cache: Arc<dyn ClearableCache>) {
        let id = id.into();
        if self.caches.write().insert(id.clone(), cache).is_some() {
            debug!("Replaced cache {}", id);
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.caches.read().keys().cloned().collect()
    }

    pub fn clear_all(&self) {
        let caches = self.caches.read();
        for cache in caches.values() {
            cache.clear();
        }
        info!("Cleared {} caches", caches.len());
    }

    pub fn clear_by_id<S: AsRef<str>>(&self, ids: &[S]) -> Result<()> {
        let caches = self.caches.read();
        let mut unknown = Vec::new();
        for id in ids {
            match caches.get(id.as_ref()) {
                Some(cache) => {
                    cache.clear();
                    info!("Cleared cache {}", id.as_ref());
                }
                None => unknown.push(id.as_ref().to_owned()),
            }
        }
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("unknown cache ids: {}", unknown.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::CacheManager;
    use crate::cache::{ClearableCache, ResultCache};

    #[test]
    fn should_clear_only_requested_caches() {
        let manager = CacheManager::new();
        let first = Arc::new(ResultCache::new(10, None));
        let second = Arc::new(ResultCache::new(10, None));
        first.insert(1, 1);
        second.insert(2, 2);
        manager.add("first", first.clone());
        manager.add("second", second.clone());

        manager.clear_by_id(&["first"]).unwrap();

        assert_eq!(first.len(), 0);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn should_report_unknown_ids_and_clear_known() {
        let manager = CacheManager::new();
        let cache = Arc::new(ResultCache::new(10, None));
        cache.insert(1, 1);
        manager.add("known", cache.clone());

        let result = manager.clear_by_id(&["unknown", "known"]);

        assert!(result.is_err());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn should_replace_cache_with_same_id() {
        let manager = CacheManager::new();
        let old = Arc::new(ResultCache::new(10, None));
        let new = Arc::new(ResultCache::new(10, None));
        old.insert(1, 1);
        new.insert(1, 1);
        manager.add("id", old.clone());
        manager.add("id", new.clone());

        manager.clear_all();

        assert_eq!(manager.ids(), vec!["id".to_owned()]);
        assert_eq!(old.len(), 1);
        assert_eq!(new.len(), 0);
    }
}
