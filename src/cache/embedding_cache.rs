use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Thread-safe LRU cache of paragraph vectors keyed by normalized hash
///
/// Sits between the store lookup and the embedder, so repeated wording seen in one
/// worker run (or across runs of a long-lived worker) is embedded once.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl EmbeddingCache {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Vec<f32>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, normalized_hash: &str) -> Option<Vec<f32>> {
        self.lock().get(normalized_hash).cloned()
    }

    pub fn put(&self, normalized_hash: String, embedding: Vec<f32>) {
        self.lock().put(normalized_hash, embedding);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let cache = EmbeddingCache::new(10);
        cache.put("hash-a".to_string(), vec![1.0, 2.0, 3.0]);

        assert_eq!(cache.get("hash-a"), Some(vec![1.0, 2.0, 3.0]));
        assert!(cache.get("hash-b").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_least_recently_used_is_evicted() {
        let cache = EmbeddingCache::new(2);
        cache.put("a".to_string(), vec![1.0]);
        cache.put("b".to_string(), vec![2.0]);
        let _ = cache.get("a");
        cache.put("c".to_string(), vec![3.0]);

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = EmbeddingCache::new(0);
        assert!(cache.is_empty());
        cache.put("a".to_string(), vec![1.0]);
        cache.put("b".to_string(), vec![2.0]);
        assert_eq!(cache.len(), 1);
    }
}
