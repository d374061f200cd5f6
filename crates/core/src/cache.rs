//! Thread-safe LRU cache mapping a chunk's content fingerprint to its
//! already-computed embedding, so re-indexing unchanged content never calls
//! the embedder again.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;

pub const DEFAULT_CAPACITY: usize = 1000;

pub type Fingerprint = [u8; 32];

pub struct EmbeddingCache {
    inner: Mutex<LruCache<Fingerprint, Vec<f32>>>,
}

impl EmbeddingCache {
    /// Zero (or an otherwise invalid) capacity falls back to `DEFAULT_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap());
        Self { inner: Mutex::new(LruCache::new(cap)) }
    }

    pub fn get(&self, fingerprint: Fingerprint) -> Option<Vec<f32>> {
        self.inner.lock().unwrap().get(&fingerprint).cloned()
    }

    pub fn put(&self, fingerprint: Fingerprint, vector: Vec<f32>) {
        self.inner.lock().unwrap().put(fingerprint, vector);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Content fingerprint used as the cache key: the SHA-256 digest of the
/// exact text submitted to the embedder.
pub fn fingerprint(content: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> Fingerprint {
        let mut k = [0u8; 32];
        k[0] = byte;
        k
    }

    #[test]
    fn put_then_get_returns_the_vector() {
        let cache = EmbeddingCache::new(2);
        cache.put(key(1), vec![0.1, 0.2]);
        assert_eq!(cache.get(key(1)), Some(vec![0.1, 0.2]));
    }

    #[test]
    fn missing_key_returns_none() {
        let cache = EmbeddingCache::new(2);
        assert_eq!(cache.get(key(99)), None);
    }

    #[test]
    fn eviction_drops_the_least_recently_used_entry() {
        let cache = EmbeddingCache::new(2);
        cache.put(key(1), vec![1.0]);
        cache.put(key(2), vec![2.0]);
        cache.get(key(1)); // touch 1, making 2 the LRU entry
        cache.put(key(3), vec![3.0]);
        assert!(cache.get(key(2)).is_none());
        assert!(cache.get(key(1)).is_some());
        assert!(cache.get(key(3)).is_some());
    }

    #[test]
    fn zero_capacity_falls_back_to_default() {
        let cache = EmbeddingCache::new(0);
        for i in 0..(DEFAULT_CAPACITY as u16 + 1) {
            let mut k = [0u8; 32];
            k[0..2].copy_from_slice(&i.to_le_bytes());
            cache.put(k, vec![i as f32]);
        }
        assert!(cache.len() <= DEFAULT_CAPACITY);
    }

    #[test]
    fn fingerprint_is_stable_for_identical_content() {
        assert_eq!(fingerprint("hello world"), fingerprint("hello world"));
        assert_ne!(fingerprint("hello world"), fingerprint("hello worlD"));
    }
}
