//! The embedding provider is an external collaborator; this module defines
//! the contract and a reference "hashing embedder" that stands in for a
//! real model, plus the cache-consulting wrapper every real provider is
//! run through.

use crate::cache::{fingerprint, EmbeddingCache};
use crate::{PommelError, Result};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
    fn dimension(&self) -> usize;

    fn embed_single(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(&[text.to_string()])?.into_iter().next().unwrap_or_default())
    }
}

/// Deterministic pseudo-embedding derived from a SHA-256 digest of the input
/// text, expanded to `dimension` floats and L2-normalized. Not a semantic
/// model — a test double with the same call contract.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.dimension == 0 {
            return Err(PommelError::UnknownModelDimensions);
        }
        Ok(texts.iter().map(|t| hashing_vector(t, self.dimension)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn hashing_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut out = vec![0f32; dimension];
    let mut counter: u32 = 0;
    let mut filled = 0;
    while filled < dimension {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        hasher.update(counter.to_le_bytes());
        let digest = hasher.finalize();
        for chunk in digest.chunks(4) {
            if filled >= dimension {
                break;
            }
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            let as_u32 = u32::from_le_bytes(buf);
            // Map into [-1, 1].
            out[filled] = (as_u32 as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32;
            filled += 1;
        }
        counter += 1;
    }
    let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in out.iter_mut() {
            *v /= norm;
        }
    }
    out
}

/// Wraps any `Embedder`, consulting the cache per text, batching only the
/// misses, and reassembling the result in input order.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }
}

impl Embedder for CachedEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let fingerprints: Vec<_> = texts.iter().map(|t| fingerprint(t)).collect();
        let mut results: Vec<Option<Vec<f32>>> = fingerprints.iter().map(|fp| self.cache.get(*fp)).collect();

        let miss_indices: Vec<usize> = results.iter().enumerate().filter(|(_, v)| v.is_none()).map(|(i, _)| i).collect();
        if !miss_indices.is_empty() {
            let miss_texts: Vec<String> = miss_indices.iter().map(|&i| texts[i].clone()).collect();
            let embedded = self.inner.embed(&miss_texts)?;
            for (&idx, vector) in miss_indices.iter().zip(embedded.into_iter()) {
                self.cache.put(fingerprints[idx], vector.clone());
                results[idx] = Some(vector);
            }
        }

        Ok(results.into_iter().map(|v| v.unwrap_or_default()).collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(16);
        let a = embedder.embed_single("hello").unwrap();
        let b = embedder.embed_single("hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn hashing_embedder_is_l2_normalized() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed_single("anything").unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn zero_dimension_is_unknown_model_dimensions() {
        let embedder = HashingEmbedder::new(0);
        let err = embedder.embed(&["x".into()]).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_MODEL_DIMENSIONS");
    }

    struct CountingEmbedder {
        calls: std::sync::atomic::AtomicUsize,
        inner: HashingEmbedder,
    }

    impl Embedder for CountingEmbedder {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(texts.len(), std::sync::atomic::Ordering::SeqCst);
            self.inner.embed(texts)
        }
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
    }

    #[test]
    fn cached_embedder_only_calls_through_on_misses() {
        let counting = Arc::new(CountingEmbedder {
            calls: std::sync::atomic::AtomicUsize::new(0),
            inner: HashingEmbedder::new(8),
        });
        let cache = Arc::new(EmbeddingCache::new(10));
        let cached = CachedEmbedder::new(counting.clone(), cache);

        let first = cached.embed(&["a".into(), "b".into()]).unwrap();
        assert_eq!(counting.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        let second = cached.embed(&["a".into(), "b".into()]).unwrap();
        assert_eq!(counting.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn cached_embedder_reassembles_in_input_order() {
        let counting = Arc::new(CountingEmbedder {
            calls: std::sync::atomic::AtomicUsize::new(0),
            inner: HashingEmbedder::new(8),
        });
        let cache = Arc::new(EmbeddingCache::new(10));
        let cached = CachedEmbedder::new(counting, cache);
        cached.embed(&["a".into()]).unwrap();
        let results = cached.embed(&["b".into(), "a".into()]).unwrap();
        let direct_b = cached.embed(&["b".into()]).unwrap()[0].clone();
        assert_eq!(results[0], direct_b);
    }
}
