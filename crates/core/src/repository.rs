//! Abstract storage contract (§4.6): files, chunks, vectors, keyword
//! postings. `InMemoryRepository` is the default, test-friendly
//! implementation; a real backend (embedded store, SQL + vector extension)
//! implements the same trait.

use crate::cancel::CancellationToken;
use crate::model::{Chunk, FileId, FileRecord};
use crate::{PommelError, Result};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

pub trait IndexRepository: Send + Sync {
    fn insert_file(
        &self,
        token: &CancellationToken,
        path: &str,
        content_hash: &str,
        language: &str,
        size_bytes: u64,
        mtime_unix: u64,
    ) -> Result<FileId>;

    fn insert_chunk(&self, token: &CancellationToken, chunk: Chunk, file_id: FileId) -> Result<()>;

    /// Rejected unless every vector has the declared dimension.
    fn insert_vectors(
        &self,
        token: &CancellationToken,
        chunk_ids: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<()>;

    /// Atomically replaces `path`'s file record, chunks, and vectors in a
    /// single step: a concurrent reader using any other trait method
    /// observes either the complete pre-replacement state or the complete
    /// post-replacement state, never a file with some but not all of its
    /// chunks. `chunks` and `vectors` must be the same length and
    /// index-aligned; each chunk's `file_id` is assigned by this call.
    fn replace_file(
        &self,
        token: &CancellationToken,
        path: &str,
        content_hash: &str,
        language: &str,
        size_bytes: u64,
        mtime_unix: u64,
        chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<FileId>;

    fn chunk_ids_by_file(&self, token: &CancellationToken, path: &str) -> Result<Vec<String>>;
    fn delete_vectors_by_chunks(&self, token: &CancellationToken, ids: &[String]) -> Result<()>;
    fn delete_chunks_by_file(&self, token: &CancellationToken, path: &str) -> Result<()>;
    fn delete_file(&self, token: &CancellationToken, path: &str) -> Result<()>;

    fn clear_all(&self, token: &CancellationToken) -> Result<()>;

    fn file_count(&self) -> usize;
    fn chunk_count(&self) -> usize;
    /// `None` until the first vector insert declares the model's dimension.
    fn dimensions(&self) -> Option<usize>;

    fn list_files(&self, token: &CancellationToken) -> Result<Vec<(String, u64)>>;
    fn chunks_by_ids(&self, token: &CancellationToken, ids: &[String]) -> Result<Vec<Chunk>>;
    /// Looks up a file record by its internal id, for hydrating search results.
    fn file_by_id(&self, token: &CancellationToken, file_id: FileId) -> Result<Option<FileRecord>>;

    /// Ordered by ascending distance (0 = identical).
    fn search_vectors(
        &self,
        token: &CancellationToken,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>>;

    /// Ordered by descending lexical score.
    fn search_keywords(
        &self,
        token: &CancellationToken,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<(String, f32)>>;
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(PommelError::Cancelled);
    }
    Ok(())
}

#[derive(Default)]
struct KeywordIndex {
    /// term -> (chunk_id -> term frequency in that chunk)
    postings: HashMap<String, HashMap<String, u32>>,
    total_docs: usize,
}

impl KeywordIndex {
    /// IDF with Laplace smoothing: `ln((N+1)/(df+1)) + 1`.
    fn idf(&self, term: &str) -> f64 {
        let df = self.postings.get(term).map(|m| m.len()).unwrap_or(self.total_docs);
        (((self.total_docs as f64 + 1.0) / (df as f64 + 1.0)).ln() + 1.0).max(1.0)
    }

    fn index_chunk(&mut self, chunk_id: &str, content: &str) {
        self.total_docs += 1;
        for term in tokenize(content) {
            *self.postings.entry(term).or_default().entry(chunk_id.to_string()).or_insert(0) += 1;
        }
    }

    fn remove_chunk(&mut self, chunk_id: &str) {
        self.total_docs = self.total_docs.saturating_sub(1);
        self.postings.retain(|_, docs| {
            docs.remove(chunk_id);
            !docs.is_empty()
        });
    }

    fn search(&self, query_text: &str, k: usize) -> Vec<(String, f32)> {
        let terms: Vec<String> = tokenize(query_text);
        let mut scores: HashMap<String, f64> = HashMap::new();
        for term in &terms {
            let idf = self.idf(term);
            if let Some(docs) = self.postings.get(term) {
                for (chunk_id, tf) in docs {
                    *scores.entry(chunk_id.clone()).or_insert(0.0) += idf * (*tf as f64);
                }
            }
        }
        let mut ranked: Vec<(String, f32)> = scores.into_iter().map(|(id, s)| (id, s as f32)).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

struct FileEntry {
    record: FileRecord,
    chunk_ids: Vec<String>,
}

pub struct InMemoryRepository {
    files: DashMap<String, FileEntry>,
    chunks: DashMap<String, Chunk>,
    vectors: DashMap<String, Vec<f32>>,
    keyword_index: RwLock<KeywordIndex>,
    next_file_id: AtomicU64,
    dimensions: RwLock<Option<usize>>,
    /// Held as a write guard across a whole file replace/delete, and as a
    /// read guard around every cross-key read, so no reader can observe a
    /// file mid-replacement split across the `files`/`chunks`/`vectors` maps.
    swap_lock: RwLock<()>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            files: DashMap::new(),
            chunks: DashMap::new(),
            vectors: DashMap::new(),
            keyword_index: RwLock::new(KeywordIndex::default()),
            next_file_id: AtomicU64::new(1),
            dimensions: RwLock::new(None),
            swap_lock: RwLock::new(()),
        }
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexRepository for InMemoryRepository {
    fn insert_file(
        &self,
        token: &CancellationToken,
        path: &str,
        content_hash: &str,
        language: &str,
        size_bytes: u64,
        mtime_unix: u64,
    ) -> Result<FileId> {
        check_cancelled(token)?;
        let id = if let Some(existing) = self.files.get(path) {
            existing.record.id
        } else {
            self.next_file_id.fetch_add(1, Ordering::SeqCst)
        };
        let record = FileRecord {
            id,
            path: path.to_string(),
            content_hash: content_hash.to_string(),
            language: language.to_string(),
            size_bytes,
            mtime_unix,
        };
        self.files
            .entry(path.to_string())
            .and_modify(|e| e.record = record.clone())
            .or_insert_with(|| FileEntry { record, chunk_ids: Vec::new() });
        Ok(id)
    }

    fn insert_chunk(&self, token: &CancellationToken, chunk: Chunk, file_id: FileId) -> Result<()> {
        check_cancelled(token)?;
        let path = self
            .files
            .iter()
            .find(|e| e.record.id == file_id)
            .map(|e| e.key().clone())
            .ok_or_else(|| PommelError::RepositoryIo(format!("unknown file id {file_id}")))?;
        self.keyword_index.write().unwrap().index_chunk(&chunk.id, &chunk.content);
        if let Some(mut entry) = self.files.get_mut(&path) {
            entry.chunk_ids.push(chunk.id.clone());
        }
        self.chunks.insert(chunk.id.clone(), chunk);
        Ok(())
    }

    fn insert_vectors(
        &self,
        token: &CancellationToken,
        chunk_ids: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<()> {
        check_cancelled(token)?;
        let mut declared = self.dimensions.write().unwrap();
        let dim = match *declared {
            Some(d) => d,
            None => {
                let d = vectors.first().map(|v| v.len()).unwrap_or(0);
                *declared = Some(d);
                d
            }
        };
        for v in vectors {
            if v.len() != dim {
                return Err(PommelError::RepositoryIo(format!(
                    "vector dimension {} does not match declared dimension {dim}",
                    v.len()
                )));
            }
        }
        for (id, vector) in chunk_ids.iter().zip(vectors.iter()) {
            self.vectors.insert(id.clone(), vector.clone());
        }
        Ok(())
    }

    fn replace_file(
        &self,
        token: &CancellationToken,
        path: &str,
        content_hash: &str,
        language: &str,
        size_bytes: u64,
        mtime_unix: u64,
        mut chunks: Vec<Chunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<FileId> {
        check_cancelled(token)?;
        if chunks.len() != vectors.len() {
            return Err(PommelError::RepositoryIo(format!(
                "replace_file: {} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let _guard = self.swap_lock.write().unwrap();

        // Validate the declared dimension before touching any existing
        // data, so a rejected batch leaves the prior generation intact.
        {
            let mut declared = self.dimensions.write().unwrap();
            let dim = match *declared {
                Some(d) => d,
                None => {
                    let d = vectors.first().map(|v| v.len()).unwrap_or(0);
                    *declared = Some(d);
                    d
                }
            };
            for v in &vectors {
                if v.len() != dim {
                    return Err(PommelError::RepositoryIo(format!(
                        "vector dimension {} does not match declared dimension {dim}",
                        v.len()
                    )));
                }
            }
        }

        let id = self
            .files
            .get(path)
            .map(|e| e.record.id)
            .unwrap_or_else(|| self.next_file_id.fetch_add(1, Ordering::SeqCst));
        let old_chunk_ids = self.files.get(path).map(|e| e.chunk_ids.clone()).unwrap_or_default();

        for chunk in chunks.iter_mut() {
            chunk.file_id = id;
        }
        let new_chunk_ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();

        {
            let mut kw = self.keyword_index.write().unwrap();
            for old_id in &old_chunk_ids {
                kw.remove_chunk(old_id);
            }
            for chunk in &chunks {
                kw.index_chunk(&chunk.id, &chunk.content);
            }
        }
        for old_id in &old_chunk_ids {
            self.chunks.remove(old_id);
            self.vectors.remove(old_id);
        }
        for chunk in chunks {
            self.chunks.insert(chunk.id.clone(), chunk);
        }
        for (chunk_id, vector) in new_chunk_ids.iter().zip(vectors.into_iter()) {
            self.vectors.insert(chunk_id.clone(), vector);
        }

        let record = FileRecord {
            id,
            path: path.to_string(),
            content_hash: content_hash.to_string(),
            language: language.to_string(),
            size_bytes,
            mtime_unix,
        };
        self.files.insert(path.to_string(), FileEntry { record, chunk_ids: new_chunk_ids });

        Ok(id)
    }

    fn chunk_ids_by_file(&self, token: &CancellationToken, path: &str) -> Result<Vec<String>> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.read().unwrap();
        Ok(self.files.get(path).map(|e| e.chunk_ids.clone()).unwrap_or_default())
    }

    fn delete_vectors_by_chunks(&self, token: &CancellationToken, ids: &[String]) -> Result<()> {
        check_cancelled(token)?;
        for id in ids {
            self.vectors.remove(id);
        }
        Ok(())
    }

    fn delete_chunks_by_file(&self, token: &CancellationToken, path: &str) -> Result<()> {
        check_cancelled(token)?;
        if let Some(mut entry) = self.files.get_mut(path) {
            let mut kw = self.keyword_index.write().unwrap();
            for id in entry.chunk_ids.drain(..) {
                self.chunks.remove(&id);
                kw.remove_chunk(&id);
            }
        }
        Ok(())
    }

    fn delete_file(&self, token: &CancellationToken, path: &str) -> Result<()> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.write().unwrap();
        let chunk_ids = self.files.get(path).map(|e| e.chunk_ids.clone()).unwrap_or_default();
        {
            let mut kw = self.keyword_index.write().unwrap();
            for id in &chunk_ids {
                self.chunks.remove(id);
                self.vectors.remove(id);
                kw.remove_chunk(id);
            }
        }
        self.files.remove(path);
        Ok(())
    }

    fn clear_all(&self, token: &CancellationToken) -> Result<()> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.write().unwrap();
        self.files.clear();
        self.chunks.clear();
        self.vectors.clear();
        *self.keyword_index.write().unwrap() = KeywordIndex::default();
        Ok(())
    }

    fn file_count(&self) -> usize {
        self.files.len()
    }

    fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    fn dimensions(&self) -> Option<usize> {
        *self.dimensions.read().unwrap()
    }

    fn list_files(&self, token: &CancellationToken) -> Result<Vec<(String, u64)>> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.read().unwrap();
        Ok(self.files.iter().map(|e| (e.record.path.clone(), e.record.mtime_unix)).collect())
    }

    fn chunks_by_ids(&self, token: &CancellationToken, ids: &[String]) -> Result<Vec<Chunk>> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.read().unwrap();
        Ok(ids.iter().filter_map(|id| self.chunks.get(id).map(|c| c.clone())).collect())
    }

    fn file_by_id(&self, token: &CancellationToken, file_id: FileId) -> Result<Option<FileRecord>> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.read().unwrap();
        Ok(self.files.iter().find(|e| e.record.id == file_id).map(|e| e.record.clone()))
    }

    fn search_vectors(
        &self,
        token: &CancellationToken,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.read().unwrap();
        let mut scored: Vec<(String, f32)> = self
            .vectors
            .iter()
            .map(|entry| (entry.key().clone(), l2_distance(query, entry.value())))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn search_keywords(
        &self,
        token: &CancellationToken,
        query_text: &str,
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        check_cancelled(token)?;
        let _guard = self.swap_lock.read().unwrap();
        Ok(self.keyword_index.read().unwrap().search(query_text, k))
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}
