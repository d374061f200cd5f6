//! Per-file index operation, batched reindex, and progress/ETA tracking.
//! The operational core the Daemon drives from both the watcher's event
//! loop and the startup reconciliation task.

use crate::cache::EmbeddingCache;
use crate::cancel::CancellationToken;
use crate::chunker::{ChunkInput, Chunker};
use crate::config::Config;
use crate::embedder::{CachedEmbedder, Embedder};
use crate::ignore::Ignorer;
use crate::model::{now_unix, sha256_hex, IndexStats, Progress};
use crate::pattern::matches_patterns;
use crate::repository::IndexRepository;
use crate::{PommelError, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

const RETRY_BACKOFFS_MS: [u64; 3] = [100, 200, 300];
const ROLLING_WINDOW_SIZE: usize = 10;

struct BatchSample {
    chunks: usize,
    duration: Duration,
}

#[derive(Default)]
struct StatsInner {
    total_files: usize,
    total_chunks: usize,
    last_indexed_at_unix: Option<u64>,
    progress: Progress,
}

pub struct Indexer {
    project_root: PathBuf,
    repository: Arc<dyn IndexRepository>,
    chunker: Arc<dyn Chunker>,
    embedder: CachedEmbedder,
    ignorer: Arc<Ignorer>,
    config: Config,
    stats: Mutex<StatsInner>,
    indexing_active: AtomicBool,
    rolling_window: Mutex<VecDeque<BatchSample>>,
}

impl Indexer {
    pub fn new(
        project_root: PathBuf,
        repository: Arc<dyn IndexRepository>,
        chunker: Arc<dyn Chunker>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
        ignorer: Arc<Ignorer>,
        config: Config,
    ) -> Self {
        Self {
            project_root,
            repository,
            chunker,
            embedder: CachedEmbedder::new(embedder, cache),
            ignorer,
            config,
            stats: Mutex::new(StatsInner::default()),
            indexing_active: AtomicBool::new(false),
            rolling_window: Mutex::new(VecDeque::with_capacity(ROLLING_WINDOW_SIZE)),
        }
    }

    pub fn matches_patterns(&self, rel_path: &str) -> bool {
        let pattern_ok = matches_patterns(rel_path, &self.config.include, &self.config.exclude);
        pattern_ok && !self.ignorer.should_ignore(Path::new(rel_path))
    }

    /// `path` is project-relative.
    pub fn index_file(&self, token: &CancellationToken, path: &str) -> Result<()> {
        if token.is_cancelled() {
            return Err(PommelError::Cancelled);
        }
        if !self.matches_patterns(path) {
            return Ok(());
        }

        let abs_path = self.project_root.join(path);
        let metadata = match std::fs::metadata(&abs_path) {
            Ok(m) => m,
            Err(_) => return Err(PommelError::NotFound(abs_path)),
        };

        let size = metadata.len();
        if self.config.max_file_size > 0 && size > self.config.max_file_size {
            return Ok(());
        }
        if size == 0 {
            return Ok(());
        }

        if token.is_cancelled() {
            return Err(PommelError::Cancelled);
        }
        let bytes = read_with_retry(&abs_path)?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let content_hash = sha256_hex(&bytes);

        if token.is_cancelled() {
            return Err(PommelError::Cancelled);
        }
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_else(now_unix);

        // Chunk ids are derived from the path's identity hash rather than the
        // repository-assigned numeric file id, so they don't depend on
        // insertion order and are stable across re-indexes.
        let identity = crate::model::path_identity(path);
        let chunk_input = ChunkInput { path: path.to_string(), content: content.clone(), mtime_unix: mtime };
        let output = self.chunker.chunk(&chunk_input, identity);
        if output.chunks.is_empty() {
            return Ok(());
        }
        for err in &output.errors {
            warn!(path, error = %err.message, "chunker reported a non-fatal error");
        }

        if token.is_cancelled() {
            return Err(PommelError::Cancelled);
        }

        let chunks = output.chunks;
        let started = Instant::now();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed(&texts)?;
        self.record_batch(chunks.len(), started.elapsed());

        if token.is_cancelled() {
            return Err(PommelError::Cancelled);
        }

        // Embeddings are computed before the swap so the atomic
        // replace_file call below is the only mutation of shared state —
        // a reader never sees this file with some but not all of its
        // chunks/vectors.
        self.repository.replace_file(token, path, &content_hash, &output.language, size, mtime, chunks, vectors)?;

        let mut stats = self.stats.lock().unwrap();
        stats.total_files = self.repository.file_count();
        stats.total_chunks = self.repository.chunk_count();
        stats.last_indexed_at_unix = Some(now_unix());
        Ok(())
    }

    /// Idempotent: deleting a never-indexed path is success.
    pub fn delete_file(&self, token: &CancellationToken, path: &str) -> Result<()> {
        self.repository.delete_file(token, path)?;
        let mut stats = self.stats.lock().unwrap();
        stats.total_files = self.repository.file_count();
        stats.total_chunks = self.repository.chunk_count();
        Ok(())
    }

    pub fn reindex_all(&self, token: &CancellationToken) -> Result<()> {
        self.repository.clear_all(token)?;
        let worklist = self.walk_worklist();

        self.indexing_active.store(true, Ordering::SeqCst);
        {
            let mut stats = self.stats.lock().unwrap();
            stats.progress = Progress {
                files_discovered: worklist.len(),
                files_processed: 0,
                started_at_unix: Some(now_unix()),
            };
        }

        for rel_path in &worklist {
            if token.is_cancelled() {
                break;
            }
            if let Err(e) = self.index_file(token, rel_path) {
                warn!(path = %rel_path, code = e.code(), "non-fatal error during reindex_all");
            }
            self.stats.lock().unwrap().progress.files_processed += 1;
        }

        self.indexing_active.store(false, Ordering::SeqCst);
        let mut stats = self.stats.lock().unwrap();
        stats.total_files = self.repository.file_count();
        stats.total_chunks = self.repository.chunk_count();
        stats.last_indexed_at_unix = Some(now_unix());
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        let stats = self.stats.lock().unwrap();
        IndexStats {
            total_files: stats.total_files,
            total_chunks: stats.total_chunks,
            last_indexed_at_unix: stats.last_indexed_at_unix,
            indexing_active: self.indexing_active.load(Ordering::SeqCst),
            progress: stats.progress.clone(),
        }
    }

    fn record_batch(&self, chunks: usize, duration: Duration) {
        let mut window = self.rolling_window.lock().unwrap();
        if window.len() == ROLLING_WINDOW_SIZE {
            window.pop_front();
        }
        window.push_back(BatchSample { chunks, duration });
    }

    /// Rate = Σchunks / Σduration; ETA = remaining / rate. Zero with < 2 samples.
    pub fn eta_seconds(&self, remaining_chunks: usize) -> f64 {
        let window = self.rolling_window.lock().unwrap();
        if window.len() < 2 {
            return 0.0;
        }
        let total_chunks: usize = window.iter().map(|s| s.chunks).sum();
        let total_duration: f64 = window.iter().map(|s| s.duration.as_secs_f64()).sum();
        if total_duration <= 0.0 || total_chunks == 0 {
            return 0.0;
        }
        let rate = total_chunks as f64 / total_duration;
        remaining_chunks as f64 / rate
    }

    fn walk_worklist(&self) -> Vec<String> {
        let mut out = Vec::new();
        walk_dir(&self.project_root, &self.project_root, &mut out, &|rel| self.matches_patterns(rel));
        out
    }
}

fn walk_dir(root: &Path, dir: &Path, out: &mut Vec<String>, accept: &dyn Fn(&str) -> bool) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let rel = match path.strip_prefix(root) {
            Ok(r) => r.to_string_lossy().replace('\\', "/"),
            Err(_) => continue,
        };
        if rel == crate::ignore::STATE_DIR_NAME {
            continue;
        }
        let Ok(file_type) = entry.file_type() else { continue };
        if file_type.is_dir() {
            walk_dir(root, &path, out, accept);
        } else if file_type.is_file() && accept(&rel) {
            out.push(rel);
        }
    }
}

fn is_transient_lock_error(err: &std::io::Error) -> bool {
    matches!(err.kind(), std::io::ErrorKind::PermissionDenied)
}

/// Up to three attempts with 100/200/300 ms backoff on transient
/// sharing-violation/permission errors. On systems without that error class
/// the loop degenerates to a single attempt.
fn read_with_retry(path: &Path) -> Result<Vec<u8>> {
    for (attempt, backoff_ms) in RETRY_BACKOFFS_MS.iter().enumerate() {
        match std::fs::read(path) {
            Ok(bytes) => return Ok(bytes),
            Err(e) if is_transient_lock_error(&e) => {
                if attempt + 1 < RETRY_BACKOFFS_MS.len() {
                    std::thread::sleep(Duration::from_millis(*backoff_ms));
                }
            }
            Err(e) => return Err(PommelError::RepositoryIo(e.to_string())),
        }
    }
    Err(PommelError::FileLocked(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::LineChunker;
    use crate::embedder::HashingEmbedder;
    use crate::repository::InMemoryRepository;
    use tempfile::tempdir;

    fn make_indexer(root: &Path) -> Indexer {
        let repo = Arc::new(InMemoryRepository::new());
        let chunker = Arc::new(LineChunker);
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(16));
        let cache = Arc::new(EmbeddingCache::new(10));
        let ignorer = Arc::new(Ignorer::new(root, &[]).unwrap());
        Indexer::new(root.to_path_buf(), repo, chunker, embedder, cache, ignorer, Config::default())
    }

    #[test]
    fn index_file_then_search_finds_it() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn main() {\n    println!(\"hi\");\n}\n").unwrap();
        let indexer = make_indexer(dir.path());
        let token = CancellationToken::new();
        indexer.index_file(&token, "a.rs").unwrap();
        let stats = indexer.stats();
        assert_eq!(stats.total_files, 1);
        assert!(stats.total_chunks >= 1);
    }

    #[test]
    fn empty_file_is_a_no_op() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("empty.rs"), "").unwrap();
        let indexer = make_indexer(dir.path());
        let token = CancellationToken::new();
        indexer.index_file(&token, "empty.rs").unwrap();
        assert_eq!(indexer.stats().total_files, 0);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let indexer = make_indexer(dir.path());
        let token = CancellationToken::new();
        let err = indexer.index_file(&token, "ghost.rs").unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn oversized_file_is_a_no_op() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("big.rs"), "x".repeat(100)).unwrap();
        let repo = Arc::new(InMemoryRepository::new());
        let chunker = Arc::new(LineChunker);
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(16));
        let cache = Arc::new(EmbeddingCache::new(10));
        let ignorer = Arc::new(Ignorer::new(dir.path(), &[]).unwrap());
        let mut config = Config::default();
        config.max_file_size = 10;
        let indexer = Indexer::new(dir.path().to_path_buf(), repo, chunker, embedder, cache, ignorer, config);
        let token = CancellationToken::new();
        indexer.index_file(&token, "big.rs").unwrap();
        assert_eq!(indexer.stats().total_files, 0);
    }

    #[test]
    fn reindex_all_walks_the_tree() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.rs"), "fn b() {}\n").unwrap();
        let indexer = make_indexer(dir.path());
        let token = CancellationToken::new();
        indexer.reindex_all(&token).unwrap();
        assert_eq!(indexer.stats().total_files, 2);
        assert!(!indexer.stats().indexing_active);
    }

    #[test]
    fn reindex_all_skips_the_state_dir() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".pommel")).unwrap();
        std::fs::write(dir.path().join(".pommel/state.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let indexer = make_indexer(dir.path());
        let token = CancellationToken::new();
        indexer.reindex_all(&token).unwrap();
        assert_eq!(indexer.stats().total_files, 1);
    }

    #[test]
    fn eta_is_zero_with_fewer_than_two_samples() {
        let dir = tempdir().unwrap();
        let indexer = make_indexer(dir.path());
        assert_eq!(indexer.eta_seconds(100), 0.0);
        indexer.record_batch(10, Duration::from_secs(1));
        assert_eq!(indexer.eta_seconds(100), 0.0);
    }

    #[test]
    fn eta_uses_rolling_window_rate() {
        let dir = tempdir().unwrap();
        let indexer = make_indexer(dir.path());
        indexer.record_batch(10, Duration::from_secs(1));
        indexer.record_batch(10, Duration::from_secs(1));
        // rate = 20 chunks / 2s = 10 chunks/sec
        assert!((indexer.eta_seconds(100) - 10.0).abs() < 1e-6);
    }

    #[test]
    fn delete_file_on_never_indexed_path_is_success() {
        let dir = tempdir().unwrap();
        let indexer = make_indexer(dir.path());
        let token = CancellationToken::new();
        assert!(indexer.delete_file(&token, "ghost.rs").is_ok());
    }

    #[test]
    fn reindex_idempotence_same_file_twice() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        let indexer = make_indexer(dir.path());
        let token = CancellationToken::new();
        indexer.index_file(&token, "a.rs").unwrap();
        let first = indexer.stats();
        indexer.index_file(&token, "a.rs").unwrap();
        let second = indexer.stats();
        assert_eq!(first.total_files, second.total_files);
        assert_eq!(first.total_chunks, second.total_chunks);
    }
}
