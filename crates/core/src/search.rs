//! Hybrid retrieval: parallel vector + keyword candidate generation,
//! Reciprocal Rank Fusion, split-chunk deduplication, and optional reranking.

use crate::cache::EmbeddingCache;
use crate::cancel::CancellationToken;
use crate::config::{Config, RerankFallback};
use crate::embedder::{CachedEmbedder, Embedder};
use crate::model::{Chunk, ChunkLevel, ParentRef};
use crate::repository::IndexRepository;
use crate::{PommelError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMode {
    All,
    Path,
    Subproject,
    Auto,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scope {
    pub mode: ScopeMode,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub levels: Option<Vec<ChunkLevel>>,
    pub path_prefix: Option<String>,
    pub scope: Option<Scope>,
    pub hybrid_enabled: Option<bool>,
    pub rerank_enabled: Option<bool>,
}

pub const DEFAULT_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSource {
    Vector,
    Keyword,
    Both,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub level: ChunkLevel,
    pub language: String,
    pub name: Option<String>,
    pub parent: Option<ParentRef>,
    pub score: f32,
    pub content: String,
    pub match_source: MatchSource,
    pub matched_splits: usize,
    pub vector_rank: Option<usize>,
    pub keyword_rank: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<SearchResult>,
    pub total_results: usize,
    pub search_time_ms: u64,
    pub scope: Option<Scope>,
    pub hybrid_enabled: bool,
    pub rerank_enabled: bool,
}

impl Serialize for Scope {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Scope", 2)?;
        s.serialize_field("mode", &self.mode)?;
        s.serialize_field("value", &self.value)?;
        s.end()
    }
}

pub struct RerankCandidate {
    pub chunk_id: String,
    pub content: String,
}

/// External collaborator: reorders candidates by relevance to `query`.
/// Returns one score per candidate, same order as the input slice.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<f32>>;
}

struct FusedEntry {
    chunk_id: String,
    score: f32,
    vector_rank: Option<usize>,
    keyword_rank: Option<usize>,
}

pub struct SearchEngine {
    repository: Arc<dyn IndexRepository>,
    embedder: CachedEmbedder,
    reranker: Option<Arc<dyn Reranker>>,
    config: Config,
}

impl SearchEngine {
    pub fn new(
        repository: Arc<dyn IndexRepository>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<EmbeddingCache>,
        reranker: Option<Arc<dyn Reranker>>,
        config: Config,
    ) -> Self {
        Self { repository, embedder: CachedEmbedder::new(embedder, cache), reranker, config }
    }

    pub fn search(&self, token: &CancellationToken, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();

        if request.scope.is_some() && request.path_prefix.is_some() {
            return Err(PommelError::ConfigInvalid(
                "scope and path_prefix are mutually exclusive".into(),
            ));
        }

        let limit = request.limit.unwrap_or(DEFAULT_LIMIT).max(1);
        let hybrid_enabled = request.hybrid_enabled.unwrap_or(self.config.hybrid_enabled);
        let rerank_enabled = request.rerank_enabled.unwrap_or(self.config.reranker.enabled);
        let k = (limit * 4).max(self.config.candidates_for_rerank);

        // 1. Parallel candidate generation: vector arm always runs; keyword
        // arm only when hybrid search is enabled.
        let (vector_hits, keyword_hits) = rayon::join(
            || self.search_vector_arm(token, &request.query, k),
            || if hybrid_enabled { self.search_keyword_arm(token, &request.query, k) } else { Ok(Vec::new()) },
        );
        let vector_hits = vector_hits?;
        let keyword_hits = keyword_hits?;

        // 2. Fusion.
        let fused = if hybrid_enabled {
            fuse_rrf(&vector_hits, &keyword_hits, self.config.rrf_k, self.config.vector_weight, self.config.keyword_weight)
        } else {
            fuse_vector_only(&vector_hits)
        };

        // 3. Hydrate, then apply level / path-prefix / scope filters.
        let ids: Vec<String> = fused.iter().map(|e| e.chunk_id.clone()).collect();
        let chunks = self.repository.chunks_by_ids(token, &ids)?;
        let chunk_by_id: HashMap<&str, &Chunk> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        let path_prefix = resolve_path_prefix(request);

        let mut hydrated: Vec<(FusedEntry, &Chunk, String, String)> = Vec::new();
        for entry in fused {
            let Some(chunk) = chunk_by_id.get(entry.chunk_id.as_str()).copied() else { continue };
            if let Some(levels) = &request.levels {
                if !levels.contains(&chunk.level) {
                    continue;
                }
            }
            let Some(file_record) = self.repository.file_by_id(token, chunk.file_id)? else { continue };
            if let Some(prefix) = &path_prefix {
                if !file_record.path.starts_with(prefix.as_str()) {
                    continue;
                }
            }
            hydrated.push((entry, chunk, file_record.path, file_record.language));
        }

        // 4. Split-chunk deduplication.
        let deduped = dedup_splits(hydrated);

        // 5. Rerank.
        let reranked = if rerank_enabled {
            self.apply_rerank(&request.query, deduped)?
        } else {
            deduped
        };

        // 6. Truncate and annotate.
        let mut results: Vec<SearchResult> = reranked.into_iter().take(limit).collect();
        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.chunk_id.cmp(&b.chunk_id)));

        let total_results = results.len();
        Ok(SearchResponse {
            query: request.query.clone(),
            results,
            total_results,
            search_time_ms: started.elapsed().as_millis() as u64,
            scope: request.scope.clone(),
            hybrid_enabled,
            rerank_enabled,
        })
    }

    fn search_vector_arm(&self, token: &CancellationToken, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let vector = self.embedder.embed_single(query)?;
        self.repository.search_vectors(token, &vector, k)
    }

    fn search_keyword_arm(&self, token: &CancellationToken, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        self.repository.search_keywords(token, query, k)
    }

    fn apply_rerank(&self, query: &str, deduped: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        let Some(reranker) = &self.reranker else {
            return Ok(deduped);
        };
        let candidates: Vec<RerankCandidate> = deduped
            .iter()
            .take(self.config.candidates_for_rerank)
            .map(|r| RerankCandidate { chunk_id: r.chunk_id.clone(), content: r.content.clone() })
            .collect();
        if candidates.is_empty() {
            return Ok(deduped);
        }

        match call_with_timeout(reranker.clone(), query.to_string(), candidates, Duration::from_millis(self.config.reranker.timeout_ms)) {
            Ok(scores) => {
                let mut out = deduped;
                for (result, score) in out.iter_mut().zip(scores.into_iter()) {
                    result.score = score;
                }
                out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.chunk_id.cmp(&b.chunk_id)));
                Ok(out)
            }
            Err(outcome) => {
                if let RerankOutcome::Failure(message) = &outcome {
                    tracing::warn!(error = %message, "reranker call failed");
                }
                match self.config.reranker.fallback {
                    RerankFallback::Heuristic => Ok(deduped),
                    RerankFallback::None => Err(match outcome {
                        RerankOutcome::Timeout => PommelError::RerankTimeout,
                        RerankOutcome::Failure(message) => PommelError::RerankFailure(message),
                    }),
                }
            }
        }
    }
}

enum RerankOutcome {
    Timeout,
    Failure(String),
}

/// Runs the (synchronous, possibly slow) reranker on a helper thread and
/// enforces `timeout` via a channel recv, matching the pattern the rest of
/// the daemon uses for background work that must not block the caller.
fn call_with_timeout(
    reranker: Arc<dyn Reranker>,
    query: String,
    candidates: Vec<RerankCandidate>,
    timeout: Duration,
) -> std::result::Result<Vec<f32>, RerankOutcome> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = reranker.rerank(&query, &candidates);
        let _ = tx.send(result);
    });
    match rx.recv_timeout(timeout) {
        Ok(Ok(scores)) => Ok(scores),
        Ok(Err(e)) => Err(RerankOutcome::Failure(e.to_string())),
        Err(_) => Err(RerankOutcome::Timeout),
    }
}

fn resolve_path_prefix(request: &SearchRequest) -> Option<String> {
    if let Some(prefix) = &request.path_prefix {
        return Some(prefix.clone());
    }
    match &request.scope {
        Some(Scope { mode: ScopeMode::Path, value: Some(v) }) => Some(v.clone()),
        Some(Scope { mode: ScopeMode::Subproject, value: Some(v) }) => Some(v.clone()),
        // `auto` has no extra signal to resolve a prefix from in this
        // request-only model; it degrades to no filter, same as `all`.
        _ => None,
    }
}

fn fuse_rrf(vector_hits: &[(String, f32)], keyword_hits: &[(String, f32)], rrf_k: u32, vector_weight: f32, keyword_weight: f32) -> Vec<FusedEntry> {
    let vector_ranks: HashMap<&str, usize> = vector_hits.iter().enumerate().map(|(i, (id, _))| (id.as_str(), i + 1)).collect();
    let keyword_ranks: HashMap<&str, usize> = keyword_hits.iter().enumerate().map(|(i, (id, _))| (id.as_str(), i + 1)).collect();

    let mut ids: Vec<&str> = vector_ranks.keys().chain(keyword_ranks.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut fused: Vec<FusedEntry> = ids
        .into_iter()
        .map(|id| {
            let vr = vector_ranks.get(id).copied();
            let kr = keyword_ranks.get(id).copied();
            let vector_term = vr.map(|r| vector_weight / (rrf_k as f32 + r as f32)).unwrap_or(0.0);
            let keyword_term = kr.map(|r| keyword_weight / (rrf_k as f32 + r as f32)).unwrap_or(0.0);
            FusedEntry { chunk_id: id.to_string(), score: vector_term + keyword_term, vector_rank: vr, keyword_rank: kr }
        })
        .collect();

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.chunk_id.cmp(&b.chunk_id)));
    fused
}

/// Hybrid disabled: scores normalize from distance as `1 - distance/2`, clamped to `[0, 1]`.
fn fuse_vector_only(vector_hits: &[(String, f32)]) -> Vec<FusedEntry> {
    vector_hits
        .iter()
        .enumerate()
        .map(|(i, (id, distance))| FusedEntry {
            chunk_id: id.clone(),
            score: (1.0 - distance / 2.0).clamp(0.0, 1.0),
            vector_rank: Some(i + 1),
            keyword_rank: None,
        })
        .collect()
}

const SPLIT_BOOST_STEP: f32 = 0.1;
const SPLIT_BOOST_CAP: f32 = 1.5;

/// Groups by `parent_chunk_id` (chunks without one are singleton groups),
/// keeps the best-scoring member, and boosts its score by group size.
fn dedup_splits(hydrated: Vec<(FusedEntry, &Chunk, String, String)>) -> Vec<SearchResult> {
    let mut groups: HashMap<String, Vec<(FusedEntry, &Chunk, String, String)>> = HashMap::new();
    for item in hydrated {
        let key = item.1.parent_chunk_id.clone().unwrap_or_else(|| item.1.id.clone());
        groups.entry(key).or_default().push(item);
    }

    let mut out = Vec::with_capacity(groups.len());
    for (_, mut members) in groups {
        members.sort_by(|a, b| b.0.score.partial_cmp(&a.0.score).unwrap_or(std::cmp::Ordering::Equal));
        let n = members.len();
        let (best, chunk, file, language) = members.remove(0);
        let match_source = match (best.vector_rank, best.keyword_rank) {
            (Some(_), Some(_)) => MatchSource::Both,
            (Some(_), None) => MatchSource::Vector,
            (None, Some(_)) => MatchSource::Keyword,
            (None, None) => MatchSource::Vector,
        };
        let boosted = if n > 1 {
            (best.score * (1.0 + SPLIT_BOOST_STEP * (n as f32 - 1.0)).min(SPLIT_BOOST_CAP)).min(1.0)
        } else {
            best.score
        };
        out.push(SearchResult {
            chunk_id: chunk.id.clone(),
            file,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            level: chunk.level,
            language,
            name: chunk.name.clone(),
            parent: chunk.parent.clone(),
            score: boosted,
            content: chunk.content.clone(),
            match_source,
            matched_splits: n,
            vector_rank: best.vector_rank,
            keyword_rank: best.keyword_rank,
        });
    }
    out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.chunk_id.cmp(&b.chunk_id)));
    out
}
