//! Coordination fabric for the pommel indexing daemon: pattern matching,
//! ignore rules, state persistence, the embedding cache, the indexing
//! pipeline, startup reconciliation, the filesystem watcher, and the hybrid
//! search engine. Concrete chunkers, embedders, and storage backends plug in
//! through the traits this crate defines; [`repository::InMemoryRepository`]
//! and [`embedder::HashingEmbedder`] are reference implementations used by
//! tests and as defaults when no richer backend is configured.

pub mod cache;
pub mod cancel;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod ignore;
pub mod indexer;
pub mod model;
pub mod pattern;
pub mod port;
pub mod repository;
pub mod scanner;
pub mod search;
pub mod state_store;
pub mod watcher;

pub use cancel::CancellationToken;
pub use config::Config;
pub use error::{PommelError, Result};
pub use indexer::Indexer;
pub use model::{Chunk, ChunkLevel, FileId, FileRecord, IndexStats};
pub use repository::IndexRepository;
pub use scanner::{ScanDiff, Scanner};
pub use search::{SearchEngine, SearchRequest, SearchResponse};
pub use state_store::{DaemonState, StateStore};
pub use watcher::{FileEvent, FileOp, Watcher};
