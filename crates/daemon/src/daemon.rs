//! Orchestrator: validates startup preconditions, wires the indexing
//! pipeline and search engine to a concrete repository, and drives the
//! lifecycle described in the design (single-instance enforcement, startup
//! reconciliation, the watcher-driven event loop, and ordered shutdown).

use pommel_core::cache::EmbeddingCache;
use pommel_core::chunker::{Chunker, LineChunker};
use pommel_core::config::Config;
use pommel_core::embedder::{Embedder, HashingEmbedder};
use pommel_core::ignore::Ignorer;
use pommel_core::port::resolve_port;
use pommel_core::repository::{InMemoryRepository, IndexRepository};
use pommel_core::search::SearchEngine;
use pommel_core::state_store::{DaemonInfo, DaemonState, StateStore};
use pommel_core::watcher::{FileOp, Watcher};
use pommel_core::{CancellationToken, Indexer, PommelError, Result, Scanner};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The shared handle the HTTP layer reads from. Cheap to clone; every field
/// is itself an `Arc` or plain data.
#[derive(Clone)]
pub struct DaemonContext {
    pub project_root: PathBuf,
    pub host: String,
    pub port: u16,
    pub started_at_unix: u64,
    pub config: Arc<Config>,
    pub repository: Arc<dyn IndexRepository>,
    pub indexer: Arc<Indexer>,
    pub search_engine: Arc<SearchEngine>,
    pub state_store: Arc<StateStore>,
    pub cancel: CancellationToken,
}

pub struct Daemon {
    ctx: DaemonContext,
    watcher: Arc<Watcher>,
}

const HTTP_SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

impl Daemon {
    /// Validates preconditions (§4.13 step 1), opens the repository with the
    /// resolved embedding dimension, and builds the indexer/watcher/search
    /// engine. Nothing is started yet.
    pub fn new(project_root: PathBuf, config: Config) -> Result<Self> {
        if !project_root.is_dir() {
            return Err(PommelError::ProjectRootNotDirectory(project_root));
        }
        config.validate()?;

        let dimension = config.embedding_dimension.unwrap_or(0);
        if dimension == 0 {
            return Err(PommelError::UnknownModelDimensions);
        }

        let repository: Arc<dyn IndexRepository> = Arc::new(InMemoryRepository::new());
        let cache = Arc::new(EmbeddingCache::new(config.cache_capacity));
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(dimension));
        let chunker: Arc<dyn Chunker> = Arc::new(LineChunker);
        let ignorer = Arc::new(Ignorer::new(&project_root, &config.exclude)?);

        let indexer = Arc::new(Indexer::new(
            project_root.clone(),
            repository.clone(),
            chunker,
            embedder.clone(),
            cache.clone(),
            ignorer.clone(),
            config.clone(),
        ));

        let search_engine = Arc::new(SearchEngine::new(repository.clone(), embedder, cache, None, config.clone()));

        let state_store = Arc::new(StateStore::new(&project_root));
        let port = resolve_port(&project_root, config.port);
        let host = config.bind_host.clone().unwrap_or_else(|| "127.0.0.1".to_string());
        let debounce = Duration::from_millis(config.debounce_ms);
        let watcher = Arc::new(Watcher::new(project_root.clone(), ignorer.clone(), debounce));

        let ctx = DaemonContext {
            project_root,
            host,
            port,
            started_at_unix: pommel_core::model::now_unix(),
            config: Arc::new(config),
            repository,
            indexer,
            search_engine,
            state_store,
            cancel: CancellationToken::new(),
        };

        Ok(Self { ctx, watcher })
    }

    pub fn context(&self) -> DaemonContext {
        self.ctx.clone()
    }

    /// Runs the daemon until `external_cancel` fires or a termination signal
    /// arrives, then shuts down in order (§4.13 step 6).
    pub async fn run(&mut self, external_cancel: CancellationToken) -> Result<()> {
        let (running, _pid) = self.ctx.state_store.is_running()?;
        if running {
            let (_, pid) = self.ctx.state_store.is_running()?;
            return Err(PommelError::AlreadyRunning(pid.unwrap_or(0)));
        }

        self.ctx.state_store.write_pid(std::process::id())?;

        self.watcher.start()?;

        let listener = tokio::net::TcpListener::bind((self.ctx.host.as_str(), self.ctx.port))
            .await
            .map_err(|e| PommelError::RepositoryIo(format!("bind {}:{}: {e}", self.ctx.host, self.ctx.port)))?;
        self.ctx.port = listener.local_addr().map(|a| a.port()).unwrap_or(self.ctx.port);
        info!(host = %self.ctx.host, port = self.ctx.port, project_root = %self.ctx.project_root.display(), "daemon listening");

        self.save_state()?;

        let app = crate::http::router(self.ctx.clone());
        let cancel_for_http = self.ctx.cancel.clone();
        let http_handle = tokio::spawn(async move {
            let graceful = async move { cancel_for_http.cancelled().await };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
                warn!(error = %e, "http server exited with an error");
            }
        });

        let event_loop_handle = self.spawn_event_loop();
        let reconciliation_handle = self.spawn_reconciliation();

        tokio::select! {
            _ = self.ctx.cancel.cancelled() => {}
            _ = external_cancel.cancelled() => { self.ctx.cancel.cancel(); }
            _ = shutdown_signal() => { self.ctx.cancel.cancel(); }
        }

        self.shutdown(http_handle, event_loop_handle, reconciliation_handle).await;
        Ok(())
    }

    async fn shutdown(
        &self,
        http_handle: tokio::task::JoinHandle<()>,
        event_loop_handle: tokio::task::JoinHandle<()>,
        reconciliation_handle: tokio::task::JoinHandle<()>,
    ) {
        self.ctx.cancel.cancel();

        if tokio::time::timeout(HTTP_SHUTDOWN_BUDGET, http_handle).await.is_err() {
            warn!("http server did not shut down within its budget");
        }
        let _ = event_loop_handle.await;
        let _ = reconciliation_handle.await;

        self.watcher.stop();

        if let Err(e) = self.ctx.state_store.remove_pid() {
            warn!(error = %e, "failed to remove pid file during shutdown");
        }
        info!("daemon shut down");
    }

    fn save_state(&self) -> Result<()> {
        let mut state = self.ctx.state_store.load_state().unwrap_or_else(|_| DaemonState::default());
        state.daemon = Some(DaemonInfo {
            pid: std::process::id(),
            started_at: self.ctx.started_at_unix,
            port: self.ctx.port,
        });
        self.ctx.state_store.save_state(&state)
    }

    /// Pumps the watcher's debounced events to the indexer: `Create`/`Modify`
    /// go through `index_file`, `Delete`/`Rename` through `delete_file`.
    fn spawn_event_loop(&self) -> tokio::task::JoinHandle<()> {
        let Some(mut events) = self.watcher.take_events() else {
            return tokio::spawn(async {});
        };
        let indexer = self.ctx.indexer.clone();
        let cancel = self.ctx.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => {
                        let Some(event) = event else { break };
                        let indexer = indexer.clone();
                        let cancel = cancel.clone();
                        let result = tokio::task::spawn_blocking(move || {
                            let token = CancellationToken::new();
                            match event.op {
                                FileOp::Create | FileOp::Modify => indexer.index_file(&token, &event.path),
                                FileOp::Delete | FileOp::Rename => indexer.delete_file(&token, &event.path),
                            }
                        })
                        .await;
                        if cancel.is_cancelled() {
                            break;
                        }
                        match result {
                            Ok(Err(e)) => warn!(code = e.code(), error = %e, "error handling watched file event"),
                            Err(e) => warn!(error = %e, "indexer task panicked"),
                            Ok(Ok(())) => {}
                        }
                    }
                }
            }
        })
    }

    /// Startup reconciliation (§4.13 step 5): a full reindex if the
    /// repository is empty, otherwise a `Scanner` diff applied incrementally.
    fn spawn_reconciliation(&self) -> tokio::task::JoinHandle<()> {
        let indexer = self.ctx.indexer.clone();
        let repository = self.ctx.repository.clone();
        let project_root = self.ctx.project_root.clone();
        let cancel = self.ctx.cancel.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                let token = CancellationToken::new();
                if repository.file_count() == 0 {
                    return indexer.reindex_all(&token);
                }
                let scanner = Scanner::new(project_root, repository);
                let accept = |p: &str| indexer.matches_patterns(p);
                let diff = scanner.scan(&token, &accept)?;
                for path in diff.added.iter().chain(diff.modified.iter()) {
                    if let Err(e) = indexer.index_file(&token, path) {
                        warn!(path, code = e.code(), "reconciliation index error");
                    }
                }
                for path in &diff.deleted {
                    if let Err(e) = indexer.delete_file(&token, path) {
                        warn!(path, code = e.code(), "reconciliation delete error");
                    }
                }
                Ok(())
            })
            .await;
            if cancel.is_cancelled() {
                return;
            }
            match result {
                Ok(Err(e)) => warn!(code = e.code(), error = %e, "startup reconciliation failed"),
                Err(e) => warn!(error = %e, "reconciliation task panicked"),
                Ok(Ok(())) => {}
            }
        })
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    info!("received Ctrl+C, shutting down");
}
