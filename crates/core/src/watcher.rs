//! Single-threaded OS event intake driving a per-path debouncer, built on
//! the `notify` crate.

use crate::ignore::Ignorer;
use crate::model::now_unix;
use crate::{PommelError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Create,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: String,
    pub op: FileOp,
    pub timestamp_unix: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Constructed,
    Started,
    Stopped,
}

struct Pending {
    op: FileOp,
    generation: u64,
}

pub struct Watcher {
    project_root: PathBuf,
    ignorer: Arc<Ignorer>,
    debounce: Duration,
    events_tx: mpsc::Sender<FileEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<FileEvent>>>,
    errors_tx: mpsc::Sender<String>,
    errors_rx: Mutex<Option<mpsc::Receiver<String>>>,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    generation_counter: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
    state: Mutex<State>,
    inner: Arc<Mutex<Option<RecommendedWatcher>>>,
}

pub const EVENTS_CHANNEL_CAPACITY: usize = 100;
pub const ERRORS_CHANNEL_CAPACITY: usize = 10;

impl Watcher {
    pub fn new(project_root: PathBuf, ignorer: Arc<Ignorer>, debounce: Duration) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENTS_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(ERRORS_CHANNEL_CAPACITY);
        Self {
            project_root,
            ignorer,
            debounce,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation_counter: Arc::new(AtomicU64::new(0)),
            stopped: Arc::new(AtomicBool::new(false)),
            state: Mutex::new(State::Constructed),
            inner: Arc::new(Mutex::new(None)),
        }
    }

    /// Takes the event receiver; may only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<FileEvent>> {
        self.events_rx.lock().unwrap().take()
    }

    pub fn take_errors(&self) -> Option<mpsc::Receiver<String>> {
        self.errors_rx.lock().unwrap().take()
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != State::Constructed {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::current();
        let events_tx = self.events_tx.clone();
        let errors_tx = self.errors_tx.clone();
        let pending = self.pending.clone();
        let generation_counter = self.generation_counter.clone();
        let stopped = self.stopped.clone();
        let debounce = self.debounce;
        let ignorer = self.ignorer.clone();
        let project_root = self.project_root.clone();
        let inner = self.inner.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                let event = match res {
                    Ok(e) => e,
                    Err(e) => {
                        let _ = errors_tx.try_send(e.to_string());
                        return;
                    }
                };
                handle_event(
                    event,
                    &project_root,
                    &ignorer,
                    &pending,
                    &generation_counter,
                    &stopped,
                    debounce,
                    &events_tx,
                    &runtime,
                    &inner,
                );
            },
            notify::Config::default(),
        )
        .map_err(|e| PommelError::RepositoryIo(format!("create watcher: {e}")))?;

        watcher
            .watch(&self.project_root, RecursiveMode::Recursive)
            .map_err(|e| PommelError::RepositoryIo(format!("watch root: {e}")))?;

        *self.inner.lock().unwrap() = Some(watcher);
        *state = State::Started;
        Ok(())
    }

    /// Idempotent; cancels all pending timers.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == State::Stopped {
            return;
        }
        self.stopped.store(true, Ordering::SeqCst);
        self.pending.lock().unwrap().clear();
        *self.inner.lock().unwrap() = None;
        *state = State::Stopped;
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_event(
    event: Event,
    project_root: &Path,
    ignorer: &Ignorer,
    pending: &Arc<Mutex<HashMap<String, Pending>>>,
    generation_counter: &Arc<AtomicU64>,
    stopped: &Arc<AtomicBool>,
    debounce: Duration,
    events_tx: &mpsc::Sender<FileEvent>,
    runtime: &tokio::runtime::Handle,
    inner: &Arc<Mutex<Option<RecommendedWatcher>>>,
) {
    let op = match event.kind {
        EventKind::Create(_) => FileOp::Create,
        EventKind::Remove(_) => FileOp::Delete,
        EventKind::Modify(notify::event::ModifyKind::Name(_)) => FileOp::Rename,
        EventKind::Modify(_) => FileOp::Modify,
        _ => return,
    };

    for path in event.paths {
        if path.is_dir() {
            if matches!(op, FileOp::Create) {
                let rel = rel_path(project_root, &path);
                if !ignorer.should_ignore(Path::new(&rel)) {
                    if let Some(watcher) = inner.lock().unwrap().as_mut() {
                        if let Err(e) = watcher.watch(&path, RecursiveMode::Recursive) {
                            warn!(path = %path.display(), error = %e, "failed to add new directory to watcher");
                        }
                    }
                }
            }
            continue;
        }

        let rel = rel_path(project_root, &path);
        if ignorer.should_ignore(Path::new(&rel)) {
            continue;
        }

        let generation = generation_counter.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut guard = pending.lock().unwrap();
            let merged_op = match guard.get(&rel) {
                Some(existing) if existing.op == FileOp::Modify && op != FileOp::Modify => op,
                Some(existing) => existing.op,
                None => op,
            };
            guard.insert(rel.clone(), Pending { op: merged_op, generation });
        }

        let pending = pending.clone();
        let stopped = stopped.clone();
        let events_tx = events_tx.clone();
        let rel_for_task = rel.clone();
        runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if stopped.load(Ordering::SeqCst) {
                return;
            }
            let fired = {
                let mut guard = pending.lock().unwrap();
                match guard.get(&rel_for_task) {
                    Some(entry) if entry.generation == generation => guard.remove(&rel_for_task),
                    _ => None,
                }
            };
            if let Some(entry) = fired {
                let file_event = FileEvent { path: rel_for_task, op: entry.op, timestamp_unix: now_unix() };
                let _ = events_tx.try_send(file_event);
            }
        });
    }
}

fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_merge_prefers_non_modify_over_modify() {
        let mut pending: HashMap<String, Pending> = HashMap::new();
        pending.insert("x".into(), Pending { op: FileOp::Modify, generation: 1 });
        let existing = pending.get("x").unwrap();
        let merged = if existing.op == FileOp::Modify && FileOp::Create != FileOp::Modify {
            FileOp::Create
        } else {
            existing.op
        };
        assert_eq!(merged, FileOp::Create);
    }

    #[test]
    fn op_merge_keeps_first_non_modify_op() {
        let mut pending: HashMap<String, Pending> = HashMap::new();
        pending.insert("x".into(), Pending { op: FileOp::Create, generation: 1 });
        let existing = pending.get("x").unwrap();
        let merged = if existing.op == FileOp::Modify && FileOp::Modify != FileOp::Modify {
            FileOp::Modify
        } else {
            existing.op
        };
        assert_eq!(merged, FileOp::Create);
    }

    #[tokio::test]
    async fn debounced_create_then_modify_emits_one_create_event() {
        let dir = tempfile::tempdir().unwrap();
        let ignorer = Arc::new(Ignorer::new(dir.path(), &[]).unwrap());
        let watcher = Watcher::new(dir.path().to_path_buf(), ignorer, Duration::from_millis(50));
        let mut events = watcher.take_events().unwrap();
        watcher.start().unwrap();

        let file_path = dir.path().join("x.txt");
        std::fs::write(&file_path, "one").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        std::fs::write(&file_path, "two").unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        std::fs::write(&file_path, "three").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap().unwrap();
        assert_eq!(event.path, "x.txt");

        watcher.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ignorer = Arc::new(Ignorer::new(dir.path(), &[]).unwrap());
        let watcher = Watcher::new(dir.path().to_path_buf(), ignorer, Duration::from_millis(50));
        watcher.stop();
        watcher.stop();
    }
}
