//! Incremental library maintenance driven by filesystem notifications.
//!
//! Change events are filtered by extension and routed into two queues
//! (added / deleted). A dedicated drainer applies them through the same
//! store functions as the scanner: at most ten items per ~100 ms tick, with
//! a busy-file probe before parsing so a copy in progress is re-queued at
//! the tail instead of half-read.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::state::AppState;

use super::scanner;

const IDLE_SLEEP: Duration = Duration::from_millis(100);
const DRAIN_PER_TICK: usize = 10;

const WATCHED_EXTENSIONS: &[&str] = &["fb2", "epub", "zip"];

/// Cooperative stop handle for the watcher task.
pub struct WatcherControl {
    stop: AtomicBool,
}

impl WatcherControl {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

impl Default for WatcherControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Added/deleted path queues with cancellation semantics: a path that shows
/// up in `deleted` while still waiting in `added` cancels both entries.
#[derive(Default)]
pub struct WatchQueues {
    inner: Mutex<QueuesInner>,
}

#[derive(Default)]
struct QueuesInner {
    added: VecDeque<PathBuf>,
    deleted: VecDeque<PathBuf>,
}

impl WatchQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_added(&self, path: PathBuf) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.added.contains(&path) {
            inner.added.push_back(path);
        }
    }

    pub fn enqueue_deleted(&self, path: PathBuf) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pos) = inner.added.iter().position(|p| *p == path) {
            // Added then deleted before processing: cancel both.
            inner.added.remove(pos);
            return;
        }
        if !inner.deleted.contains(&path) {
            inner.deleted.push_back(path);
        }
    }

    pub fn pop_added(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().added.pop_front()
    }

    pub fn pop_deleted(&self) -> Option<PathBuf> {
        self.inner.lock().unwrap().deleted.pop_front()
    }

    /// Busy files go back to the tail so the rest of the queue drains.
    pub fn requeue_added(&self, path: PathBuf) {
        self.inner.lock().unwrap().added.push_back(path);
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.added.is_empty() && inner.deleted.is_empty()
    }
}

fn has_watched_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            WATCHED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Route one notification into the queues.
fn route_event(queues: &WatchQueues, event: &Event) {
    match &event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Data(_)) => {
            for path in &event.paths {
                if has_watched_extension(path) {
                    queues.enqueue_added(path.clone());
                }
            }
        }
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                if has_watched_extension(path) {
                    queues.enqueue_deleted(path.clone());
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            for path in &event.paths {
                if has_watched_extension(path) {
                    queues.enqueue_added(path.clone());
                }
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            // Rename carries [old, new]: the old path is a delete, the new
            // path an add.
            if let [old, new] = event.paths.as_slice() {
                if has_watched_extension(old) {
                    queues.enqueue_deleted(old.clone());
                }
                if has_watched_extension(new) {
                    queues.enqueue_added(new.clone());
                }
            }
        }
        _ => {}
    }
}

/// A file still being written cannot be opened for writing by us.
fn is_file_busy(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    OpenOptions::new().write(true).open(path).is_err()
}

/// Run the watcher until a stop is requested. Registers a recursive watch
/// on the library root and drains the queues on a short tick.
pub async fn run(state: AppState) -> Result<(), notify::Error> {
    let root = state.config.library.path.clone();
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!("Watcher error: {e}"),
        },
        notify::Config::default().with_poll_interval(Duration::from_secs(1)),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!("Watching library root: {}", root.display());

    let queues = WatchQueues::new();

    loop {
        if state.watcher.stop_requested() {
            info!("Watcher stopped by request");
            return Ok(());
        }

        // Pull every notification that has arrived, then drain a slice of
        // the queues.
        while let Ok(event) = rx.try_recv() {
            debug!("File event: {:?} {:?}", event.kind, event.paths);
            route_event(&queues, &event);
        }

        if queues.is_empty() {
            sleep(IDLE_SLEEP).await;
            continue;
        }

        drain_tick(&state, &queues).await;
        sleep(IDLE_SLEEP).await;
    }
}

/// Apply up to `DRAIN_PER_TICK` queued items: deletions first, then adds.
async fn drain_tick(state: &AppState, queues: &WatchQueues) {
    let mut budget = DRAIN_PER_TICK;

    while budget > 0 {
        let Some(path) = queues.pop_deleted() else {
            break;
        };
        budget -= 1;
        if let Err(e) = scanner::remove_path(state, &path).await {
            warn!("Failed to remove {}: {e}", path.display());
        }
    }

    while budget > 0 {
        let Some(path) = queues.pop_added() else {
            break;
        };
        budget -= 1;

        if is_file_busy(&path) {
            debug!("File busy, re-queued: {}", path.display());
            queues.requeue_added(path);
            // Give the writer a moment before the next tick retries.
            break;
        }

        match scanner::ingest_path(state, &path).await {
            Ok(stats) => {
                if stats.books_found > 0 {
                    info!(
                        "Watcher ingested {} book(s) from {}",
                        stats.books_found,
                        path.display()
                    );
                }
            }
            Err(e) => warn!("Failed to ingest {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watched_extensions() {
        assert!(has_watched_extension(Path::new("/lib/a.fb2")));
        assert!(has_watched_extension(Path::new("/lib/a.EPUB")));
        assert!(has_watched_extension(Path::new("/lib/a.zip")));
        assert!(!has_watched_extension(Path::new("/lib/a.txt")));
        assert!(!has_watched_extension(Path::new("/lib/noext")));
    }

    #[test]
    fn test_added_then_deleted_cancels_both() {
        let queues = WatchQueues::new();
        let path = PathBuf::from("/lib/a.fb2");
        queues.enqueue_added(path.clone());
        queues.enqueue_deleted(path.clone());
        assert!(queues.is_empty());
    }

    #[test]
    fn test_deleted_without_pending_add_is_kept() {
        let queues = WatchQueues::new();
        let path = PathBuf::from("/lib/a.fb2");
        queues.enqueue_deleted(path.clone());
        assert_eq!(queues.pop_deleted(), Some(path));
    }

    #[test]
    fn test_duplicate_enqueues_collapse() {
        let queues = WatchQueues::new();
        let path = PathBuf::from("/lib/a.fb2");
        queues.enqueue_added(path.clone());
        queues.enqueue_added(path.clone());
        assert_eq!(queues.pop_added(), Some(path));
        assert!(queues.pop_added().is_none());
    }

    #[test]
    fn test_requeue_moves_to_tail() {
        let queues = WatchQueues::new();
        let first = PathBuf::from("/lib/a.fb2");
        let second = PathBuf::from("/lib/b.fb2");
        queues.enqueue_added(first.clone());
        queues.enqueue_added(second.clone());

        let popped = queues.pop_added().unwrap();
        queues.requeue_added(popped);
        assert_eq!(queues.pop_added(), Some(second));
        assert_eq!(queues.pop_added(), Some(first));
    }

    #[test]
    fn test_route_rename_event() {
        let queues = WatchQueues::new();
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/lib/old.fb2"))
            .add_path(PathBuf::from("/lib/new.fb2"));
        route_event(&queues, &event);
        assert_eq!(queues.pop_deleted(), Some(PathBuf::from("/lib/old.fb2")));
        assert_eq!(queues.pop_added(), Some(PathBuf::from("/lib/new.fb2")));
    }

    #[test]
    fn test_route_ignores_other_extensions() {
        let queues = WatchQueues::new();
        let event = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/lib/readme.txt"));
        route_event(&queues, &event);
        assert!(queues.is_empty());
    }
}
