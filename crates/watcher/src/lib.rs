//! Event source for the watched directory.
//!
//! [`DirectoryWatcher`] turns OS notifications for the immediate children of
//! one directory into [`FileEvent`]s; [`scan_existing`] lists the files that
//! were already there at startup.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Raw notifications buffered between the OS thread and the async side.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Errors from the event source. All of them stop the daemon.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher event channel closed")]
    Closed,
}

/// What happened to a path. All kinds trigger the same re-evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Written,
    AttributeChanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Maps a notify event kind to the changes worth acting on.
///
/// Files renamed into the directory count as created. Removals and
/// accesses are ignored.
pub fn classify(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Metadata(_)) => Some(ChangeKind::AttributeChanged),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => None,
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeKind::Created),
        EventKind::Modify(_) => Some(ChangeKind::Written),
        _ => None,
    }
}

/// Watches one directory, non-recursively.
pub struct DirectoryWatcher {
    rx: mpsc::Receiver<notify::Result<Event>>,
    queued: VecDeque<FileEvent>,
    // Dropping the watcher stops OS notifications.
    _watcher: RecommendedWatcher,
}

impl DirectoryWatcher {
    /// Starts watching `dir`. Must be called inside a tokio runtime.
    pub fn new(dir: &Path) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Runs on the notify thread; a closed receiver means we're shutting down.
            let _ = tx.blocking_send(res);
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        tracing::debug!(dir = %dir.display(), "watching directory");

        Ok(Self {
            rx,
            queued: VecDeque::new(),
            _watcher: watcher,
        })
    }

    /// Waits for the next relevant change.
    ///
    /// Backend errors are logged and skipped. Fails only when the
    /// notification channel is gone.
    pub async fn next(&mut self) -> Result<FileEvent, WatchError> {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return Ok(event);
            }

            match self.rx.recv().await {
                Some(Ok(event)) => self.enqueue(event),
                Some(Err(e)) => tracing::warn!(error = %e, "watcher error"),
                None => return Err(WatchError::Closed),
            }
        }
    }

    fn enqueue(&mut self, event: Event) {
        let Some(kind) = classify(&event.kind) else {
            tracing::trace!(kind = ?event.kind, "ignoring event");
            return;
        };
        let paths = match event.kind {
            // [from, to]: only the destination is still there.
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.into_iter().skip(1).collect()
            }
            _ => event.paths,
        };
        for path in paths {
            tracing::debug!(path = %path.display(), ?kind, "file event");
            self.queued.push_back(FileEvent { path, kind });
        }
    }
}

/// Lists the files directly inside `dir`, sorted by path.
///
/// Subdirectories are skipped with a log line.
pub fn scan_existing(dir: &Path) -> Result<Vec<PathBuf>, WatchError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            tracing::info!(path = %path.display(), "skipping directory");
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}
