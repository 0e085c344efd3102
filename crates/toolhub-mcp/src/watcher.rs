//! File watches that feed reconciliation and restarts.
//!
//! Each watch observes the target's parent directory (so editors that
//! replace files atomically are still seen) and filters by file name.
//! Triggers are funnelled into one channel and coalesced before handling.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use toolhub_core::Scope;

use crate::registry::ConnectionKey;

/// Window over which bursts of file events collapse into one trigger.
pub(crate) const COALESCE_WINDOW: Duration = Duration::from_millis(150);

/// What a file change asks the hub to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatchTrigger {
    /// A scope's settings file changed: reconcile that scope.
    Settings(Scope),
    /// A server's watched file changed: restart that connection.
    Server(ConnectionKey),
}

/// A live OS watch. Dropping it stops the watch.
pub(crate) struct FileWatch {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FileWatch {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Watch `path` and send `trigger` whenever it is created, modified or removed.
pub(crate) fn watch_file(
    path: &Path,
    trigger: WatchTrigger,
    tx: mpsc::UnboundedSender<WatchTrigger>,
) -> notify::Result<FileWatch> {
    let file_name = path
        .file_name()
        .map(ToOwned::to_owned)
        .ok_or_else(|| notify::Error::generic("watch path has no file name"))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let relevant = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            );
            if relevant
                && event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
            {
                let _ = tx.send(trigger.clone());
            }
        }
        Err(e) => tracing::warn!(error = %e, "File watcher error"),
    })?;

    watcher.watch(&parent, RecursiveMode::NonRecursive)?;
    tracing::debug!(path = %path.display(), "Watching file");

    Ok(FileWatch {
        path: path.to_path_buf(),
        _watcher: watcher,
    })
}

/// Wait for the next trigger, then gather any others arriving within `window`.
///
/// Duplicates collapse; first-seen order is kept. Returns `None` once the
/// channel is closed and drained.
pub(crate) async fn next_batch(
    rx: &mut mpsc::UnboundedReceiver<WatchTrigger>,
    window: Duration,
) -> Option<Vec<WatchTrigger>> {
    let first = rx.recv().await?;
    let mut batch = vec![first];
    let deadline = Instant::now() + window;

    while let Ok(Some(trigger)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        if !batch.contains(&trigger) {
            batch.push(trigger);
        }
    }
    Some(batch)
}
