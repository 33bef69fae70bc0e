use std::path::{Path, PathBuf};

use log::{debug, error, info};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Watch `dir` (non-recursively) for new files.
///
/// The paths of created files, and of files moved into `dir`, are sent down
/// the returned channel. Watching stops when the watcher is dropped.
pub fn watch_incoming(
    dir: &Path,
) -> notify::Result<(RecommendedWatcher, UnboundedReceiver<PathBuf>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => forward(event, &tx),
        Err(err) => error!("File watcher error: {}", err),
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!("Watching '{}' for new job files.", dir.display());
    Ok((watcher, rx))
}

fn forward(event: Event, tx: &UnboundedSender<PathBuf>) {
    if !is_new_file(&event.kind) {
        return;
    }
    for path in event.paths {
        if path.is_dir() {
            debug!("Ignoring new directory '{}'.", path.display());
            continue;
        }
        debug!("New file event: '{}'.", path.display());
        if tx.send(path).is_err() {
            debug!("Job intake is gone, dropping file event.");
            return;
        }
    }
}

fn is_new_file(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To))
    )
}
