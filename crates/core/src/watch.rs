//! Folder watching: auto-enqueue of media that appears in tracked
//! directories.
//!
//! Tracked directories persist across enable/disable; enabling attaches a
//! filesystem watcher to each of them, disabling drops it. Change
//! notifications trigger a shallow rescan of the affected directory, and
//! registry dedup keeps the reaction idempotent no matter how often the
//! backend fires for one file.

use crate::manager::ConvertManager;
use crate::registry::normalize_path;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Watches tracked directories and enqueues convertible files as they
/// appear.
pub struct FolderWatch {
    manager: Arc<ConvertManager>,
    tracked: Arc<Mutex<HashSet<PathBuf>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    change_tx: mpsc::UnboundedSender<PathBuf>,
}

impl FolderWatch {
    /// Create the watch layer. Spawns the task that turns change
    /// notifications into shallow rescans; watching starts disabled.
    pub fn new(manager: Arc<ConvertManager>) -> Arc<Self> {
        let (change_tx, mut change_rx) = mpsc::unbounded_channel::<PathBuf>();
        let tracked: Arc<Mutex<HashSet<PathBuf>>> = Arc::new(Mutex::new(HashSet::new()));

        let forward_manager = manager.clone();
        let forward_tracked = tracked.clone();
        tokio::spawn(async move {
            while let Some(dir) = change_rx.recv().await {
                if !forward_tracked.lock().contains(&dir) {
                    continue;
                }
                let added = forward_manager.rescan_shallow(&dir);
                if added > 0 {
                    debug!(dir = %dir.display(), added, "watch rescan enqueued jobs");
                }
            }
        });

        Arc::new(Self {
            manager,
            tracked,
            watcher: Mutex::new(None),
            change_tx,
        })
    }

    /// Track a directory: recursively enqueue its current contents and,
    /// when watching is enabled, attach the filesystem watcher to it.
    /// Returns the number of jobs the initial scan created.
    pub fn watch_dir(&self, dir: &Path) -> usize {
        let dir = normalize_path(dir);
        let added = self.manager.add_directory(&dir);
        self.tracked.lock().insert(dir.clone());

        let mut watcher = self.watcher.lock();
        if let Some(watcher) = watcher.as_mut() {
            if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
                warn!(dir = %dir.display(), error = %e, "failed to attach watcher");
            }
        }
        added
    }

    /// Enable watching: attach a filesystem watcher to every tracked
    /// directory. Already-enqueued content is not rescanned; only future
    /// changes trigger reactions.
    pub fn enable(&self) -> notify::Result<()> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }

        let tx = self.change_tx.clone();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    for dir in rescan_candidates(&event.paths) {
                        let _ = tx.send(dir);
                    }
                }
                Err(e) => warn!(error = %e, "watch backend error"),
            }
        })?;

        for dir in self.tracked.lock().iter() {
            if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
                warn!(dir = %dir.display(), error = %e, "failed to attach watcher");
            }
        }
        *slot = Some(watcher);
        debug!("folder watching enabled");
        Ok(())
    }

    /// Disable watching. Tracked directories are retained, so a later
    /// enable picks them all up again.
    pub fn disable(&self) {
        if self.watcher.lock().take().is_some() {
            debug!("folder watching disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Currently tracked directories.
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.tracked.lock().iter().cloned().collect()
    }

    /// Externally injected change notification for a directory, equivalent
    /// to the watcher backend reporting it. Untracked directories are
    /// ignored.
    pub fn handle_change(&self, dir: &Path) {
        let _ = self.change_tx.send(normalize_path(dir));
    }
}

/// Directories worth rescanning for one backend notification.
///
/// File-level events name the file, so its parent is the candidate;
/// directory-level events (attribute changes, renames) name the directory
/// itself, so each reported path is also a candidate in its own right.
/// Untracked candidates are filtered by the forward task.
fn rescan_candidates(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for path in paths {
        if !dirs.contains(path) {
            dirs.push(path.clone());
        }
        if let Some(parent) = path.parent() {
            if !dirs.iter().any(|d| d.as_path() == parent) {
                dirs.push(parent.to_path_buf());
            }
        }
    }
    dirs
}
