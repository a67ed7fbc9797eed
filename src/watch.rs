//! Filesystem watching.
//!
//! Bridges the notify crate's callback API into a tokio channel and feeds
//! changed .ics paths to the event store. Raw create/modify/remove events
//! are not trusted individually: sync tools produce bursts of them per
//! file, so paths are coalesced over a short window and then re-probed on
//! disk (a present file is an upsert, an absent one a removal).

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use remindir_core::StoreHandle;
use tokio::sync::{mpsc, watch};

/// Bursts of events for the same path inside this window collapse into one
/// refresh.
const COALESCE_WINDOW: Duration = Duration::from_millis(500);

fn is_ics(path: &std::path::Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("ics"))
}

/// Set up watchers for every calendar directory. The returned watcher must
/// be kept alive for events to keep flowing.
fn spawn_watcher(
    directories: &[(String, PathBuf)],
    tx: mpsc::UnboundedSender<PathBuf>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                for path in event.paths {
                    if is_ics(&path) {
                        // Receiver gone means we are shutting down
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => warn!("Watch error: {}", e),
        }
    })
    .context("Failed to create filesystem watcher")?;

    for (name, dir) in directories {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {} for calendar '{}'", dir.display(), name))?;
        info!("Watching {} (calendar '{}')", dir.display(), name);
    }

    Ok(watcher)
}

/// Watch the calendar directories until shutdown, applying each coalesced
/// batch of changes to the store.
pub async fn run(
    directories: Vec<(String, PathBuf)>,
    store: StoreHandle,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _watcher = spawn_watcher(&directories, tx)?;

    loop {
        let first = tokio::select! {
            path = rx.recv() => match path {
                Some(path) => path,
                None => return Ok(()),
            },
            _ = shutdown.changed() => {
                info!("Watcher shutting down");
                return Ok(());
            }
        };

        // Collect everything else that arrives within the coalescing window
        let mut batch = HashSet::from([first]);
        loop {
            match tokio::time::timeout(COALESCE_WINDOW, rx.recv()).await {
                Ok(Some(path)) => {
                    batch.insert(path);
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        debug!("Applying {} coalesced change(s)", batch.len());
        for path in batch {
            store.refresh_path(&path);
        }
    }
}

/// One-time scan of every configured directory at startup, before watching
/// begins.
pub fn initial_scan(directories: &[(String, PathBuf)], store: &StoreHandle) -> Result<()> {
    for (name, dir) in directories {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to scan {} for calendar '{}'", dir.display(), name))?;
        let mut count = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if is_ics(&path) {
                store.refresh_path(&path);
                count += 1;
            }
        }
        info!("Scanned {} file(s) in {} (calendar '{}')", count, dir.display(), name);
    }
    Ok(())
}
