//! In-memory index of events keyed by UID, fed by filesystem changes.
//!
//! The store is the single writer for event data: every filesystem change is
//! serialized through [`StoreHandle::apply_change`], and readers take a lock
//! only to snapshot expanded occurrences. A UID is globally unique across
//! calendar files; when two files claim the same UID the most recently
//! processed file wins and the conflict is logged, not fatal.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use tokio::sync::Notify;

use crate::event::{Event, Fingerprint, Occurrence};
use crate::ics::parse_calendar;
use crate::recurrence::expand;

/// A change to one watched file, already parsed.
#[derive(Debug)]
pub enum Change {
    /// The file disappeared; drop everything it defined.
    Removed,
    /// The file appeared or changed and now defines these events.
    Upsert {
        fingerprint: Fingerprint,
        events: Vec<Event>,
    },
}

#[derive(Debug, Default)]
struct FileEntry {
    fingerprint: Fingerprint,
    uids: HashSet<String>,
}

/// The event index. Use through a [`StoreHandle`].
#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<String, Event>,
    files: HashMap<PathBuf, FileEntry>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a change for `path`. Returns true when the event set changed
    /// (an unchanged fingerprint is a no-op).
    pub fn apply(&mut self, path: &Path, change: Change) -> bool {
        match change {
            Change::Removed => self.apply_removal(path),
            Change::Upsert {
                fingerprint,
                events,
            } => self.apply_upsert(path, fingerprint, events),
        }
    }

    fn apply_removal(&mut self, path: &Path) -> bool {
        let Some(entry) = self.files.remove(path) else {
            return false;
        };
        let mut changed = false;
        for uid in entry.uids {
            // Only drop the UID if this path still owns it; another file may
            // have taken it over since (last writer wins).
            if self.events.get(&uid).is_some_and(|e| e.source == path) {
                debug!("Removing event '{}' (file {} gone)", uid, path.display());
                self.events.remove(&uid);
                changed = true;
            }
        }
        changed
    }

    fn apply_upsert(&mut self, path: &Path, fingerprint: Fingerprint, events: Vec<Event>) -> bool {
        if let Some(entry) = self.files.get(path) {
            if entry.fingerprint == fingerprint {
                debug!("Fingerprint of {} unchanged; skipping", path.display());
                return false;
            }
        }

        let new_uids: HashSet<String> = events.iter().map(|e| e.uid.clone()).collect();

        // UIDs this file used to define but no longer does
        if let Some(old) = self.files.get(path) {
            let stale: Vec<String> = old.uids.difference(&new_uids).cloned().collect();
            for uid in stale {
                if self.events.get(&uid).is_some_and(|e| e.source == path) {
                    debug!("Event '{}' no longer defined by {}", uid, path.display());
                    self.events.remove(&uid);
                }
            }
        }

        for event in events {
            if let Some(existing) = self.events.get(&event.uid) {
                if existing.source != event.source {
                    warn!(
                        "UID '{}' defined by both {} and {}; keeping {}",
                        event.uid,
                        existing.source.display(),
                        event.source.display(),
                        event.source.display()
                    );
                }
            }
            self.events.insert(event.uid.clone(), event);
        }

        self.files.insert(
            path.to_path_buf(),
            FileEntry {
                fingerprint,
                uids: new_uids,
            },
        );
        true
    }

    /// Expand every event over [`window_start`, `window_end`], ordered by
    /// start instant then UID.
    pub fn occurrences(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Vec<Occurrence> {
        let mut out: Vec<Occurrence> = self
            .events
            .values()
            .flat_map(|ev| expand(ev, window_start, window_end))
            .collect();
        out.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.uid.cmp(&b.uid)));
        out
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, uid: &str) -> Option<&Event> {
        self.events.get(uid)
    }
}

/// Shared handle to the store: a read-write lock plus a change signal the
/// scheduler waits on.
#[derive(Clone, Default)]
pub struct StoreHandle {
    inner: Arc<RwLock<EventStore>>,
    changed: Arc<Notify>,
}

impl StoreHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot access for readers. Writers never hold the lock across I/O,
    /// so readers cannot observe a half-applied change.
    pub fn read(&self) -> RwLockReadGuard<'_, EventStore> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply an already-parsed change and wake the scheduler if anything
    /// actually changed.
    pub fn apply_change(&self, path: &Path, change: Change) {
        let changed = {
            let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
            store.apply(path, change)
        };
        if changed {
            self.changed.notify_one();
        }
    }

    /// Re-read `path` from disk and apply whatever is there now: a missing
    /// file is a removal, anything else is parsed and upserted. Parsing and
    /// file I/O happen outside the lock.
    pub fn refresh_path(&self, path: &Path) {
        let Some(fingerprint) = Fingerprint::of(path) else {
            info!("Removing events from {}", path.display());
            self.apply_change(path, Change::Removed);
            return;
        };

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                return;
            }
        };

        match parse_calendar(&content, path) {
            Ok(events) => {
                info!(
                    "Loaded {} event(s) from {}",
                    events.len(),
                    path.display()
                );
                self.apply_change(
                    path,
                    Change::Upsert {
                        fingerprint,
                        events,
                    },
                );
            }
            // Keep whatever an earlier good parse produced; the next change
            // to the file will retry
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    /// Resolves once the store has changed since the last call. A change
    /// arriving while nobody is waiting is remembered.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
