//! Durable record of already-fired notifications.
//!
//! Append-only JSON-lines file, one [`AckRecord`] per line, loaded into
//! memory at startup. Presence of a record means "this notification was
//! delivered, never fire it again", which is what makes restarts and
//! directory rescans safe.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{RemindError, RemindResult};
use crate::event::OccurrenceKey;

/// One fired notification: the occurrence, the scheduled fire instant and
/// when delivery actually happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRecord {
    pub uid: String,
    pub start: DateTime<Utc>,
    pub fire_at: DateTime<Utc>,
    pub fired_at: DateTime<Utc>,
}

/// The set of fired notifications, backed by an append-only file.
///
/// Not internally synchronized; the dispatcher wraps it in a mutex so the
/// check-then-write cycle is atomic.
pub struct AckStore {
    path: Option<PathBuf>,
    records: Vec<AckRecord>,
    seen: HashSet<(OccurrenceKey, DateTime<Utc>)>,
}

impl AckStore {
    /// Open (or create) the ack file and load its records. Unparseable
    /// lines are skipped with a warning so one corrupt entry does not take
    /// the whole history down.
    pub fn open(path: PathBuf) -> RemindResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut store = AckStore {
            path: Some(path.clone()),
            records: Vec::new(),
            seen: HashSet::new(),
        };

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AckRecord>(&line) {
                    Ok(record) => store.remember(record),
                    Err(e) => warn!(
                        "Ignoring bad ack record at {}:{}: {}",
                        path.display(),
                        lineno + 1,
                        e
                    ),
                }
            }
            debug!(
                "Loaded {} ack record(s) from {}",
                store.records.len(),
                path.display()
            );
        }

        Ok(store)
    }

    /// Purely in-memory store, for tests and dry runs.
    pub fn in_memory() -> Self {
        AckStore {
            path: None,
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn remember(&mut self, record: AckRecord) {
        let key = OccurrenceKey {
            uid: record.uid.clone(),
            start: record.start,
        };
        self.seen.insert((key, record.fire_at));
        self.records.push(record);
    }

    /// Has this exact notification (occurrence + fire instant) been
    /// delivered before?
    pub fn contains(&self, key: &OccurrenceKey, fire_at: DateTime<Utc>) -> bool {
        self.seen.contains(&(key.clone(), fire_at))
    }

    /// Append a record durably. The in-memory set is only updated once the
    /// write has succeeded, so a failed append will be retried.
    pub fn record(
        &mut self,
        key: &OccurrenceKey,
        fire_at: DateTime<Utc>,
        fired_at: DateTime<Utc>,
    ) -> RemindResult<()> {
        let record = AckRecord {
            uid: key.uid.clone(),
            start: key.start,
            fire_at,
            fired_at,
        };

        if let Some(path) = &self.path {
            let line = serde_json::to_string(&record)
                .map_err(|e| RemindError::Persistence(e.to_string()))?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    RemindError::Persistence(format!("{}: {}", path.display(), e))
                })?;
            writeln!(file, "{}", line)
                .and_then(|_| file.sync_data())
                .map_err(|e| RemindError::Persistence(format!("{}: {}", path.display(), e)))?;
        }

        self.remember(record);
        Ok(())
    }

    /// Drop records for occurrences older than `horizon` and rewrite the
    /// file. Pruning keeps the ack file from growing forever; the dropped
    /// occurrences are long past and can never fire again anyway.
    pub fn prune(&mut self, horizon: DateTime<Utc>) -> RemindResult<usize> {
        let before = self.records.len();
        self.records.retain(|r| r.start >= horizon);
        let dropped = before - self.records.len();
        if dropped == 0 {
            return Ok(0);
        }

        self.seen = self
            .records
            .iter()
            .map(|r| {
                (
                    OccurrenceKey {
                        uid: r.uid.clone(),
                        start: r.start,
                    },
                    r.fire_at,
                )
            })
            .collect();

        if let Some(path) = &self.path {
            let tmp = path.with_extension("jsonl.tmp");
            {
                let mut file = File::create(&tmp)
                    .map_err(|e| RemindError::Persistence(format!("{}: {}", tmp.display(), e)))?;
                for record in &self.records {
                    let line = serde_json::to_string(record)
                        .map_err(|e| RemindError::Persistence(e.to_string()))?;
                    writeln!(file, "{}", line).map_err(|e| {
                        RemindError::Persistence(format!("{}: {}", tmp.display(), e))
                    })?;
                }
                file.sync_data()
                    .map_err(|e| RemindError::Persistence(format!("{}: {}", tmp.display(), e)))?;
            }
            std::fs::rename(&tmp, path)
                .map_err(|e| RemindError::Persistence(format!("{}: {}", path.display(), e)))?;
        }

        Ok(dropped)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key(uid: &str, h: u32) -> OccurrenceKey {
        OccurrenceKey {
            uid: uid.to_string(),
            start: Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap(),
        }
    }

    #[test]
    fn record_then_contains() {
        let mut acks = AckStore::in_memory();
        let k = key("a", 9);
        let fire = k.start - chrono::Duration::minutes(10);
        assert!(!acks.contains(&k, fire));
        acks.record(&k, fire, Utc::now()).unwrap();
        assert!(acks.contains(&k, fire));
        // A different fire instant for the same occurrence is distinct
        assert!(!acks.contains(&k, k.start));
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acks.jsonl");

        let k = key("persist", 10);
        let fire = k.start;
        {
            let mut acks = AckStore::open(path.clone()).unwrap();
            acks.record(&k, fire, Utc::now()).unwrap();
        }

        let acks = AckStore::open(path).unwrap();
        assert_eq!(acks.len(), 1);
        assert!(acks.contains(&k, fire));
    }

    #[test]
    fn bad_lines_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acks.jsonl");

        let k = key("good", 11);
        {
            let mut acks = AckStore::open(path.clone()).unwrap();
            acks.record(&k, k.start, Utc::now()).unwrap();
        }
        // Corrupt the file with a trailing junk line
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{not json").unwrap();
        }

        let acks = AckStore::open(path).unwrap();
        assert_eq!(acks.len(), 1);
        assert!(acks.contains(&k, k.start));
    }

    #[test]
    fn prune_drops_old_occurrences_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acks.jsonl");

        let old = key("old", 8);
        let new = key("new", 9);
        {
            let mut acks = AckStore::open(path.clone()).unwrap();
            acks.record(&old, old.start, Utc::now()).unwrap();
            acks.record(&new, new.start, Utc::now()).unwrap();
            let dropped = acks
                .prune(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap())
                .unwrap();
            assert_eq!(dropped, 1);
        }

        let acks = AckStore::open(path).unwrap();
        assert_eq!(acks.len(), 1);
        assert!(!acks.contains(&old, old.start));
        assert!(acks.contains(&new, new.start));
    }
}
