//! Notification dispatch.
//!
//! The dispatcher is the only component that talks to the presentation
//! layer. `try_fire` checks the ack store, delivers, then records the ack;
//! the whole cycle runs under one lock so a notification can never be
//! double-fired by concurrent callers. A crash between delivery and the
//! ack write is the one window where a restart may deliver a duplicate:
//! at-least-once, never silently zero.

use std::sync::Mutex;

use chrono::{DateTime, Local, Utc};
use log::{debug, warn};

use crate::ack::AckStore;
use crate::error::RemindResult;
use crate::event::{Occurrence, OccurrenceKey};

/// Outcome of a fire attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    Fired,
    AlreadyAcked,
}

/// Where notifications go. Implemented by the daemon binary (desktop
/// notifications) and by test doubles.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, title: &str, body: &str, key: &OccurrenceKey) -> RemindResult<()>;
}

pub struct Dispatcher {
    acks: Mutex<AckStore>,
    sink: Box<dyn NotificationSink>,
}

impl Dispatcher {
    pub fn new(acks: AckStore, sink: Box<dyn NotificationSink>) -> Self {
        Dispatcher {
            acks: Mutex::new(acks),
            sink,
        }
    }

    /// Deliver the notification for `occurrence` scheduled at `fire_at`,
    /// unless it was already delivered once.
    ///
    /// Sink failure is logged but still acked: a delivered-but-unconfirmed
    /// notification is treated as delivered, so a flaky presentation layer
    /// cannot cause repeat spam. Only an ack-write failure propagates, and
    /// the caller retries on its next tick.
    pub fn try_fire(
        &self,
        occurrence: &Occurrence,
        fire_at: DateTime<Utc>,
    ) -> RemindResult<FireOutcome> {
        let key = occurrence.key();
        let mut acks = self.acks.lock().unwrap_or_else(|e| e.into_inner());

        if acks.contains(&key, fire_at) {
            debug!("Notification {} already acked", key);
            return Ok(FireOutcome::AlreadyAcked);
        }

        let (title, body) = render(occurrence);
        if let Err(e) = self.sink.deliver(&title, &body, &key) {
            warn!("Notification delivery failed for {}: {}", key, e);
        }

        acks.record(&key, fire_at, Utc::now())?;
        Ok(FireOutcome::Fired)
    }

    /// Drop ack records for occurrences older than `horizon`.
    pub fn prune_acks(&self, horizon: DateTime<Utc>) -> RemindResult<usize> {
        let mut acks = self.acks.lock().unwrap_or_else(|e| e.into_inner());
        acks.prune(horizon)
    }
}

/// Title and body of the desktop notification.
fn render(occurrence: &Occurrence) -> (String, String) {
    let body = if occurrence.all_day {
        format!(
            "All day {}",
            occurrence.start.with_timezone(&Local).format("%A %d %B")
        )
    } else {
        format!(
            "Starts at {}",
            occurrence.start.with_timezone(&Local).format("%H:%M")
        )
    };
    (occurrence.summary.clone(), body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemindError;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink {
        delivered: Arc<AtomicUsize>,
        fail: bool,
    }

    impl NotificationSink for CountingSink {
        fn deliver(&self, _title: &str, _body: &str, _key: &OccurrenceKey) -> RemindResult<()> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(RemindError::Delivery("sink offline".into()))
            } else {
                Ok(())
            }
        }
    }

    fn occurrence(uid: &str) -> Occurrence {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        Occurrence {
            uid: uid.to_string(),
            summary: "Meeting".to_string(),
            start,
            end: start + chrono::Duration::hours(1),
            all_day: false,
            reminders: Vec::new(),
        }
    }

    #[test]
    fn fires_once_then_reports_acked() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(
            AckStore::in_memory(),
            Box::new(CountingSink {
                delivered: delivered.clone(),
                fail: false,
            }),
        );

        let occ = occurrence("once");
        let fire_at = occ.start - chrono::Duration::minutes(10);
        assert_eq!(
            dispatcher.try_fire(&occ, fire_at).unwrap(),
            FireOutcome::Fired
        );
        assert_eq!(
            dispatcher.try_fire(&occ, fire_at).unwrap(),
            FireOutcome::AlreadyAcked
        );
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sink_failure_still_acks() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new(
            AckStore::in_memory(),
            Box::new(CountingSink {
                delivered: delivered.clone(),
                fail: true,
            }),
        );

        let occ = occurrence("flaky");
        let fire_at = occ.start;
        assert_eq!(
            dispatcher.try_fire(&occ, fire_at).unwrap(),
            FireOutcome::Fired
        );
        // Second attempt must not re-deliver despite the sink error
        assert_eq!(
            dispatcher.try_fire(&occ, fire_at).unwrap(),
            FireOutcome::AlreadyAcked
        );
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }
}
