//! Notification scheduling.
//!
//! The scheduler rebuilds its queue from a store snapshot on every pass, so
//! an event that changed or vanished between passes simply stops being
//! scheduled (its old queue entry is superseded, never fired). Two wake
//! sources drive the loop: a timer for the next fire instant and the store's
//! change signal; whichever comes first triggers a full recompute over a
//! freshly re-extended horizon.
//!
//! Catch-up policy for items that are already due when first computed (the
//! daemon was down, or the file appeared late): if the occurrence start is
//! still ahead, fire immediately — a late reminder beats none. If the start
//! has passed, the item is Suppressed and never fires.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use tokio::sync::watch;

use crate::dispatch::{Dispatcher, FireOutcome};
use crate::event::Occurrence;
use crate::store::StoreHandle;

/// How long to wait before retrying after an ack persistence failure.
const RETRY_DELAY_SECS: i64 = 30;

/// Scheduling knobs, resolved from daemon configuration.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleOptions {
    /// Default notification lead time for events without VALARM reminders
    pub lead: Duration,
    /// Lookahead window; occurrences beyond it are not expanded yet
    pub horizon: Duration,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        ScheduleOptions {
            lead: Duration::minutes(10),
            horizon: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyState {
    /// Will fire at `fire_at` (immediately, if that is already past)
    Pending,
    /// The occurrence start has passed; never notify about it
    Suppressed,
}

/// One queued notification for an occurrence.
#[derive(Debug, Clone)]
pub struct ScheduledNotification {
    pub occurrence: Occurrence,
    pub fire_at: DateTime<Utc>,
    pub state: NotifyState,
}

/// Build the notification queue for a set of occurrences, ordered by fire
/// instant. Events with VALARM reminders get one entry per reminder offset;
/// everything else uses the configured default lead.
pub fn build_queue(
    occurrences: &[Occurrence],
    now: DateTime<Utc>,
    default_lead: Duration,
) -> Vec<ScheduledNotification> {
    let mut queue = Vec::new();
    for occ in occurrences {
        let offsets: Vec<Duration> = if occ.reminders.is_empty() {
            vec![default_lead]
        } else {
            occ.reminders
                .iter()
                .map(|r| Duration::minutes(r.minutes))
                .collect()
        };
        let state = if occ.start <= now {
            NotifyState::Suppressed
        } else {
            NotifyState::Pending
        };
        for offset in offsets {
            queue.push(ScheduledNotification {
                occurrence: occ.clone(),
                fire_at: occ.start - offset,
                state,
            });
        }
    }
    queue.sort_by(|a, b| {
        a.fire_at
            .cmp(&b.fire_at)
            .then_with(|| a.occurrence.uid.cmp(&b.occurrence.uid))
    });
    queue
}

pub struct Scheduler {
    store: StoreHandle,
    dispatcher: Arc<Dispatcher>,
    opts: ScheduleOptions,
}

impl Scheduler {
    pub fn new(store: StoreHandle, dispatcher: Arc<Dispatcher>, opts: ScheduleOptions) -> Self {
        Scheduler {
            store,
            dispatcher,
            opts,
        }
    }

    /// One scheduling pass at instant `now`: rebuild the queue from the
    /// store, fire everything due, and return the instant to wake at next
    /// (None when nothing is pending inside the horizon).
    ///
    /// Taking `now` as a parameter keeps the pass deterministic under test.
    pub fn run_once(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Look back by the lead so occurrences whose reminder window we
        // slept through still show up, get classified Suppressed, and are
        // visible in logs rather than silently absent.
        let window_start = now - self.opts.lead.max(Duration::zero());
        let occurrences = self
            .store
            .read()
            .occurrences(window_start, now + self.opts.horizon);
        let queue = build_queue(&occurrences, now, self.opts.lead);

        let mut next_wake: Option<DateTime<Utc>> = None;
        let mut retry = false;

        for item in &queue {
            match item.state {
                NotifyState::Suppressed => {
                    debug!(
                        "Suppressing {}: started {} and never notified",
                        item.occurrence.key(),
                        item.occurrence.start
                    );
                }
                NotifyState::Pending if item.fire_at <= now => {
                    match self.dispatcher.try_fire(&item.occurrence, item.fire_at) {
                        Ok(FireOutcome::Fired) => {
                            info!("Notified for {}", item.occurrence.key())
                        }
                        Ok(FireOutcome::AlreadyAcked) => {}
                        Err(e) => {
                            warn!(
                                "Could not persist ack for {}: {}; will retry",
                                item.occurrence.key(),
                                e
                            );
                            retry = true;
                        }
                    }
                }
                NotifyState::Pending => {
                    next_wake = Some(next_wake.map_or(item.fire_at, |w| w.min(item.fire_at)));
                }
            }
        }

        if retry {
            let retry_at = now + Duration::seconds(RETRY_DELAY_SECS);
            next_wake = Some(next_wake.map_or(retry_at, |w| w.min(retry_at)));
        }

        next_wake
    }

    /// The daemon loop. Exits when `shutdown` flips, aborting the current
    /// wait without firing anything further.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next_wake = self.run_once(Utc::now());

            let sleep_for = next_wake.map(|wake| {
                (wake - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO)
            });

            tokio::select! {
                _ = self.store.changed() => {
                    debug!("Store changed; recomputing schedule");
                }
                _ = tokio::time::sleep(sleep_for.unwrap_or_default()), if sleep_for.is_some() => {}
                _ = shutdown.changed() => {
                    info!("Scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Reminder;
    use chrono::TimeZone;

    fn utc(h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, min, 0).unwrap()
    }

    fn occurrence(uid: &str, start: DateTime<Utc>, reminders: Vec<Reminder>) -> Occurrence {
        Occurrence {
            uid: uid.to_string(),
            summary: format!("Event {}", uid),
            start,
            end: start + Duration::hours(1),
            all_day: false,
            reminders,
        }
    }

    #[test]
    fn future_occurrence_is_pending_at_lead_offset() {
        let now = utc(8, 0);
        let queue = build_queue(
            &[occurrence("a", utc(12, 0), vec![])],
            now,
            Duration::minutes(10),
        );
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].state, NotifyState::Pending);
        assert_eq!(queue[0].fire_at, utc(11, 50));
    }

    #[test]
    fn started_occurrence_is_suppressed() {
        let now = utc(12, 30);
        let queue = build_queue(
            &[occurrence("a", utc(12, 0), vec![])],
            now,
            Duration::minutes(10),
        );
        assert_eq!(queue[0].state, NotifyState::Suppressed);
    }

    #[test]
    fn start_exactly_now_is_suppressed() {
        let now = utc(12, 0);
        let queue = build_queue(
            &[occurrence("a", utc(12, 0), vec![])],
            now,
            Duration::minutes(10),
        );
        assert_eq!(queue[0].state, NotifyState::Suppressed);
    }

    #[test]
    fn reminders_replace_default_lead() {
        let now = utc(8, 0);
        let queue = build_queue(
            &[occurrence(
                "a",
                utc(12, 0),
                vec![Reminder { minutes: 30 }, Reminder { minutes: 5 }],
            )],
            now,
            Duration::minutes(10),
        );
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].fire_at, utc(11, 30));
        assert_eq!(queue[1].fire_at, utc(11, 55));
    }

    #[test]
    fn queue_is_ordered_by_fire_instant() {
        let now = utc(8, 0);
        let queue = build_queue(
            &[
                occurrence("later", utc(14, 0), vec![]),
                occurrence("sooner", utc(9, 0), vec![]),
            ],
            now,
            Duration::minutes(10),
        );
        assert_eq!(queue[0].occurrence.uid, "sooner");
        assert_eq!(queue[1].occurrence.uid, "later");
    }
}
