//! End-to-end tests for the file -> store -> scheduler -> dispatcher path,
//! using real files in a temp directory and a collecting notification sink.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Timelike, Utc};

use remindir_core::scheduler::{ScheduleOptions, Scheduler};
use remindir_core::{AckStore, Dispatcher, NotificationSink, OccurrenceKey, RemindResult, StoreHandle};

#[derive(Default)]
struct CollectingSink {
    delivered: Mutex<Vec<OccurrenceKey>>,
}

impl NotificationSink for CollectingSink {
    fn deliver(&self, _title: &str, _body: &str, key: &OccurrenceKey) -> RemindResult<()> {
        self.delivered.lock().unwrap().push(key.clone());
        Ok(())
    }
}

/// Wall clock truncated to whole seconds, matching ICS timestamp precision.
fn now() -> DateTime<Utc> {
    Utc::now().with_nanosecond(0).unwrap()
}

fn ics_timed(uid: &str, start: DateTime<Utc>, rrule: Option<&str>) -> String {
    let end = start + Duration::hours(1);
    let rrule_line = rrule
        .map(|r| format!("RRULE:{}\r\n", r))
        .unwrap_or_default();
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nBEGIN:VEVENT\r\nUID:{uid}\r\n\
         SUMMARY:Event {uid}\r\nDTSTART:{}\r\nDTEND:{}\r\n{rrule_line}\
         END:VEVENT\r\nEND:VCALENDAR\r\n",
        start.format("%Y%m%dT%H%M%SZ"),
        end.format("%Y%m%dT%H%M%SZ"),
    )
}

struct Fixture {
    _dir: tempfile::TempDir,
    cal_dir: PathBuf,
    store: StoreHandle,
    sink: Arc<CollectingSink>,
    scheduler: Scheduler,
}

impl Fixture {
    fn new() -> Self {
        Self::with_ack_file(None)
    }

    fn with_ack_file(ack_path: Option<PathBuf>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cal_dir = dir.path().join("calendar");
        std::fs::create_dir_all(&cal_dir).unwrap();

        let acks = match ack_path {
            Some(path) => AckStore::open(path).unwrap(),
            None => AckStore::in_memory(),
        };
        let store = StoreHandle::new();
        let sink = Arc::new(CollectingSink::default());
        let dispatcher = Arc::new(Dispatcher::new(acks, Box::new(SharedSink(sink.clone()))));
        let scheduler = Scheduler::new(store.clone(), dispatcher, ScheduleOptions::default());

        Fixture {
            _dir: dir,
            cal_dir,
            store,
            sink,
            scheduler,
        }
    }

    fn write_ics(&self, name: &str, content: &str) -> PathBuf {
        let path = self.cal_dir.join(name);
        std::fs::write(&path, content).unwrap();
        self.store.refresh_path(&path);
        path
    }

    fn delivered(&self) -> Vec<OccurrenceKey> {
        self.sink.delivered.lock().unwrap().clone()
    }
}

/// Adapter so the fixture can keep a handle on the boxed sink.
struct SharedSink(Arc<CollectingSink>);

impl NotificationSink for SharedSink {
    fn deliver(&self, title: &str, body: &str, key: &OccurrenceKey) -> RemindResult<()> {
        self.0.deliver(title, body, key)
    }
}

#[test]
fn upcoming_event_fires_exactly_once() {
    let fx = Fixture::new();
    let now = now();
    let start = now + Duration::hours(2);
    fx.write_ics("meeting.ics", &ics_timed("meet-1", start, None));

    // First pass: nothing due yet, wake scheduled at start - lead
    let wake = fx.scheduler.run_once(now).expect("a pending item");
    assert_eq!(wake, start - Duration::minutes(10));
    assert!(fx.delivered().is_empty());

    // At the fire instant it fires, and repeated passes do not re-fire
    fx.scheduler.run_once(wake);
    fx.scheduler.run_once(wake + Duration::seconds(1));
    let delivered = fx.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].uid, "meet-1");
    assert_eq!(delivered[0].start, start);
}

#[test]
fn late_discovery_fires_immediately_when_start_is_still_ahead() {
    let fx = Fixture::new();
    let now = now();
    // Fire instant (start - 10m) is already past, start is not
    let start = now + Duration::minutes(3);
    fx.write_ics("late.ics", &ics_timed("late-1", start, None));

    fx.scheduler.run_once(now);
    assert_eq!(fx.delivered().len(), 1);
}

#[test]
fn already_started_event_is_suppressed_not_fired() {
    let fx = Fixture::new();
    let now = now();
    let start = now - Duration::minutes(5);
    fx.write_ics("missed.ics", &ics_timed("missed-1", start, None));

    assert!(fx.scheduler.run_once(now).is_none());
    assert!(fx.delivered().is_empty());
}

#[test]
fn removing_the_file_supersedes_its_pending_notification() {
    let fx = Fixture::new();
    let now = now();
    let start = now + Duration::hours(2);
    let path = fx.write_ics("gone.ics", &ics_timed("gone-1", start, None));

    assert!(fx.scheduler.run_once(now).is_some());

    std::fs::remove_file(&path).unwrap();
    fx.store.refresh_path(&path);

    // Queue entry is gone; nothing fires even past the fire instant
    assert!(fx.scheduler.run_once(start - Duration::minutes(1)).is_none());
    assert!(fx.delivered().is_empty());
}

#[test]
fn recurring_event_schedules_only_within_horizon() {
    let fx = Fixture::new();
    let now = now();
    // Daily event whose next occurrence is in 2 hours
    let origin = now - Duration::days(30) + Duration::hours(2);
    fx.write_ics("daily.ics", &ics_timed("daily-1", origin, Some("FREQ=DAILY")));

    let wake = fx.scheduler.run_once(now).expect("next occurrence pending");
    assert!(wake > now);
    assert!(wake < now + Duration::hours(24));
}

#[test]
fn acks_survive_restart_and_prevent_refire() {
    let dir = tempfile::tempdir().unwrap();
    let ack_path = dir.path().join("acks.jsonl");
    let now = now();
    let start = now + Duration::minutes(5);
    let ics = ics_timed("restart-1", start, None);

    {
        let fx = Fixture::with_ack_file(Some(ack_path.clone()));
        fx.write_ics("restart.ics", &ics);
        fx.scheduler.run_once(now);
        assert_eq!(fx.delivered().len(), 1);
    }

    // "Restart": fresh store and scheduler over the same ack file and the
    // same event set
    {
        let fx = Fixture::with_ack_file(Some(ack_path));
        fx.write_ics("restart.ics", &ics);
        fx.scheduler.run_once(now + Duration::seconds(30));
        assert!(fx.delivered().is_empty());
    }
}

#[test]
fn editing_a_file_moves_the_notification() {
    let fx = Fixture::new();
    let now = now();
    let start = now + Duration::hours(2);
    let path = fx.write_ics("moving.ics", &ics_timed("move-1", start, None));

    let first_wake = fx.scheduler.run_once(now).unwrap();
    assert_eq!(first_wake, start - Duration::minutes(10));

    // The event moves an hour later; the old entry is superseded. The
    // summary changes too so the file fingerprint cannot collide even on
    // filesystems with coarse mtimes.
    let new_start = start + Duration::hours(1);
    let moved = ics_timed("move-1", new_start, None).replace("Event move-1", "Moved event");
    std::fs::write(&path, moved).unwrap();
    fx.store.refresh_path(&path);

    let second_wake = fx.scheduler.run_once(now).unwrap();
    assert_eq!(second_wake, new_start - Duration::minutes(10));

    // Crossing the old fire instant fires nothing for the old start
    fx.scheduler.run_once(first_wake);
    assert!(fx.delivered().is_empty());
}
