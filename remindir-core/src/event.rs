//! Event types for the remindir ecosystem.
//!
//! An [`Event`] is one parsed VEVENT series: a start/end, an optional
//! recurrence rule with exceptions, and any single-occurrence overrides that
//! were defined alongside it (RECURRENCE-ID blocks). Concrete instances are
//! [`Occurrence`]s, derived on demand by the recurrence expander and never
//! stored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{
    DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A point in time as written in an ICS file, before resolution to UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventTime {
    /// All-day event date (DTSTART;VALUE=DATE)
    Date(NaiveDate),
    /// UTC instant (`Z` suffix)
    DateTimeUtc(DateTime<Utc>),
    /// Floating local time, interpreted in the machine's timezone
    DateTimeFloating(NaiveDateTime),
    /// Wall-clock time in a named timezone (TZID parameter)
    DateTimeZoned { datetime: NaiveDateTime, tzid: String },
}

impl EventTime {
    /// Resolve to a concrete UTC instant.
    ///
    /// All-day dates resolve to local midnight. Ambiguous local times during
    /// a DST fall-back resolve to the LATER of the two valid instants, and
    /// nonexistent local times during a spring-forward are pushed past the
    /// gap; both cases share [`resolve_local`].
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => {
                resolve_local(d.and_time(NaiveTime::MIN), &chrono::Local).with_timezone(&Utc)
            }
            EventTime::DateTimeUtc(dt) => *dt,
            EventTime::DateTimeFloating(dt) => {
                resolve_local(*dt, &chrono::Local).with_timezone(&Utc)
            }
            EventTime::DateTimeZoned { datetime, tzid } => match tzid.parse::<Tz>() {
                Ok(tz) => resolve_local(*datetime, &tz).with_timezone(&Utc),
                // Unknown TZID: treat as floating rather than drop the event
                Err(_) => resolve_local(*datetime, &chrono::Local).with_timezone(&Utc),
            },
        }
    }

    /// The nominal calendar date, ignoring time and zone.
    pub fn nominal_date(&self) -> NaiveDate {
        match self {
            EventTime::Date(d) => *d,
            EventTime::DateTimeUtc(dt) => dt.date_naive(),
            EventTime::DateTimeFloating(dt) => dt.date(),
            EventTime::DateTimeZoned { datetime, .. } => datetime.date(),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d),
            EventTime::DateTimeUtc(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%SZ")),
            EventTime::DateTimeFloating(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S")),
            EventTime::DateTimeZoned { datetime, tzid } => {
                write!(f, "{} ({})", datetime.format("%Y-%m-%dT%H:%M:%S"), tzid)
            }
        }
    }
}

/// Resolve a wall-clock time in a timezone, applying the DST policy:
/// ambiguous times take the later instant, nonexistent times are pushed
/// forward past the gap.
pub fn resolve_local<T: TimeZone>(naive: NaiveDateTime, tz: &T) -> DateTime<T> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(_, later) => later,
        LocalResult::None => {
            // Inside a spring-forward gap. Gaps are almost always one hour;
            // retry in growing steps to cover the exotic offsets too.
            for step in [60, 30, 15] {
                if let LocalResult::Single(dt) | LocalResult::Ambiguous(_, dt) =
                    tz.from_local_datetime(&(naive + Duration::minutes(step)))
                {
                    return dt;
                }
            }
            tz.from_utc_datetime(&naive)
        }
    }
}

/// A reminder offset, minutes before the occurrence start.
///
/// Parsed from VALARM DISPLAY triggers; END-related triggers are rebased onto
/// the start using the event's fixed duration at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub minutes: i64,
}

/// A parsed recurrence rule plus its exception dates.
#[derive(Debug, Clone, PartialEq)]
pub struct Recurrence {
    pub rule: crate::rrule::RecurRule,
    pub exdates: Vec<EventTime>,
}

/// A single-occurrence override (a VEVENT block with RECURRENCE-ID).
///
/// Replaces the start, end and summary of the base occurrence whose original
/// start matches the recurrence id.
#[derive(Debug, Clone, PartialEq)]
pub struct EventOverride {
    pub recurrence_id: EventTime,
    pub start: EventTime,
    pub end: EventTime,
    pub summary: String,
    pub reminders: Vec<Reminder>,
}

/// A calendar event series parsed from an .ics file.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub uid: String,
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    pub recurrence: Option<Recurrence>,
    /// Overrides keyed by the UTC instant of their original start
    pub overrides: BTreeMap<DateTime<Utc>, EventOverride>,
    pub reminders: Vec<Reminder>,
    /// Provenance: the file this version of the event came from
    pub source: PathBuf,
}

impl Event {
    /// Duration between start and end; zero when the file gave neither
    /// DTEND nor DURATION.
    pub fn duration(&self) -> Duration {
        self.end.to_utc() - self.start.to_utc()
    }
}

/// One concrete instance of an event, derived by expansion.
#[derive(Debug, Clone, PartialEq)]
pub struct Occurrence {
    pub uid: String,
    pub summary: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub all_day: bool,
    pub reminders: Vec<Reminder>,
}

impl Occurrence {
    pub fn key(&self) -> OccurrenceKey {
        OccurrenceKey {
            uid: self.uid.clone(),
            start: self.start,
        }
    }
}

/// Identity of an occurrence: two occurrences are the same iff their event
/// UID and start instant match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OccurrenceKey {
    pub uid: String,
    pub start: DateTime<Utc>,
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.uid, self.start.to_rfc3339())
    }
}

/// Source file change fingerprint (mtime + size).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Fingerprint {
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

impl Fingerprint {
    /// Read the fingerprint of a file on disk, or None if it is gone.
    pub fn of(path: &std::path::Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Fingerprint {
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            size: meta.len(),
        })
    }
}
