//! Parses a whole ICS file into events.
//!
//! One file may hold several VEVENT blocks: a master per UID plus override
//! blocks carrying RECURRENCE-ID. Override blocks are folded into their
//! master's override map here, so the rest of the system only ever sees
//! whole [`Event`]s.
//!
//! Tolerance rules: a malformed VEVENT is skipped with a log line, a
//! malformed RRULE downgrades its event to non-recurring, and neither
//! failure mode aborts the rest of the file.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Duration;
use icalendar::{
    parser::{read_calendar, unfold, Component, Property},
    DatePerhapsTime,
};
use log::{debug, warn};

use crate::error::{RemindError, RemindResult};
use crate::event::{Event, EventOverride, EventTime, Recurrence, Reminder};
use crate::rrule::RecurRule;

/// One VEVENT block, before masters and overrides are stitched together.
struct RawVevent {
    uid: String,
    summary: String,
    start: EventTime,
    end: EventTime,
    recurrence: Option<Recurrence>,
    recurrence_id: Option<EventTime>,
    reminders: Vec<Reminder>,
}

/// Parse ICS content into the events it defines.
///
/// Returns `Err` only when the file as a whole is unreadable as iCalendar;
/// individual bad blocks are skipped.
pub fn parse_calendar(content: &str, source: &Path) -> RemindResult<Vec<Event>> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded)
        .map_err(|e| RemindError::Parse(format!("{}: {}", source.display(), e)))?;

    let mut raws = Vec::new();
    for component in &calendar.components {
        if component.name != "VEVENT" {
            continue;
        }
        match parse_vevent(component) {
            Some(raw) => raws.push(raw),
            None => warn!(
                "Skipping malformed VEVENT block in {} (missing UID or DTSTART)",
                source.display()
            ),
        }
    }

    Ok(stitch(raws, source))
}

/// Fold override blocks into their masters and materialize the event list.
fn stitch(raws: Vec<RawVevent>, source: &Path) -> Vec<Event> {
    let mut events: Vec<Event> = Vec::new();
    let mut overrides: Vec<RawVevent> = Vec::new();

    for raw in raws {
        if raw.recurrence_id.is_some() {
            overrides.push(raw);
            continue;
        }
        let event = Event {
            uid: raw.uid,
            summary: raw.summary,
            start: raw.start,
            end: raw.end,
            recurrence: raw.recurrence,
            overrides: BTreeMap::new(),
            reminders: raw.reminders,
            source: source.to_path_buf(),
        };
        if let Some(existing) = events.iter_mut().find(|e| e.uid == event.uid) {
            warn!(
                "Duplicate master block for UID '{}' in {}; keeping the last one",
                event.uid,
                source.display()
            );
            *existing = event;
        } else {
            events.push(event);
        }
    }

    for ov in overrides {
        let recurrence_id = ov.recurrence_id.expect("partitioned on recurrence_id");
        let Some(master) = events.iter_mut().find(|e| e.uid == ov.uid) else {
            // A detached override with no master in this file still describes
            // a concrete occurrence, so keep it as a plain event.
            debug!(
                "Override for UID '{}' in {} has no master block; treating as standalone event",
                ov.uid,
                source.display()
            );
            events.push(Event {
                uid: ov.uid,
                summary: ov.summary,
                start: ov.start,
                end: ov.end,
                recurrence: None,
                overrides: BTreeMap::new(),
                reminders: ov.reminders,
                source: source.to_path_buf(),
            });
            continue;
        };
        let key = recurrence_id.to_utc();
        if master.overrides.contains_key(&key) {
            warn!(
                "Duplicate override for UID '{}' at {} in {}; keeping the last one",
                master.uid,
                recurrence_id,
                source.display()
            );
        }
        master.overrides.insert(
            key,
            EventOverride {
                recurrence_id,
                start: ov.start,
                end: ov.end,
                summary: ov.summary,
                reminders: ov.reminders,
            },
        );
    }

    events
}

/// Parse one VEVENT block. Returns None when UID or DTSTART is missing.
fn parse_vevent(vevent: &Component) -> Option<RawVevent> {
    let uid = vevent.find_prop("UID")?.val.to_string();
    let summary = vevent
        .find_prop("SUMMARY")
        .map(|p| p.val.to_string())
        .unwrap_or_else(|| "(No title)".to_string());
    let start = to_event_time(DatePerhapsTime::try_from(vevent.find_prop("DTSTART")?).ok()?);

    let end = match vevent.find_prop("DTEND") {
        Some(p) => DatePerhapsTime::try_from(p).ok().map(to_event_time),
        None => None,
    };
    let end = match end {
        Some(end) => end,
        None => match vevent.find_prop("DURATION") {
            Some(p) => apply_duration(&start, p.val.as_ref()),
            // All-day events without DTEND span their local day
            None => match &start {
                EventTime::Date(d) => EventTime::Date(*d + Duration::days(1)),
                other => other.clone(),
            },
        },
    };

    // Malformed rules downgrade the event to non-recurring rather than
    // failing the block
    let recurrence = vevent.find_prop("RRULE").and_then(|p| {
        match RecurRule::parse(p.val.as_ref()) {
            Ok(rule) => {
                let exdates: Vec<EventTime> = vevent
                    .properties
                    .iter()
                    .filter(|p| p.name == "EXDATE")
                    .flat_map(parse_exdate_property)
                    .collect();
                Some(Recurrence { rule, exdates })
            }
            Err(e) => {
                warn!("Event '{}': {}; treating as non-recurring", uid, e);
                None
            }
        }
    });

    let recurrence_id = vevent
        .find_prop("RECURRENCE-ID")
        .and_then(|p| DatePerhapsTime::try_from(p).ok())
        .map(to_event_time);

    let duration_minutes = (end.to_utc() - start.to_utc()).num_minutes();
    let reminders: Vec<Reminder> = vevent
        .components
        .iter()
        .filter(|c| c.name == "VALARM")
        .filter_map(|alarm| parse_display_alarm(alarm, duration_minutes))
        .collect();

    Some(RawVevent {
        uid,
        summary,
        start,
        end,
        recurrence,
        recurrence_id,
        reminders,
    })
}

/// Convert icalendar's DatePerhapsTime to our EventTime, preserving timezone info
fn to_event_time(dpt: DatePerhapsTime) -> EventTime {
    match dpt {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(cal_dt) => match cal_dt {
            icalendar::CalendarDateTime::Utc(dt) => EventTime::DateTimeUtc(dt),
            icalendar::CalendarDateTime::Floating(naive) => EventTime::DateTimeFloating(naive),
            icalendar::CalendarDateTime::WithTimezone { date_time, tzid } => {
                EventTime::DateTimeZoned {
                    datetime: date_time,
                    tzid,
                }
            }
        },
    }
}

/// Add an ISO-8601 DURATION to a start time, keeping its variant.
fn apply_duration(start: &EventTime, value: &str) -> EventTime {
    let Some(dur) = parse_iso_duration(value) else {
        debug!("Ignoring unparseable DURATION '{}'", value);
        return start.clone();
    };
    match start {
        EventTime::Date(d) => EventTime::Date(*d + Duration::days(dur.num_days().max(1))),
        EventTime::DateTimeUtc(dt) => EventTime::DateTimeUtc(*dt + dur),
        EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(*dt + dur),
        EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
            datetime: *datetime + dur,
            tzid: tzid.clone(),
        },
    }
}

fn parse_iso_duration(value: &str) -> Option<Duration> {
    let negative = value.starts_with('-');
    let trimmed = value.trim_start_matches(['-', '+']);
    let parsed = iso8601::duration(trimmed).ok()?;
    let std_duration: std::time::Duration = parsed.into();
    let dur = Duration::from_std(std_duration).ok()?;
    Some(if negative { -dur } else { dur })
}

/// Parse an EXDATE property into a list of EventTime values.
///
/// Handles TZID parameters, VALUE=DATE, UTC and floating forms, and
/// comma-separated value lists.
fn parse_exdate_property(prop: &Property) -> Vec<EventTime> {
    let tzid = prop
        .params
        .iter()
        .find(|p| p.key == "TZID")
        .and_then(|p| p.val.as_ref().map(|v| v.to_string()));

    let is_date = prop
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE"));

    let val_str = prop.val.as_ref();
    val_str
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                return None;
            }
            if is_date {
                chrono::NaiveDate::parse_from_str(s, "%Y%m%d")
                    .ok()
                    .map(EventTime::Date)
            } else if let Some(ref tz) = tzid {
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeZoned {
                        datetime: dt,
                        tzid: tz.clone(),
                    })
            } else if s.ends_with('Z') {
                let s = s.trim_end_matches('Z');
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(|dt| EventTime::DateTimeUtc(dt.and_utc()))
            } else {
                chrono::NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S")
                    .ok()
                    .map(EventTime::DateTimeFloating)
            }
        })
        .collect()
}

/// Parse a VALARM block with ACTION:DISPLAY into a start-relative reminder.
///
/// END-related triggers are rebased onto the start using the event's fixed
/// duration; absolute DATE-TIME triggers are not supported and ignored.
fn parse_display_alarm(alarm: &Component, duration_minutes: i64) -> Option<Reminder> {
    let action = alarm.find_prop("ACTION")?;
    if action.val.as_ref() != "DISPLAY" {
        return None;
    }
    let trigger = alarm.find_prop("TRIGGER")?;

    let is_absolute = trigger
        .params
        .iter()
        .any(|p| p.key == "VALUE" && p.val.as_ref().map(|v| v.as_ref()) == Some("DATE-TIME"));
    if is_absolute {
        debug!("Ignoring absolute VALARM trigger '{}'", trigger.val.as_ref());
        return None;
    }

    let related_end = trigger
        .params
        .iter()
        .any(|p| p.key == "RELATED" && p.val.as_ref().map(|v| v.as_ref()) == Some("END"));

    let minutes = parse_trigger_minutes(trigger.val.as_ref())?;
    let minutes = if related_end {
        minutes - duration_minutes
    } else {
        minutes
    };

    // A trigger after the start would remind about an event already underway
    Some(Reminder {
        minutes: minutes.max(0),
    })
}

/// Parse TRIGGER value to minutes before event (-PT30M, -P1D, etc.)
fn parse_trigger_minutes(value: &str) -> Option<i64> {
    let is_before = value.starts_with('-');
    let duration_str = value.trim_start_matches('-');

    let duration = iso8601::duration(duration_str).ok()?;
    let std_duration: std::time::Duration = duration.into();
    let minutes = (std_duration.as_secs() / 60) as i64;

    Some(if is_before { minutes } else { -minutes })
}
