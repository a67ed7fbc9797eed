//! Recurrence expansion.
//!
//! Expands an event into its concrete occurrences within a window,
//! honoring EXDATEs and RECURRENCE-ID overrides. Expansion is pure:
//! calling it again with the same window yields the same occurrences.
//!
//! Timed occurrences are generated by advancing the event's nominal date
//! and re-resolving its wall-clock time in its stored timezone for every
//! occurrence, so a 09:00 local event stays at 09:00 local across DST
//! transitions.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};

use crate::event::{Event, EventOverride, EventTime, Occurrence};
use crate::rrule::{Frequency, RecurRule};

/// Hard cap on steps per expansion, against pathological rules.
const MAX_STEPS: u64 = 100_000;

/// Expand `event` into its occurrences with starts inside
/// [`window_start`, `window_end`] (inclusive), ordered by start.
pub fn expand(
    event: &Event,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Vec<Occurrence> {
    let Some(recurrence) = &event.recurrence else {
        let occ = single_occurrence(event);
        if occ.start >= window_start && occ.start <= window_end {
            return vec![occ];
        }
        return Vec::new();
    };

    let rule = &recurrence.rule;
    let origin_date = event.start.nominal_date();
    let duration = event.duration();
    let until = rule.until_utc();

    let mut out = Vec::new();
    let first = first_candidate_step(origin_date, window_start.date_naive(), rule);

    for step in first..first + MAX_STEPS {
        if let Some(count) = rule.count {
            if step >= count as u64 {
                break;
            }
        }
        let Some(date) = advance_date(origin_date, rule, step) else {
            break;
        };
        let base_start_time = rebase_to_date(&event.start, date);
        let base_start = base_start_time.to_utc();

        if let Some(until) = until {
            if base_start > until {
                break;
            }
        }
        if base_start > window_end {
            break;
        }

        if is_excluded(&base_start_time, base_start, &recurrence.exdates) {
            continue;
        }

        let occ = match event.overrides.get(&base_start) {
            Some(ov) => override_occurrence(event, ov),
            None => Occurrence {
                uid: event.uid.clone(),
                summary: event.summary.clone(),
                start: base_start,
                end: base_start + duration,
                all_day: event.start.is_date(),
                reminders: event.reminders.clone(),
            },
        };

        if occ.start >= window_start && occ.start <= window_end {
            out.push(occ);
        }
    }

    out
}

fn single_occurrence(event: &Event) -> Occurrence {
    Occurrence {
        uid: event.uid.clone(),
        summary: event.summary.clone(),
        start: event.start.to_utc(),
        end: event.end.to_utc(),
        all_day: event.start.is_date(),
        reminders: event.reminders.clone(),
    }
}

fn override_occurrence(event: &Event, ov: &EventOverride) -> Occurrence {
    Occurrence {
        uid: event.uid.clone(),
        summary: ov.summary.clone(),
        start: ov.start.to_utc(),
        end: ov.end.to_utc(),
        all_day: ov.start.is_date(),
        reminders: ov.reminders.clone(),
    }
}

/// The nominal date of occurrence number `step` (0 = the event's own start).
///
/// Monthly and yearly steps clamp to the last valid day of the target month
/// (Jan 31 + 1 month = Feb 29 in a leap year, Feb 28 otherwise).
fn advance_date(origin: NaiveDate, rule: &RecurRule, step: u64) -> Option<NaiveDate> {
    let n = step.checked_mul(rule.interval as u64)?;
    match rule.freq {
        Frequency::Daily => origin.checked_add_days(chrono::Days::new(n)),
        Frequency::Weekly => origin.checked_add_days(chrono::Days::new(n * 7)),
        Frequency::Monthly => origin.checked_add_months(Months::new(u32::try_from(n).ok()?)),
        Frequency::Yearly => {
            origin.checked_add_months(Months::new(u32::try_from(n.checked_mul(12)?).ok()?))
        }
    }
}

/// Rebuild the event's start time on a new nominal date, keeping the
/// time-of-day and timezone variant.
fn rebase_to_date(start: &EventTime, date: NaiveDate) -> EventTime {
    match start {
        EventTime::Date(_) => EventTime::Date(date),
        EventTime::DateTimeUtc(dt) => {
            EventTime::DateTimeUtc(date.and_time(dt.time()).and_utc())
        }
        EventTime::DateTimeFloating(dt) => EventTime::DateTimeFloating(date.and_time(dt.time())),
        EventTime::DateTimeZoned { datetime, tzid } => EventTime::DateTimeZoned {
            datetime: date.and_time(datetime.time()),
            tzid: tzid.clone(),
        },
    }
}

/// An EXDATE matches an occurrence either on the exact UTC instant or, for
/// date-valued EXDATEs, on the nominal calendar date.
fn is_excluded(start_time: &EventTime, start_utc: DateTime<Utc>, exdates: &[EventTime]) -> bool {
    exdates.iter().any(|ex| match ex {
        EventTime::Date(d) => *d == start_time.nominal_date(),
        other => other.to_utc() == start_utc,
    })
}

/// A conservative lower bound on the first step whose occurrence can fall at
/// or after `window_start`, so expansion does not crawl from a years-old
/// DTSTART. Backs off one step to stay on the safe side of timezone offsets.
fn first_candidate_step(origin: NaiveDate, window_start: NaiveDate, rule: &RecurRule) -> u64 {
    if window_start <= origin {
        return 0;
    }
    let interval = rule.interval as i64;
    let steps = match rule.freq {
        Frequency::Daily => (window_start - origin).num_days() / interval,
        Frequency::Weekly => (window_start - origin).num_days() / (7 * interval),
        Frequency::Monthly => months_between(origin, window_start) / interval,
        Frequency::Yearly => months_between(origin, window_start) / (12 * interval),
    };
    (steps - 1).max(0) as u64
}

fn months_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to.year() as i64 - from.year() as i64) * 12 + (to.month() as i64 - from.month() as i64)
}
