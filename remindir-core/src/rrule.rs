//! RRULE parsing.
//!
//! Supports the FREQ/INTERVAL/COUNT/UNTIL subset. Anything beyond that
//! (BYDAY, BYMONTH, sub-daily frequencies, ...) is reported as a
//! [`RemindError::Recurrence`] and the caller downgrades the event to
//! non-recurring instead of failing the file.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{RemindError, RemindResult};
use crate::event::{resolve_local, EventTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// A parsed recurrence rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RecurRule {
    pub freq: Frequency,
    /// Step between occurrences in units of `freq` (default 1)
    pub interval: u32,
    /// Total number of occurrences, counted from the rule's own DTSTART
    pub count: Option<u32>,
    /// Inclusive upper bound on occurrence starts
    pub until: Option<EventTime>,
}

impl RecurRule {
    /// Parse the value of an RRULE property, e.g. `FREQ=DAILY;COUNT=5`.
    pub fn parse(value: &str) -> RemindResult<Self> {
        let mut freq = None;
        let mut interval = 1u32;
        let mut count = None;
        let mut until = None;

        for part in value.split(';').filter(|p| !p.is_empty()) {
            let (key, val) = part.split_once('=').ok_or_else(|| {
                RemindError::Recurrence(format!("Malformed rule part '{}'", part))
            })?;
            match key.trim().to_ascii_uppercase().as_str() {
                "FREQ" => {
                    freq = Some(match val.to_ascii_uppercase().as_str() {
                        "DAILY" => Frequency::Daily,
                        "WEEKLY" => Frequency::Weekly,
                        "MONTHLY" => Frequency::Monthly,
                        "YEARLY" => Frequency::Yearly,
                        other => {
                            return Err(RemindError::Recurrence(format!(
                                "Unsupported frequency '{}'",
                                other
                            )))
                        }
                    });
                }
                "INTERVAL" => {
                    interval = val.parse().map_err(|_| {
                        RemindError::Recurrence(format!("Bad INTERVAL '{}'", val))
                    })?;
                    if interval == 0 {
                        return Err(RemindError::Recurrence("INTERVAL must be >= 1".into()));
                    }
                }
                "COUNT" => {
                    let n: u32 = val.parse().map_err(|_| {
                        RemindError::Recurrence(format!("Bad COUNT '{}'", val))
                    })?;
                    if n == 0 {
                        return Err(RemindError::Recurrence("COUNT must be >= 1".into()));
                    }
                    count = Some(n);
                }
                "UNTIL" => {
                    until = Some(parse_until(val)?);
                }
                "WKST" => {
                    // Week start only matters for BYxxx parts we don't support
                }
                other => {
                    return Err(RemindError::Recurrence(format!(
                        "Unsupported rule part '{}'",
                        other
                    )))
                }
            }
        }

        let freq = freq
            .ok_or_else(|| RemindError::Recurrence("Rule is missing FREQ".into()))?;

        // RFC 5545: UNTIL and COUNT are mutually exclusive
        if count.is_some() && until.is_some() {
            return Err(RemindError::Recurrence(
                "Rule specifies both COUNT and UNTIL".into(),
            ));
        }

        Ok(RecurRule {
            freq,
            interval,
            count,
            until,
        })
    }

    /// The UNTIL bound as a UTC instant; date-only bounds cover the whole
    /// local day.
    pub fn until_utc(&self) -> Option<chrono::DateTime<Utc>> {
        let until = self.until.as_ref()?;
        Some(match until {
            EventTime::Date(d) => {
                let end_of_day = d.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap());
                resolve_local(end_of_day, &chrono::Local).with_timezone(&Utc)
            }
            other => other.to_utc(),
        })
    }
}

/// UNTIL accepts `YYYYMMDDTHHMMSSZ`, `YYYYMMDDTHHMMSS` or `YYYYMMDD`.
fn parse_until(val: &str) -> RemindResult<EventTime> {
    if let Some(stripped) = val.strip_suffix('Z') {
        if let Ok(dt) = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S") {
            return Ok(EventTime::DateTimeUtc(dt.and_utc()));
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(val, "%Y%m%dT%H%M%S") {
        return Ok(EventTime::DateTimeFloating(dt));
    }
    if let Ok(d) = NaiveDate::parse_from_str(val, "%Y%m%d") {
        return Ok(EventTime::Date(d));
    }
    Err(RemindError::Recurrence(format!("Bad UNTIL '{}'", val)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_daily_with_count() {
        let rule = RecurRule::parse("FREQ=DAILY;COUNT=5").unwrap();
        assert_eq!(rule.freq, Frequency::Daily);
        assert_eq!(rule.interval, 1);
        assert_eq!(rule.count, Some(5));
        assert!(rule.until.is_none());
    }

    #[test]
    fn parses_interval_and_until() {
        let rule = RecurRule::parse("FREQ=WEEKLY;INTERVAL=2;UNTIL=20240601T090000Z").unwrap();
        assert_eq!(rule.freq, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(
            rule.until,
            Some(EventTime::DateTimeUtc(
                Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
            ))
        );
    }

    #[test]
    fn rejects_unsupported_parts() {
        assert!(RecurRule::parse("FREQ=WEEKLY;BYDAY=MO,WE").is_err());
        assert!(RecurRule::parse("FREQ=HOURLY").is_err());
        assert!(RecurRule::parse("INTERVAL=2").is_err());
    }

    #[test]
    fn rejects_count_with_until() {
        assert!(RecurRule::parse("FREQ=DAILY;COUNT=3;UNTIL=20240601T000000Z").is_err());
    }

    #[test]
    fn rejects_zero_interval_and_count() {
        assert!(RecurRule::parse("FREQ=DAILY;INTERVAL=0").is_err());
        assert!(RecurRule::parse("FREQ=DAILY;COUNT=0").is_err());
    }
}
