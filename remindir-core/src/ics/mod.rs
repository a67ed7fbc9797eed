//! ICS file parsing using the icalendar crate's parser.

mod parse;

pub use parse::parse_calendar;
