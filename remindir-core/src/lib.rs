//! Core logic for the remindir daemon.
//!
//! This crate holds everything with algorithmic or temporal-correctness
//! risk: ICS parsing, recurrence expansion, the live event index, the
//! notification scheduler and the durable acknowledgment store. The daemon
//! binary wires these to the filesystem watcher and the desktop
//! notification sink.
//!
//! Data flow: filesystem change -> [`ics::parse_calendar`] ->
//! [`store::StoreHandle`] -> [`scheduler::Scheduler`] -> at fire time ->
//! [`dispatch::Dispatcher`] -> [`ack::AckStore`].

pub mod ack;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod ics;
pub mod recurrence;
pub mod rrule;
pub mod scheduler;
pub mod store;

pub use ack::AckStore;
pub use dispatch::{Dispatcher, FireOutcome, NotificationSink};
pub use error::{RemindError, RemindResult};
pub use event::{Event, EventTime, Fingerprint, Occurrence, OccurrenceKey, Reminder};
pub use scheduler::{ScheduleOptions, Scheduler};
pub use store::{Change, EventStore, StoreHandle};
