//! Desktop notification sink backed by notify-rust.

use log::debug;
use notify_rust::Notification;
use remindir_core::{NotificationSink, OccurrenceKey, RemindError, RemindResult};

pub struct DesktopSink;

impl NotificationSink for DesktopSink {
    fn deliver(&self, title: &str, body: &str, key: &OccurrenceKey) -> RemindResult<()> {
        debug!("Delivering desktop notification for {}", key);
        Notification::new()
            .appname("remindir")
            .summary(title)
            .body(body)
            .show()
            .map_err(|e| RemindError::Delivery(e.to_string()))?;
        Ok(())
    }
}
