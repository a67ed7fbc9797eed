//! Daemon configuration.
//!
//! A TOML file maps calendar names to directories of .ics files, plus
//! optional scheduling knobs:
//!
//! ```toml
//! lead_time = "10m"
//! horizon = "24h"
//! ack_retention = "30d"
//!
//! [calendars.personal]
//! path = "~/.calendars/personal"
//!
//! [calendars.work]
//! path = "~/.calendars/work"
//! ```

use anyhow::{bail, Context, Result};
use chrono::Duration;
use remindir_core::ScheduleOptions;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub calendars: HashMap<String, CalendarConfig>,

    /// Default notification lead time, e.g. "10m"
    pub lead_time: Option<String>,

    /// Scheduling lookahead window, e.g. "24h"
    pub horizon: Option<String>,

    /// How long delivered-notification records are kept, e.g. "30d"
    pub ack_retention: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarConfig {
    /// Directory containing this calendar's .ics files
    pub path: String,
}

/// Configuration after parsing and validation.
#[derive(Debug)]
pub struct Settings {
    /// Calendar name -> watched directory
    pub directories: Vec<(String, PathBuf)>,
    pub options: ScheduleOptions,
    pub ack_retention: Option<Duration>,
}

/// Get the default config file path (~/.config/remindir/config.toml)
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("remindir");
    Ok(config_dir.join("config.toml"))
}

/// Get the default ack file path (~/.local/share/remindir/acks.jsonl)
pub fn default_ack_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .context("Could not determine data directory")?
        .join("remindir");
    Ok(data_dir.join("acks.jsonl"))
}

/// Load and validate the config file. A missing watched directory is a
/// startup error: better to refuse to run than to silently watch nothing.
pub fn load(path: &PathBuf) -> Result<Settings> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;

    let config: Config = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;

    if config.calendars.is_empty() {
        bail!(
            "No calendars configured in {}\n\n\
            Add at least one:\n\n\
            [calendars.personal]\n\
            path = \"~/.calendars/personal\"",
            path.display()
        );
    }

    let mut directories = Vec::new();
    for (name, calendar) in &config.calendars {
        let expanded = shellexpand::tilde(&calendar.path);
        let dir = PathBuf::from(expanded.as_ref());
        if !dir.is_dir() {
            bail!(
                "Calendar '{}' points at {} which is not a directory",
                name,
                dir.display()
            );
        }
        directories.push((name.clone(), dir));
    }
    directories.sort();

    let defaults = ScheduleOptions::default();
    let options = ScheduleOptions {
        lead: parse_duration_opt(&config.lead_time, "lead_time")?.unwrap_or(defaults.lead),
        horizon: parse_duration_opt(&config.horizon, "horizon")?.unwrap_or(defaults.horizon),
    };

    let ack_retention = parse_duration_opt(&config.ack_retention, "ack_retention")?;

    Ok(Settings {
        directories,
        options,
        ack_retention,
    })
}

fn parse_duration_opt(value: &Option<String>, field: &str) -> Result<Option<Duration>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let std_dur = humantime::parse_duration(value)
        .map_err(|e| anyhow::anyhow!("Bad {} '{}': {}", field, value, e))?;
    let dur = Duration::from_std(std_dur).with_context(|| format!("{} too large", field))?;
    Ok(Some(dur))
}
