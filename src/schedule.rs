//! Daily reindex time and the once-per-day trigger check.
//!
//! The tracker state (an operator override of the time and the day the run last
//! fired) lives in `schedule.json` next to the corpus generations, so a restart in
//! the scheduled minute does not fire the same day's run twice.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::store::{io_error, sync_dir, write_json, StoreError};

/// How often the serving process checks whether the daily reindex is due.
pub const TICK_INTERVAL: Duration = Duration::from_secs(20);

/// Tracker state file inside the data directory.
pub const SCHEDULE_FILE: &str = "schedule.json";

/// `HH:MM` that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid reindex time {0:?}, expected HH:MM")]
pub struct ScheduleParseError(String);

/// Local wall-clock time of the daily reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReindexSchedule {
    hour: u32,
    minute: u32,
}

impl ReindexSchedule {
    /// Returns `None` unless `hour < 24` and `minute < 60`.
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Hour of day.
    pub fn hour(&self) -> u32 {
        self.hour
    }

    /// Minute of hour.
    pub fn minute(&self) -> u32 {
        self.minute
    }

    /// `true` when `now` falls in the scheduled minute.
    pub fn matches(&self, now: NaiveDateTime) -> bool {
        now.hour() == self.hour && now.minute() == self.minute
    }
}

impl Default for ReindexSchedule {
    fn default() -> Self {
        Self { hour: 2, minute: 0 }
    }
}

impl FromStr for ReindexSchedule {
    type Err = ScheduleParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ScheduleParseError(raw.to_string());
        let (hour, minute) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.parse().map_err(|_| invalid())?;
        let minute = minute.parse().map_err(|_| invalid())?;
        Self::new(hour, minute).ok_or_else(invalid)
    }
}

impl fmt::Display for ReindexSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for ReindexSchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReindexSchedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScheduleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<ReindexSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_run_date: Option<NaiveDate>,
}

/// Remembers the last day the scheduled run fired.
#[derive(Debug, Clone, Default)]
pub struct ScheduleTracker {
    schedule: ReindexSchedule,
    custom: Option<ReindexSchedule>,
    last_run: Option<NaiveDate>,
    path: Option<PathBuf>,
}

impl ScheduleTracker {
    /// In-memory tracker that has never fired.
    pub fn new(schedule: ReindexSchedule) -> Self {
        Self {
            schedule,
            ..Self::default()
        }
    }

    /// Tracker backed by `path`, falling back to `default` unless an override was saved.
    ///
    /// A missing or unreadable file starts a fresh tracker; the error is only logged.
    pub fn load(path: impl Into<PathBuf>, default: ReindexSchedule) -> Self {
        let path = path.into();
        let record = match read_record(&path) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "schedule state unreadable");
                ScheduleRecord::default()
            }
        };
        Self {
            schedule: record.time.unwrap_or(default),
            custom: record.time,
            last_run: record.last_run_date,
            path: Some(path),
        }
    }

    /// Configured time.
    pub fn schedule(&self) -> ReindexSchedule {
        self.schedule
    }

    /// Day of the last scheduled run.
    pub fn last_run(&self) -> Option<NaiveDate> {
        self.last_run
    }

    /// Replaces the configured time and saves it as an override.
    ///
    /// Nothing changes when the state file cannot be written.
    pub fn set_schedule(&mut self, schedule: ReindexSchedule) -> Result<(), StoreError> {
        self.save(&ScheduleRecord {
            time: Some(schedule),
            last_run_date: self.last_run,
        })?;
        self.schedule = schedule;
        self.custom = Some(schedule);
        Ok(())
    }

    /// Returns `true` at most once per day, in the scheduled minute, when not `busy`.
    ///
    /// A busy tick does not consume the day, so a later tick in the same minute can still fire.
    pub fn poll(&mut self, now: NaiveDateTime, busy: bool) -> bool {
        if !self.schedule.matches(now) || self.last_run == Some(now.date()) || busy {
            return false;
        }
        self.last_run = Some(now.date());
        let record = ScheduleRecord {
            time: self.custom,
            last_run_date: self.last_run,
        };
        if let Err(err) = self.save(&record) {
            tracing::warn!(error = %err, "failed to save schedule state");
        }
        true
    }

    fn save(&self, record: &ScheduleRecord) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;
        }
        let tmp = path.with_extension("json.tmp");
        write_json(&tmp, record)?;
        fs::rename(&tmp, path).map_err(|source| io_error(path, source))?;
        match parent {
            Some(dir) => sync_dir(dir),
            None => Ok(()),
        }
    }
}

fn read_record(path: &Path) -> Result<ScheduleRecord, StoreError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(ScheduleRecord::default()),
        Err(source) => return Err(io_error(path, source)),
    };
    serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}
