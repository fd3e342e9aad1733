use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Latitude and longitude, in that order.
pub type LatLong = (f64, f64);

/// A labeled interval keyed by the second it started.
///
/// The interval runs until the next entry's `start_time`, or until the open
/// interval's start for the newest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub start_time: i64,
    pub activity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat_long: Option<LatLong>,
}

impl Entry {
    pub fn new(
        start_time: i64,
        activity: impl Into<String>,
        note: Option<String>,
        lat_long: Option<LatLong>,
    ) -> Self {
        Self {
            start_time,
            activity: activity.into(),
            note,
            lat_long,
        }
    }
}

/// Start of the interval that is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Placeholder {
    pub start_time: i64,
}

/// One line of the persisted log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    Entry(Entry),
    Placeholder(Placeholder),
}

/// An entry paired with the time its interval ends.
#[derive(Debug, Clone, Copy)]
pub struct Interval<'a> {
    pub entry: &'a Entry,
    pub end_time: i64,
}

impl Interval<'_> {
    pub fn duration_seconds(&self) -> i64 {
        (self.end_time - self.entry.start_time).max(0)
    }
}

/// Sorts entries by start time and collapses every run of consecutive
/// same-activity entries into its earliest member.
pub fn normalize_entries(entries: &mut Vec<Entry>) {
    entries.sort_by_key(|entry| entry.start_time);
    entries.dedup_by(|later, retained| later.activity == retained.activity);
}

/// Returns true when entries are strictly ascending and no two neighbours share
/// an activity.
pub fn is_normalized(entries: &[Entry]) -> bool {
    entries.windows(2).all(|pair| {
        pair[0].start_time < pair[1].start_time && pair[0].activity != pair[1].activity
    })
}

/// Trims a free-text note, mapping blank input to `None`.
pub fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|note| note.trim().to_string())
        .filter(|note| !note.is_empty())
}

pub fn format_fuzzy_elapsed(elapsed_seconds: i64) -> String {
    let seconds = elapsed_seconds.max(0);
    let minutes = seconds / 60;
    let hours = minutes / 60;
    if hours > 0 {
        format!("{hours} hours")
    } else if minutes > 0 {
        format!("{minutes} minutes")
    } else {
        format!("{seconds} seconds")
    }
}

pub fn format_duration(total_seconds: i64) -> String {
    let total_seconds = total_seconds.max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

pub fn to_local(timestamp: i64) -> Option<DateTime<Local>> {
    DateTime::from_timestamp(timestamp, 0).map(|utc| utc.with_timezone(&Local))
}

pub fn format_local_time(timestamp: i64) -> String {
    to_local(timestamp)
        .map(|local| local.format("%H:%M").to_string())
        .unwrap_or_else(|| format!("@{timestamp}"))
}
