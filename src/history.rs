use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use log::{debug, info, warn};

use crate::domain::{
    Entry, Interval, LatLong, Placeholder, clean_note, format_fuzzy_elapsed, normalize_entries,
};
use crate::storage::{self, LogContents, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("no entry starts at {}", join_keys(.0))]
    NotFound(Vec<i64>),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

fn join_keys(keys: &[i64]) -> String {
    keys.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The ordered activity timeline and the file that backs it.
///
/// Every mutation re-normalizes the entries and rewrites the file before it
/// returns. A mutation whose write fails leaves the value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    path: PathBuf,
    entries: Vec<Entry>,
    current_activity_start_time: i64,
}

impl History {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        Self::load_at(path, Utc::now().timestamp())
    }

    /// Loads the log at `path`, creating it when absent, and rewrites it in
    /// canonical form.
    pub fn load_at(path: impl Into<PathBuf>, now: i64) -> Result<Self, HistoryError> {
        let path = path.into();
        let contents = match storage::read_log(&path)? {
            Some(contents) => contents,
            None => {
                let placeholder = Placeholder { start_time: now };
                storage::write_log(&path, &[], placeholder)?;
                info!("created empty history at {}", path.display());
                LogContents {
                    entries: Vec::new(),
                    placeholder: Some(placeholder),
                }
            }
        };

        let current_activity_start_time = match contents.placeholder {
            Some(placeholder) => placeholder.start_time,
            None => {
                warn!(
                    "{} has no placeholder record; the open interval starts now",
                    path.display()
                );
                now
            }
        };

        let mut history = Self {
            path,
            entries: contents.entries,
            current_activity_start_time,
        };
        history.normalize();
        if let Some(last) = history.entries.last() {
            if history.current_activity_start_time < last.start_time {
                warn!(
                    "placeholder {} precedes the last entry at {}; moving it forward",
                    history.current_activity_start_time, last.start_time
                );
                history.current_activity_start_time = last.start_time;
            }
        }
        history.persist()?;

        debug!(
            "loaded {} entries from {}",
            history.entries.len(),
            history.path.display()
        );
        Ok(history)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn current_activity_start_time(&self) -> i64 {
        self.current_activity_start_time
    }

    pub fn entry(&self, start_time: i64) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|entry| entry.start_time == start_time)
    }

    /// Pairs each entry with the start of the entry after it.
    pub fn intervals(&self) -> impl Iterator<Item = Interval<'_>> {
        self.entries.iter().enumerate().map(move |(index, entry)| Interval {
            entry,
            end_time: self
                .entries
                .get(index + 1)
                .map_or(self.current_activity_start_time, |next| next.start_time),
        })
    }

    pub fn append(
        &mut self,
        activity: &str,
        note: Option<String>,
        lat_long: Option<LatLong>,
    ) -> Result<(), HistoryError> {
        self.append_at(activity, note, lat_long, Utc::now().timestamp())
    }

    /// Closes the open interval under `activity` and opens a new one at `now`.
    pub fn append_at(
        &mut self,
        activity: &str,
        note: Option<String>,
        lat_long: Option<LatLong>,
        now: i64,
    ) -> Result<(), HistoryError> {
        let activity = require_activity(activity)?;
        let note = clean_note(note);
        if let Some(lat_long) = lat_long {
            require_coordinates(lat_long)?;
        }

        self.commit(|next| {
            let start_time = next.current_activity_start_time;
            match next
                .entries
                .iter_mut()
                .find(|entry| entry.start_time == start_time)
            {
                Some(existing) => {
                    existing.activity = activity;
                    existing.note = note;
                    existing.lat_long = lat_long;
                }
                None => next
                    .entries
                    .push(Entry::new(start_time, activity, note, lat_long)),
            }
            next.current_activity_start_time = now.max(start_time);
            Ok(())
        })
    }

    pub fn edit(
        &mut self,
        old_start_time: i64,
        new_start_time: &str,
        activity: &str,
        note: &str,
    ) -> Result<(), HistoryError> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.start_time == old_start_time)
            .ok_or_else(|| HistoryError::NotFound(vec![old_start_time]))?;
        let new_start_time = new_start_time.trim().parse::<i64>().map_err(|_| {
            HistoryError::InvalidInput(format!("start time {new_start_time:?} is not an integer"))
        })?;
        let activity = require_activity(activity)?;

        if new_start_time != old_start_time && self.entry(new_start_time).is_some() {
            return Err(HistoryError::InvalidInput(format!(
                "an entry already starts at {new_start_time}"
            )));
        }
        if new_start_time > self.current_activity_start_time {
            return Err(HistoryError::InvalidInput(format!(
                "start time {new_start_time} is after the current activity began at {}",
                self.current_activity_start_time
            )));
        }

        let note = clean_note(Some(note.to_string()));
        self.commit(|next| {
            let entry = &mut next.entries[index];
            entry.start_time = new_start_time;
            entry.activity = activity;
            entry.note = note;
            Ok(())
        })
    }

    /// Deletes every entry keyed by `start_times` and returns how many went.
    ///
    /// Fails with `NotFound` when the set is non-empty and matches nothing.
    pub fn remove(&mut self, start_times: &BTreeSet<i64>) -> Result<usize, HistoryError> {
        if start_times.is_empty() {
            return Ok(0);
        }
        let matched = self
            .entries
            .iter()
            .filter(|entry| start_times.contains(&entry.start_time))
            .count();
        if matched == 0 {
            return Err(HistoryError::NotFound(start_times.iter().copied().collect()));
        }

        self.commit(|next| {
            next.entries
                .retain(|entry| !start_times.contains(&entry.start_time));
            Ok(())
        })?;
        Ok(matched)
    }

    pub fn normalize(&mut self) {
        normalize_entries(&mut self.entries);
    }

    pub fn persist(&self) -> Result<(), HistoryError> {
        storage::write_log(
            &self.path,
            &self.entries,
            Placeholder {
                start_time: self.current_activity_start_time,
            },
        )?;
        Ok(())
    }

    pub fn fuzzy_elapsed(&self) -> String {
        self.fuzzy_elapsed_at(Utc::now().timestamp())
    }

    pub fn fuzzy_elapsed_at(&self, now: i64) -> String {
        format_fuzzy_elapsed(now - self.current_activity_start_time)
    }

    fn commit(
        &mut self,
        apply: impl FnOnce(&mut Self) -> Result<(), HistoryError>,
    ) -> Result<(), HistoryError> {
        let mut next = self.clone();
        apply(&mut next)?;
        next.normalize();
        next.persist()?;
        *self = next;
        Ok(())
    }
}

fn require_activity(activity: &str) -> Result<String, HistoryError> {
    let activity = activity.trim();
    if activity.is_empty() {
        return Err(HistoryError::InvalidInput(
            "activity must not be blank".to_string(),
        ));
    }
    Ok(activity.to_string())
}

fn require_coordinates((latitude, longitude): LatLong) -> Result<(), HistoryError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(HistoryError::InvalidInput(format!(
            "latitude {latitude} is outside -90..=90"
        )));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(HistoryError::InvalidInput(format!(
            "longitude {longitude} is outside -180..=180"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use crate::domain::{Entry, is_normalized};
    use crate::storage::StorageError;

    use super::{History, HistoryError};

    fn scratch() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chronofile.jsonl");
        (dir, path)
    }

    fn activities(history: &History) -> Vec<(i64, String)> {
        history
            .entries()
            .iter()
            .map(|entry| (entry.start_time, entry.activity.clone()))
            .collect()
    }

    fn last_line(history: &History) -> String {
        let raw = fs::read_to_string(history.path()).unwrap();
        raw.lines().last().unwrap().to_string()
    }

    #[test]
    fn load_creates_missing_file_with_placeholder() {
        let (_dir, path) = scratch();
        let history = History::load_at(&path, 1_000).expect("load should succeed");

        assert!(history.entries().is_empty());
        assert_eq!(history.current_activity_start_time(), 1_000);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\"type\":\"placeholder\",\"startTime\":1000}\n"
        );
    }

    #[test]
    fn load_repairs_non_canonical_file() {
        let (_dir, path) = scratch();
        fs::write(
            &path,
            concat!(
                "{\"type\":\"entry\",\"startTime\":300,\"activity\":\"work\"}\n",
                "{\"type\":\"placeholder\",\"startTime\":500}\n",
                "{\"type\":\"entry\",\"startTime\":200,\"activity\":\"sleep\"}\n",
                "\n",
                "{\"type\":\"entry\",\"startTime\":100,\"activity\":\"sleep\"}\n",
            ),
        )
        .unwrap();

        let history = History::load_at(&path, 9_999).unwrap();
        assert_eq!(
            activities(&history),
            vec![(100, "sleep".to_string()), (300, "work".to_string())]
        );
        assert_eq!(history.current_activity_start_time(), 500);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            concat!(
                "{\"type\":\"entry\",\"startTime\":100,\"activity\":\"sleep\"}\n",
                "{\"type\":\"entry\",\"startTime\":300,\"activity\":\"work\"}\n",
                "{\"type\":\"placeholder\",\"startTime\":500}\n",
            )
        );
    }

    #[test]
    fn malformed_line_aborts_load() {
        let (_dir, path) = scratch();
        fs::write(
            &path,
            "{\"type\":\"entry\",\"startTime\":1,\"activity\":\"a\"}\nnot json\n",
        )
        .unwrap();

        let err = History::load_at(&path, 10).unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Storage(StorageError::MalformedRecord { line: 2, .. })
        ));
    }

    #[test]
    fn missing_placeholder_opens_interval_now() {
        let (_dir, path) = scratch();
        fs::write(&path, "{\"type\":\"entry\",\"startTime\":1,\"activity\":\"a\"}\n").unwrap();

        let history = History::load_at(&path, 50).unwrap();
        assert_eq!(history.current_activity_start_time(), 50);
        assert_eq!(last_line(&history), "{\"type\":\"placeholder\",\"startTime\":50}");
    }

    #[test]
    fn stale_placeholder_moves_to_last_entry() {
        let (_dir, path) = scratch();
        fs::write(
            &path,
            "{\"type\":\"entry\",\"startTime\":80,\"activity\":\"a\"}\n{\"type\":\"placeholder\",\"startTime\":20}\n",
        )
        .unwrap();

        let history = History::load_at(&path, 100).unwrap();
        assert_eq!(history.current_activity_start_time(), 80);
    }

    #[test]
    fn append_closes_open_interval() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();

        history
            .append_at("work", Some("  ".to_string()), Some((1.0, 2.0)), 250)
            .unwrap();

        assert_eq!(
            history.entries(),
            &[Entry::new(100, "work", None, Some((1.0, 2.0)))]
        );
        assert_eq!(history.current_activity_start_time(), 250);
        assert_eq!(last_line(&history), "{\"type\":\"placeholder\",\"startTime\":250}");
    }

    #[test]
    fn append_collapses_into_previous_same_activity() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("work", None, None, 200).unwrap();
        history.append_at("work", None, None, 300).unwrap();

        assert_eq!(activities(&history), vec![(100, "work".to_string())]);
        assert_eq!(history.current_activity_start_time(), 300);
        assert_eq!(last_line(&history), "{\"type\":\"placeholder\",\"startTime\":300}");
    }

    #[test]
    fn append_within_same_second_relabels_open_entry() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("work", None, None, 200).unwrap();
        history.append_at("email", None, None, 200).unwrap();
        history.append_at("lunch", None, None, 200).unwrap();

        assert_eq!(
            activities(&history),
            vec![(100, "work".to_string()), (200, "lunch".to_string())]
        );
        assert!(is_normalized(history.entries()));
    }

    #[test]
    fn append_rejects_blank_activity() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        let err = history.append_at("   ", None, None, 200).unwrap_err();

        assert!(matches!(err, HistoryError::InvalidInput(_)));
        assert_eq!(history.current_activity_start_time(), 100);
    }

    #[test]
    fn append_rejects_unusable_coordinates() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        let before = history.clone();

        for lat_long in [
            (f64::NAN, 1.0),
            (1.0, f64::INFINITY),
            (90.5, 0.0),
            (0.0, -180.5),
        ] {
            let err = history
                .append_at("walk", None, Some(lat_long), 200)
                .unwrap_err();
            assert!(matches!(err, HistoryError::InvalidInput(_)));
        }

        assert_eq!(history, before);
        assert_eq!(History::load_at(&path, 300).unwrap().entries(), before.entries());
    }

    #[test]
    fn append_accepts_boundary_coordinates() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history
            .append_at("pole", None, Some((-90.0, 180.0)), 200)
            .unwrap();

        let reloaded = History::load_at(&path, 300).unwrap();
        assert_eq!(reloaded.entries()[0].lat_long, Some((-90.0, 180.0)));
    }

    #[test]
    fn duplicate_start_times_abort_load() {
        let (_dir, path) = scratch();
        let original = concat!(
            "{\"type\":\"entry\",\"startTime\":100,\"activity\":\"a\"}\n",
            "{\"type\":\"entry\",\"startTime\":100,\"activity\":\"b\"}\n",
            "{\"type\":\"placeholder\",\"startTime\":200}\n",
        );
        fs::write(&path, original).unwrap();

        let err = History::load_at(&path, 300).unwrap_err();
        assert!(matches!(
            err,
            HistoryError::Storage(StorageError::MalformedRecord { line: 2, .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    fn block_writes(history: &History) {
        // A directory squatting on the temp file name makes every write fail.
        fs::create_dir(history.path().with_file_name("chronofile.jsonl.tmp")).unwrap();
    }

    fn assert_write_failed(result: Result<(), HistoryError>) {
        assert!(matches!(
            result,
            Err(HistoryError::Storage(StorageError::Io(_)))
        ));
    }

    #[test]
    fn failed_write_leaves_history_untouched() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("sleep", None, None, 200).unwrap();
        history.append_at("work", None, None, 300).unwrap();
        let on_disk = fs::read_to_string(&path).unwrap();
        let before = history.clone();
        block_writes(&history);

        assert_write_failed(history.append_at("eat", None, None, 400));
        assert_eq!(history, before);

        assert_write_failed(history.edit(100, "150", "nap", ""));
        assert_eq!(history, before);

        assert_write_failed(history.remove(&BTreeSet::from([200])).map(|_| ()));
        assert_eq!(history, before);

        assert_eq!(fs::read_to_string(&path).unwrap(), on_disk);
    }

    #[test]
    fn retry_after_failed_write_succeeds() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        block_writes(&history);
        assert_write_failed(history.append_at("work", None, None, 200));

        fs::remove_dir(path.with_file_name("chronofile.jsonl.tmp")).unwrap();
        history.append_at("work", None, None, 200).unwrap();

        assert_eq!(History::load_at(&path, 300).unwrap(), history);
    }

    #[test]
    fn edit_replaces_fields_and_renormalizes() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("sleep", None, None, 200).unwrap();
        history.append_at("work", None, None, 300).unwrap();
        history.append_at("eat", None, None, 400).unwrap();

        history.edit(200, "250", "sleep", "overslept").unwrap();

        assert_eq!(
            activities(&history),
            vec![(100, "sleep".to_string()), (300, "eat".to_string())]
        );
        assert_eq!(History::load_at(&path, 500).unwrap().entries(), history.entries());
    }

    #[test]
    fn edit_keeps_note_when_given() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("work", None, None, 200).unwrap();

        history.edit(100, " 150 ", "deep work", "focus").unwrap();
        assert_eq!(
            history.entries(),
            &[Entry::new(150, "deep work", Some("focus".to_string()), None)]
        );
    }

    #[test]
    fn edit_missing_entry_is_not_found() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("work", None, None, 200).unwrap();
        let before = history.clone();

        let err = history.edit(42, "50", "work", "").unwrap_err();
        assert!(matches!(err, HistoryError::NotFound(ref keys) if keys == &vec![42]));
        assert_eq!(history, before);
    }

    #[test]
    fn edit_rejects_non_integer_time() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("work", None, None, 200).unwrap();
        let before = history.clone();

        let err = history.edit(100, "noon", "work", "").unwrap_err();
        assert!(matches!(err, HistoryError::InvalidInput(_)));
        assert_eq!(history, before);
    }

    #[test]
    fn edit_rejects_key_collisions_and_future_starts() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("sleep", None, None, 200).unwrap();
        history.append_at("work", None, None, 300).unwrap();

        assert!(matches!(
            history.edit(100, "200", "sleep", ""),
            Err(HistoryError::InvalidInput(_))
        ));
        assert!(matches!(
            history.edit(200, "301", "work", ""),
            Err(HistoryError::InvalidInput(_))
        ));
    }

    #[test]
    fn remove_deletes_matching_entries() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("sleep", None, None, 200).unwrap();
        history.append_at("work", None, None, 300).unwrap();
        history.append_at("eat", None, None, 400).unwrap();

        let removed = history.remove(&BTreeSet::from([200, 999])).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(
            activities(&history),
            vec![(100, "sleep".to_string()), (300, "eat".to_string())]
        );
    }

    #[test]
    fn remove_merges_newly_adjacent_runs() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("sleep", None, None, 200).unwrap();
        history.append_at("work", None, None, 300).unwrap();
        history.append_at("sleep", None, None, 400).unwrap();

        history.remove(&BTreeSet::from([200])).unwrap();
        assert_eq!(activities(&history), vec![(100, "sleep".to_string())]);
    }

    #[test]
    fn remove_without_matches_is_not_found() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("work", None, None, 200).unwrap();

        assert!(matches!(
            history.remove(&BTreeSet::from([7, 8])),
            Err(HistoryError::NotFound(_))
        ));
        assert_eq!(history.remove(&BTreeSet::new()).unwrap(), 0);
        assert_eq!(history.entries().len(), 1);
    }

    #[test]
    fn persisted_log_reloads_equivalently() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history
            .append_at("sleep", Some("home".to_string()), Some((51.5, -0.12)), 200)
            .unwrap();
        history.append_at("work", None, None, 300).unwrap();

        let reloaded = History::load_at(&path, 10_000).unwrap();
        assert_eq!(reloaded, history);
    }

    #[test]
    fn intervals_end_at_next_start_or_open_interval() {
        let (_dir, path) = scratch();
        let mut history = History::load_at(&path, 100).unwrap();
        history.append_at("sleep", None, None, 200).unwrap();
        history.append_at("work", None, None, 350).unwrap();

        let durations = history
            .intervals()
            .map(|interval| interval.duration_seconds())
            .collect::<Vec<_>>();
        assert_eq!(durations, vec![100, 150]);
        assert_eq!(history.fuzzy_elapsed_at(350 + 7_300), "2 hours");
    }
}
