use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use log::debug;

use crate::domain::{Entry, Placeholder, Record};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Everything read back from a log file, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogContents {
    pub entries: Vec<Entry>,
    pub placeholder: Option<Placeholder>,
}

/// Reads a log file, or `None` when it does not exist.
///
/// Blank lines are skipped. The first line that is not a well-formed record,
/// or that reuses another entry's start time, aborts the read.
pub fn read_log(path: &Path) -> Result<Option<LogContents>, StorageError> {
    let raw = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::Io(err)),
    };

    let mut contents = LogContents::default();
    let mut seen_start_times = HashSet::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: Record =
            serde_json::from_str(line).map_err(|err| StorageError::MalformedRecord {
                line: index + 1,
                reason: err.to_string(),
            })?;
        match record {
            Record::Entry(entry) => {
                if entry.activity.trim().is_empty() {
                    return Err(StorageError::MalformedRecord {
                        line: index + 1,
                        reason: "entry has a blank activity".to_string(),
                    });
                }
                if !seen_start_times.insert(entry.start_time) {
                    return Err(StorageError::MalformedRecord {
                        line: index + 1,
                        reason: format!("duplicate startTime {}", entry.start_time),
                    });
                }
                contents.entries.push(entry);
            }
            Record::Placeholder(placeholder) => contents.placeholder = Some(placeholder),
        }
    }

    Ok(Some(contents))
}

/// Replaces the log file with one line per entry followed by the placeholder.
///
/// The file is written beside the target and renamed over it, so readers never
/// observe a half-written log.
pub fn write_log(
    path: &Path,
    entries: &[Entry],
    placeholder: Placeholder,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut buffer = String::new();
    for entry in entries {
        buffer.push_str(&serde_json::to_string(&Record::Entry(entry.clone()))?);
        buffer.push('\n');
    }
    buffer.push_str(&serde_json::to_string(&Record::Placeholder(placeholder))?);
    buffer.push('\n');

    let temp_path = temp_path_for(path);
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(buffer.as_bytes())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp_path, path)?;

    debug!(
        "wrote {} entries and placeholder {} to {}",
        entries.len(),
        placeholder.start_time,
        path.display()
    );
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("chronofile"));
    name.push(".tmp");
    path.with_file_name(name)
}
