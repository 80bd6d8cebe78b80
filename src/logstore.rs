//! Append-only snapshot log on flash.
//!
//! One JSON object per line. Appends open and close the file per call, so a
//! crash mid-write can only lose the in-flight entry. Reads are lazy and
//! skip anything malformed; only the sync drain ever deletes the file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

/// Shortest line that can hold a valid entry; anything below this is a
/// truncated tail.
const MIN_LINE_LEN: usize = 5;

/// One buffered snapshot: device count plus the serialized result array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub count: usize,
    pub data: String,
}

/// Durable queue of [`LogEntry`] lines backed by a single file.
pub struct LogStore {
    path: PathBuf,
}

impl LogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry as a single line and close the file before
    /// returning.
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening log file {}", self.path.display()))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// Lazily parse every stored entry in file order. A missing file reads
    /// as empty; short or malformed lines are skipped, never fatal.
    pub fn read_all(&self) -> Result<impl Iterator<Item = LogEntry>> {
        let file = match File::open(&self.path) {
            Ok(file) => Some(file),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("opening log file {}", self.path.display()))
            }
        };

        let lines = file
            .into_iter()
            .flat_map(|file| BufReader::new(file).lines());

        Ok(lines.filter_map(|line| {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("Unreadable log line: {}", err);
                    return None;
                }
            };
            if line.len() < MIN_LINE_LEN {
                return None;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Skipping malformed log line: {}", err);
                    None
                }
            }
        }))
    }

    /// Delete the backing file. Called by the sync drain once it has
    /// finished iterating; a missing file is a no-op.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing log file {}", self.path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> LogStore {
        LogStore::new(dir.path().join("log.txt"))
    }

    fn entry(count: usize) -> LogEntry {
        LogEntry {
            count,
            data: format!("[{{\"n\":{}}}]", count),
        }
    }

    #[test]
    fn test_append_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        for i in 0..4 {
            store.append(&entry(i)).unwrap();
        }

        let read: Vec<LogEntry> = store.read_all().unwrap().collect();
        assert_eq!(read.len(), 4);
        for (i, got) in read.iter().enumerate() {
            assert_eq!(*got, entry(i));
        }
    }

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.read_all().unwrap().count(), 0);
    }

    #[test]
    fn test_truncated_tail_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&entry(1)).unwrap();
        store.append(&entry(2)).unwrap();

        // Simulate a crash mid-append: a short garbage tail.
        let mut raw = fs::read_to_string(store.path()).unwrap();
        raw.push_str("{\"c");
        fs::write(store.path(), raw).unwrap();

        let read: Vec<LogEntry> = store.read_all().unwrap().collect();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0], entry(1));
        assert_eq!(read[1], entry(2));
    }

    #[test]
    fn test_malformed_middle_line_does_not_kill_the_rest() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&entry(1)).unwrap();

        let mut raw = fs::read_to_string(store.path()).unwrap();
        raw.push_str("this is not json at all\n");
        fs::write(store.path(), raw).unwrap();
        store.append(&entry(3)).unwrap();

        let read: Vec<LogEntry> = store.read_all().unwrap().collect();
        assert_eq!(read.len(), 2);
        assert_eq!(read[1], entry(3));
    }

    #[test]
    fn test_clear_deletes_file_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.append(&entry(1)).unwrap();
        assert!(store.path().exists());

        store.clear().unwrap();
        assert!(!store.path().exists());

        // Clearing an absent file is fine.
        store.clear().unwrap();
    }
}
