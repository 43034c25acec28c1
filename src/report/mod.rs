//! # Report Module
//!
//! Writes the delete log: a JSON array of duplicate pairs, each naming
//! the bigger file to keep and the smaller file that is the deletion
//! candidate. A human verifies the log before anything is removed.
//!
//! The file is written incrementally (`[` on create, one object per
//! appended pair, `]` on close) so a run that is cancelled or crashes
//! still leaves a readable prefix of results on disk.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One confirmed duplicate pair in the delete log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteEntry {
    /// The file with the larger pixel area, kept
    #[serde(rename = "Big")]
    pub big: PathBuf,
    /// The deletion candidate
    #[serde(rename = "Small")]
    pub small: PathBuf,
}

/// Incremental writer for the delete log
pub struct DeleteLog {
    writer: BufWriter<File>,
    entries_written: usize,
}

impl DeleteLog {
    /// Create (or truncate) the log at `path` and open the JSON array
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(b"[")?;
        Ok(Self { writer, entries_written: 0 })
    }

    /// Append one duplicate pair
    pub fn append(&mut self, big: &Path, small: &Path) -> std::io::Result<()> {
        if self.entries_written > 0 {
            self.writer.write_all(b",")?;
        }
        let entry = DeleteEntry { big: big.to_path_buf(), small: small.to_path_buf() };
        serde_json::to_writer(&mut self.writer, &entry)?;
        self.entries_written += 1;
        Ok(())
    }

    /// Number of pairs appended so far
    pub fn len(&self) -> usize {
        self.entries_written
    }

    /// True when no pair has been appended yet
    pub fn is_empty(&self) -> bool {
        self.entries_written == 0
    }

    /// Close the JSON array and flush to disk
    pub fn close(mut self) -> std::io::Result<()> {
        self.writer.write_all(b"]")?;
        self.writer.flush()
    }
}

/// Read a delete log back, e.g. for verification tooling
pub fn read_delete_log(path: &Path) -> std::io::Result<Vec<DeleteEntry>> {
    let file = File::open(path)?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(std::io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_log_is_an_empty_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dupes.json");

        DeleteLog::create(&path).unwrap().close().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
        assert!(read_delete_log(&path).unwrap().is_empty());
    }

    #[test]
    fn entries_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dupes.json");

        let mut log = DeleteLog::create(&path).unwrap();
        log.append(Path::new("/photos/big.jpg"), Path::new("/photos/small.jpg")).unwrap();
        log.append(Path::new("/photos/a.jpg"), Path::new("/photos/b.jpg")).unwrap();
        assert_eq!(log.len(), 2);
        log.close().unwrap();

        let entries = read_delete_log(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].big, PathBuf::from("/photos/big.jpg"));
        assert_eq!(entries[0].small, PathBuf::from("/photos/small.jpg"));
    }

    #[test]
    fn log_uses_big_small_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dupes.json");

        let mut log = DeleteLog::create(&path).unwrap();
        log.append(Path::new("x.jpg"), Path::new("y.jpg")).unwrap();
        log.close().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"Big\""));
        assert!(raw.contains("\"Small\""));
    }
}
