// src/log_file.rs

//! The append-only on-disk log (spec.md §4.1).
//!
//! Grounded on the teacher's `TransactionJournal` (`src/transaction/journal.rs`):
//! same "open-or-create, append lines under a running checksum, re-parse on
//! open" shape. Two things go beyond what the teacher's journal does: the
//! checksum is a single CRC32 running over every record's prefix bytes
//! (rather than the teacher's independent per-line hash), and `read()`
//! cross-checks every REMOVE record against the live filesystem state, which
//! the teacher's journal — trusting its own content unconditionally — never
//! attempts.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use log::{debug, warn};

use crate::error::{Error, Result};
use crate::record::{Record, RecordKind};
use crate::table::mtime_ms;

pub struct LogFile {
    path: PathBuf,
    directory: PathBuf,
    file: File,
    records: HashMap<(RecordKind, String), Record>,
    crc: Hasher,
    terminator: Option<RecordKind>,
}

impl LogFile {
    /// Create a brand-new, empty log file. Fails if one already exists at
    /// `path` — transaction ids are unique per spec.md §3, so collision
    /// means a caller bug, not a condition to paper over.
    pub fn create(path: impl Into<PathBuf>, directory: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .read(true)
            .open(&path)?;
        Ok(Self {
            path,
            directory: directory.into(),
            file,
            records: HashMap::new(),
            crc: Hasher::new(),
            terminator: None,
        })
    }

    /// Open and parse an existing log file, e.g. during recovery.
    pub fn open(path: impl Into<PathBuf>, directory: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let directory = directory.into();
        let file = OpenOptions::new().append(true).read(true).open(&path)?;
        let mut log_file = Self {
            path,
            directory,
            file,
            records: HashMap::new(),
            crc: Hasher::new(),
            terminator: None,
        };
        log_file.read()?;
        Ok(log_file)
    }

    fn read(&mut self) -> Result<()> {
        let lines: Vec<String> = BufReader::new(File::open(&self.path)?)
            .lines()
            .collect::<std::io::Result<_>>()?;
        let num_lines = lines.len();
        let mut last_record_corrupt = false;
        for (i, line) in lines.iter().enumerate() {
            let is_last = i + 1 == num_lines;
            if let Err(reason) = self.parse_and_ingest(line) {
                if is_last {
                    warn!(
                        "log {:?}: last line corrupt ({reason}), treating as crash mid-append",
                        self.path
                    );
                    last_record_corrupt = true;
                } else {
                    return Err(Error::corrupt(&self.path, reason));
                }
            }
        }
        self.verify_removes_against_disk(last_record_corrupt)?;
        Ok(())
    }

    fn parse_and_ingest(&mut self, line: &str) -> std::result::Result<(), String> {
        let (record, declared_crc) = Record::parse_line(line)?;
        let prefix = record.prefix();
        self.crc.update(prefix.as_bytes());
        let actual_crc = self.crc.clone().finalize();
        if actual_crc != declared_crc {
            return Err(format!(
                "checksum mismatch for {:?}: computed {actual_crc}, found {declared_crc}",
                record.key()
            ));
        }
        if record.kind.is_terminator() {
            self.terminator = Some(record.kind);
        }
        self.records.insert(record.key_owned(), record);
        Ok(())
    }

    /// spec.md §4.1 bullets 3-4: every non-terminator REMOVE record's
    /// update-time must still match the filesystem; its num-files too, but
    /// only when the last line didn't parse (the benign truncation case).
    fn verify_removes_against_disk(&self, last_record_corrupt: bool) -> Result<()> {
        for record in self.records.values() {
            if record.kind != RecordKind::Remove {
                continue;
            }
            let (max_mtime, num_files) = self.live_stats(&record.relpath)?;
            if record.update_time_ms != max_mtime {
                return Err(Error::corrupt(
                    &self.path,
                    format!(
                        "REMOVE {}: recorded update_time {} but disk shows {}",
                        record.relpath, record.update_time_ms, max_mtime
                    ),
                ));
            }
            if last_record_corrupt && record.num_files != num_files {
                return Err(Error::corrupt(
                    &self.path,
                    format!(
                        "REMOVE {}: recorded {} files but disk shows {}",
                        record.relpath, record.num_files, num_files
                    ),
                ));
            }
        }
        Ok(())
    }

    fn live_stats(&self, relpath: &str) -> Result<(u64, u64)> {
        let mut max_mtime = 0u64;
        let mut count = 0u64;
        for entry in std::fs::read_dir(&self.directory)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(relpath) {
                max_mtime = max_mtime.max(mtime_ms(&entry.metadata()?)?);
                count += 1;
            }
        }
        Ok((max_mtime, count))
    }

    /// Append one record. Returns `false` without writing anything if an
    /// equal `(kind, relpath)` record is already present (spec.md P3).
    pub fn append(&mut self, record: Record) -> Result<bool> {
        let key = record.key_owned();
        if self.records.contains_key(&key) {
            return Ok(false);
        }
        if let Some(existing) = self.terminator {
            return Err(Error::InvariantViolation(format!(
                "cannot append {:?}: log already terminated with {existing:?}",
                record.kind
            )));
        }
        let prefix = record.prefix();
        self.crc.update(prefix.as_bytes());
        let crc = self.crc.clone().finalize();
        self.file
            .write_all(format!("{prefix}[{crc}]\n").as_bytes())?;
        self.file.sync_all()?;
        if record.kind.is_terminator() {
            self.terminator = Some(record.kind);
        }
        self.records.insert(key, record);
        Ok(true)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.append_terminator(RecordKind::Commit)
    }

    pub fn abort(&mut self) -> Result<()> {
        self.append_terminator(RecordKind::Abort)
    }

    fn append_terminator(&mut self, kind: RecordKind) -> Result<()> {
        self.append(Record::terminator(kind)).map(|_| ())
    }

    pub fn has_commit(&self) -> bool {
        self.terminator == Some(RecordKind::Commit)
    }

    pub fn has_abort(&self) -> bool {
        self.terminator == Some(RecordKind::Abort)
    }

    pub fn has_terminator(&self) -> bool {
        self.terminator.is_some()
    }

    /// Every on-disk file whose name starts with the relpath of some record
    /// of `kind`, used by recovery and temporary-file listing.
    pub fn tracked_files(&self, kind: RecordKind) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for record in self.records.values().filter(|r| r.kind == kind) {
            for entry in std::fs::read_dir(&self.directory)? {
                let entry = entry?;
                if entry.file_name().to_string_lossy().starts_with(&record.relpath) {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        files.dedup();
        Ok(files)
    }

    /// Delete every file tracked under `kind`, in ascending `mtime` order
    /// (spec.md §4.1: a partial failure must not move the survivors' max
    /// mtime, which would otherwise break a REMOVE record's verification on
    /// a later retry).
    pub fn delete_records(&self, kind: RecordKind) -> Result<()> {
        let mut dated = Vec::new();
        for path in self.tracked_files(kind)? {
            let mtime = mtime_ms(&std::fs::metadata(&path)?)?;
            dated.push((mtime, path));
        }
        dated.sort_by_key(|(mtime, _)| *mtime);

        let mut errors = Vec::new();
        for (_, path) in dated {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("deleted {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => errors.push(Error::Io(e)),
            }
        }
        Error::ok_or_suppressed(errors)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn append_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut log = LogFile::create(dir.path().join("1_txn_compaction_abc.log"), dir.path())
            .unwrap();
        touch(dir.path(), "t2");
        assert!(log.append(Record::add("t2")).unwrap());
        assert!(!log.append(Record::add("t2")).unwrap());
    }

    #[test]
    fn append_after_terminator_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut log = LogFile::create(dir.path().join("1_txn_compaction_abc.log"), dir.path())
            .unwrap();
        touch(dir.path(), "t1");
        touch(dir.path(), "t2");
        log.append(Record::add("t1")).unwrap();
        log.commit().unwrap();
        assert!(matches!(
            log.append(Record::add("t2")),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn round_trips_through_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_txn_compaction_abc.log");
        touch(dir.path(), "t2");
        touch(dir.path(), "t1");
        {
            let mut log = LogFile::create(&path, dir.path()).unwrap();
            log.append(Record::add("t2")).unwrap();
            let (mtime, count) = crate::table::table_file_stats(&crate::table::TableId::new(
                dir.path(),
                "t1",
            ))
            .unwrap();
            log.append(Record::remove("t1", mtime, count)).unwrap();
            log.commit().unwrap();
        }
        let reopened = LogFile::open(&path, dir.path()).unwrap();
        assert!(reopened.has_commit());
        assert_eq!(reopened.tracked_files(RecordKind::Add).unwrap().len(), 1);
        assert_eq!(reopened.tracked_files(RecordKind::Remove).unwrap().len(), 1);
    }

    #[test]
    fn tampered_remove_is_corrupt() {
        crate::test_support::enable_logging();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_txn_compaction_abc.log");
        let t1 = dir.path().join("t1");
        touch(dir.path(), "t1");
        {
            let mut log = LogFile::create(&path, dir.path()).unwrap();
            let (mtime, count) = crate::table::table_file_stats(&crate::table::TableId::new(
                dir.path(),
                "t1",
            ))
            .unwrap();
            log.append(Record::remove("t1", mtime, count)).unwrap();
            log.commit().unwrap();
        }
        // Tamper: bump t1's mtime so the recorded update_time no longer matches.
        let tampered = filetime::FileTime::from_unix_time(
            filetime::FileTime::from_last_modification_time(&std::fs::metadata(&t1).unwrap())
                .unix_seconds()
                + 3600,
            0,
        );
        filetime::set_file_mtime(&t1, tampered).unwrap();

        let result = LogFile::open(&path, dir.path());
        assert!(matches!(result, Err(Error::CorruptLog { .. })));
    }

    #[test]
    fn truncated_last_line_is_tolerated() {
        crate::test_support::enable_logging();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_txn_compaction_abc.log");
        touch(dir.path(), "t2");
        {
            let mut log = LogFile::create(&path, dir.path()).unwrap();
            log.append(Record::add("t2")).unwrap();
            log.commit().unwrap();
        }
        // Truncate the COMMIT line to simulate a crash mid-append.
        let contents = std::fs::read_to_string(&path).unwrap();
        let cutoff = contents.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let mut truncated = contents[..cutoff].to_string();
        let last_line = &contents[cutoff..];
        truncated.push_str(&last_line[..last_line.len() / 2]);
        std::fs::write(&path, truncated).unwrap();

        let reopened = LogFile::open(&path, dir.path()).unwrap();
        assert!(!reopened.has_commit());
        assert!(!reopened.has_abort());
        assert_eq!(reopened.tracked_files(RecordKind::Add).unwrap().len(), 1);
    }
}
