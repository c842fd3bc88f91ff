// src/table.rs

//! The table descriptor: an opaque handle supplied by the storage engine.
//!
//! The log needs only two properties of a table — its base filename and the
//! directory that holds its component files (spec.md §3) — so the contract
//! is a trait, the same shape the teacher uses for its engine-facing hooks
//! (`ProgressTracker` in `src/progress.rs`: the engine supplies its own
//! concrete type, and the log depends only on the trait).

use std::path::{Path, PathBuf};

/// Opaque handle to a table: a set of on-disk component files (data, index,
/// bloom filter, statistics, summary, ...) sharing a common base filename.
pub trait Table: Send + Sync {
    /// Base filename, common to every component file belonging to this
    /// table. Used verbatim as a log record's relative path.
    fn base_name(&self) -> &str;

    /// Directory holding the table's component files. Always the same
    /// directory as the log file governing it (spec.md §3).
    fn directory(&self) -> &Path;

    /// Path to this table's principal "data" component — the one deletion
    /// removes first, so that a crash mid-deletion still lets recovery
    /// identify the table as GC-able (spec.md §4.4 step 2). Default
    /// assumes a bare `base_name` file with no suffix; engines whose
    /// component naming differs should override this.
    fn data_component(&self) -> PathBuf {
        self.directory().join(self.base_name())
    }
}

/// A simple concrete `Table`, for tests and callers with no richer handle
/// of their own.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableId {
    directory: PathBuf,
    base_name: String,
}

impl TableId {
    pub fn new(directory: impl Into<PathBuf>, base_name: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            base_name: base_name.into(),
        }
    }
}

impl Table for TableId {
    fn base_name(&self) -> &str {
        &self.base_name
    }

    fn directory(&self) -> &Path {
        &self.directory
    }
}

/// Every on-disk component file belonging to `table`: every entry in its
/// directory whose name starts with its base filename.
pub fn component_files(table: &dyn Table) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(table.directory())? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(table.base_name()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// `(max mtime in ms since epoch, file count)` of a table's current
/// component files — the values a REMOVE record captures at creation time
/// (spec.md §3) and that `LogFile::read` re-derives to verify against disk.
pub fn table_file_stats(table: &dyn Table) -> std::io::Result<(u64, u64)> {
    let files = component_files(table)?;
    let mut max_mtime = 0u64;
    for path in &files {
        let mtime = mtime_ms(&std::fs::metadata(path)?)?;
        max_mtime = max_mtime.max(mtime);
    }
    Ok((max_mtime, files.len() as u64))
}

pub(crate) fn mtime_ms(meta: &std::fs::Metadata) -> std::io::Result<u64> {
    Ok(meta
        .modified()?
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn component_files_filters_by_prefix() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mc-1-big-Data.db"), b"").unwrap();
        std::fs::write(dir.path().join("mc-1-big-Index.db"), b"").unwrap();
        std::fs::write(dir.path().join("mc-2-big-Data.db"), b"").unwrap();

        let table = TableId::new(dir.path(), "mc-1-big");
        let files = component_files(&table).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn table_file_stats_counts_and_maxes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("mc-1-big-Data.db"), b"a").unwrap();
        std::fs::write(dir.path().join("mc-1-big-Index.db"), b"bb").unwrap();

        let table = TableId::new(dir.path(), "mc-1-big");
        let (_mtime, count) = table_file_stats(&table).unwrap();
        assert_eq!(count, 2);
    }
}
