// src/record.rs

//! A single log line: one of {ADD, REMOVE, COMMIT, ABORT} plus its textual
//! serialisation (spec.md §3).
//!
//! Grounded on the teacher's `JournalRecord` (`src/transaction/journal.rs`)
//! and its `{crc}|{json}` line format, generalized from a JSON-tagged enum
//! to the spec's flat positional grammar:
//!
//! `<kind>:[<relpath>,<update_time>,<num_files>][<checksum>]`

use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Add,
    Remove,
    Commit,
    Abort,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            RecordKind::Add => "add",
            RecordKind::Remove => "remove",
            RecordKind::Commit => "commit",
            RecordKind::Abort => "abort",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Some(RecordKind::Add),
            "remove" => Some(RecordKind::Remove),
            "commit" => Some(RecordKind::Commit),
            "abort" => Some(RecordKind::Abort),
            _ => None,
        }
    }

    /// COMMIT and ABORT are the two terminator kinds (spec.md §3).
    pub fn is_terminator(self) -> bool {
        matches!(self, RecordKind::Commit | RecordKind::Abort)
    }
}

/// A single log record. Equality for de-duplication purposes is
/// `(kind, relpath)` only — `update_time_ms`, `num_files` and the checksum
/// play no part in it (spec.md §3).
#[derive(Debug, Clone)]
pub struct Record {
    pub kind: RecordKind,
    pub relpath: String,
    pub update_time_ms: u64,
    pub num_files: u64,
}

impl Record {
    pub fn add(relpath: impl Into<String>) -> Self {
        Self {
            kind: RecordKind::Add,
            relpath: relpath.into(),
            update_time_ms: 0,
            num_files: 0,
        }
    }

    pub fn remove(relpath: impl Into<String>, update_time_ms: u64, num_files: u64) -> Self {
        Self {
            kind: RecordKind::Remove,
            relpath: relpath.into(),
            update_time_ms,
            num_files,
        }
    }

    pub fn terminator(kind: RecordKind) -> Self {
        debug_assert!(kind.is_terminator());
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            kind,
            relpath: String::new(),
            update_time_ms: now_ms,
            num_files: 0,
        }
    }

    pub fn key(&self) -> (RecordKind, &str) {
        (self.kind, &self.relpath)
    }

    /// Owned form of [`Record::key`], for use as a `HashMap` key.
    pub fn key_owned(&self) -> (RecordKind, String) {
        (self.kind, self.relpath.clone())
    }

    /// The textual prefix fed into the running CRC and written before the
    /// checksum bracket: `<kind>:[<relpath>,<update_time>,<num_files>]`.
    pub fn prefix(&self) -> String {
        format!(
            "{}:[{},{},{}]",
            self.kind.as_str(),
            self.relpath,
            self.update_time_ms,
            self.num_files
        )
    }

    /// Parse one on-disk line (without its trailing newline stripped by the
    /// caller already being required) into a record plus its declared
    /// checksum. Returns a plain message on malformed input — the caller
    /// (`LogFile`) has the path context to turn it into an `Error`.
    pub fn parse_line(line: &str) -> std::result::Result<(Self, u32), String> {
        let trimmed = line.strip_suffix('\n').unwrap_or(line);
        if !trimmed.ends_with(']') {
            return Err(format!("line missing trailing checksum bracket: {trimmed:?}"));
        }
        let open = trimmed
            .rfind('[')
            .ok_or_else(|| format!("line missing checksum bracket: {trimmed:?}"))?;
        let prefix = &trimmed[..open];
        let crc_str = &trimmed[open + 1..trimmed.len() - 1];
        let crc: u32 = crc_str
            .parse()
            .map_err(|_| format!("invalid checksum {crc_str:?}"))?;
        let record = Self::parse_prefix(prefix)?;
        Ok((record, crc))
    }

    fn parse_prefix(prefix: &str) -> std::result::Result<Self, String> {
        let (kind_str, rest) = prefix
            .split_once(':')
            .ok_or_else(|| format!("missing ':' in {prefix:?}"))?;
        let kind = RecordKind::parse(kind_str)
            .ok_or_else(|| format!("unknown record kind {kind_str:?}"))?;
        let rest = rest
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| format!("malformed field list in {prefix:?}"))?;
        let mut parts = rest.splitn(3, ',');
        let relpath = parts.next().unwrap_or("").to_string();
        let update_time_ms = parse_num(parts.next().unwrap_or(""))?;
        let num_files = parse_num(parts.next().unwrap_or(""))?;
        Ok(Self {
            kind,
            relpath,
            update_time_ms,
            num_files,
        })
    }
}

fn parse_num(s: &str) -> std::result::Result<u64, String> {
    if s.is_empty() {
        return Ok(0);
    }
    s.parse().map_err(|_| format!("invalid numeric field {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_add() {
        let record = Record::add("mc-1-big");
        assert_eq!(record.prefix(), "add:[mc-1-big,0,0]");
        let (parsed, _) = Record::parse_line(&format!("{}[123]", record.prefix())).unwrap();
        assert_eq!(parsed.key(), record.key());
        assert_eq!(parsed.update_time_ms, 0);
    }

    #[test]
    fn round_trips_remove_with_fields() {
        let record = Record::remove("mc-0-big", 1_700_000_000_123, 4);
        let (parsed, _) = Record::parse_line(&format!("{}[42]\n", record.prefix())).unwrap();
        assert_eq!(parsed.relpath, "mc-0-big");
        assert_eq!(parsed.update_time_ms, 1_700_000_000_123);
        assert_eq!(parsed.num_files, 4);
    }

    #[test]
    fn rejects_missing_checksum_bracket() {
        assert!(Record::parse_line("add:[mc-1-big,0,0]").is_err());
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(Record::parse_line("frobnicate:[x,0,0][1]").is_err());
    }

    #[test]
    fn equality_ignores_time_and_count() {
        let a = Record::remove("t", 1, 1);
        let b = Record::remove("t", 2, 99);
        assert_eq!(a.key(), b.key());
    }
}
