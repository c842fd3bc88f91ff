// src/lib.rs

//! tablelog — a crash-safe file-transaction log for atomic table
//! replacement in a log-structured storage engine.
//!
//! A compaction or flush produces a set of new tables and marks a set of
//! old tables obsolete; if the process crashes at any point, startup
//! recovery leaves the directory in a state equivalent to either the
//! completed transaction or its cancellation, never a half-applied mix.
//!
//! # Architecture
//!
//! - [`Record`]/[`RecordKind`] — one line of the append-only log.
//! - [`LogFile`] — the on-disk log itself: parsing, checksums, filesystem
//!   cross-checks, and append.
//! - [`TransactionData`] — the directory-fsync handle and naming convention
//!   around one `LogFile`.
//! - [`Transaction`] — the façade the engine drives during a live
//!   compaction: track-new / untrack-new / obsolete / commit / abort.
//! - [`tidier`] — reference-counted physical cleanup, fired once a
//!   transaction has terminated and every obsoleted reader has been
//!   released, plus the process-wide retry queue for failed deletions.
//! - [`recovery`] — startup replay of residual logs and the live
//!   temporary-file listing.

mod error;
mod log_file;
mod record;
mod recovery;
pub mod table;
#[cfg(test)]
mod test_support;
pub mod tidier;
mod transaction;
mod transaction_data;

pub use error::{Error, Result};
pub use log_file::LogFile;
pub use record::{Record, RecordKind};
pub use recovery::{get_log_files, get_temporary_files, remove_leftovers};
pub use table::{component_files, table_file_stats, Table, TableId};
pub use tidier::{reschedule_failed_deletions, wait_for_deletions, ObsoletedReader, Obsoletion, ReaderTracker};
pub use transaction::{Transaction, TransactionState};
pub use transaction_data::{log_file_name, parse_log_file_name, TransactionData, FORMAT_VERSION};
