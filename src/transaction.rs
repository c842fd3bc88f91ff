// src/transaction.rs

//! The in-memory façade the engine drives during a live compaction or flush
//! (spec.md §4.3): `trackNew` / `untrackNew` / `obsolete` and the
//! commit/abort protocol, plus the reference-counted inner state that gates
//! the Tidier.
//!
//! Grounded on the teacher's `Transaction<'a>` and `TransactionState`
//! (`src/transaction/mod.rs`): same state-machine shape, with the
//! package-manager-specific intermediate phases (Planned/Prepared/Staged/...)
//! collapsed to the three live states this log actually has. The drop path
//! and reference-counted parent-tidy handoff have no teacher counterpart —
//! built from spec.md §9's own design note, mapped onto `Arc<T>`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use log::warn;

use crate::error::{Error, Result};
use crate::record::{Record, RecordKind};
use crate::table::{table_file_stats, Table};
use crate::tidier::{self, Obsoletion, ObsoletedReader};
use crate::transaction_data::TransactionData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Aborted,
}

/// Reference-counted inner state shared between a `Transaction` (the
/// self-handle) and its outstanding `Obsoletion`s (sub-handles). When the
/// strong count reaches zero — every obsoletion released, and the
/// transaction's own self-reference released after commit/abort — `Drop`
/// hands the underlying `TransactionData` to the parent tidy.
pub(crate) struct TransactionInner {
    data: Mutex<Option<TransactionData>>,
}

impl TransactionInner {
    /// Whether the owning transaction committed. Used by the per-obsoletion
    /// tidy to decide whether the REMOVE set is actually due for physical
    /// deletion (spec.md §2, §8 scenario 2: an aborted compaction's
    /// obsoleted table survives). `false` if the data has already been
    /// handed off to the parent tidy — which cannot happen while an
    /// `Obsoletion` still holds a strong reference to this inner state.
    pub(crate) fn has_committed(&self) -> bool {
        self.data
            .lock()
            .unwrap()
            .as_ref()
            .map(|data| data.log_file().has_commit())
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn for_test(data: TransactionData) -> Self {
        Self {
            data: Mutex::new(Some(data)),
        }
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if let Some(data) = self.data.lock().unwrap().take() {
            tidier::spawn_parent_tidy(data);
        }
    }
}

/// The engine's handle to one live compaction or flush transaction.
pub struct Transaction {
    self_handle: Mutex<Option<Arc<TransactionInner>>>,
    added: Mutex<HashSet<String>>,
    state: Mutex<TransactionState>,
}

impl Transaction {
    /// Begin a new transaction against `directory`, naming its log file
    /// with the given operation type (e.g. `"compaction"`, `"flush"`).
    pub fn begin(directory: impl Into<PathBuf>, op_type: &str) -> Result<Self> {
        let data = TransactionData::begin(directory, op_type)?;
        Ok(Self {
            self_handle: Mutex::new(Some(Arc::new(TransactionInner {
                data: Mutex::new(Some(data)),
            }))),
            added: Mutex::new(HashSet::new()),
            state: Mutex::new(TransactionState::Open),
        })
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock().unwrap()
    }

    fn require_open(&self, op: &str) -> Result<()> {
        if *self.state.lock().unwrap() != TransactionState::Open {
            return Err(Error::InvariantViolation(format!(
                "{op} called on a transaction that is not open"
            )));
        }
        Ok(())
    }

    fn handle(&self) -> Arc<TransactionInner> {
        self.self_handle
            .lock()
            .unwrap()
            .clone()
            .expect("open transaction always holds its self-handle")
    }

    /// `trackNew` (spec.md §4.3): record an ADD. Fails if `table` is
    /// already tracked.
    pub fn track_new(&self, table: &dyn Table) -> Result<()> {
        self.require_open("trackNew")?;
        let relpath = table.base_name().to_string();
        let handle = self.handle();
        let appended = {
            let mut guard = handle.data.lock().unwrap();
            let data = guard.as_mut().expect("data present while self-handle held");
            data.append(Record::add(relpath.as_str()))?
        };
        if !appended {
            return Err(Error::InvariantViolation(format!(
                "{relpath} is already tracked as ADD"
            )));
        }
        self.added.lock().unwrap().insert(relpath);
        Ok(())
    }

    /// `untrackNew` (spec.md §4.3): undo a `trackNew` before commit. The
    /// on-disk ADD line, if any, is left in place — harmless at recovery,
    /// since ADD-referenced files that no longer exist are simply a no-op
    /// to delete.
    pub fn untrack_new(&self, table: &dyn Table) -> Result<()> {
        self.require_open("untrackNew")?;
        let relpath = table.base_name();
        if !self.added.lock().unwrap().remove(relpath) {
            return Err(Error::InvariantViolation(format!(
                "{relpath} is not tracked as ADD"
            )));
        }
        Ok(())
    }

    /// `obsolete` (spec.md §4.3): record a REMOVE for `reader`'s table,
    /// unless it was tracked as ADD within this same transaction, in which
    /// case no REMOVE is written and the returned `Obsoletion` carries
    /// `was_new = true`.
    pub fn obsolete(&self, reader: ObsoletedReader) -> Result<Obsoletion> {
        self.require_open("obsolete")?;
        let relpath = reader.table.base_name().to_string();
        let was_new = self.added.lock().unwrap().contains(&relpath);
        if !was_new {
            let (update_time_ms, num_files) = table_file_stats(reader.table.as_ref())?;
            let handle = self.handle();
            {
                let mut guard = handle.data.lock().unwrap();
                let data = guard.as_mut().expect("data present while self-handle held");
                data.append(Record::remove(relpath, update_time_ms, num_files))?;
            }
            reader.tracker.notify_deleting();
        }
        Ok(Obsoletion::new(self.handle(), reader, was_new))
    }

    pub fn commit(&self) -> Result<()> {
        self.terminate(RecordKind::Commit)
    }

    pub fn abort(&self) -> Result<()> {
        self.terminate(RecordKind::Abort)
    }

    fn terminate(&self, kind: RecordKind) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != TransactionState::Open {
                return Err(Error::InvariantViolation(format!(
                    "transaction already {:?}",
                    *state
                )));
            }
            let handle = self.handle();
            {
                let mut guard = handle.data.lock().unwrap();
                let data = guard.as_mut().expect("data present while self-handle held");
                match kind {
                    RecordKind::Commit => data.commit()?,
                    RecordKind::Abort => data.abort()?,
                    _ => unreachable!("terminate called with a non-terminator kind"),
                }
            }
            *state = if kind == RecordKind::Commit {
                TransactionState::Committed
            } else {
                TransactionState::Aborted
            };
        }
        // Release the self-reference guarding the Tidier; if every
        // Obsoletion has already released its sub-reference, this is what
        // fires it (spec.md §4.3).
        self.self_handle.lock().unwrap().take();
        Ok(())
    }
}

impl Drop for Transaction {
    /// A transaction dropped without `commit`/`abort` is the in-process
    /// analogue of spec.md §4.3's LEFTOVER state. Since the process is
    /// still alive here (unlike a crash), a best-effort ABORT is written
    /// immediately rather than deferring to startup recovery.
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        if *state != TransactionState::Open {
            return;
        }
        warn!("transaction dropped without commit or abort; aborting");
        if let Some(handle) = self.self_handle.lock().unwrap().clone() {
            let mut guard = handle.data.lock().unwrap();
            if let Some(data) = guard.as_mut() {
                if let Err(e) = data.abort() {
                    warn!("best-effort abort on drop failed: {e}");
                }
            }
        }
        *state = TransactionState::Aborted;
        drop(state);
        self.self_handle.lock().unwrap().take();
    }
}
