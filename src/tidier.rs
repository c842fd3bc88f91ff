// src/tidier.rs

//! Reference-counted cleanup attached to a `Transaction`, and the
//! process-wide retry queue for deletions an `IOException` interrupted
//! (spec.md §4.4).
//!
//! Grounded on spec.md §9's own design note translating the source's
//! cyclic-reference cleanup into "a reference-counted inner state with a
//! tidier closure run from the drop path" — mapped onto `Arc<TransactionInner>`
//! directly, since that is exactly the idiom the note describes. The teacher
//! has no retry-queue precedent in its transaction module; the lock-free
//! queue is adopted from the pack's `spacetimedb-snapshot` crate, which
//! already depends on `crossbeam-queue` for a similar concurrent work list.
//! The "dedicated non-periodic executor" (spec.md §5) is a single
//! background thread draining an `mpsc` job channel, matching the teacher's
//! synchronous (non-async) transaction module rather than pulling a runtime
//! into this path.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;

use crossbeam_queue::SegQueue;
use log::warn;

use crate::table::{component_files, Table};
use crate::transaction::TransactionInner;
use crate::transaction_data::TransactionData;

/// Engine callback hooks invoked by the per-obsoletion tidier (spec.md §6
/// "Engine callbacks consumed"). One instance corresponds to one in-memory
/// reader of one obsoleted table.
pub trait ReaderTracker: Send + Sync {
    /// Invoked once, synchronously, when the REMOVE record for this
    /// reader's table is appended to the log.
    fn notify_deleting(&self);

    /// Invoked by the per-obsoletion tidier when `!was_new`, with the
    /// reader's on-disk size, to decrement a directory-level disk-usage
    /// metric.
    fn on_disk_metric_dec(&self, size: u64);

    /// Best-effort: clear any per-table read-statistics metadata before
    /// physical deletion.
    fn clear_read_stats(&self);
}

/// One in-memory reader of an obsoleted table, bundled with the engine
/// hooks the tidier drives.
pub struct ObsoletedReader {
    pub table: Arc<dyn Table>,
    pub tracker: Arc<dyn ReaderTracker>,
    pub on_disk_size: u64,
}

/// Sub-handle returned by `Transaction::obsolete`. Holds a strong reference
/// to the transaction's inner state, keeping the parent alive — and the
/// parent tidier from firing — until this obsoletion is released.
pub struct Obsoletion {
    parent: Arc<TransactionInner>,
    reader: ObsoletedReader,
    was_new: bool,
}

impl Obsoletion {
    pub(crate) fn new(parent: Arc<TransactionInner>, reader: ObsoletedReader, was_new: bool) -> Self {
        Self {
            parent,
            reader,
            was_new,
        }
    }

    /// Whether the obsoleted table was created and discarded within the
    /// same transaction (spec.md §4.3 `obsolete`): no REMOVE record was
    /// written for it, and its disk-usage metric was never incremented.
    pub fn was_new(&self) -> bool {
        self.was_new
    }

    /// Call once every in-memory reference to this reader has been released
    /// by the engine. Schedules the per-obsoletion tidy on the deletion
    /// executor; consumes `self`, dropping the sub-reference to the parent
    /// transaction once the tidy completes (or is deferred to the retry
    /// queue on failure).
    pub fn release(self) {
        spawn(move || run_obsoletion(self));
    }
}

enum PendingDeletion {
    Obsoletion(Obsoletion),
    Parent { path: PathBuf, directory: PathBuf },
}

static FAILED_DELETIONS: SegQueue<PendingDeletion> = SegQueue::new();

fn delete_file(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Per-obsoletion tidy (spec.md §4.4 steps 1-5). Physical deletion only
/// happens if the parent transaction committed — an aborted compaction's
/// obsoleted table is never touched (spec.md §2, §8 scenario 2), only its
/// sub-reference to the parent is released so the parent tidy can still
/// fire. The data component is deleted before its siblings (P7) so a crash
/// mid-deletion still lets startup recovery identify the table as GC-able.
/// Any I/O failure defers the whole obsoletion — data component included,
/// since `delete_file` is idempotent on retry — to the retry queue, without
/// releasing the parent reference.
fn run_obsoletion(obsoletion: Obsoletion) {
    obsoletion.reader.tracker.clear_read_stats();

    if !obsoletion.parent.has_committed() {
        // `obsoletion` drops here, releasing its sub-reference to the
        // parent. The transaction aborted (or is a freshly-added-then-
        // obsoleted table with no REMOVE record yet): the parent tidy's own
        // ADD-set cleanup is what removes it, not this path.
        return;
    }

    let data_component = obsoletion.reader.table.data_component();
    if let Err(e) = delete_file(&data_component) {
        warn!(
            "failed to delete data component {data_component:?}: {e}; scheduling retry"
        );
        FAILED_DELETIONS.push(PendingDeletion::Obsoletion(obsoletion));
        return;
    }

    let siblings = match component_files(obsoletion.reader.table.as_ref()) {
        Ok(files) => files
            .into_iter()
            .filter(|p| p != &data_component)
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!("failed to list components of {data_component:?}: {e}; scheduling retry");
            FAILED_DELETIONS.push(PendingDeletion::Obsoletion(obsoletion));
            return;
        }
    };
    for sibling in &siblings {
        if let Err(e) = delete_file(sibling) {
            warn!("failed to delete component {sibling:?}: {e}; scheduling retry");
            FAILED_DELETIONS.push(PendingDeletion::Obsoletion(obsoletion));
            return;
        }
    }

    if !obsoletion.was_new {
        obsoletion
            .reader
            .tracker
            .on_disk_metric_dec(obsoletion.reader.on_disk_size);
    }
    // `obsoletion` drops here, releasing its sub-reference to the parent.
}

/// Parent tidy (spec.md §4.4), fired from `TransactionInner::drop` once
/// every obsoletion has released its sub-reference.
pub(crate) fn spawn_parent_tidy(data: TransactionData) {
    spawn(move || run_parent_tidy(data));
}

fn run_parent_tidy(data: TransactionData) {
    debug_assert!(
        data.log_file().has_commit() || data.log_file().has_abort(),
        "parent tidy fired on a transaction with no terminator"
    );
    let path = data.log_file().path().to_path_buf();
    let directory = data.directory().to_path_buf();
    if let Err(e) = data.remove_leftovers() {
        warn!("removeLeftovers for {path:?} failed ({e}); scheduling retry");
        FAILED_DELETIONS.push(PendingDeletion::Parent { path, directory });
    }
}

/// `rescheduleFailedDeletions` (spec.md §6): re-attempt every deferred
/// deletion. Safe to call at any time, e.g. after a GC hint on platforms
/// where unmapped files are held open.
pub fn reschedule_failed_deletions() {
    let mut drained = Vec::new();
    while let Some(pending) = FAILED_DELETIONS.pop() {
        drained.push(pending);
    }
    for pending in drained {
        match pending {
            PendingDeletion::Obsoletion(obsoletion) => spawn(move || run_obsoletion(obsoletion)),
            PendingDeletion::Parent { path, directory } => spawn(move || {
                match TransactionData::recover(&path, &directory) {
                    Ok(data) => run_parent_tidy(data),
                    Err(e) => {
                        warn!("failed to reopen leftover log {path:?} for retry: {e}");
                        FAILED_DELETIONS.push(PendingDeletion::Parent { path, directory });
                    }
                }
            }),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Executor {
    sender: mpsc::Sender<Job>,
}

fn executor() -> &'static Executor {
    static EXECUTOR: OnceLock<Executor> = OnceLock::new();
    EXECUTOR.get_or_init(|| {
        let (sender, receiver) = mpsc::channel::<Job>();
        thread::Builder::new()
            .name("tablelog-tidier".into())
            .spawn(move || {
                for job in receiver {
                    job();
                }
            })
            .expect("failed to spawn tidier executor thread");
        Executor { sender }
    })
}

/// Jobs in flight or queued, including ones a running job schedules on
/// itself (an obsoletion's tidy releasing the last reference to its parent
/// schedules the parent tidy from inside its own job). Tracked so
/// `wait_for_deletions` can wait for true quiescence instead of just the
/// jobs enqueued at the time it was called.
static PENDING: AtomicUsize = AtomicUsize::new(0);
static IDLE_LOCK: Mutex<()> = Mutex::new(());
static IDLE_CVAR: Condvar = Condvar::new();

fn spawn(job: impl FnOnce() + Send + 'static) {
    PENDING.fetch_add(1, Ordering::SeqCst);
    let wrapped: Job = Box::new(move || {
        job();
        if PENDING.fetch_sub(1, Ordering::SeqCst) == 1 {
            IDLE_CVAR.notify_all();
        }
    });
    if executor().sender.send(wrapped).is_err() {
        PENDING.fetch_sub(1, Ordering::SeqCst);
        warn!("tidier executor thread is gone; deletion dropped");
    }
}

/// `waitForDeletions` (spec.md §5): block until the deletion executor is
/// idle, including any cascaded work a running job schedules on itself
/// (a released obsoletion handing its parent to the parent tidy).
pub fn wait_for_deletions() {
    let guard = IDLE_LOCK.lock().unwrap();
    let _guard = IDLE_CVAR
        .wait_while(guard, |_| PENDING.load(Ordering::SeqCst) > 0)
        .unwrap();
}
