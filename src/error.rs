// src/error.rs

//! Crate-wide error type.
//!
//! Mirrors the shape of the teacher's `crate::Error` (a `thiserror` enum
//! with an `#[from]` conversion for `std::io::Error`), narrowed to the four
//! error kinds spec.md §7 names: a corrupt on-disk log, a failed I/O
//! operation, a programmer-error invariant violation, and a merged chain of
//! errors from a bulk operation (recovery, leftover removal) so that no
//! single failure silently swallows the others.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A non-terminal record was unparseable, its checksum didn't match, or
    /// a REMOVE record's filesystem-state invariant failed.
    #[error("corrupt log {path:?}: {reason}")]
    CorruptLog { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Programmer error: commit-after-commit, obsolete-a-never-added,
    /// untrack-after-commit, etc. Fails loudly rather than being retried.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Multiple errors from a bulk operation, merged so none is lost.
    #[error(
        "{} errors occurred: {}",
        .0.len(),
        .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
    )]
    Suppressed(Vec<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::CorruptLog {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Merge errors accumulated from a bulk operation (spec.md §7). Empty
    /// input succeeds; a single error passes through unwrapped so the
    /// common case isn't forced through a one-element `Suppressed`.
    pub fn ok_or_suppressed(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Suppressed(errors)),
        }
    }
}
