// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error taxonomy for shared-memory regions and the process-shared mutex.

use std::io;

use thiserror::Error;

/// Errors surfaced by region and mutex operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An OS-level shared resource could not be acquired: shm object
    /// creation/open, sizing, or mapping failed.
    #[error("shared memory {op} failed: {source}")]
    Resource {
        /// The syscall-level operation that failed (e.g. "shm_open", "mmap").
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The control block is missing, misplaced, destroyed, or otherwise not
    /// in a state that permits the requested operation.
    #[error("invalid mutex state: {0}")]
    State(String),

    /// `unlock` was called by a process/thread that does not hold the lock.
    /// The mutex state is left unchanged.
    #[error("unlock attempted by a non-holder")]
    NotOwner,
}

impl Error {
    pub(crate) fn resource(op: &'static str, source: io::Error) -> Self {
        Error::Resource { op, source }
    }

    pub(crate) fn last_os(op: &'static str) -> Self {
        Error::Resource {
            op,
            source: io::Error::last_os_error(),
        }
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Error::State(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a successful lock acquisition.
///
/// `OwnerDied` means the previous holder terminated while holding the lock
/// and the caller now holds it. State protected by the mutex may be torn;
/// the caller must repair it and then call
/// [`mark_consistent`](crate::ProcessSharedMutex::mark_consistent) before
/// unlocking, or the mutex becomes permanently unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    /// Normal acquisition.
    Acquired,
    /// Acquired, but the previous holder died while holding the lock.
    OwnerDied,
}
