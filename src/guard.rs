// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// RAII guard: locks a process-shared mutex on construction, unlocks on drop.

use crate::error::{LockStatus, Result};
use crate::mutex::ProcessSharedMutex;

/// Holds a [`ProcessSharedMutex`] for a scope; the lock is released when the
/// guard drops.
///
/// Check [`owner_died`](Self::owner_died) after construction: when the
/// previous holder died with the lock held, protected state may need repair
/// and [`mark_consistent`](Self::mark_consistent) must be called before the
/// guard drops.
pub struct LockGuard<'m, 'r> {
    mutex: &'m ProcessSharedMutex<'r>,
    status: LockStatus,
}

impl<'r> ProcessSharedMutex<'r> {
    /// Lock and wrap the acquisition in a guard that unlocks on drop.
    pub fn lock_guard(&self) -> Result<LockGuard<'_, 'r>> {
        let status = self.lock()?;
        Ok(LockGuard {
            mutex: self,
            status,
        })
    }
}

impl LockGuard<'_, '_> {
    /// How the lock was acquired.
    pub fn status(&self) -> LockStatus {
        self.status
    }

    /// Whether the previous holder died while holding the lock.
    pub fn owner_died(&self) -> bool {
        self.status == LockStatus::OwnerDied
    }

    /// Acknowledge an inconsistent acquisition after repairing protected
    /// state. See [`ProcessSharedMutex::mark_consistent`].
    pub fn mark_consistent(&self) -> Result<()> {
        self.mutex.mark_consistent()
    }
}

impl Drop for LockGuard<'_, '_> {
    fn drop(&mut self) {
        let _ = self.mutex.unlock();
    }
}
