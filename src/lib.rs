// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Cross-process mutual exclusion over POSIX shared memory.
//
// A SharedRegion is a named mmap(MAP_SHARED) mapping visible to unrelated
// processes; a ProcessSharedMutex is a robust PTHREAD_PROCESS_SHARED
// pthread_mutex_t placed inside such a region. The region creator
// initializes the mutex once, everyone else attaches, and a holder dying
// with the lock held is reported to the next acquirer instead of
// deadlocking.

pub mod shm_name;

mod platform;

mod error;
pub use error::{Error, LockStatus, Result};

mod region;
pub use region::SharedRegion;

mod mutex;
pub use mutex::ProcessSharedMutex;

mod guard;
pub use guard::LockGuard;
