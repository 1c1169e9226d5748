// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors

#[cfg(unix)]
pub mod posix;

#[cfg(not(unix))]
compile_error!(
    "process-shared requires a POSIX platform: the lock is a pthread_mutex_t \
     with PTHREAD_PROCESS_SHARED placed in shm_open-backed memory"
);
