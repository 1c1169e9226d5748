// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// POSIX capability surface: the platform sizes and flag values the rest of
// the crate builds on, plus robust-mutex symbols that the `libc` crate does
// not expose on every platform.

use std::time::Duration;

/// Byte size of the platform's `pthread_mutex_t`.
///
/// This varies by libc (40 on x86_64 glibc, 64 on macOS). Callers sizing a
/// shared region should go through [`crate::ProcessSharedMutex::BLOCK_SIZE`]
/// rather than this raw value.
pub const SIZEOF_PTHREAD_MUTEX_T: usize = std::mem::size_of::<libc::pthread_mutex_t>();

/// Required alignment of the platform's `pthread_mutex_t`.
pub const ALIGNOF_PTHREAD_MUTEX_T: usize = std::mem::align_of::<libc::pthread_mutex_t>();

/// Protection flags for a read-write shared mapping.
pub const PROT_READ_WRITE: libc::c_int = libc::PROT_READ | libc::PROT_WRITE;

/// Shared-visibility mapping: writes are seen by every process mapping the
/// same object (as opposed to `MAP_PRIVATE` copy-on-write).
pub const MAP_SHARED: libc::c_int = libc::MAP_SHARED;

/// Open flags for attaching to an existing shm object.
pub const OPEN_EXISTING: libc::c_int = libc::O_RDWR;

/// Open flags for exclusive creation of a new shm object.
pub const CREATE_EXCLUSIVE: libc::c_int = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL;

/// Default permissions for shm objects: rw for user/group/other, so
/// unrelated processes under different users can cooperate.
pub const SHM_PERMS: libc::mode_t = 0o666;

// ---------------------------------------------------------------------------
// Robust mutex symbols — not exposed by `libc` on all platforms.
// macOS has no robust mutexes at all; everything below is cfg'd out there.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "macos"))]
pub const EOWNERDEAD: libc::c_int = libc::EOWNERDEAD;

#[cfg(not(target_os = "macos"))]
pub const ENOTRECOVERABLE: libc::c_int = libc::ENOTRECOVERABLE;

#[cfg(not(target_os = "macos"))]
pub const PTHREAD_MUTEX_ROBUST: libc::c_int = 1;

#[cfg(not(target_os = "macos"))]
extern "C" {
    pub fn pthread_mutexattr_setrobust(
        attr: *mut libc::pthread_mutexattr_t,
        robustness: libc::c_int,
    ) -> libc::c_int;
    pub fn pthread_mutex_consistent(mutex: *mut libc::pthread_mutex_t) -> libc::c_int;
    pub fn pthread_mutex_timedlock(
        mutex: *mut libc::pthread_mutex_t,
        abstime: *const libc::timespec,
    ) -> libc::c_int;
}

/// Kernel-level id of the calling thread. Unlike `pthread_self`, ids do not
/// alias between live threads and are meaningful in a shared owner word.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub fn thread_id() -> u64 {
    unsafe { libc::gettid() as u64 }
}

#[cfg(target_os = "macos")]
pub fn thread_id() -> u64 {
    let mut tid: u64 = 0;
    unsafe { libc::pthread_threadid_np(0, &mut tid) };
    tid
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "macos")))]
pub fn thread_id() -> u64 {
    unsafe { libc::pthread_self() as u64 }
}

/// Absolute CLOCK_REALTIME deadline `timeout` from now, for
/// `pthread_mutex_timedlock`.
#[cfg(not(target_os = "macos"))]
pub fn realtime_deadline(timeout: Duration) -> libc::timespec {
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
    let ns_total = ts.tv_nsec as u64 + u64::from(timeout.subsec_nanos());
    ts.tv_sec += timeout.as_secs() as libc::time_t + (ns_total / 1_000_000_000) as libc::time_t;
    ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;
    ts
}

/// Adaptive backoff for try-lock polling: busy spin, then CPU pause hint,
/// then thread yield, then 1ms sleeps.
#[cfg(target_os = "macos")]
pub fn adaptive_yield(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(Duration::from_millis(1));
        return;
    }
    *k += 1;
}
