// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-shared mutex: a robust pthread_mutex_t living inside a
// SharedRegion at a caller-chosen offset, plus a few advisory words.
//
// The control block layout is #[repr(C)] and must read identically from
// every process that maps the region; nothing here is ever relocated or
// resized after initialize_at.

use std::io;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{Error, LockStatus, Result};
use crate::platform::posix;
use crate::region::SharedRegion;

/// Block is live and the mutex may be locked.
const MAGIC_LIVE: u32 = 0x7073_6d78; // "psmx"
/// Block was destroyed; every further operation is a state error.
const MAGIC_DESTROYED: u32 = 0xdead_2bad;

/// Set when the mutex was initialized with PTHREAD_MUTEX_ROBUST.
const FLAG_ROBUST: u32 = 1;

#[repr(C)]
struct ControlBlock {
    mutex: libc::pthread_mutex_t,
    /// Claim word for the unlock ownership check: pid in the high 32 bits,
    /// kernel thread id in the low 32, 0 when free. Written only by the
    /// acquiring thread and cleared only by a successful compare-exchange
    /// of that exact value, so a misusing caller can never mutate it.
    owner_token: AtomicU64,
    /// Advisory: PID of the current holder, 0 when free. Diagnostic only —
    /// the kernel's robust-mutex owner tracking is what death detection
    /// actually relies on.
    owner_pid: AtomicI32,
    flags: AtomicU32,
    magic: AtomicU32,
}

/// Process+thread identity for the claim word.
fn lock_token() -> u64 {
    let pid = unsafe { libc::getpid() } as u64;
    (pid << 32) | (posix::thread_id() & 0xffff_ffff)
}

// The block embeds the platform mutex; a layout that cannot hold it is a
// build error, not a runtime surprise.
const _: () = assert!(std::mem::size_of::<ControlBlock>() >= posix::SIZEOF_PTHREAD_MUTEX_T);
const _: () = assert!(std::mem::align_of::<ControlBlock>() % posix::ALIGNOF_PTHREAD_MUTEX_T == 0);

/// A mutual-exclusion lock shared between OS processes.
///
/// The lock state lives inside a [`SharedRegion`]; every process that maps
/// the same region and binds to the same offset contends on the same lock.
/// Exactly one process (the region creator, see [`SharedRegion::created`])
/// calls [`ProcessSharedMutex::initialize_at`] before anyone locks; all
/// others call [`ProcessSharedMutex::attach_at`].
///
/// On platforms with robust mutexes (everything but macOS), a holder dying
/// with the lock held is reported to the next acquirer as
/// [`LockStatus::OwnerDied`] instead of deadlocking. The acquirer must call
/// [`mark_consistent`](Self::mark_consistent) before unlocking or the mutex
/// becomes permanently unrecoverable.
///
/// No fairness among waiters is promised beyond what the platform mutex
/// provides.
#[derive(Debug)]
pub struct ProcessSharedMutex<'r> {
    block: *mut ControlBlock,
    _region: PhantomData<&'r SharedRegion>,
}

// Safety: all state is in the shared control block and every mutation goes
// through pthread calls or atomics.
unsafe impl Send for ProcessSharedMutex<'_> {}
unsafe impl Sync for ProcessSharedMutex<'_> {}

impl<'r> ProcessSharedMutex<'r> {
    /// Bytes a control block occupies inside a region. Regions holding one
    /// mutex must be at least `offset + BLOCK_SIZE` bytes. Platform-dependent;
    /// never hard-code it.
    pub const BLOCK_SIZE: usize = std::mem::size_of::<ControlBlock>();

    /// Required alignment of the control block's address.
    pub const BLOCK_ALIGN: usize = std::mem::align_of::<ControlBlock>();

    fn block_at(region: &'r SharedRegion, offset: usize) -> Result<*mut ControlBlock> {
        if region.is_empty() {
            return Err(Error::state("region is closed"));
        }
        let end = offset
            .checked_add(Self::BLOCK_SIZE)
            .ok_or_else(|| Error::state("offset overflows"))?;
        if end > region.len() {
            return Err(Error::state(format!(
                "region of {} bytes cannot hold a {}-byte control block at offset {offset}",
                region.len(),
                Self::BLOCK_SIZE,
            )));
        }
        let addr = region.as_mut_ptr() as usize + offset;
        if addr % Self::BLOCK_ALIGN != 0 {
            return Err(Error::state(format!(
                "control block at offset {offset} is not {}-byte aligned",
                Self::BLOCK_ALIGN,
            )));
        }
        Ok(addr as *mut ControlBlock)
    }

    /// Write a fresh "free, no owner" control block at `offset` and bind to
    /// it. Creator only, exactly once, before any process attaches; running
    /// it on a block other processes already use scrambles their lock.
    /// The creator-vs-attacher split comes from
    /// [`SharedRegion::created`].
    pub fn initialize_at(region: &'r SharedRegion, offset: usize) -> Result<Self> {
        let block = Self::block_at(region, offset)?;

        unsafe {
            ptr::write_bytes(block as *mut u8, 0, Self::BLOCK_SIZE);

            let mtx = ptr::addr_of_mut!((*block).mutex);

            let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
            let mut eno = libc::pthread_mutexattr_init(&mut attr);
            if eno != 0 {
                return Err(Error::resource(
                    "pthread_mutexattr_init",
                    io::Error::from_raw_os_error(eno),
                ));
            }

            eno = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
            if eno != 0 {
                libc::pthread_mutexattr_destroy(&mut attr);
                return Err(Error::resource(
                    "pthread_mutexattr_setpshared",
                    io::Error::from_raw_os_error(eno),
                ));
            }

            #[cfg(not(target_os = "macos"))]
            {
                eno = posix::pthread_mutexattr_setrobust(&mut attr, posix::PTHREAD_MUTEX_ROBUST);
                if eno != 0 {
                    libc::pthread_mutexattr_destroy(&mut attr);
                    return Err(Error::resource(
                        "pthread_mutexattr_setrobust",
                        io::Error::from_raw_os_error(eno),
                    ));
                }
                (*block).flags.store(FLAG_ROBUST, Ordering::Relaxed);
            }

            eno = libc::pthread_mutex_init(mtx, &attr);
            libc::pthread_mutexattr_destroy(&mut attr);
            if eno != 0 {
                return Err(Error::resource(
                    "pthread_mutex_init",
                    io::Error::from_raw_os_error(eno),
                ));
            }

            // Publish: attachers read this with Acquire and must observe the
            // fully initialized mutex.
            (*block).magic.store(MAGIC_LIVE, Ordering::Release);
        }

        Ok(Self {
            block,
            _region: PhantomData,
        })
    }

    /// Bind to an already-initialized control block without touching its
    /// state. Fails if the block does not fit in the region at `offset`,
    /// is misaligned, was never initialized, or was destroyed.
    pub fn attach_at(region: &'r SharedRegion, offset: usize) -> Result<Self> {
        let block = Self::block_at(region, offset)?;
        match unsafe { (*block).magic.load(Ordering::Acquire) } {
            MAGIC_LIVE => Ok(Self {
                block,
                _region: PhantomData,
            }),
            MAGIC_DESTROYED => Err(Error::state("control block was destroyed")),
            _ => Err(Error::state("control block is not initialized")),
        }
    }

    fn mtx_ptr(&self) -> *mut libc::pthread_mutex_t {
        unsafe { ptr::addr_of_mut!((*self.block).mutex) }
    }

    fn ensure_live(&self) -> Result<()> {
        match unsafe { (*self.block).magic.load(Ordering::Acquire) } {
            MAGIC_LIVE => Ok(()),
            MAGIC_DESTROYED => Err(Error::state("control block was destroyed")),
            _ => Err(Error::state("control block is not initialized")),
        }
    }

    fn note_acquired(&self) {
        let pid = unsafe { libc::getpid() };
        unsafe {
            (*self.block).owner_pid.store(pid, Ordering::Relaxed);
            (*self.block).owner_token.store(lock_token(), Ordering::Release);
        }
    }

    /// Block until the lock is acquired.
    ///
    /// Returns [`LockStatus::Acquired`] normally. Returns
    /// [`LockStatus::OwnerDied`] when the previous holder terminated while
    /// holding the lock: the caller now holds it, but protected state may be
    /// torn and [`mark_consistent`](Self::mark_consistent) must be called
    /// before unlocking. A wait interrupted by a signal resumes waiting.
    pub fn lock(&self) -> Result<LockStatus> {
        self.ensure_live()?;
        loop {
            let eno = unsafe { libc::pthread_mutex_lock(self.mtx_ptr()) };
            match eno {
                0 => {
                    self.note_acquired();
                    return Ok(LockStatus::Acquired);
                }
                libc::EINTR => continue,
                #[cfg(not(target_os = "macos"))]
                posix::EOWNERDEAD => {
                    let dead = unsafe { (*self.block).owner_pid.load(Ordering::Relaxed) };
                    tracing::warn!(dead_owner_pid = dead, "lock holder died; acquired inconsistent");
                    self.note_acquired();
                    return Ok(LockStatus::OwnerDied);
                }
                #[cfg(not(target_os = "macos"))]
                posix::ENOTRECOVERABLE => {
                    return Err(Error::state(
                        "mutex is permanently unrecoverable: a dead holder's \
                         acquisition was never marked consistent",
                    ));
                }
                _ => {
                    return Err(Error::resource(
                        "pthread_mutex_lock",
                        io::Error::from_raw_os_error(eno),
                    ));
                }
            }
        }
    }

    /// Try to acquire the lock without blocking.
    ///
    /// `None` means the lock is currently held by someone else; `Some`
    /// carries the same statuses as [`lock`](Self::lock).
    pub fn try_lock(&self) -> Result<Option<LockStatus>> {
        self.ensure_live()?;
        let eno = unsafe { libc::pthread_mutex_trylock(self.mtx_ptr()) };
        match eno {
            0 => {
                self.note_acquired();
                Ok(Some(LockStatus::Acquired))
            }
            libc::EBUSY => Ok(None),
            #[cfg(not(target_os = "macos"))]
            posix::EOWNERDEAD => {
                self.note_acquired();
                Ok(Some(LockStatus::OwnerDied))
            }
            #[cfg(not(target_os = "macos"))]
            posix::ENOTRECOVERABLE => Err(Error::state(
                "mutex is permanently unrecoverable: a dead holder's \
                 acquisition was never marked consistent",
            )),
            _ => Err(Error::resource(
                "pthread_mutex_trylock",
                io::Error::from_raw_os_error(eno),
            )),
        }
    }

    /// Acquire the lock, giving up after `timeout`.
    ///
    /// `None` on timeout; otherwise the same statuses as
    /// [`lock`](Self::lock). Uses `pthread_mutex_timedlock` where available
    /// and try-lock polling with adaptive backoff on macOS.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<Option<LockStatus>> {
        self.ensure_live()?;

        #[cfg(target_os = "macos")]
        {
            let deadline = std::time::Instant::now() + timeout;
            let mut k = 0u32;
            loop {
                if let Some(status) = self.try_lock()? {
                    return Ok(Some(status));
                }
                if std::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                posix::adaptive_yield(&mut k);
            }
        }

        #[cfg(not(target_os = "macos"))]
        {
            let ts = posix::realtime_deadline(timeout);
            loop {
                let eno = unsafe { posix::pthread_mutex_timedlock(self.mtx_ptr(), &ts) };
                match eno {
                    0 => {
                        self.note_acquired();
                        return Ok(Some(LockStatus::Acquired));
                    }
                    libc::ETIMEDOUT => return Ok(None),
                    libc::EINTR => continue,
                    posix::EOWNERDEAD => {
                        self.note_acquired();
                        return Ok(Some(LockStatus::OwnerDied));
                    }
                    posix::ENOTRECOVERABLE => {
                        return Err(Error::state(
                            "mutex is permanently unrecoverable: a dead holder's \
                             acquisition was never marked consistent",
                        ));
                    }
                    _ => {
                        return Err(Error::resource(
                            "pthread_mutex_timedlock",
                            io::Error::from_raw_os_error(eno),
                        ));
                    }
                }
            }
        }
    }

    /// Release the lock.
    ///
    /// Fails with [`Error::NotOwner`] when the calling process/thread does
    /// not hold it, in which case the lock state is unchanged and the true
    /// holder is undisturbed. The check is a single compare-exchange of the
    /// claim word written at acquisition, so only the exact acquiring
    /// thread can pass it; a misusing caller never mutates any state.
    pub fn unlock(&self) -> Result<()> {
        self.ensure_live()?;

        let owner = unsafe { &(*self.block).owner_token };
        let me = lock_token();
        if owner
            .compare_exchange(me, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return Err(Error::NotOwner);
        }

        // Only the acquiring thread gets here; clear the claim before the
        // pthread unlock so the next acquirer's own claim is not stomped.
        unsafe { (*self.block).owner_pid.store(0, Ordering::Relaxed) };
        let eno = unsafe { libc::pthread_mutex_unlock(self.mtx_ptr()) };
        match eno {
            0 => Ok(()),
            libc::EPERM => {
                // Kernel disagrees with our claim word; put it back.
                self.note_acquired();
                Err(Error::NotOwner)
            }
            _ => {
                self.note_acquired();
                Err(Error::resource(
                    "pthread_mutex_unlock",
                    io::Error::from_raw_os_error(eno),
                ))
            }
        }
    }

    /// Acknowledge an [`LockStatus::OwnerDied`] acquisition after repairing
    /// protected state. Must be called while still holding the lock; until
    /// then, unlocking leaves the mutex permanently unrecoverable.
    ///
    /// Fails with a state error if the mutex is not in the inconsistent
    /// state (including on platforms without robust mutexes).
    pub fn mark_consistent(&self) -> Result<()> {
        self.ensure_live()?;

        #[cfg(not(target_os = "macos"))]
        {
            let eno = unsafe { posix::pthread_mutex_consistent(self.mtx_ptr()) };
            match eno {
                0 => Ok(()),
                libc::EINVAL => Err(Error::state("mutex is not in the inconsistent state")),
                _ => Err(Error::resource(
                    "pthread_mutex_consistent",
                    io::Error::from_raw_os_error(eno),
                )),
            }
        }

        #[cfg(target_os = "macos")]
        Err(Error::state(
            "robust recovery is not supported on this platform",
        ))
    }

    /// Invalidate the control block. Precondition: no process holds or is
    /// waiting on the lock. Detection is best-effort: a currently held lock
    /// is refused with a state error, but a waiter arriving concurrently
    /// cannot always be caught. After destroy, every operation on any
    /// handle to this block fails with a state error.
    pub fn destroy(&self) -> Result<()> {
        self.ensure_live()?;

        match self.try_lock()? {
            None => return Err(Error::state("destroy while the lock is held")),
            Some(LockStatus::OwnerDied) => {
                // A dead holder is not contention; clear the inconsistency
                // so the mutex can be destroyed cleanly.
                self.mark_consistent()?;
            }
            Some(LockStatus::Acquired) => {}
        }
        self.unlock()?;

        let eno = unsafe { libc::pthread_mutex_destroy(self.mtx_ptr()) };
        match eno {
            0 => {}
            // A waiter slipped in between our release above and the destroy.
            libc::EBUSY => return Err(Error::state("destroy while the lock is contended")),
            _ => {
                return Err(Error::resource(
                    "pthread_mutex_destroy",
                    io::Error::from_raw_os_error(eno),
                ));
            }
        }
        unsafe { (*self.block).magic.store(MAGIC_DESTROYED, Ordering::Release) };
        Ok(())
    }

    /// Whether the block was initialized with robust-mutex death detection.
    pub fn is_robust(&self) -> bool {
        unsafe { (*self.block).flags.load(Ordering::Relaxed) & FLAG_ROBUST != 0 }
    }

    /// Advisory PID of the current holder, if any. Diagnostic only; it can
    /// be stale the moment it is read.
    pub fn holder_pid(&self) -> Option<i32> {
        let pid = unsafe { (*self.block).owner_pid.load(Ordering::Relaxed) };
        (pid != 0).then_some(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_fits_the_platform_mutex() {
        assert!(ProcessSharedMutex::BLOCK_SIZE >= posix::SIZEOF_PTHREAD_MUTEX_T);
        assert!(ProcessSharedMutex::BLOCK_ALIGN.is_power_of_two());
        assert_eq!(
            ProcessSharedMutex::BLOCK_ALIGN % posix::ALIGNOF_PTHREAD_MUTEX_T,
            0
        );
    }

    #[test]
    fn block_layout_has_no_surprises() {
        // The claim and advisory words trail the platform mutex.
        assert!(
            ProcessSharedMutex::BLOCK_SIZE
                >= posix::SIZEOF_PTHREAD_MUTEX_T
                    + std::mem::size_of::<AtomicU64>()
                    + std::mem::size_of::<AtomicI32>()
                    + 2 * std::mem::size_of::<AtomicU32>()
        );
    }

    #[test]
    fn lock_token_is_nonzero() {
        // 0 is the "free" sentinel in the claim word; a real caller's token
        // must never collide with it.
        assert_ne!(lock_token(), 0);
    }
}
