// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Named shared memory region: shm_open + ftruncate + mmap(MAP_SHARED).
// The first process to ask for a name creates and sizes the backing object;
// everyone after that attaches to the existing bytes.

use std::ffi::CString;
use std::io;
use std::ptr;

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::platform::posix;
use crate::shm_name;

/// A named, fixed-size, shared-visibility memory mapping.
///
/// All processes that call [`SharedRegion::open_or_create`] with the same
/// name observe the same bytes at the same relative offsets. Closing (or
/// dropping) a region unmaps it for this process only; the backing object
/// persists until some process calls [`SharedRegion::unlink`].
#[derive(Debug)]
pub struct SharedRegion {
    mem: *mut u8,
    len: usize,
    name: String, // POSIX object name (with leading '/')
    created: bool,
}

// Safety: the mapping is process-shared by design; synchronization of the
// bytes inside it is the caller's problem (that is what ProcessSharedMutex
// is for).
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Open the named region, creating and sizing the backing object if this
    /// is the first process to ask for it.
    ///
    /// Creation is exclusive (`O_CREAT|O_EXCL`), so exactly one of any set
    /// of racing callers observes `created() == true`; that caller is the
    /// one responsible for initializing whatever lives inside the region.
    /// Attaching never resizes: an existing object smaller than `size` is
    /// reported as a resource error rather than mapped past its end.
    pub fn open_or_create(name: &str, size: usize) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::resource(
                "shm_open",
                io::Error::new(io::ErrorKind::InvalidInput, "region name is empty"),
            ));
        }
        if size == 0 {
            return Err(Error::resource(
                "ftruncate",
                io::Error::new(io::ErrorKind::InvalidInput, "region size is 0"),
            ));
        }

        let object_name = shm_name::object_name(name);
        let c_name = CString::new(object_name.as_bytes()).map_err(|e| {
            Error::resource("shm_open", io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;

        // Try exclusive create first so ftruncate only ever runs on an
        // object we own. On macOS, ftruncate on an already-sized shm object
        // can zero its contents before returning EINVAL.
        let (fd, created) = {
            let f = unsafe {
                libc::shm_open(
                    c_name.as_ptr(),
                    posix::CREATE_EXCLUSIVE,
                    posix::SHM_PERMS as libc::c_uint,
                )
            };
            if f != -1 {
                (f, true)
            } else {
                let e = io::Error::last_os_error();
                if e.raw_os_error() != Some(libc::EEXIST) {
                    return Err(Error::resource("shm_open", e));
                }
                let f2 = unsafe {
                    libc::shm_open(
                        c_name.as_ptr(),
                        posix::OPEN_EXISTING,
                        posix::SHM_PERMS as libc::c_uint,
                    )
                };
                if f2 == -1 {
                    return Err(Error::last_os("shm_open"));
                }
                (f2, false)
            }
        };

        if created {
            unsafe { libc::fchmod(fd, posix::SHM_PERMS) };
            let ret = unsafe { libc::ftruncate(fd, size as libc::off_t) };
            if ret != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                Self::unlink(name);
                return Err(Error::resource("ftruncate", err));
            }
        } else {
            // Existing object must be large enough for what the caller
            // intends to map; touching pages past EOF raises SIGBUS.
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut st) } != 0 {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                return Err(Error::resource("fstat", err));
            }
            if (st.st_size as u64) < size as u64 {
                unsafe { libc::close(fd) };
                return Err(Error::resource(
                    "fstat",
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!(
                            "existing region '{object_name}' is {} bytes, {size} requested",
                            st.st_size
                        ),
                    ),
                ));
            }
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                posix::PROT_READ_WRITE,
                posix::MAP_SHARED,
                fd,
                0,
            )
        };
        // The mapping keeps the object alive; the descriptor is no longer
        // needed on any path.
        unsafe { libc::close(fd) };

        if mem == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            if created {
                Self::unlink(name);
            }
            return Err(Error::resource("mmap", err));
        }

        debug!(name = %object_name, size, created, "shared region mapped");

        Ok(Self {
            mem: mem as *mut u8,
            len: size,
            name: object_name,
            created,
        })
    }

    /// Whether this call created the backing object (true for exactly one
    /// of any set of racing `open_or_create` callers). The creator is the
    /// process that must initialize structures placed inside the region.
    pub fn created(&self) -> bool {
        self.created
    }

    /// Pointer to the start of the mapping.
    pub fn as_ptr(&self) -> *const u8 {
        self.mem
    }

    /// Mutable pointer to the start of the mapping.
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.mem
    }

    /// Mapped length in bytes; 0 once the region has been closed.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region has been closed (unmapped).
    pub fn is_empty(&self) -> bool {
        self.mem.is_null()
    }

    /// The POSIX object name (with leading '/') backing this region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unmap the region for this process. Idempotent; never deletes the
    /// backing object. Pointers previously handed out become dangling.
    pub fn close(&mut self) {
        if self.mem.is_null() {
            return;
        }
        unsafe { libc::munmap(self.mem as *mut libc::c_void, self.len) };
        trace!(name = %self.name, "shared region unmapped");
        self.mem = ptr::null_mut();
        self.len = 0;
    }

    /// Remove the named backing object so no future process can attach.
    /// Existing mappings remain valid until their owners close them.
    /// Errors (including "no such object") are ignored, matching shm_unlink
    /// semantics.
    pub fn unlink(name: &str) {
        let object_name = shm_name::object_name(name);
        if let Ok(c_name) = CString::new(object_name.as_bytes()) {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            trace!(name = %object_name, "shared region unlinked");
        }
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        self.close();
    }
}
