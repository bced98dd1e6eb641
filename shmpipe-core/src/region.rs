//! SharedMemoryRegion - POSIX shared memory wrapper.
//!
//! The mapping collaborator: it owns allocation, mapping and teardown of the
//! backing memory, and nothing else. The ring buffer is only ever a view
//! over a region; two contexts talk by mapping the same object and attaching
//! to the control block at its head.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::ptr::NonNull;

use crate::error::RegionError;

/// How the mapping is backed.
enum Backing {
    /// A named POSIX shared memory object; the creating side unlinks it on
    /// drop. The fd is kept only to pin the object while mapped.
    Posix {
        name: String,
        _fd: OwnedFd,
        owner: bool,
    },
    /// An anonymous `MAP_SHARED` mapping, reachable by descendants after
    /// `fork` but not by name.
    Anonymous,
}

/// A mapped shared memory region.
///
/// Owns the mapping and unmaps it on drop. Named regions can be mapped by
/// any number of processes via [`SharedMemoryRegion::open`]; each process
/// gets its own virtual address for the same physical bytes, which is why
/// nothing address-valued is ever stored inside the region itself.
pub struct SharedMemoryRegion {
    ptr: NonNull<u8>,
    size: usize,
    backing: Backing,
}

// SAFETY: the region only hands out its base pointer; synchronization of the
// bytes behind it is the ring buffer's contract, not the mapping's.
unsafe impl Send for SharedMemoryRegion {}
// SAFETY: see above - concurrent access goes through the control block's
// atomics, the region itself is immutable after construction.
unsafe impl Sync for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Maximum size for a shared memory region (1 GiB).
    pub const MAX_SIZE: usize = 1024 * 1024 * 1024;

    /// Create and map a new named region.
    ///
    /// Fails if an object of the same name already exists. The object is
    /// unlinked again when this (creating) handle drops.
    pub fn create(name: &str, size: usize) -> Result<Self, RegionError> {
        Self::validate_size(size)?;
        let c_name = Self::shm_name(name)?;

        // SAFETY: c_name is a valid CString, flags are valid POSIX flags.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(RegionError::CreateFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: fd is a valid descriptor, size is validated.
        if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } < 0 {
            let reason = format!("ftruncate failed: {}", std::io::Error::last_os_error());
            // SAFETY: c_name is a valid CString.
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
            return Err(RegionError::CreateFailed {
                name: name.to_string(),
                reason,
            });
        }

        let ptr = match Self::map(fd.as_raw_fd(), size) {
            Ok(ptr) => ptr,
            Err(e) => {
                // SAFETY: c_name is a valid CString.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                return Err(e);
            }
        };

        tracing::debug!(name = %name, size = size, "created shared memory region");

        Ok(Self {
            ptr,
            size,
            backing: Backing::Posix {
                name: name.to_string(),
                _fd: fd,
                owner: true,
            },
        })
    }

    /// Map an existing named region.
    ///
    /// Never truncates and never unlinks: every participant other than the
    /// creator goes through here.
    pub fn open(name: &str, size: usize) -> Result<Self, RegionError> {
        Self::validate_size(size)?;
        let c_name = Self::shm_name(name)?;

        // SAFETY: c_name is a valid CString.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(RegionError::OpenFailed {
                name: name.to_string(),
                reason: format!("shm_open failed: {}", std::io::Error::last_os_error()),
            });
        }
        // SAFETY: fd was just returned by shm_open and is owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };

        let ptr = Self::map(fd.as_raw_fd(), size)?;

        tracing::debug!(name = %name, size = size, "opened shared memory region");

        Ok(Self {
            ptr,
            size,
            backing: Backing::Posix {
                name: name.to_string(),
                _fd: fd,
                owner: false,
            },
        })
    }

    /// Map an anonymous shared region.
    ///
    /// Visible to this process and, after `fork`, to its children. Handy for
    /// tests and for parent/child channels that need no name.
    pub fn anonymous(size: usize) -> Result<Self, RegionError> {
        Self::validate_size(size)?;

        // SAFETY: anonymous mapping, no fd involved; size is validated.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RegionError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }
        let ptr = NonNull::new(ptr as *mut u8).expect("mmap returned null but not MAP_FAILED");

        Ok(Self {
            ptr,
            size,
            backing: Backing::Anonymous,
        })
    }

    /// Name of the backing object, if it has one.
    pub fn name(&self) -> Option<&str> {
        match &self.backing {
            Backing::Posix { name, .. } => Some(name),
            Backing::Anonymous => None,
        }
    }

    /// Size of the mapping in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Base pointer of the mapping.
    ///
    /// Only valid within this mapping; the peer's mapping of the same region
    /// has a different base.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn validate_size(size: usize) -> Result<(), RegionError> {
        if size == 0 {
            return Err(RegionError::InvalidSize {
                size,
                reason: "size must be non-zero".to_string(),
            });
        }
        if size > Self::MAX_SIZE {
            return Err(RegionError::InvalidSize {
                size,
                reason: format!("size exceeds maximum {}", Self::MAX_SIZE),
            });
        }
        Ok(())
    }

    fn shm_name(name: &str) -> Result<CString, RegionError> {
        if name.is_empty() {
            return Err(RegionError::CreateFailed {
                name: name.to_string(),
                reason: "name cannot be empty".to_string(),
            });
        }
        CString::new(format!("/{name}")).map_err(|e| RegionError::CreateFailed {
            name: name.to_string(),
            reason: format!("invalid name: {e}"),
        })
    }

    fn map(fd: libc::c_int, size: usize) -> Result<NonNull<u8>, RegionError> {
        // SAFETY: fd is a valid descriptor sized by the caller, offset 0.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(RegionError::MapFailed {
                reason: format!("mmap failed: {}", std::io::Error::last_os_error()),
            });
        }
        Ok(NonNull::new(ptr as *mut u8).expect("mmap returned null but not MAP_FAILED"))
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        // SAFETY: ptr and size were set by mmap during construction.
        if unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size) } < 0 {
            tracing::error!(
                error = %std::io::Error::last_os_error(),
                "failed to unmap shared memory"
            );
        }

        if let Backing::Posix {
            name, owner: true, ..
        } = &self.backing
        {
            if let Ok(c_name) = CString::new(format!("/{name}")) {
                // SAFETY: c_name is a valid CString.
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
                tracing::debug!(name = %name, "unlinked shared memory region");
            }
        }
    }
}
