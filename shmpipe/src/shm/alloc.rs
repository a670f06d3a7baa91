//! Page-granular shared allocations.
//!
//! [`Region`] owns one `mmap` of whole pages, either anonymous (shared with
//! children across `fork`) or backed by a file descriptor at a page-aligned
//! offset. The mapping is released when the `Region` drops, so a partially
//! built queue cleans up on every error path without extra bookkeeping.

use std::mem::{align_of, size_of};
use std::os::fd::AsFd;
use std::ptr::{NonNull, null_mut};

use rustix::io::Errno;
use rustix::mm::{MapFlags, ProtFlags, mmap, mmap_anonymous, munmap};

/// Errors raised while acquiring shared memory.
///
/// Allocation failures are surfaced at construction time and never retried
/// internally.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// The requested capacity cannot back a circular area.
    #[error("invalid capacity {capacity}: {reason}")]
    InvalidCapacity {
        capacity: usize,
        reason: &'static str,
    },
    /// The POSIX shared memory name is not portable.
    #[error("invalid shared memory path `{path}`: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    /// A system call failed.
    #[error("{op} failed: {source}")]
    Posix {
        op: &'static str,
        #[source]
        source: Errno,
    },
    /// The backing file does not have the size the header describes.
    #[error("backing store size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    /// The kernel placed a fixed mapping somewhere other than requested.
    #[error("mapping landed at {actual:#x} instead of {expected:#x}")]
    AddressMismatch { expected: usize, actual: usize },
}

impl AllocError {
    pub(crate) fn posix(op: &'static str) -> impl FnOnce(Errno) -> Self {
        move |source| Self::Posix { op, source }
    }

    /// Returns the errno when the failure came from a system call.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::Posix { source, .. } => Some(*source),
            _ => None,
        }
    }
}

/// Size of a virtual memory page on this system.
#[inline]
pub fn page_size() -> usize {
    rustix::param::page_size()
}

/// Rounds `bytes` up to a whole number of pages.
///
/// Zero stays zero.
#[inline]
pub fn round_up(bytes: usize) -> usize {
    let page = page_size();
    bytes.div_ceil(page) * page
}

/// An owned, page-aligned, read-write shared mapping.
///
/// A `Region` can only be obtained from [`Region::anonymous`] or
/// [`Region::map`], so holding one proves the memory is mapped.
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: Region is just an address range. Nothing in it is thread-local, and
// all shared state placed inside is accessed through atomics.
unsafe impl Send for Region {}
// SAFETY: See above. Region itself exposes no interior mutability.
unsafe impl Sync for Region {}

impl Region {
    /// Maps `bytes` (rounded up to pages) of zeroed anonymous shared memory.
    ///
    /// The memory is `MAP_SHARED`, so a child created by `fork` sees the
    /// same pages.
    pub fn anonymous(bytes: usize) -> Result<Self, AllocError> {
        let len = round_up(bytes.max(1));

        // SAFETY: A fresh mapping at a kernel-chosen address aliases nothing.
        let ptr = unsafe {
            mmap_anonymous(
                null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
            )
        }
        .map_err(AllocError::posix("mmap"))?;

        Ok(Self::from_raw(ptr, len))
    }

    /// Maps `bytes` (rounded up to pages) of `fd` starting at `offset`.
    ///
    /// `offset` must be a multiple of the page size.
    pub fn map<Fd: AsFd>(fd: Fd, bytes: usize, offset: u64) -> Result<Self, AllocError> {
        let len = round_up(bytes.max(1));

        // SAFETY: A fresh shared mapping at a kernel-chosen address. The
        // descriptor stays open for the duration of the call.
        let ptr = unsafe {
            mmap(
                null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                fd.as_fd(),
                offset,
            )
        }
        .map_err(AllocError::posix("mmap"))?;

        Ok(Self::from_raw(ptr, len))
    }

    fn from_raw(ptr: *mut std::ffi::c_void, len: usize) -> Self {
        // SAFETY: mmap never returns null on success.
        let ptr = unsafe { NonNull::new_unchecked(ptr.cast::<u8>()) };
        Self { ptr, len }
    }

    /// Mapped length in bytes (always a whole number of pages).
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always `false`; a region spans at least one page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the mapping.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Views the start of the region as a `T`.
    ///
    /// # Safety
    ///
    /// `T` must be valid for any bit pattern the peer may have written
    /// (atomics and integers only) and must only be accessed through shared
    /// references.
    pub(crate) unsafe fn get<T>(&self) -> &T {
        debug_assert!(size_of::<T>() <= self.len);
        debug_assert!(align_of::<T>() <= page_size());
        // SAFETY: The mapping is page aligned, large enough, and lives as long
        // as `self`; the caller vouches for the contents.
        unsafe { &*self.ptr.as_ptr().cast::<T>() }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: ptr/len describe exactly the mapping created in the
        // constructor, and no reference into it outlives `self`.
        unsafe {
            let _ = munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Region")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
