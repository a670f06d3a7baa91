//! Double-mapped circular storage.
//!
//! A [`CircularArea`] of capacity `C` reserves `2 * S` bytes of address space
//! (`S` is `C` rounded up to a page) and maps the same backing pages into both
//! halves:
//!
//! ```text
//!  base                 base + S               base + 2S
//!   ┌─────────────────────┬─────────────────────┐
//!   │ backing [0, S)      │ backing [0, S)      │
//!   └─────────────────────┴─────────────────────┘
//!              └──── any C-byte span ────┘
//! ```
//!
//! Ring positions are taken modulo `S`, not `C`: below one page the backing
//! store is larger than the capacity, and both sides must agree on where the
//! bytes past `C` physically live. Any span of up to `C` bytes starting at
//! `base + (offset & (S - 1))` lies inside mapped memory, so a ring access
//! that wraps around is still one contiguous slice. `S` divides 2^32, so the
//! position stays consistent when the 32-bit offsets wrap.

use std::os::fd::AsFd;
use std::ptr::{NonNull, null_mut};

use rustix::fs::{MemfdFlags, ftruncate, memfd_create};
use rustix::mm::{MapFlags, ProtFlags, mmap, mmap_anonymous, munmap};

use super::alloc::{AllocError, round_up};
use crate::trace::{debug, trace};

/// Largest supported capacity.
///
/// Offsets are 32-bit wrapping counters; keeping occupancy far below 2^31
/// keeps `write_offset - read_offset` unambiguous.
pub const MAX_CAPACITY: usize = 1 << 30;

/// Checks that `capacity` can back a circular area.
pub fn validate_capacity(capacity: usize) -> Result<(), AllocError> {
    if capacity == 0 {
        return Err(AllocError::InvalidCapacity {
            capacity,
            reason: "capacity must be non-zero",
        });
    }
    if !capacity.is_power_of_two() {
        return Err(AllocError::InvalidCapacity {
            capacity,
            reason: "capacity must be a power of two",
        });
    }
    if capacity > MAX_CAPACITY {
        return Err(AllocError::InvalidCapacity {
            capacity,
            reason: "capacity must not exceed 2^30 bytes",
        });
    }
    Ok(())
}

/// A power-of-two ring whose storage is mapped twice back to back.
pub struct CircularArea {
    /// `None` once freed.
    base: Option<NonNull<u8>>,
    capacity: usize,
    /// Bytes of backing store mapped into each half.
    span: usize,
}

// SAFETY: The area is an address range over shared pages; access to the bytes
// is coordinated by the queue protocol, not by thread identity.
unsafe impl Send for CircularArea {}
// SAFETY: See above.
unsafe impl Sync for CircularArea {}

impl CircularArea {
    /// Allocates an area backed by a fresh memfd.
    ///
    /// The memfd is closed once both halves are mapped; the mappings keep the
    /// pages alive. Because the mappings are `MAP_SHARED`, a child created by
    /// `fork` shares the area with its parent.
    pub fn anonymous(capacity: usize, name: &str) -> Result<Self, AllocError> {
        validate_capacity(capacity)?;
        let span = round_up(capacity);

        let fd = memfd_create(name, MemfdFlags::CLOEXEC).map_err(AllocError::posix("memfd_create"))?;
        ftruncate(&fd, span as u64).map_err(AllocError::posix("ftruncate"))?;

        Self::map(&fd, capacity, 0)
    }

    /// Maps `capacity` bytes of `fd`, starting at the page-aligned `offset`,
    /// into a fresh double mapping.
    ///
    /// The caller is responsible for the file being at least
    /// `offset + round_up(capacity)` bytes long.
    pub fn map<Fd: AsFd>(fd: Fd, capacity: usize, offset: u64) -> Result<Self, AllocError> {
        validate_capacity(capacity)?;
        let span = round_up(capacity);

        // Reserve the whole window first so the two halves are adjacent.
        //
        // SAFETY: A fresh inaccessible mapping at a kernel-chosen address.
        let reservation = unsafe {
            mmap_anonymous(
                null_mut(),
                2 * span,
                ProtFlags::empty(),
                MapFlags::PRIVATE | MapFlags::NORESERVE,
            )
        }
        .map_err(AllocError::posix("mmap"))?;

        // From here on, dropping `area` unmaps the full window, whatever state
        // the halves are in.
        let area = Self {
            // SAFETY: mmap never returns null on success.
            base: Some(unsafe { NonNull::new_unchecked(reservation.cast::<u8>()) }),
            capacity,
            span,
        };

        let base = reservation.cast::<u8>();
        for half in [base, base.wrapping_add(span)] {
            // SAFETY: `half` lies inside the reservation we own, so
            // MAP_FIXED only replaces our own placeholder pages.
            let mapped = unsafe {
                mmap(
                    half.cast(),
                    span,
                    ProtFlags::READ | ProtFlags::WRITE,
                    MapFlags::SHARED | MapFlags::FIXED,
                    fd.as_fd(),
                    offset,
                )
            }
            .map_err(AllocError::posix("mmap"))?;

            if mapped.cast::<u8>() != half {
                return Err(AllocError::AddressMismatch {
                    expected: half as usize,
                    actual: mapped as usize,
                });
            }
        }

        debug!(capacity, span, base = ?reservation, "mapped circular area");
        Ok(area)
    }

    /// Capacity in bytes (a power of two).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the area still owns its mapping.
    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.base.is_some()
    }

    /// Returns a pointer valid for `capacity()` bytes at the ring position
    /// of `offset`, or `None` once the area has been freed.
    #[inline]
    pub fn get_pointer(&self, offset: u32) -> Option<NonNull<u8>> {
        let base = self.base?;
        // SAFETY: The masked position is below `span`, so `capacity <= span`
        // bytes from it stay inside the 2 * span window.
        Some(unsafe { base.add(offset as usize & (self.span - 1)) })
    }

    /// Views `len` bytes at the ring position of `offset` as one slice.
    ///
    /// # Safety
    ///
    /// - The area must be allocated and `len <= capacity()`.
    /// - The caller must have exclusive use of those bytes for the lifetime
    ///   of the slice (the queue protocol hands each span to one side).
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn slice_mut(&self, offset: u32, len: usize) -> &mut [u8] {
        debug_assert!(len <= self.capacity);
        let ptr = match self.get_pointer(offset) {
            Some(ptr) => ptr,
            None => unreachable!("circular area used after free"),
        };
        // SAFETY: Upheld by the caller, see above.
        unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), len) }
    }

    /// Views `len` bytes at the ring position of `offset`.
    ///
    /// # Safety
    ///
    /// Same contract as [`CircularArea::slice_mut`], except the bytes only
    /// need to be free of concurrent writers.
    #[inline]
    pub(crate) unsafe fn slice(&self, offset: u32, len: usize) -> &[u8] {
        // SAFETY: Forwarded contract.
        unsafe { self.slice_mut(offset, len) }
    }

    /// Unmaps both halves. Calling it again is a no-op.
    pub fn free(&mut self) {
        if let Some(base) = self.base.take() {
            trace!(capacity = self.capacity, "unmapping circular area");
            // SAFETY: The window was reserved in `map` and nothing borrows
            // from it once we hold `&mut self`.
            unsafe {
                let _ = munmap(base.as_ptr().cast(), 2 * self.span);
            }
        }
    }
}

impl Drop for CircularArea {
    fn drop(&mut self) {
        self.free();
    }
}

impl std::fmt::Debug for CircularArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircularArea")
            .field("base", &self.base)
            .field("capacity", &self.capacity)
            .field("span", &self.span)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::alloc::page_size;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_validate_capacity() {
        assert!(validate_capacity(1).is_ok());
        assert!(validate_capacity(4096).is_ok());
        assert!(validate_capacity(MAX_CAPACITY).is_ok());
        assert!(matches!(
            validate_capacity(0),
            Err(AllocError::InvalidCapacity { capacity: 0, .. })
        ));
        assert!(matches!(
            validate_capacity(3000),
            Err(AllocError::InvalidCapacity { capacity: 3000, .. })
        ));
        assert!(matches!(
            validate_capacity(MAX_CAPACITY * 2),
            Err(AllocError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_second_half_aliases_first() {
        let area = CircularArea::anonymous(page_size(), "shmpipe-area-test").unwrap();
        let base = area.get_pointer(0).unwrap().as_ptr();

        // SAFETY: Single-threaded test with exclusive use of the area.
        unsafe {
            *base = 7;
            assert_eq!(*base.add(page_size()), 7);
            *base.add(page_size() + 1) = 9;
            assert_eq!(*base.add(1), 9);
        }
    }

    /// Reads `[start, start + len)` back as two slices split at `start + k`.
    fn assert_split_read(area: &CircularArea, start: u32, k: usize, expected: &[u8]) {
        let mid = start.wrapping_add(k as u32);
        // SAFETY: Single-threaded test with exclusive use of the area.
        let (head, tail) = unsafe { (area.slice(start, k), area.slice(mid, expected.len() - k)) };
        let capacity = area.capacity();
        assert_eq!(head, &expected[..k], "capacity {capacity} start {start} split {k}");
        assert_eq!(tail, &expected[k..], "capacity {capacity} start {start} split {k}");
    }

    #[test]
    fn test_wrapping_span_is_contiguous() {
        let capacity = 2 * page_size();
        let area = CircularArea::anonymous(capacity, "shmpipe-area-test").unwrap();
        let data = pattern(capacity, 3);
        let start = (capacity - 100) as u32;

        // SAFETY: Single-threaded test with exclusive use of the area.
        unsafe {
            area.slice_mut(start, capacity).copy_from_slice(&data);
            // The tail of the write wrapped to the physical start.
            assert_eq!(area.slice(0, capacity - 100), &data[100..]);
        }
        for k in [1, 99, 100, 101, capacity / 2, capacity - 1] {
            assert_split_read(&area, start, k, &data);
        }
    }

    #[test]
    fn test_every_power_of_two_reads_back_in_other_pieces() {
        for shift in 0..=16 {
            let capacity = 1usize << shift;
            let area = CircularArea::anonymous(capacity, "shmpipe-area-test").unwrap();
            let span = round_up(capacity) as u32;
            let data = pattern(capacity, shift as u8);

            let starts = [
                0u32,
                1,
                capacity as u32 / 2,
                capacity as u32 - 1,
                span - 1,
                span.wrapping_sub(capacity as u32 / 2),
                u32::MAX,
            ];
            for start in starts {
                // SAFETY: Single-threaded test with exclusive use of the area.
                unsafe { area.slice_mut(start, capacity).copy_from_slice(&data) };

                for k in [1, capacity / 3, capacity / 2, capacity - 1] {
                    if k > 0 && k < capacity {
                        assert_split_read(&area, start, k, &data);
                    }
                }
            }
        }
    }

    #[test]
    fn test_unequal_chunks_agree_across_laps() {
        for capacity in [1024, page_size(), 2 * page_size()] {
            let area = CircularArea::anonymous(capacity, "shmpipe-area-test").unwrap();
            let mut write = u32::MAX - 5000;
            let mut read = write;
            let mut produced = 0usize;
            let mut consumed = 0usize;

            for _ in 0..8 {
                let lap_end = produced + capacity;
                while produced < lap_end {
                    let len = 100.min(lap_end - produced);
                    let chunk: Vec<u8> = (produced..produced + len).map(|i| (i % 251) as u8).collect();
                    // SAFETY: Single-threaded test with exclusive use of the area.
                    unsafe { area.slice_mut(write, len).copy_from_slice(&chunk) };
                    write = write.wrapping_add(len as u32);
                    produced += len;
                }
                while consumed < produced {
                    let len = 37.min(produced - consumed);
                    let expected: Vec<u8> =
                        (consumed..consumed + len).map(|i| (i % 251) as u8).collect();
                    // SAFETY: Single-threaded test with exclusive use of the area.
                    let got = unsafe { area.slice(read, len) };
                    assert_eq!(got, &expected[..], "capacity {capacity} byte {consumed}");
                    read = read.wrapping_add(len as u32);
                    consumed += len;
                }
            }
        }
    }

    #[test]
    fn test_offset_wraps_at_u32_boundary() {
        let capacity = page_size();
        let area = CircularArea::anonymous(capacity, "shmpipe-area-test").unwrap();
        let last = area.get_pointer(u32::MAX).unwrap().as_ptr() as usize;
        let first = area.get_pointer(0).unwrap().as_ptr() as usize;
        assert_eq!(last + 1, first + capacity);
    }

    #[test]
    fn test_map_from_descriptor_at_offset() {
        let page = page_size();
        let fd = memfd_create("shmpipe-area-test", MemfdFlags::CLOEXEC).unwrap();
        ftruncate(&fd, (page + page) as u64).unwrap();

        let a = CircularArea::map(&fd, page, page as u64).unwrap();
        let b = CircularArea::map(&fd, page, page as u64).unwrap();

        // SAFETY: Single-threaded test; `a` and `b` alias on purpose.
        unsafe {
            a.slice_mut(10, 4).copy_from_slice(b"ring");
            assert_eq!(b.slice(10, 4), b"ring");
        }
    }

    #[test]
    fn test_free_is_idempotent() {
        let mut area = CircularArea::anonymous(page_size(), "shmpipe-area-test").unwrap();
        assert!(area.is_allocated());
        area.free();
        assert!(!area.is_allocated());
        assert!(area.get_pointer(0).is_none());
        area.free();
    }

    #[test]
    fn test_invalid_capacity_is_rejected_before_mapping() {
        let err = CircularArea::anonymous(1000, "shmpipe-area-test").unwrap_err();
        assert!(matches!(err, AllocError::InvalidCapacity { capacity: 1000, .. }));
    }
}
