use std::sync::atomic::{AtomicU32, Ordering};

use crate::sync::{PendingSize, SharedCounter};

/// Control block of a queue, placed at offset 0 of its own page.
///
/// ```text
/// 0    write_offset   (writer-owned counter, futex word the reader sleeps on)
/// 64   write_size     (bytes the writer is blocked on, 0 when idle)
/// 128  read_offset    (reader-owned counter, futex word the writer sleeps on)
/// 192  read_size      (bytes the reader is blocked on, 0 when idle)
/// 256  capacity       (set by the creator, 0 if the file was sized externally)
/// ```
///
/// Every field is an atomic, so any byte pattern found in a mapped file is a
/// valid header.
#[repr(C)]
#[derive(Debug, Default)]
pub(crate) struct QueueHeader {
    pub write_offset: SharedCounter,
    pub write_size: PendingSize,
    pub read_offset: SharedCounter,
    pub read_size: PendingSize,
    capacity: AtomicU32,
}

impl QueueHeader {
    /// Resets the header for a fresh, empty queue.
    ///
    /// Only valid before any role attaches.
    pub fn init(&self, capacity: usize) {
        self.write_offset.write(0);
        self.read_offset.write(0);
        self.write_size.clear();
        self.read_size.clear();
        self.capacity.store(capacity as u32, Ordering::Release);
    }

    /// Capacity recorded by the creator, if any.
    pub fn capacity(&self) -> Option<usize> {
        match self.capacity.load(Ordering::Acquire) {
            0 => None,
            capacity => Some(capacity as usize),
        }
    }
}
