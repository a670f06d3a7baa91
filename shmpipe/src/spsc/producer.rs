use std::hint;
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

use super::error::QueueError;
use super::queue::{SpscQueue, Stats, occupancy};
use crate::plain::Plain;
use crate::trace::trace;

/// Write end of a queue.
///
/// Every mutating call takes `&mut self`, so one handle is never used from
/// two threads at once. Only one producer may exist per queue, across all
/// attached processes.
pub struct Producer {
    queue: Arc<SpscQueue>,
    stats: Stats,
}

impl Producer {
    pub(crate) fn new(queue: Arc<SpscQueue>) -> Self {
        Self {
            queue,
            stats: Stats::default(),
        }
    }

    /// The queue this handle writes into.
    #[inline]
    pub fn queue(&self) -> &SpscQueue {
        &self.queue
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Bytes that can be reserved without blocking.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.queue.free_space()
    }

    /// Bytes the reader is currently blocked on, 0 if it is not waiting.
    #[inline]
    pub fn reader_pending(&self) -> usize {
        self.queue.header().read_size.get()
    }

    #[inline]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Returns `len` writable bytes without blocking.
    ///
    /// Nothing becomes visible to the reader until [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// `WouldBlock` if fewer than `len` bytes are free, `ExceedsCapacity` if
    /// `len` is larger than the queue.
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8], QueueError> {
        let capacity = self.queue.check_request(len)?;
        let header = self.queue.header();
        let write = header.write_offset.read_own();
        let available = capacity.saturating_sub(occupancy(write, header.read_offset.read()));

        if available < len {
            return Err(QueueError::WouldBlock {
                requested: len,
                available,
            });
        }

        // SAFETY: The `len` bytes after `write` are free, so the reader does
        // not touch them until we publish.
        Ok(unsafe { self.queue.area().slice_mut(write, len) })
    }

    /// Blocks until `len` bytes are free, then returns them for writing.
    ///
    /// # Errors
    ///
    /// `ExceedsCapacity` if `len` is larger than the queue; such a request is
    /// rejected up front instead of waiting forever.
    pub fn write_blocking(&mut self, len: usize) -> Result<&mut [u8], QueueError> {
        let write = self.acquire_space(len)?;
        // SAFETY: acquire_space returned with `len` free bytes at `write`.
        Ok(unsafe { self.queue.area().slice_mut(write, len) })
    }

    /// Blocks until `len` bytes are free without touching them.
    pub fn wait_for_space(&mut self, len: usize) -> Result<(), QueueError> {
        self.acquire_space(len).map(|_| ())
    }

    /// Publishes `len` previously reserved bytes to the reader.
    ///
    /// # Errors
    ///
    /// `CommitOverrun` if fewer than `len` bytes are free, i.e. more than was
    /// reserved.
    pub fn commit(&mut self, len: usize) -> Result<(), QueueError> {
        let capacity = self.queue.check_request(len)?;
        let header = self.queue.header();
        let available =
            capacity.saturating_sub(occupancy(header.write_offset.read_own(), header.read_offset.read()));

        if len > available {
            return Err(QueueError::CommitOverrun {
                requested: len,
                available,
            });
        }

        self.publish(len);
        Ok(())
    }

    /// Copies `src` into the queue, blocking until it fits.
    pub fn write_from(&mut self, src: &[u8]) -> Result<(), QueueError> {
        self.write_blocking(src.len())?.copy_from_slice(src);
        self.publish(src.len());
        Ok(())
    }

    /// Copies `src` into the queue if it fits right now.
    ///
    /// On `WouldBlock` nothing was written and nothing was published.
    pub fn try_write_from(&mut self, src: &[u8]) -> Result<(), QueueError> {
        self.reserve(src.len())?.copy_from_slice(src);
        self.publish(src.len());
        Ok(())
    }

    /// Blocks for `len` bytes, lets `f` fill them, then commits all `len`.
    pub fn write_with<R>(
        &mut self,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, QueueError> {
        let result = f(self.write_blocking(len)?);
        self.publish(len);
        Ok(result)
    }

    /// Like [`write_with`](Self::write_with), but fails with `WouldBlock`
    /// instead of waiting. `f` is not called on failure.
    pub fn try_write_with<R>(
        &mut self,
        len: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, QueueError> {
        let result = f(self.reserve(len)?);
        self.publish(len);
        Ok(result)
    }

    /// Writes the bytes of one plain value, blocking until they fit.
    pub fn write_value<T: Plain>(&mut self, value: &T) -> Result<(), QueueError> {
        self.write_from(value.as_bytes())
    }

    pub fn try_write_value<T: Plain>(&mut self, value: &T) -> Result<(), QueueError> {
        self.try_write_from(value.as_bytes())
    }

    /// Waits until `len` bytes are free and returns the write offset.
    fn acquire_space(&mut self, len: usize) -> Result<u32, QueueError> {
        let capacity = self.queue.check_request(len)?;
        let header = self.queue.header();
        let write = header.write_offset.read_own();
        let fits = |read: u32| capacity.saturating_sub(occupancy(write, read)) >= len;

        if fits(header.read_offset.read()) {
            return Ok(write);
        }

        for _ in 0..self.queue.spin_limit() {
            hint::spin_loop();
            if fits(header.read_offset.read()) {
                return Ok(write);
            }
        }

        // Publish the request before the final check: either the reader's
        // commit sees it and wakes us, or we see the reader's commit here.
        header.write_size.set(len);
        loop {
            fence(Ordering::SeqCst);
            let read = header.read_offset.read();
            if fits(read) {
                break;
            }
            trace!(len, read, "writer waiting for space");
            self.stats.waits += 1;
            header.read_offset.wait(read);
        }
        header.write_size.clear();

        Ok(write)
    }

    /// Advances `write_offset` by `len` and wakes the reader if this commit
    /// is the one that satisfies its pending request.
    fn publish(&mut self, len: usize) {
        let header = self.queue.header();
        let previous = header.write_offset.increment(len as u32);
        fence(Ordering::SeqCst);

        let wanted = header.read_size.get();
        if wanted == 0 {
            return;
        }

        let read = header.read_offset.read();
        let after = occupancy(previous.wrapping_add(len as u32), read);
        let before = after.saturating_sub(len);

        if before < wanted && after >= wanted {
            trace!(wanted, after, "waking reader");
            self.stats.wakes += 1;
            header.write_offset.wake();
        } else {
            self.stats.elided_wakes += 1;
        }
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer")
            .field("queue", &self.queue)
            .field("stats", &self.stats)
            .finish()
    }
}
