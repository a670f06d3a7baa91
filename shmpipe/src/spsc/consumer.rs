use std::hint;
use std::mem::size_of;
use std::sync::Arc;
use std::sync::atomic::{Ordering, fence};

use super::error::QueueError;
use super::queue::{SpscQueue, Stats, occupancy};
use crate::plain::Plain;
use crate::trace::trace;

/// Read end of a queue.
///
/// Mirrors [`Producer`](super::Producer): slices handed out borrow the
/// handle mutably, and bytes are released to the writer only by
/// [`commit`](Self::commit) or the copying helpers.
pub struct Consumer {
    queue: Arc<SpscQueue>,
    stats: Stats,
}

impl Consumer {
    pub(crate) fn new(queue: Arc<SpscQueue>) -> Self {
        Self {
            queue,
            stats: Stats::default(),
        }
    }

    #[inline]
    pub fn queue(&self) -> &SpscQueue {
        &self.queue
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Bytes readable without blocking.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Bytes of free space the writer is blocked on, 0 if it is not waiting.
    #[inline]
    pub fn writer_pending(&self) -> usize {
        self.queue.header().write_size.get()
    }

    #[inline]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Returns the next `len` committed bytes without blocking.
    ///
    /// The bytes stay in the queue until [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// `WouldBlock` if fewer than `len` bytes are readable, `ExceedsCapacity`
    /// if `len` is larger than the queue.
    pub fn try_read(&mut self, len: usize) -> Result<&[u8], QueueError> {
        self.queue.check_request(len)?;
        let header = self.queue.header();
        let read = header.read_offset.read_own();
        let available = occupancy(header.write_offset.read(), read);

        if available < len {
            return Err(QueueError::WouldBlock {
                requested: len,
                available,
            });
        }

        // SAFETY: The writer committed these bytes and will not reuse them
        // until read_offset moves past them.
        Ok(unsafe { self.queue.area().slice(read, len) })
    }

    /// Blocks until `len` bytes are readable and returns them.
    ///
    /// # Errors
    ///
    /// `ExceedsCapacity` if `len` is larger than the queue.
    pub fn read_blocking(&mut self, len: usize) -> Result<&[u8], QueueError> {
        let read = self.acquire_data(len)?;
        // SAFETY: acquire_data returned with `len` committed bytes at `read`.
        Ok(unsafe { self.queue.area().slice(read, len) })
    }

    /// Blocks until `len` bytes are readable without consuming them.
    pub fn wait_for_data(&mut self, len: usize) -> Result<(), QueueError> {
        self.acquire_data(len).map(|_| ())
    }

    /// Releases `len` consumed bytes back to the writer.
    ///
    /// # Errors
    ///
    /// `CommitOverrun` if fewer than `len` bytes are readable.
    pub fn commit(&mut self, len: usize) -> Result<(), QueueError> {
        self.queue.check_request(len)?;
        let header = self.queue.header();
        let available = occupancy(header.write_offset.read(), header.read_offset.read_own());

        if len > available {
            return Err(QueueError::CommitOverrun {
                requested: len,
                available,
            });
        }

        self.release(len);
        Ok(())
    }

    /// Fills `dst` from the queue, blocking until enough bytes arrive.
    pub fn read_to(&mut self, dst: &mut [u8]) -> Result<(), QueueError> {
        let len = dst.len();
        dst.copy_from_slice(self.read_blocking(len)?);
        self.release(len);
        Ok(())
    }

    /// Fills `dst` if enough bytes are readable right now.
    ///
    /// On `WouldBlock`, `dst` and the queue are left as they were.
    pub fn try_read_to(&mut self, dst: &mut [u8]) -> Result<(), QueueError> {
        let len = dst.len();
        dst.copy_from_slice(self.try_read(len)?);
        self.release(len);
        Ok(())
    }

    /// Blocks for `len` bytes, hands them to `f`, then commits all `len`.
    pub fn read_with<R>(&mut self, len: usize, f: impl FnOnce(&[u8]) -> R) -> Result<R, QueueError> {
        let result = f(self.read_blocking(len)?);
        self.release(len);
        Ok(result)
    }

    pub fn try_read_with<R>(
        &mut self,
        len: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R, QueueError> {
        let result = f(self.try_read(len)?);
        self.release(len);
        Ok(result)
    }

    /// Reads one plain value written by [`Producer::write_value`](super::Producer::write_value).
    pub fn read_value<T: Plain>(&mut self) -> Result<T, QueueError> {
        self.read_with(size_of::<T>(), T::from_bytes)
    }

    pub fn try_read_value<T: Plain>(&mut self) -> Result<T, QueueError> {
        self.try_read_with(size_of::<T>(), T::from_bytes)
    }

    /// Waits until `len` bytes are readable and returns the read offset.
    fn acquire_data(&mut self, len: usize) -> Result<u32, QueueError> {
        self.queue.check_request(len)?;
        let header = self.queue.header();
        let read = header.read_offset.read_own();
        let fits = |write: u32| occupancy(write, read) >= len;

        if fits(header.write_offset.read()) {
            return Ok(read);
        }

        for _ in 0..self.queue.spin_limit() {
            hint::spin_loop();
            if fits(header.write_offset.read()) {
                return Ok(read);
            }
        }

        header.read_size.set(len);
        loop {
            fence(Ordering::SeqCst);
            let write = header.write_offset.read();
            if fits(write) {
                break;
            }
            trace!(len, write, "reader waiting for data");
            self.stats.waits += 1;
            header.write_offset.wait(write);
        }
        header.read_size.clear();

        Ok(read)
    }

    /// Advances `read_offset` by `len` and wakes the writer if the freed space
    /// is what it was waiting for.
    fn release(&mut self, len: usize) {
        let header = self.queue.header();
        let previous = header.read_offset.increment(len as u32);
        fence(Ordering::SeqCst);

        let wanted = header.write_size.get();
        if wanted == 0 {
            return;
        }

        let write = header.write_offset.read();
        let free = self
            .queue
            .capacity()
            .saturating_sub(occupancy(write, previous.wrapping_add(len as u32)));
        let was_free = free.saturating_sub(len);

        if was_free < wanted && free >= wanted {
            trace!(wanted, free, "waking writer");
            self.stats.wakes += 1;
            header.read_offset.wake();
        } else {
            self.stats.elided_wakes += 1;
        }
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("queue", &self.queue)
            .field("stats", &self.stats)
            .finish()
    }
}
