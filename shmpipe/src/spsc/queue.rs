use std::mem::size_of;
use std::os::fd::AsFd;
use std::sync::Arc;

use rustix::fs::{fstat, ftruncate};

use super::consumer::Consumer;
use super::error::QueueError;
use super::header::QueueHeader;
use super::producer::Producer;
use crate::config::QueueConfig;
use crate::shm::area::validate_capacity;
use crate::shm::{AllocError, CircularArea, Creator, Opener, Region, Segment, page_size, round_up};
use crate::trace::debug;

/// Bytes a backing file needs for a queue of `capacity` bytes: one header
/// page followed by the page-rounded data region.
pub fn shm_size(capacity: usize) -> usize {
    page_size() + round_up(capacity)
}

/// Readable bytes between two offsets.
#[inline]
pub(crate) fn occupancy(write: u32, read: u32) -> usize {
    write.wrapping_sub(read) as usize
}

/// Wake instrumentation kept by each role handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Times this role parked in the kernel.
    pub waits: u64,
    /// Wake calls issued by this role's commits.
    pub wakes: u64,
    /// Commits that saw the peer's pending request but did not satisfy it.
    pub elided_wakes: u64,
}

/// A shared-memory byte pipe: one header plus one double-mapped data area.
///
/// The queue owns the mappings and, for [`create_named`](Self::create_named),
/// the segment name. It is turned into role handles with [`split`](Self::split)
/// (both roles in this process) or [`into_producer`](Self::into_producer) /
/// [`into_consumer`](Self::into_consumer) (one role per process).
///
/// Attachments are not counted: each process drops its own mappings, and
/// exactly one producer and one consumer may exist across all of them.
pub struct SpscQueue {
    header: Region,
    area: CircularArea,
    spin_limit: u32,
    segment: Option<Segment<Creator>>,
}

impl SpscQueue {
    /// Creates an anonymous queue of `capacity` bytes with default settings.
    ///
    /// The memory is shared with children created by `fork` after this call.
    pub fn create_anonymous(capacity: usize) -> Result<Self, AllocError> {
        Self::anonymous(&QueueConfig::new(capacity))
    }

    /// Creates an anonymous queue from `config`.
    pub fn anonymous(config: &QueueConfig) -> Result<Self, AllocError> {
        config.validate()?;

        let header = Region::anonymous(size_of::<QueueHeader>())?;
        // If this fails, `header` is unmapped on the way out.
        let area = CircularArea::anonymous(config.capacity, &config.memfd_name)?;

        let queue = Self {
            header,
            area,
            spin_limit: config.spin_limit,
            segment: None,
        };
        queue.header().init(config.capacity);

        debug!(capacity = config.capacity, "created anonymous queue");
        Ok(queue)
    }

    /// Creates a queue in a new named POSIX segment with default settings.
    ///
    /// The name is unlinked when the returned queue drops; peers that already
    /// attached keep working.
    pub fn create_named(path: &str, capacity: usize) -> Result<Self, AllocError> {
        Self::named(path, &QueueConfig::new(capacity))
    }

    /// Creates a queue in a new named POSIX segment from `config`.
    pub fn named(path: &str, config: &QueueConfig) -> Result<Self, AllocError> {
        config.validate()?;

        let segment = Segment::<Creator>::create(path, shm_size(config.capacity) as u64)?;
        let mut queue = Self::create_in(&segment, config)?;
        queue.segment = Some(segment);
        Ok(queue)
    }

    /// Lays out a fresh queue in the file behind `fd`.
    ///
    /// The file is resized to [`shm_size`] and its header reset, so any
    /// previous content is discarded. Other processes holding the descriptor
    /// can then [`attach`](Self::attach).
    pub fn create_in<Fd: AsFd>(fd: Fd, config: &QueueConfig) -> Result<Self, AllocError> {
        config.validate()?;
        let fd = fd.as_fd();

        ftruncate(fd, shm_size(config.capacity) as u64).map_err(AllocError::posix("ftruncate"))?;

        let header = Region::map(fd, page_size(), 0)?;
        let area = CircularArea::map(fd, config.capacity, page_size() as u64)?;

        let queue = Self {
            header,
            area,
            spin_limit: config.spin_limit,
            segment: None,
        };
        queue.header().init(config.capacity);

        debug!(capacity = config.capacity, "created queue in descriptor");
        Ok(queue)
    }

    /// Maps an existing queue from the file behind `fd`.
    ///
    /// The capacity comes from the header, or from the file size when the
    /// file was sized by someone else and the header is still zeroed.
    pub fn attach<Fd: AsFd>(fd: Fd) -> Result<Self, AllocError> {
        let fd = fd.as_fd();
        let page = page_size();

        let file_len = fstat(fd).map_err(AllocError::posix("fstat"))?.st_size as u64;
        if file_len <= page as u64 {
            return Err(AllocError::SizeMismatch {
                expected: shm_size(1) as u64,
                actual: file_len,
            });
        }

        let header = Region::map(fd, page, 0)?;
        // SAFETY: The header is all atomics and lives at offset 0.
        let stored = unsafe { header.get::<QueueHeader>() }.capacity();
        let data_len = (file_len - page as u64) as usize;

        let capacity = match stored {
            Some(capacity) => {
                validate_capacity(capacity)?;
                if file_len < shm_size(capacity) as u64 {
                    return Err(AllocError::SizeMismatch {
                        expected: shm_size(capacity) as u64,
                        actual: file_len,
                    });
                }
                capacity
            }
            None => {
                validate_capacity(data_len)?;
                data_len
            }
        };

        let area = CircularArea::map(fd, capacity, page as u64)?;

        debug!(capacity, file_len, "attached queue");
        Ok(Self {
            header,
            area,
            spin_limit: QueueConfig::default().spin_limit,
            segment: None,
        })
    }

    /// Opens a queue created by [`create_named`](Self::create_named) in
    /// another process.
    pub fn open_named(path: &str) -> Result<Self, AllocError> {
        let segment = Segment::<Opener>::open(path)?;
        // The descriptor closes when `segment` drops; the mappings stay.
        Self::attach(&segment)
    }

    /// Overrides the busy re-check count of this process's handles.
    #[must_use]
    pub fn with_spin_limit(mut self, spins: u32) -> Self {
        self.spin_limit = spins;
        self
    }

    /// Hands both roles to this process.
    pub fn split(self) -> (Producer, Consumer) {
        let shared = Arc::new(self);
        (Producer::new(Arc::clone(&shared)), Consumer::new(shared))
    }

    /// Keeps only the writing role, e.g. in one process of a fork pair.
    pub fn into_producer(self) -> Producer {
        Producer::new(Arc::new(self))
    }

    /// Keeps only the reading role.
    pub fn into_consumer(self) -> Consumer {
        Consumer::new(Arc::new(self))
    }

    /// Data capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.area.capacity()
    }

    /// Bytes committed by the writer and not yet consumed.
    #[inline]
    pub fn len(&self) -> usize {
        let header = self.header();
        occupancy(header.write_offset.read(), header.read_offset.read()).min(self.capacity())
    }

    /// Bytes the writer could reserve right now.
    #[inline]
    pub fn free_space(&self) -> usize {
        self.capacity() - self.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    #[inline]
    pub(crate) fn header(&self) -> &QueueHeader {
        // SAFETY: The region was mapped for a QueueHeader and every field is
        // an atomic, so any content is valid.
        unsafe { self.header.get::<QueueHeader>() }
    }

    #[inline]
    pub(crate) fn area(&self) -> &CircularArea {
        &self.area
    }

    #[inline]
    pub(crate) fn spin_limit(&self) -> u32 {
        self.spin_limit
    }

    /// Rejects single transfers that could never fit.
    #[inline]
    pub(crate) fn check_request(&self, requested: usize) -> Result<usize, QueueError> {
        let capacity = self.capacity();
        if requested > capacity {
            return Err(QueueError::ExceedsCapacity {
                requested,
                capacity,
            });
        }
        Ok(capacity)
    }
}

impl Drop for SpscQueue {
    fn drop(&mut self) {
        debug!(
            capacity = self.capacity(),
            named = self.segment.is_some(),
            "releasing queue mappings"
        );
    }
}

impl std::fmt::Debug for SpscQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpscQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("spin_limit", &self.spin_limit)
            .field("segment", &self.segment)
            .finish()
    }
}
