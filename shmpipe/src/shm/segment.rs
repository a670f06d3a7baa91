//! Named POSIX shared memory segments.
//!
//! A [`Segment`] is the bootstrap path for unrelated processes: one side
//! creates a named object and sizes it, the other opens it by name, and both
//! hand the descriptor to [`SpscQueue`](crate::SpscQueue). The segment only
//! owns the name and descriptor; the queue maps it.
//!
//! Cleanup follows the mode parameter:
//!
//! | Mode | On drop |
//! |------|---------|
//! | [`Creator`] | closes the descriptor and unlinks the name |
//! | [`Opener`] | closes the descriptor, the name persists |
//!
//! The kernel frees the pages once the name is unlinked and every process
//! has unmapped them, so a creator may drop its segment while peers still
//! have the queue mapped.
//!
//! After a crash the name can leak; remove it before creating afresh:
//!
//! ```no_run
//! let _ = rustix::shm::unlink("/my-pipe");
//! ```

use std::marker::PhantomData;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use rustix::fs::{Mode, fstat, ftruncate};
use rustix::shm;

use super::alloc::AllocError;
use crate::trace::debug;

/// Cleanup behavior of a [`Segment`].
pub trait SegmentMode {
    /// Whether dropping the segment removes its name.
    const SHOULD_UNLINK: bool;
}

/// Typestate marker: created the segment, unlinks the name on drop.
#[derive(Debug)]
pub struct Creator;
impl SegmentMode for Creator {
    const SHOULD_UNLINK: bool = true;
}

/// Typestate marker: opened an existing segment, leaves the name alone.
#[derive(Debug)]
pub struct Opener;
impl SegmentMode for Opener {
    const SHOULD_UNLINK: bool = false;
}

const POSIX_NAME_MAX: usize = 255;

/// Validates a name for portable `shm_open` use: a leading `/`, no other
/// slashes, at most 255 bytes.
pub fn validate_shm_path(path: &str) -> Result<(), AllocError> {
    if !path.starts_with('/') {
        return Err(AllocError::InvalidPath {
            path: path.to_string(),
            reason: "path must start with '/'",
        });
    }

    if path[1..].contains('/') {
        return Err(AllocError::InvalidPath {
            path: path.to_string(),
            reason: "path must not contain additional '/' characters",
        });
    }

    if path.len() > POSIX_NAME_MAX {
        return Err(AllocError::InvalidPath {
            path: path.to_string(),
            reason: "path length must be <= 255 bytes",
        });
    }

    Ok(())
}

/// An open named shared memory object.
pub struct Segment<Mode: SegmentMode> {
    fd: OwnedFd,
    len: u64,
    path: String,
    _mode: PhantomData<Mode>,
}

impl Segment<Creator> {
    /// Creates `path` exclusively and sizes it to `len` bytes of zeros.
    ///
    /// Fails with `EEXIST` if the name is already taken. On any failure after
    /// `shm_open`, the name is unlinked again.
    pub fn create(path: &str, len: u64) -> Result<Self, AllocError> {
        validate_shm_path(path)?;

        let fd = shm::open(
            path,
            shm::OFlags::CREATE | shm::OFlags::EXCL | shm::OFlags::RDWR,
            Mode::RUSR | Mode::WUSR,
        )
        .map_err(AllocError::posix("shm_open"))?;

        // From here on the name is ours; dropping `segment` unlinks it.
        let segment = Self {
            fd,
            len,
            path: path.to_string(),
            _mode: PhantomData,
        };

        ftruncate(&segment.fd, len).map_err(AllocError::posix("ftruncate"))?;

        debug!(path, len, "created shared memory segment");
        Ok(segment)
    }
}

impl Segment<Opener> {
    /// Opens an existing named object read-write.
    pub fn open(path: &str) -> Result<Self, AllocError> {
        validate_shm_path(path)?;

        let fd = shm::open(path, shm::OFlags::RDWR, Mode::empty())
            .map_err(AllocError::posix("shm_open"))?;
        let stat = fstat(&fd).map_err(AllocError::posix("fstat"))?;

        debug!(path, len = stat.st_size, "opened shared memory segment");
        Ok(Self {
            fd,
            len: stat.st_size as u64,
            path: path.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<Mode: SegmentMode> Segment<Mode> {
    /// Size of the object in bytes when it was created or opened.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<Mode: SegmentMode> AsFd for Segment<Mode> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl<Mode: SegmentMode> Drop for Segment<Mode> {
    fn drop(&mut self) {
        if Mode::SHOULD_UNLINK {
            debug!(path = %self.path, "unlinking shared memory segment");
            let _ = shm::unlink(&self.path);
        }
    }
}

impl<Mode: SegmentMode> std::fmt::Debug for Segment<Mode> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("unlink_on_drop", &Mode::SHOULD_UNLINK)
            .finish()
    }
}
