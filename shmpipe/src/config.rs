//! Queue construction settings.

use crate::shm::AllocError;
use crate::shm::area::validate_capacity;

/// Default capacity of a queue built from [`QueueConfig::default`].
pub const DEFAULT_CAPACITY: usize = 64 * 1024;

/// Default number of busy re-checks before a blocking call parks.
pub const DEFAULT_SPIN_LIMIT: u32 = 64;

/// Configuration for creating a queue.
///
/// # Example
///
/// ```
/// use shmpipe::{QueueConfig, SpscQueue};
///
/// let config = QueueConfig::new(1 << 20).spin_limit(0);
/// let queue = SpscQueue::anonymous(&config)?;
/// assert_eq!(queue.capacity(), 1 << 20);
/// # Ok::<(), shmpipe::AllocError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Data capacity in bytes. Must be a power of two, at most
    /// [`MAX_CAPACITY`](crate::MAX_CAPACITY).
    pub capacity: usize,
    /// How many times a blocking call re-checks its condition with
    /// `spin_loop` before it publishes its request and sleeps in the kernel.
    /// Zero parks straight away.
    pub spin_limit: u32,
    /// Debug name of the memfd behind anonymous queues (shows up in
    /// `/proc/<pid>/maps`).
    pub memfd_name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            spin_limit: DEFAULT_SPIN_LIMIT,
            memfd_name: "shmpipe".to_string(),
        }
    }
}

impl QueueConfig {
    /// Default settings with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn spin_limit(mut self, spins: u32) -> Self {
        self.spin_limit = spins;
        self
    }

    #[must_use]
    pub fn memfd_name(mut self, name: impl Into<String>) -> Self {
        self.memfd_name = name.into();
        self
    }

    /// Checks the capacity without allocating anything.
    pub fn validate(&self) -> Result<(), AllocError> {
        validate_capacity(self.capacity)
    }
}
