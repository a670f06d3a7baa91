//! Single-producer single-consumer byte queue over shared memory.
//!
//! ```text
//! file offset 0            page            page + round_up(capacity)
//!             +------------+---------------------------+
//!             |   header   |           data            |
//!             +------------+---------------------------+
//!
//! virtual     base                base + span           base + 2 * span
//!             +-------------------+---------------------+
//!             |  data (mapping 1) |  data (mapping 2)   |
//!             +-------------------+---------------------+
//! ```
//!
//! The data pages are mapped twice back to back, so any transfer of up to
//! `capacity` bytes is one contiguous slice even when it wraps. The writer
//! owns `write_offset` and the reader owns `read_offset`; both are wrapping
//! 32-bit byte counters and their difference is the number of readable bytes.
//!
//! A blocked role records how many bytes it needs in the header before it
//! sleeps. The peer only issues a wake when its commit is the one that makes
//! that request satisfiable, so a steady stream of small commits costs no
//! system calls on either side.

mod consumer;
mod error;
mod header;
mod producer;
mod queue;

pub use consumer::Consumer;
pub use error::QueueError;
pub use producer::Producer;
pub use queue::{SpscQueue, Stats, shm_size};
