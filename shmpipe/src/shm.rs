//! Shared memory building blocks: page-granular regions, the double-mapped
//! circular area, and named segments for cross-process bootstrap.

pub mod alloc;
pub mod area;
pub mod segment;

pub use alloc::{AllocError, Region, page_size, round_up};
pub use area::{CircularArea, MAX_CAPACITY};
pub use segment::{Creator, Opener, Segment, SegmentMode};
