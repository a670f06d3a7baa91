//! Wait/wake coordination between the two roles of a queue.
//!
//! Everything here works across processes: the atomic words live in shared
//! memory and the futex calls use the shared (non-private) variant.

pub mod counter;
pub mod futex;

pub use counter::{PendingSize, SharedCounter};
