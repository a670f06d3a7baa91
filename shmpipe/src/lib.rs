//! Shared-memory byte pipes between one writer and one reader.
//!
//! ```
//! use shmpipe::SpscQueue;
//!
//! let (mut tx, mut rx) = SpscQueue::create_anonymous(4096)?.split();
//!
//! let writer = std::thread::spawn(move || {
//!     for i in 0u32..100 {
//!         tx.write_value(&i).unwrap();
//!     }
//! });
//!
//! for i in 0u32..100 {
//!     assert_eq!(rx.read_value::<u32>().unwrap(), i);
//! }
//! writer.join().unwrap();
//! # Ok::<(), shmpipe::AllocError>(())
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("shmpipe relies on memfd and futex and only builds on Linux");

pub mod config;
pub mod plain;
pub mod shm;
pub mod spsc;
pub mod sync;
mod trace;

pub use config::QueueConfig;
pub use plain::Plain;
pub use shm::{AllocError, MAX_CAPACITY};
pub use spsc::{Consumer, Producer, QueueError, SpscQueue, Stats, shm_size};
pub use trace::init_tracing;
