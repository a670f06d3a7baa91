//! Cache-line sized atomic counters that double as wait channels.
//!
//! A [`SharedCounter`] has exactly one mutating role (the writer owns
//! `write_offset`, the reader owns `read_offset`) and is read by both. The
//! counter word is also the futex word, so the peer can sleep until it moves
//! without a separate mutex/condvar pair.

use std::sync::atomic::{AtomicU32, Ordering};

use super::futex;

/// Monotonic 32-bit wrapping counter on its own cache line.
#[repr(C)]
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct SharedCounter {
    value: AtomicU32,
}

impl SharedCounter {
    pub const fn new(value: u32) -> Self {
        Self {
            value: AtomicU32::new(value),
        }
    }

    /// Acquire load; pairs with the owner's release in [`increment`](Self::increment).
    #[inline]
    pub fn read(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Relaxed load, for the owning role reading back its own counter.
    #[inline]
    pub fn read_own(&self) -> u32 {
        self.value.load(Ordering::Relaxed)
    }

    /// Adds `delta` with release ordering and returns the previous value.
    ///
    /// Every write made before the call (in particular the bytes copied into
    /// the ring) is visible to a peer that observes the new value.
    #[inline]
    pub fn increment(&self, delta: u32) -> u32 {
        self.value.fetch_add(delta, Ordering::Release)
    }

    /// Release store of an absolute value.
    #[inline]
    pub fn write(&self, value: u32) {
        self.value.store(value, Ordering::Release);
    }

    /// Sleeps while the counter still equals `expected`.
    #[inline]
    pub fn wait(&self, expected: u32) {
        futex::wait(&self.value, expected);
    }

    /// Wakes one thread sleeping in [`wait`](Self::wait).
    #[inline]
    pub fn wake(&self) -> usize {
        futex::wake(&self.value, 1)
    }
}

/// Size of the request a blocked role is waiting to satisfy, 0 when idle.
///
/// Only a hint for the peer's wake decision; accessed with relaxed ordering
/// and ordered by the fences around it.
#[repr(C)]
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct PendingSize {
    value: AtomicU32,
}

impl PendingSize {
    pub const fn new() -> Self {
        Self {
            value: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.value.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn set(&self, bytes: usize) {
        self.value.store(bytes as u32, Ordering::Relaxed);
    }

    #[inline]
    pub fn clear(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}
