//! Block-until-changed and wake-one on a 32-bit atomic word.
//!
//! Thin layer over the Linux futex. The words live in `MAP_SHARED` memory, so
//! the non-private futex variant is used and waiters in other processes are
//! woken too.
//!
//! Both calls are infallible from the caller's point of view. A wait can
//! return without the word having changed (signal, spurious wake), so the
//! caller always re-checks its condition in a loop.

use std::sync::atomic::AtomicU32;

use rustix::io::Errno;
use rustix::thread::futex;

use crate::trace::warn;

/// Parks the calling thread while `*word == expected`.
///
/// Returns immediately if the word already differs; the kernel compares the
/// value and enqueues the waiter atomically, so a change made between the
/// caller's last load and this call is never missed.
#[inline]
pub fn wait(word: &AtomicU32, expected: u32) {
    match futex::wait(word, futex::Flags::empty(), expected, None) {
        Ok(()) => {}
        // The value had already changed, or a signal interrupted the wait.
        Err(err) if err == Errno::AGAIN || err == Errno::INTR => {}
        Err(err) => {
            warn!(%err, expected, "futex wait failed");
        }
    }
}

/// Wakes up to `count` threads parked on `word`.
///
/// Returns the number of threads woken; zero when nobody was waiting.
#[inline]
pub fn wake(word: &AtomicU32, count: u32) -> usize {
    match futex::wake(word, futex::Flags::empty(), count) {
        Ok(woken) => woken,
        Err(err) => {
            warn!(%err, count, "futex wake failed");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_returns_when_value_differs() {
        let word = AtomicU32::new(5);
        // Would block forever if the kernel did not compare first.
        wait(&word, 4);
    }

    #[test]
    fn test_wake_without_waiters() {
        let word = AtomicU32::new(0);
        assert_eq!(wake(&word, 1), 0);
    }

    #[test]
    fn test_wait_is_woken_by_store_and_wake() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    wait(&word, 0);
                }
                word.load(Ordering::Acquire)
            })
        };

        thread::sleep(Duration::from_millis(20));
        word.store(1, Ordering::Release);
        wake(&word, 1);

        assert_eq!(waiter.join().unwrap(), 1);
    }
}
