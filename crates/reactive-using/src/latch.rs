//! Single-use terminal latch.

#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU32, Ordering};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU32, Ordering};

const OPEN: u32 = 0;
const FIRED: u32 = 1;

/// A flag that can be fired exactly once.
///
/// Every path that may release a subscription's resource (cancel, error,
/// completion, synchronous exhaustion) races on the same latch; the single
/// `OPEN -> FIRED` compare-and-swap linearizes exactly one winner.
///
/// Under the `loom` feature the atomic comes from `loom`, so the latch must
/// then only be used inside `loom::model`.
#[derive(Debug)]
pub struct TerminalLatch {
    state: AtomicU32,
}

impl TerminalLatch {
    /// Creates an open latch.
    pub fn new() -> Self {
        Self {
            state: AtomicU32::new(OPEN),
        }
    }

    /// Attempts the `OPEN -> FIRED` transition.
    ///
    /// Returns `true` for exactly one caller over the latch's lifetime.
    #[inline]
    pub fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(OPEN, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `true` once some caller has won [`try_fire`](Self::try_fire).
    #[inline]
    pub fn is_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }
}

impl Default for TerminalLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_fires_once() {
        let latch = TerminalLatch::new();
        assert!(!latch.is_fired());
        assert!(latch.try_fire());
        assert!(latch.is_fired());
        assert!(!latch.try_fire());
        assert!(latch.is_fired());
    }

    #[test]
    fn test_single_winner_across_threads() {
        const THREADS: usize = 8;

        for _ in 0..100 {
            let latch = Arc::new(TerminalLatch::new());
            let winners = Arc::new(AtomicUsize::new(0));
            let barrier = Arc::new(Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let latch = Arc::clone(&latch);
                    let winners = Arc::clone(&winners);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        if latch.try_fire() {
                            winners.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                })
                .collect();

            for h in handles {
                h.join().unwrap();
            }
            assert_eq!(winners.load(Ordering::SeqCst), 1);
        }
    }
}
