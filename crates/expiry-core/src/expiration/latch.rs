//! Sweep de-duplication latch

use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const RERUN_PENDING: u8 = 2;

/// Observable state of a [`SweepLatch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchState {
    Idle,
    Running,
    RerunPending,
}

/// At-most-one-sweep latch with a single coalesced rerun
///
/// `Idle -> Running` on start. A start attempt while running moves to
/// `RerunPending`; further attempts leave it there, so any number of
/// overlapping requests collapse into one rerun. `finish` always returns to
/// `Idle` and reports whether a rerun was requested.
#[derive(Debug)]
pub struct SweepLatch {
    state: AtomicU8,
}

impl Default for SweepLatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepLatch {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
        }
    }

    /// Try to begin a sweep
    ///
    /// Returns `true` if the caller now owns the sweep. Otherwise a rerun
    /// has been recorded and the caller should return immediately.
    pub fn try_start(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match current {
                IDLE => RUNNING,
                RUNNING => RERUN_PENDING,
                _ => return false,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return current == IDLE,
                Err(actual) => current = actual,
            }
        }
    }

    /// End the current sweep; returns whether a rerun was requested
    pub fn finish(&self) -> bool {
        self.state.swap(IDLE, Ordering::AcqRel) == RERUN_PENDING
    }

    /// Drop a pending rerun request, if any
    pub fn cancel_rerun(&self) {
        let _ = self.state.compare_exchange(
            RERUN_PENDING,
            RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub fn state(&self) -> LatchState {
        match self.state.load(Ordering::Acquire) {
            IDLE => LatchState::Idle,
            RUNNING => LatchState::Running,
            _ => LatchState::RerunPending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_finish() {
        let latch = SweepLatch::new();
        assert_eq!(latch.state(), LatchState::Idle);
        assert!(latch.try_start());
        assert_eq!(latch.state(), LatchState::Running);
        assert!(!latch.finish());
        assert_eq!(latch.state(), LatchState::Idle);
    }

    #[test]
    fn test_overlapping_starts_coalesce() {
        let latch = SweepLatch::new();
        assert!(latch.try_start());
        for _ in 0..5 {
            assert!(!latch.try_start());
        }
        assert_eq!(latch.state(), LatchState::RerunPending);
        assert!(latch.finish());
        assert_eq!(latch.state(), LatchState::Idle);
        assert!(latch.try_start());
    }

    #[test]
    fn test_cancel_rerun() {
        let latch = SweepLatch::new();
        latch.cancel_rerun();
        assert_eq!(latch.state(), LatchState::Idle);

        assert!(latch.try_start());
        assert!(!latch.try_start());
        latch.cancel_rerun();
        assert_eq!(latch.state(), LatchState::Running);
        assert!(!latch.finish());
    }

    #[test]
    fn test_concurrent_starts_have_one_owner() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicUsize;

        let latch = Arc::new(SweepLatch::new());
        let owners = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = latch.clone();
                let owners = owners.clone();
                std::thread::spawn(move || {
                    if latch.try_start() {
                        owners.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(owners.load(Ordering::SeqCst), 1);
    }
}
