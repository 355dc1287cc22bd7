//! Shutdown gate and in-flight accounting.

use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    Condvar, Mutex,
};

/// Sentinel added to the in-flight counter at termination. Large enough to
/// dominate any realistic live-request count, so a negative counter always
/// means "stopping".
pub(crate) const WATERMARK: i64 = -i64::MAX;

/// Admission gate plus in-flight request counter.
///
/// A single signed counter serves both purposes: while the engine is open the
/// counter is the number of accepted-but-unfinished requests; termination
/// adds [`WATERMARK`], driving it negative so that admission flips off in the
/// same atomic operation that would have accepted the request.
pub(crate) struct RequestControl {
    in_flight: AtomicI64,
    stopping: AtomicBool,
    gate: Mutex<()>,
    drained: Condvar,
}

/// `await_termination` was called while the engine was still accepting work.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct NotStopping;

impl RequestControl {
    pub(crate) fn new() -> Self {
        Self {
            in_flight: AtomicI64::new(0),
            stopping: AtomicBool::new(false),
            gate: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    /// Tries to account one more request. Returns `false` once termination
    /// has been requested.
    ///
    /// The counter is incremented optimistically and re-checked: a concurrent
    /// [`request_termination`](Self::request_termination) may add the
    /// watermark between the initial load and the increment. A losing
    /// increment is handed straight back through
    /// [`request_complete`](Self::request_complete) so the drained-equality
    /// check stays exact.
    pub(crate) fn should_process_request(&self) -> bool {
        if self.in_flight.load(Ordering::Acquire) < 0 {
            return false;
        }
        let count = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        if count > 0 {
            true
        } else {
            self.request_complete();
            false
        }
    }

    /// Closes admission. Idempotent; already-admitted requests keep running.
    pub(crate) fn request_termination(&self) {
        if self
            .stopping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.in_flight.fetch_add(WATERMARK, Ordering::AcqRel);
        // A waiter that checked before the watermark landed re-checks under
        // the gate lock, so no wakeup can be lost here; still, an engine
        // stopped with nothing in flight should not wait for a completion
        // that will never come.
        if self.in_flight.load(Ordering::Acquire) == WATERMARK {
            let _gate = self.lock_gate();
            self.drained.notify_all();
        }
    }

    /// Accounts one finished request.
    pub(crate) fn request_complete(&self) {
        let count = self.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
        if count == WATERMARK {
            let _gate = self.lock_gate();
            self.drained.notify_all();
        }
    }

    /// Blocks until every admitted request has completed. Fails unless
    /// [`request_termination`](Self::request_termination) happened first.
    pub(crate) fn await_termination(&self) -> Result<(), NotStopping> {
        if !self.stopping.load(Ordering::Acquire) {
            return Err(NotStopping);
        }
        let mut gate = self.lock_gate();
        while self.in_flight.load(Ordering::Acquire) != WATERMARK {
            gate = self
                .drained
                .wait(gate)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Number of accepted-but-unfinished requests, stopping or not.
    pub(crate) fn active_request_count(&self) -> i64 {
        let count = self.in_flight.load(Ordering::Acquire);
        if count >= 0 {
            count
        } else {
            count - WATERMARK
        }
    }

    fn lock_gate(&self) -> std::sync::MutexGuard<'_, ()> {
        self.gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn counts_admissions_and_completions() {
        let control = RequestControl::new();

        assert!(control.should_process_request());
        assert!(control.should_process_request());
        assert_eq!(control.active_request_count(), 2);

        control.request_complete();
        assert_eq!(control.active_request_count(), 1);
    }

    #[test]
    fn termination_closes_admission() {
        let control = RequestControl::new();
        assert!(control.should_process_request());

        control.request_termination();
        assert!(!control.should_process_request());
        assert!(!control.should_process_request());
        // The admitted request is still accounted for.
        assert_eq!(control.active_request_count(), 1);
    }

    #[test]
    fn termination_is_idempotent() {
        let control = RequestControl::new();
        control.request_termination();
        control.request_termination();
        assert_eq!(control.active_request_count(), 0);
    }

    #[test]
    fn await_before_termination_fails() {
        let control = RequestControl::new();
        assert_eq!(control.await_termination(), Err(NotStopping));
    }

    #[test]
    fn await_returns_once_drained() {
        let control = Arc::new(RequestControl::new());
        assert!(control.should_process_request());
        assert!(control.should_process_request());
        control.request_termination();

        let waiter = {
            let control = Arc::clone(&control);
            thread::spawn(move || control.await_termination())
        };

        thread::sleep(Duration::from_millis(20));
        control.request_complete();
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        control.request_complete();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(control.active_request_count(), 0);
    }

    #[test]
    fn await_with_nothing_in_flight_returns_immediately() {
        let control = RequestControl::new();
        control.request_termination();
        assert_eq!(control.await_termination(), Ok(()));
    }

    #[test]
    fn rejected_admissions_do_not_skew_the_count() {
        // Admissions racing the termination flip must leave no residue in
        // the counter, or the drained check would never hold.
        let control = Arc::new(RequestControl::new());
        let admitters: Vec<_> = (0..8)
            .map(|_| {
                let control = Arc::clone(&control);
                thread::spawn(move || {
                    let mut admitted = 0u32;
                    for _ in 0..1_000 {
                        if control.should_process_request() {
                            admitted += 1;
                        }
                    }
                    admitted
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(1));
        control.request_termination();

        let admitted: u32 = admitters.into_iter().map(|t| t.join().unwrap()).sum();
        for _ in 0..admitted {
            control.request_complete();
        }

        assert_eq!(control.active_request_count(), 0);
        assert_eq!(control.await_termination(), Ok(()));
    }
}
