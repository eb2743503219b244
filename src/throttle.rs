//! Bounded worker admission with first-error latching.
//!
//! A [`Throttle`] caps the number of in-flight work units and remembers the
//! first error any unit reports. Once an error is latched, `acquire`
//! returns `false` so pending units short-circuit instead of starting.

use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct State {
    in_flight: usize,
    error: Option<Error>,
}

/// Bounded counter plus latched first error.
#[derive(Debug)]
pub struct Throttle {
    capacity: usize,
    state: Mutex<State>,
    cond: Condvar,
}

impl Throttle {
    /// Create a throttle admitting at most `capacity` concurrent units.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(State::default()),
            cond: Condvar::new(),
        }
    }

    /// Block until a slot is free, then claim it.
    ///
    /// Returns `false` without claiming a slot when an error has been
    /// latched; the caller must skip its work unit (and not call
    /// [`Self::release`]).
    pub fn acquire(&self) -> bool {
        let mut state = self.state.lock().expect("throttle lock poisoned");
        while state.error.is_none() && state.in_flight >= self.capacity {
            state = self.cond.wait(state).expect("throttle lock poisoned");
        }
        if state.error.is_some() {
            return false;
        }
        state.in_flight += 1;
        true
    }

    /// Release a slot claimed by [`Self::acquire`].
    pub fn release(&self) {
        let mut state = self.state.lock().expect("throttle lock poisoned");
        debug_assert!(state.in_flight > 0, "release without acquire");
        state.in_flight = state.in_flight.saturating_sub(1);
        self.cond.notify_all();
    }

    /// Latch `error` if no earlier error is held.
    pub fn report(&self, error: Error) {
        let mut state = self.state.lock().expect("throttle lock poisoned");
        if state.error.is_none() {
            state.error = Some(error);
        }
        self.cond.notify_all();
    }

    /// True while no error has been latched; pipelines consult this at
    /// record boundaries as their cancellation signal.
    pub fn ok(&self) -> bool {
        self.state
            .lock()
            .expect("throttle lock poisoned")
            .error
            .is_none()
    }

    /// Wait for all in-flight units to finish, then surface the first
    /// latched error, if any.
    pub fn wait(&self) -> Result<()> {
        let mut state = self.state.lock().expect("throttle lock poisoned");
        while state.in_flight > 0 {
            state = self.cond.wait(state).expect("throttle lock poisoned");
        }
        match state.error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn caps_concurrency() {
        let throttle = Arc::new(Throttle::new(2));
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let throttle = throttle.clone();
            let peak = peak.clone();
            let current = current.clone();
            handles.push(thread::spawn(move || {
                assert!(throttle.acquire());
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(std::time::Duration::from_millis(5));
                current.fetch_sub(1, Ordering::SeqCst);
                throttle.release();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert!(throttle.wait().is_ok());
    }

    #[test]
    fn first_error_wins_and_short_circuits() {
        let throttle = Throttle::new(4);
        assert!(throttle.acquire());
        throttle.report(Error::Cancelled);
        throttle.report(Error::Usage("second".into()));
        throttle.release();

        assert!(!throttle.acquire());
        assert!(!throttle.ok());
        assert!(matches!(throttle.wait(), Err(Error::Cancelled)));
    }

    #[test]
    fn wait_blocks_until_units_finish() {
        let throttle = Arc::new(Throttle::new(1));
        assert!(throttle.acquire());
        let waiter = {
            let throttle = throttle.clone();
            thread::spawn(move || throttle.wait().is_ok())
        };
        thread::sleep(std::time::Duration::from_millis(5));
        throttle.release();
        assert!(waiter.join().unwrap());
    }
}
