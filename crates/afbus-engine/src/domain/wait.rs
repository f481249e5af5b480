//! Interruptible, deadline-bounded condition waits
//!
//! A blocked operation may be waiting on another connection's condition
//! variable, which nobody notifies when *this* connection is interrupted.
//! Waits therefore sleep in short slices and re-check the interrupt flag.

use afbus_types::{BusError, BusResult};
use parking_lot::{Condvar, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

pub(crate) struct Waiter<'a> {
    interrupt: &'a AtomicBool,
    deadline: Option<Instant>,
    slice: Duration,
}

impl<'a> Waiter<'a> {
    pub(crate) fn new(interrupt: &'a AtomicBool, timeout: Option<Duration>, slice: Duration) -> Self {
        Self {
            interrupt,
            deadline: timeout.map(|t| Instant::now() + t),
            slice,
        }
    }

    /// Sleep once on `cond`. The caller re-checks its own predicate.
    ///
    /// # Errors
    ///
    /// `Interrupted` if the interrupt flag was raised (the flag is consumed),
    /// `TimedOut` once the deadline has passed.
    pub(crate) fn wait<T>(&self, cond: &Condvar, guard: &mut MutexGuard<'_, T>) -> BusResult<()> {
        self.check()?;
        let nap = match self.deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(self.slice),
            None => self.slice,
        };
        cond.wait_for(guard, nap);
        self.check()
    }

    fn check(&self) -> BusResult<()> {
        if self.interrupt.swap(false, Ordering::AcqRel) {
            return Err(BusError::Interrupted);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(BusError::TimedOut);
        }
        Ok(())
    }
}
