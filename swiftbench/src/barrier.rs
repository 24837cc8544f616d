//! The start barrier that releases all workers into the timed phase together.
//!
//! [`StartBarrier`] counts arrivals rather than waiting for a fixed delay. Every worker holds a
//! [`Ticket`] issued before its thread is spawned. A worker that completes setup calls
//! [`Ticket::wait`], which registers its arrival and blocks until release. A worker that fails
//! during setup (or panics) simply drops its ticket, which registers a pass-through arrival, so the
//! barrier never waits for a worker that will not arrive.
//!
//! The orchestrator blocks in [`StartBarrier::wait_for_arrivals`] until every ticket has arrived
//! and then calls [`StartBarrier::release`], which wakes all waiters at once.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Outcome observed by every party once the barrier opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Release {
    /// The barrier was released at the given instant; timed work may start.
    Go(Instant),
    /// The run was aborted; waiters must skip timed work.
    Aborted,
}

/// Arrival counts at the moment all expected workers have arrived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Arrivals {
    /// Workers that completed setup and are waiting for release.
    pub waiting: usize,
    /// Workers that passed through without waiting, usually after a setup failure.
    pub passed: usize,
}

impl Arrivals {
    /// The total number of arrivals.
    pub fn total(&self) -> usize {
        self.waiting + self.passed
    }
}

#[derive(Debug, Default)]
struct State {
    arrivals: Arrivals,
    outcome: Option<Release>,
}

/// An arrival-counting rendezvous shared by all workers and the orchestrator.
#[derive(Debug)]
pub struct StartBarrier {
    expected: usize,
    state: Mutex<State>,
    arrived: Condvar,
    released: Condvar,
}

impl StartBarrier {
    /// Creates a barrier that opens once `expected` tickets have arrived.
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            state: Mutex::new(State::default()),
            arrived: Condvar::new(),
            released: Condvar::new(),
        }
    }

    /// Issues a ticket for one worker.
    ///
    /// Tickets should be issued before the worker's thread is spawned, so that a failure to spawn
    /// still counts as an arrival.
    pub fn ticket(&self) -> Ticket<'_> {
        Ticket {
            barrier: self,
            arrived: false,
        }
    }

    /// Returns the arrivals registered so far.
    pub fn arrivals(&self) -> Arrivals {
        self.lock().arrivals
    }

    /// Blocks until all expected workers have arrived or the barrier was aborted.
    pub fn wait_for_arrivals(&self) -> Arrivals {
        let state = self
            .arrived
            .wait_while(self.lock(), |state| {
                state.arrivals.total() < self.expected && state.outcome.is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);
        state.arrivals
    }

    /// Opens the barrier and wakes every waiting worker.
    ///
    /// Returns the outcome all waiters observe. Releasing an aborted or already released barrier
    /// returns the earlier outcome.
    pub fn release(&self) -> Release {
        let mut state = self.lock();
        let outcome = *state.outcome.get_or_insert_with(|| Release::Go(Instant::now()));
        drop(state);

        self.released.notify_all();
        outcome
    }

    /// Aborts the run: current and future waiters return [`Release::Aborted`] immediately.
    ///
    /// Has no effect on a barrier that has already been released.
    pub fn abort(&self) {
        let mut state = self.lock();
        state.outcome.get_or_insert(Release::Aborted);
        drop(state);

        self.released.notify_all();
        self.arrived.notify_all();
    }

    fn arrive(&self, waiting: bool) -> MutexGuard<'_, State> {
        let mut state = self.lock();
        if waiting {
            state.arrivals.waiting += 1;
        } else {
            state.arrivals.passed += 1;
        }

        if state.arrivals.total() >= self.expected {
            self.arrived.notify_all();
        }
        state
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The state only holds counters, so a poisoned lock is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A worker's right to pass the [`StartBarrier`] exactly once.
///
/// Dropping a ticket without calling [`wait`](Self::wait) registers a pass-through arrival.
#[derive(Debug)]
#[must_use = "dropping a ticket registers a pass-through arrival"]
pub struct Ticket<'a> {
    barrier: &'a StartBarrier,
    arrived: bool,
}

impl Ticket<'_> {
    /// Registers this worker's arrival and blocks until the barrier is released or aborted.
    pub fn wait(mut self) -> Release {
        self.arrived = true;
        let state = self.barrier.arrive(true);
        let state = self
            .barrier
            .released
            .wait_while(state, |state| state.outcome.is_none())
            .unwrap_or_else(PoisonError::into_inner);

        state.outcome.unwrap_or(Release::Aborted)
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.arrived {
            self.arrived = true;
            drop(self.barrier.arrive(false));
        }
    }
}
