//! Phase orchestration for workload actors
//!
//! The [`Orchestrator`] is the single coordinator shared by every actor in a
//! workload. Execution is partitioned into globally numbered phases, and each
//! phase is bounded by a pair of reusable barriers:
//!
//! - the *start* barrier ([`Orchestrator::await_phase_start`]): no actor
//!   enters a phase until every participant has arrived;
//! - the *end* barrier ([`Orchestrator::await_phase_end`]): the phase stays
//!   open until every participant has reported done. Participants that are
//!   non-blocking for a phase report done up front and then loop freely until
//!   the phase turns over; they never extend the phase.
//!
//! The orchestrator also tracks the highest configured phase number (the
//! union over all actors' phase sets) and a sticky abort flag that wakes
//! every waiter and drains all subsequent barrier calls immediately.
//!
//! Internally a single mutex guards the token counters and two condition
//! variables back the two barriers. The current phase and the abort flag are
//! mirrored in atomics so the per-iteration hot path of an actor's inner
//! loop never takes the lock.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Identifies a phase of workload execution. Phase 0 is the initial phase.
pub type PhaseNumber = u32;

/// Token counters guarded by the orchestrator mutex.
#[derive(Debug, Default)]
struct State {
    /// Highest phase number any actor is configured for.
    max_phase: PhaseNumber,
    /// Total participants; must be registered before any barrier call.
    required_tokens: u32,
    /// Arrivals at the start barrier for the upcoming phase.
    awaiting_start: u32,
    /// Bumped each time the start barrier releases. Arrivals for the next
    /// phase can land while the current phase is still open (an actor that
    /// skips a phase turns around immediately), so waiters key off the
    /// generation rather than the open flag.
    start_generation: u64,
    /// Blocking arrivals at the end barrier for the open phase.
    awaiting_end: u32,
    /// Participants that declared themselves non-blocking at the start
    /// barrier and have not yet reported done.
    non_blockers_pending: u32,
    /// Non-blocking participants that have reported done for the open phase.
    non_blockers_done: u32,
    /// True between a start-barrier release and the matching end-barrier
    /// release.
    phase_open: bool,
    /// Number of abort requests received.
    errors: u32,
}

/// Shared barrier coordinator for a workload's phases.
///
/// One instance is created per workload and shared (via `Arc`) by the driver
/// and every actor. All operations take `&self`; the orchestrator is
/// internally synchronized.
pub struct Orchestrator {
    state: Mutex<State>,
    start_cv: Condvar,
    end_cv: Condvar,
    /// Lock-free mirror of the current phase for hot-path reads.
    current_phase: AtomicU32,
    /// Lock-free mirror of the sticky abort flag.
    aborted: AtomicBool,
}

impl Orchestrator {
    /// Create an orchestrator at phase 0 with no registered participants.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            start_cv: Condvar::new(),
            end_cv: Condvar::new(),
            current_phase: AtomicU32::new(0),
            aborted: AtomicBool::new(false),
        }
    }

    // A panicking actor must not wedge the rest of the workload, so lock
    // poisoning is ignored: every mutation below leaves the counters
    // consistent before any panic-prone call.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `count` additional participants.
    ///
    /// Must only be called during setup, before any worker thread has made a
    /// barrier call.
    pub fn add_required_tokens(&self, count: u32) {
        let mut state = self.lock();
        state.required_tokens += count;
    }

    /// Raise the total phase count so it covers `phase`.
    ///
    /// Called by each actor's phase loop at construction; the effective
    /// maximum is the union over all actors' configured phases.
    pub fn phases_at_least_to(&self, phase: PhaseNumber) {
        let mut state = self.lock();
        if phase > state.max_phase {
            state.max_phase = phase;
        }
    }

    /// Non-blocking snapshot of the current phase.
    ///
    /// This is not a synchronization point: observing a phase value here says
    /// nothing about whether other actors have finished their work in the
    /// previous phase.
    pub fn current_phase(&self) -> PhaseNumber {
        self.current_phase.load(Ordering::Acquire)
    }

    /// Highest configured phase number.
    pub fn max_phase(&self) -> PhaseNumber {
        self.lock().max_phase
    }

    /// True once [`Orchestrator::abort`] has been called.
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Number of abort requests received so far.
    pub fn abort_requests(&self) -> u32 {
        self.lock().errors
    }

    /// True while phases remain to run and the workload has not aborted.
    pub fn more_phases(&self) -> bool {
        if self.is_aborted() {
            return false;
        }
        let state = self.lock();
        self.more_phases_locked(&state)
    }

    fn more_phases_locked(&self, state: &State) -> bool {
        !self.aborted.load(Ordering::Acquire)
            && self.current_phase.load(Ordering::Acquire) <= state.max_phase
    }

    /// Arrive at the start barrier for the next phase.
    ///
    /// Adds `add_tokens` arrivals and blocks until every required token has
    /// arrived (or the workload aborts), then returns the phase that just
    /// started. Passing `block_on_this_phase = false` declares the caller
    /// non-blocking for the phase: it must report done for the phase via
    /// `await_phase_end(false, ..)` instead of holding the phase open.
    ///
    /// After the start barrier returns phase `p` anywhere, every write made
    /// by any participant before its matching end-barrier call for `p - 1`
    /// is visible to every participant in `p`.
    pub fn await_phase_start(&self, block_on_this_phase: bool, add_tokens: u32) -> PhaseNumber {
        let mut state = self.lock();
        if self.aborted.load(Ordering::Acquire) {
            return self.current_phase.load(Ordering::Acquire);
        }

        state.awaiting_start += add_tokens;
        if !block_on_this_phase {
            state.non_blockers_pending += add_tokens;
        }
        debug_assert!(state.awaiting_start <= state.required_tokens);
        debug_assert!(state.non_blockers_pending <= state.required_tokens);

        if state.awaiting_start == state.required_tokens {
            // Last arrival: reset the counter before waking anyone so a fast
            // thread cannot race the next phase's arrivals against it.
            debug_assert!(!state.phase_open);
            state.awaiting_start = 0;
            state.start_generation += 1;
            state.phase_open = true;
            tracing::trace!(
                phase = self.current_phase.load(Ordering::Acquire),
                "phase started"
            );
            self.start_cv.notify_all();
        } else {
            let generation = state.start_generation;
            while state.start_generation == generation && !self.aborted.load(Ordering::Acquire) {
                state = self
                    .start_cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        self.current_phase.load(Ordering::Acquire)
    }

    /// Arrive at the end barrier for the open phase.
    ///
    /// A morally blocking caller removes `remove_tokens` tokens and blocks
    /// until the phase turns over: the phase ends once blocking arrivals plus
    /// non-blocking completions account for every required token. A
    /// non-blocking caller (`morally_blocking = false`) only registers as
    /// done for the phase and returns immediately; it must not extend the
    /// phase.
    ///
    /// Returns [`Orchestrator::more_phases`] as of release.
    pub fn await_phase_end(&self, morally_blocking: bool, remove_tokens: u32) -> bool {
        let mut state = self.lock();
        if self.aborted.load(Ordering::Acquire) {
            return false;
        }
        debug_assert!(state.phase_open, "end arrival outside an open phase");

        let entered_phase = self.current_phase.load(Ordering::Acquire);
        if morally_blocking {
            state.awaiting_end += remove_tokens;
        } else {
            state.non_blockers_done += remove_tokens;
            state.non_blockers_pending = state.non_blockers_pending.saturating_sub(remove_tokens);
        }
        debug_assert!(state.awaiting_end + state.non_blockers_done <= state.required_tokens);

        if state.awaiting_end + state.non_blockers_done == state.required_tokens {
            // Last arrival: advance the phase and reset the counters before
            // waking the rest.
            state.awaiting_end = 0;
            state.non_blockers_done = 0;
            state.phase_open = false;
            let next = self.current_phase.fetch_add(1, Ordering::AcqRel) + 1;
            tracing::debug!(
                phase = entered_phase,
                next_phase = next,
                "phase ended"
            );
            self.end_cv.notify_all();
        } else if morally_blocking {
            while self.current_phase.load(Ordering::Acquire) == entered_phase
                && !self.aborted.load(Ordering::Acquire)
            {
                state = self
                    .end_cv
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }

        self.more_phases_locked(&state)
    }

    /// Block until the open phase `phase` has turned over, or the workload
    /// aborts.
    ///
    /// Performs no token accounting. Non-blocking participants that have
    /// already reported done for `phase` wait here before re-arriving at the
    /// start barrier; arriving for the next phase while the current one is
    /// still open would let the workload finish without them.
    pub fn await_phase_turnover(&self, phase: PhaseNumber) {
        let mut state = self.lock();
        while self.current_phase.load(Ordering::Acquire) == phase
            && !self.aborted.load(Ordering::Acquire)
        {
            state = self
                .end_cv
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        drop(state);
    }

    /// Abort the workload.
    ///
    /// Sticky and idempotent: every waiter on either barrier is woken, every
    /// subsequent barrier call returns immediately, and
    /// [`Orchestrator::more_phases`] is false from here on. Abort is the
    /// normal escalation path for a failing actor, not an error in itself.
    pub fn abort(&self) {
        let mut state = self.lock();
        state.errors += 1;
        if !self.aborted.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                phase = self.current_phase.load(Ordering::Acquire),
                "workload aborted; waking all phase waiters"
            );
        }
        self.start_cv.notify_all();
        self.end_cv.notify_all();
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Orchestrator")
            .field("current_phase", &self.current_phase.load(Ordering::Acquire))
            .field("max_phase", &state.max_phase)
            .field("required_tokens", &state.required_tokens)
            .field("aborted", &self.aborted.load(Ordering::Acquire))
            .finish()
    }
}
