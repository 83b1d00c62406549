//! Per-actor phase loops
//!
//! This module provides the machinery an actor uses to walk the workload's
//! shared phase sequence:
//!
//! - [`IterationCompletionCheck`] decides when a single phase's inner loop is
//!   allowed to stop for one actor (minimum iteration count, minimum
//!   duration, or neither, meaning "follow the phase");
//! - [`ActorPhase`] pairs a check with the actor's per-phase configuration
//!   value, built once at setup;
//! - [`PhaseLoop`] maps phase numbers to [`ActorPhase`]s and runs the outer
//!   protocol, interleaving the orchestrator's start and end barriers around
//!   a caller-supplied loop body.
//!
//! ```ignore
//! struct PhaseConfig { collection: Collection<Document> }
//!
//! let mut phases: PhaseLoop<PhaseConfig> =
//!     PhaseLoop::from_context(&context, |phase| {
//!         Ok(PhaseConfig { collection: database.collection(&phase.get("Collection")?) })
//!     })?;
//!
//! phases.run(|_phase, config| {
//!     for _ in config.iterations() {
//!         config.collection.insert_one(&document, None)?;
//!     }
//!     Ok(())
//! })?;
//! ```
//!
//! Phase loops are relatively expensive to construct and should be built at
//! actor-construction time; the per-iteration path touches nothing but two
//! atomics and thread-local state.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::{ActorContext, PhaseContext};
use crate::error::Result;
use crate::orchestrator::{Orchestrator, PhaseNumber};

/// Decides when one actor is done iterating within a single phase.
///
/// A check with at least one bound configured *blocks*: the actor holds the
/// phase open until the bound is met. A check with neither bound is the
/// degenerate non-blocking shape: the inner loop runs freely and stops only
/// when the orchestrator moves past the actor's phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationCompletionCheck {
    min_duration: Option<Duration>,
    min_iterations: Option<u64>,
    blocks: bool,
}

impl IterationCompletionCheck {
    /// Build a check from the phase's bounds. Negative bounds are rejected at
    /// configuration parse time, before values reach this constructor.
    pub fn new(min_duration: Option<Duration>, min_iterations: Option<u64>) -> Self {
        Self {
            min_duration,
            min_iterations,
            blocks: min_duration.is_some() || min_iterations.is_some(),
        }
    }

    /// Reference starting instant for duration accounting.
    ///
    /// `None` when no duration bound is configured, so the clock is never
    /// read for iteration-only loops.
    pub fn reference_start(&self) -> Option<Instant> {
        self.min_duration.map(|_| Instant::now())
    }

    /// True once the loop has met every configured bound.
    ///
    /// The iteration bound is tested first so the clock is only consulted
    /// once the count already permits termination.
    pub fn is_done(&self, started_at: Option<Instant>, iteration: u64) -> bool {
        self.min_iterations.map_or(true, |min| iteration >= min)
            && match (self.min_duration, started_at) {
                (Some(min), Some(started_at)) => started_at.elapsed() >= min,
                _ => true,
            }
    }

    /// True iff this check holds its phase open.
    pub fn blocks(&self) -> bool {
        self.blocks
    }
}

/// One actor's configuration for one phase.
///
/// Holds the user-supplied per-phase value `T` (accessible through `Deref`
/// and `DerefMut`), the iteration check, and the phase number. Built once at
/// setup by [`PhaseLoop::from_context`]; the value is then mutated freely by
/// the phase's inner loop body.
pub struct ActorPhase<T> {
    orchestrator: Arc<Orchestrator>,
    check: IterationCompletionCheck,
    phase: PhaseNumber,
    value: T,
}

impl<T> ActorPhase<T> {
    /// Pair a per-phase value with its termination check.
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        check: IterationCompletionCheck,
        phase: PhaseNumber,
        value: T,
    ) -> Self {
        Self {
            orchestrator,
            check,
            phase,
            value,
        }
    }

    /// The phase this configuration belongs to.
    pub fn phase(&self) -> PhaseNumber {
        self.phase
    }

    /// True iff this actor holds the phase open.
    pub fn blocks(&self) -> bool {
        self.check.blocks()
    }

    /// The termination check for this phase.
    pub fn check(&self) -> &IterationCompletionCheck {
        &self.check
    }

    /// Begin the phase's inner loop.
    ///
    /// The returned iterator owns everything it needs, so the loop body can
    /// mutate the per-phase value through this `ActorPhase` while iterating.
    pub fn iterations(&self) -> Iterations {
        Iterations {
            orchestrator: Arc::clone(&self.orchestrator),
            check: self.check,
            phase: self.phase,
            started_at: self.check.reference_start(),
            iteration: 0,
        }
    }
}

impl<T> Deref for ActorPhase<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for ActorPhase<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// The inner loop of a single phase.
///
/// Yields one `()` per permitted iteration; the termination predicate is
/// evaluated at the top of each step. A blocking loop stops once its check is
/// satisfied; a non-blocking loop stops as soon as the orchestrator has moved
/// past the phase. Both stop on abort. Each step reads at most the two
/// orchestrator atomics; no locks on this path.
#[derive(Debug)]
pub struct Iterations {
    orchestrator: Arc<Orchestrator>,
    check: IterationCompletionCheck,
    phase: PhaseNumber,
    started_at: Option<Instant>,
    iteration: u64,
}

impl Iterations {
    /// Number of iterations completed so far.
    pub fn completed(&self) -> u64 {
        self.iteration
    }
}

impl Iterator for Iterations {
    type Item = ();

    fn next(&mut self) -> Option<()> {
        if self.orchestrator.is_aborted() {
            return None;
        }
        let done = if self.check.blocks() {
            self.check.is_done(self.started_at, self.iteration)
        } else {
            self.orchestrator.current_phase() != self.phase
        };
        if done {
            None
        } else {
            self.iteration += 1;
            Some(())
        }
    }
}

/// Maps phase numbers to the [`ActorPhase`] to use in each.
pub type PhaseMap<T> = BTreeMap<PhaseNumber, ActorPhase<T>>;

/// One actor's view of the workload's phase sequence.
///
/// Owns the actor's phase map and drives the outer protocol: for every phase
/// the orchestrator runs, including phases this actor is not configured
/// for, the loop arrives at the start barrier, runs the body for configured
/// phases, and arrives at the end barrier, blocking there only when the
/// phase's check blocks.
pub struct PhaseLoop<T> {
    orchestrator: Arc<Orchestrator>,
    phase_map: PhaseMap<T>,
}

impl<T> PhaseLoop<T> {
    /// Build a phase loop from an explicit phase map.
    ///
    /// Registers this actor's phase numbers with the orchestrator so the
    /// workload's total phase count covers them.
    pub fn new(orchestrator: Arc<Orchestrator>, phase_map: PhaseMap<T>) -> Self {
        for &phase in phase_map.keys() {
            orchestrator.phases_at_least_to(phase);
        }
        Self {
            orchestrator,
            phase_map,
        }
    }

    /// Build a phase loop from an actor's context, constructing one `T` per
    /// configured phase with `build`.
    ///
    /// Reads each phase's `Repeat` and `Duration` keys for the iteration
    /// check. An actor with no `Phases` block gets an empty map and
    /// participates in every phase as a non-blocking token.
    pub fn from_context<F>(context: &ActorContext, mut build: F) -> Result<Self>
    where
        F: FnMut(&PhaseContext) -> Result<T>,
    {
        let orchestrator = context.orchestrator();
        let mut phase_map = PhaseMap::new();
        for (&number, phase_context) in context.phases() {
            let check = phase_context.iteration_check()?;
            let value = build(phase_context)?;
            phase_map.insert(
                number,
                ActorPhase::new(Arc::clone(&orchestrator), check, number, value),
            );
        }
        Ok(Self::new(orchestrator, phase_map))
    }

    /// The orchestrator this loop coordinates with.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Immutable view of the phase map.
    pub fn phase_map(&self) -> &PhaseMap<T> {
        &self.phase_map
    }

    /// Walk every phase the orchestrator runs, calling `body` once per phase
    /// this actor is configured for.
    ///
    /// Protocol per phase: arrive at the start barrier (declaring
    /// non-blocking when the upcoming phase is absent from the map or its
    /// check does not block); if non-blocking, immediately report done for
    /// the phase; run the body; then either arrive at the end barrier
    /// (blocking phases) or wait out the phase turnover (non-blocking ones:
    /// re-arriving at the start barrier while the phase is still open could
    /// let the final phase end without this actor). Returns when no phases
    /// remain or the workload aborts.
    ///
    /// A body error propagates immediately; the caller is expected to
    /// escalate by aborting the orchestrator, otherwise the remaining actors
    /// block at the end barrier until someone does.
    pub fn run<F>(&mut self, mut body: F) -> Result<()>
    where
        F: FnMut(PhaseNumber, &mut ActorPhase<T>) -> Result<()>,
    {
        let mut next_phase: PhaseNumber = 0;
        while self.orchestrator.more_phases() {
            let phase = self
                .orchestrator
                .await_phase_start(self.blocks_on(next_phase), 1);
            if self.orchestrator.is_aborted() {
                break;
            }

            let blocks = self.blocks_on(phase);
            if !blocks {
                self.orchestrator.await_phase_end(false, 1);
            }
            if let Some(actor_phase) = self.phase_map.get_mut(&phase) {
                body(phase, actor_phase)?;
            }
            if blocks {
                self.orchestrator.await_phase_end(true, 1);
            } else {
                self.orchestrator.await_phase_turnover(phase);
            }
            next_phase = phase + 1;
        }
        Ok(())
    }

    fn blocks_on(&self, phase: PhaseNumber) -> bool {
        self.phase_map
            .get(&phase)
            .map(ActorPhase::blocks)
            .unwrap_or(false)
    }
}
