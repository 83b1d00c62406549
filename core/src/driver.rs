//! Workload driver: one worker thread per actor
//!
//! The driver owns the last mile of a workload run: it registers one
//! required orchestrator token per actor, spawns a named thread per actor,
//! and joins them all. A worker that returns an error or panics aborts the
//! orchestrator from inside its own thread, so every other actor is released
//! from whichever barrier it is waiting on instead of deadlocking.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::actor::ActorVector;
use crate::error::Result;
use crate::metrics::Registry;
use crate::orchestrator::Orchestrator;

/// Outcome of a workload run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverSummary {
    /// Number of actor threads run.
    pub actors: usize,
    /// Number of actors that failed or panicked.
    pub failures: usize,
    /// True if the orchestrator ended up aborted.
    pub aborted: bool,
}

/// Spawns and joins the workload's actor threads.
pub struct WorkloadDriver {
    orchestrator: Arc<Orchestrator>,
    registry: Registry,
}

impl WorkloadDriver {
    /// Create a driver for one workload run.
    pub fn new(orchestrator: Arc<Orchestrator>, registry: Registry) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    /// Run every actor to completion and return a summary.
    ///
    /// With zero actors this returns immediately. Worker failures do not fail
    /// the run as a whole: they are counted in the summary and logged, and
    /// the first one aborts the orchestrator. The caller decides how to
    /// surface them.
    pub fn run(&self, actors: ActorVector) -> Result<DriverSummary> {
        if actors.is_empty() {
            tracing::info!("workload has no actors; nothing to run");
            return Ok(DriverSummary::default());
        }

        let count = actors.len();
        self.orchestrator.add_required_tokens(count as u32);
        tracing::info!(
            actors = count,
            max_phase = self.orchestrator.max_phase(),
            "starting workload"
        );

        let active = self.registry.counter("ActiveActors");
        let mut handles: Vec<JoinHandle<bool>> = Vec::with_capacity(count);
        for (index, actor) in actors.into_iter().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let active = active.clone();
            let spawned = thread::Builder::new()
                .name(format!("actor-{index}"))
                .spawn(move || run_worker(index, actor, &orchestrator, &active));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    // Workers already running hold barrier tokens for the
                    // ones that never started; release them before bailing.
                    tracing::error!(worker = index, error = %error, "failed to spawn worker");
                    self.orchestrator.abort();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(error.into());
                }
            }
        }

        let mut failures = 0;
        for handle in handles {
            match handle.join() {
                Ok(true) => {}
                Ok(false) => failures += 1,
                Err(_) => failures += 1,
            }
        }

        let summary = DriverSummary {
            actors: count,
            failures,
            aborted: self.orchestrator.is_aborted(),
        };
        tracing::info!(
            actors = summary.actors,
            failures = summary.failures,
            aborted = summary.aborted,
            abort_requests = self.orchestrator.abort_requests(),
            "workload finished"
        );
        Ok(summary)
    }
}

/// Body of one worker thread. Returns true on clean completion.
fn run_worker(
    index: usize,
    mut actor: Box<dyn crate::actor::Actor>,
    orchestrator: &Orchestrator,
    active: &crate::metrics::Counter,
) -> bool {
    let name = actor.name().to_string();
    active.incr();
    tracing::debug!(worker = index, actor = %name, "worker started");

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| actor.run()));
    active.decr();

    match outcome {
        Ok(Ok(())) => {
            tracing::debug!(worker = index, actor = %name, "worker finished");
            true
        }
        Ok(Err(error)) => {
            tracing::error!(
                worker = index,
                actor = %name,
                error = %error,
                "actor failed; aborting workload"
            );
            orchestrator.abort();
            false
        }
        Err(_) => {
            tracing::error!(worker = index, actor = %name, "actor panicked; aborting workload");
            orchestrator.abort();
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::error::Error;
    use crate::phase::{ActorPhase, IterationCompletionCheck, PhaseLoop, PhaseMap};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant};

    /// Test actor that loops a counter through its configured phases.
    struct CountingActor {
        phases: PhaseLoop<()>,
        iterations: Arc<AtomicU64>,
        fail_in_phase: Option<u32>,
    }

    impl CountingActor {
        fn new(
            orchestrator: &Arc<Orchestrator>,
            repeats: &[(u32, u64)],
            iterations: Arc<AtomicU64>,
        ) -> Self {
            let mut map: PhaseMap<()> = PhaseMap::new();
            for &(phase, repeat) in repeats {
                map.insert(
                    phase,
                    ActorPhase::new(
                        Arc::clone(orchestrator),
                        IterationCompletionCheck::new(None, Some(repeat)),
                        phase,
                        (),
                    ),
                );
            }
            Self {
                phases: PhaseLoop::new(Arc::clone(orchestrator), map),
                iterations,
                fail_in_phase: None,
            }
        }
    }

    impl Actor for CountingActor {
        fn name(&self) -> &str {
            "Counting"
        }

        fn run(&mut self) -> Result<()> {
            let iterations = Arc::clone(&self.iterations);
            let fail_in_phase = self.fail_in_phase;
            self.phases.run(|phase, config| {
                if fail_in_phase == Some(phase) {
                    return Err(Error::runtime("injected failure"));
                }
                for _ in config.iterations() {
                    iterations.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            })
        }
    }

    struct PanickingActor {
        phases: PhaseLoop<()>,
    }

    impl Actor for PanickingActor {
        fn name(&self) -> &str {
            "Panicking"
        }

        fn run(&mut self) -> Result<()> {
            self.phases.run(|_, _| panic!("boom"))
        }
    }

    #[test]
    fn test_zero_actors_returns_immediately() {
        let orchestrator = Arc::new(Orchestrator::new());
        let driver = WorkloadDriver::new(Arc::clone(&orchestrator), Registry::new());
        let summary = driver.run(Vec::new()).unwrap();
        assert_eq!(summary.actors, 0);
        assert_eq!(summary.failures, 0);
        assert!(!summary.aborted);
    }

    #[test]
    fn test_actors_run_to_completion() {
        let orchestrator = Arc::new(Orchestrator::new());
        let iterations = Arc::new(AtomicU64::new(0));
        let actors: ActorVector = (0..4)
            .map(|_| {
                Box::new(CountingActor::new(
                    &orchestrator,
                    &[(0, 10), (1, 5)],
                    Arc::clone(&iterations),
                )) as Box<dyn Actor>
            })
            .collect();

        let driver = WorkloadDriver::new(Arc::clone(&orchestrator), Registry::new());
        let summary = driver.run(actors).unwrap();

        assert_eq!(summary.actors, 4);
        assert_eq!(summary.failures, 0);
        assert!(!summary.aborted);
        assert_eq!(iterations.load(Ordering::Relaxed), 4 * 15);
        assert_eq!(orchestrator.current_phase(), 2);
    }

    #[test]
    fn test_failing_actor_aborts_the_workload() {
        let orchestrator = Arc::new(Orchestrator::new());
        let iterations = Arc::new(AtomicU64::new(0));

        // The healthy actor would block for a very long time; only the abort
        // triggered by its peer's failure lets the run finish promptly.
        let healthy = CountingActor::new(&orchestrator, &[(0, u64::MAX)], Arc::clone(&iterations));
        let mut failing =
            CountingActor::new(&orchestrator, &[(0, 1)], Arc::clone(&iterations));
        failing.fail_in_phase = Some(0);

        let driver = WorkloadDriver::new(Arc::clone(&orchestrator), Registry::new());
        let started = Instant::now();
        let summary = driver
            .run(vec![Box::new(healthy) as Box<dyn Actor>, Box::new(failing)])
            .unwrap();

        assert_eq!(summary.failures, 1);
        assert!(summary.aborted);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_panicking_actor_is_caught_and_aborts() {
        let orchestrator = Arc::new(Orchestrator::new());
        let iterations = Arc::new(AtomicU64::new(0));

        let healthy = CountingActor::new(&orchestrator, &[(0, u64::MAX)], Arc::clone(&iterations));
        let mut map: PhaseMap<()> = PhaseMap::new();
        map.insert(
            0,
            ActorPhase::new(
                Arc::clone(&orchestrator),
                IterationCompletionCheck::new(None, Some(1)),
                0,
                (),
            ),
        );
        let panicking = PanickingActor {
            phases: PhaseLoop::new(Arc::clone(&orchestrator), map),
        };

        let driver = WorkloadDriver::new(Arc::clone(&orchestrator), Registry::new());
        let summary = driver
            .run(vec![Box::new(healthy) as Box<dyn Actor>, Box::new(panicking)])
            .unwrap();

        assert_eq!(summary.failures, 1);
        assert!(summary.aborted);
    }

    #[test]
    fn test_active_actor_counter_returns_to_zero() {
        let orchestrator = Arc::new(Orchestrator::new());
        let registry = Registry::new();
        let iterations = Arc::new(AtomicU64::new(0));
        let actors: ActorVector = (0..2)
            .map(|_| {
                Box::new(CountingActor::new(
                    &orchestrator,
                    &[(0, 1)],
                    Arc::clone(&iterations),
                )) as Box<dyn Actor>
            })
            .collect();

        let driver = WorkloadDriver::new(orchestrator, registry.clone());
        driver.run(actors).unwrap();
        assert_eq!(registry.counter("ActiveActors").total(), 0);
    }
}
