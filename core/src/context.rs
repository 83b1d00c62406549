//! Workload, actor, and phase contexts
//!
//! Contexts give actor producers typed access to configuration values and to
//! the workload's shared collaborators (orchestrator, metrics registry,
//! database client) while actors are being constructed. Actors are expected
//! to read configuration and grab handles in their constructors and retain
//! copies, not to hold onto contexts at runtime.
//!
//! Key lookup is layered: a [`PhaseContext`] first consults its own phase
//! block and then falls back to the enclosing actor block, so per-actor
//! defaults apply to every phase unless a phase overrides them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use mongodb::sync::Client;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::actor::{ActorId, ActorVector, Cast};
use crate::config::{self, WorkloadConfig};
use crate::error::{Error, Result};
use crate::metrics::{Counter, Gauge, Registry, Timer};
use crate::orchestrator::{Orchestrator, PhaseNumber};
use crate::phase::IterationCompletionCheck;

/// Top-level context shared by every actor in a workload.
pub struct WorkloadContext {
    config: WorkloadConfig,
    orchestrator: Arc<Orchestrator>,
    registry: Registry,
    client: Client,
    rng: Mutex<StdRng>,
    next_actor_id: AtomicU32,
    sealed: AtomicBool,
}

impl WorkloadContext {
    /// Construct the workload context and every actor the document asks for.
    ///
    /// Producers run eagerly, one actor block at a time, so all configuration
    /// errors surface here, before any thread is spawned. After this returns
    /// the context is sealed: [`WorkloadContext::create_rng`] stops handing
    /// out generators so runs stay reproducible.
    pub fn build(
        config: WorkloadConfig,
        registry: Registry,
        orchestrator: Arc<Orchestrator>,
        mongo_uri: &str,
        cast: &Cast,
    ) -> Result<(Arc<WorkloadContext>, ActorVector)> {
        let seed = config.random_seed()?;
        let client = Client::with_uri_str(mongo_uri)?;
        let blocks = config.actor_blocks()?;

        let workload = Arc::new(WorkloadContext {
            config,
            orchestrator,
            registry,
            client,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            next_actor_id: AtomicU32::new(0),
            sealed: AtomicBool::new(false),
        });

        let mut actors: ActorVector = Vec::new();
        for block in blocks {
            let context = ActorContext::new(block, Arc::clone(&workload))?;
            let type_name: String = context.get("Type")?;
            let producer = cast.producer(&type_name).ok_or_else(|| {
                Error::invalid_configuration(format!(
                    "actor '{}': unknown actor type '{}'",
                    context.name(),
                    type_name
                ))
            })?;
            let produced = producer.produce(&context)?;
            tracing::debug!(
                actor = context.name(),
                actor_type = %type_name,
                instances = produced.len(),
                "constructed actors"
            );
            actors.extend(produced);
        }

        workload.sealed.store(true, Ordering::Release);
        tracing::info!(actors = actors.len(), seed, "workload constructed");
        Ok((workload, actors))
    }

    /// The parsed workload document.
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Handle to the shared orchestrator.
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    /// The workload's metrics registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Handle to the shared MongoDB client. Cloning is cheap; the client
    /// pools connections internally.
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Derive a seeded random number generator.
    ///
    /// Only legal while the workload is being constructed; afterwards the
    /// derivation order (and with it reproducibility) could depend on thread
    /// scheduling.
    pub fn create_rng(&self) -> Result<StdRng> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::invalid_configuration(
                "random number generators can only be created during workload construction",
            ));
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(StdRng::seed_from_u64(rng.next_u64()))
    }

    /// Hand out the next actor id.
    pub fn next_actor_id(&self) -> ActorId {
        self.next_actor_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for WorkloadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadContext")
            .field("orchestrator", &self.orchestrator)
            .field("sealed", &self.sealed.load(Ordering::Acquire))
            .finish()
    }
}

/// One `Actors:` block of the workload document.
#[derive(Debug)]
pub struct ActorContext {
    name: String,
    config: Value,
    workload: Arc<WorkloadContext>,
    phases: BTreeMap<PhaseNumber, PhaseContext>,
}

impl ActorContext {
    /// Wrap an actor block, constructing a [`PhaseContext`] per phase.
    ///
    /// `Name` is required. Phase numbers default to the block's index within
    /// `Phases`; a duplicate resolved phase number is invalid.
    pub fn new(config: Value, workload: Arc<WorkloadContext>) -> Result<Self> {
        if !config.is_mapping() {
            return Err(Error::invalid_configuration(
                "each actor block must be a mapping",
            ));
        }
        let name: String = config::get_required(&config, "Name", "actor block")?;
        let phases = Self::construct_phase_contexts(&config, &name)?;
        Ok(Self {
            name,
            config,
            workload,
            phases,
        })
    }

    fn construct_phase_contexts(
        config: &Value,
        name: &str,
    ) -> Result<BTreeMap<PhaseNumber, PhaseContext>> {
        let mut out = BTreeMap::new();
        let Some(raw) = config.get("Phases") else {
            return Ok(out);
        };
        let Value::Sequence(blocks) = raw else {
            return Err(Error::invalid_configuration(format!(
                "actor '{name}': 'Phases' must be a sequence of phase blocks"
            )));
        };

        for (index, block) in blocks.iter().enumerate() {
            if !block.is_mapping() {
                return Err(Error::invalid_configuration(format!(
                    "actor '{name}': phase block {index} must be a mapping"
                )));
            }
            let scope = format!("actor '{name}' phase block {index}");
            let number = match config::get_opt::<i64>(block, "Phase", &scope)? {
                Some(explicit) if explicit < 0 => {
                    return Err(Error::invalid_configuration(format!(
                        "{scope}: phase number must be non-negative, got {explicit}"
                    )));
                }
                Some(explicit) => explicit as PhaseNumber,
                None => index as PhaseNumber,
            };
            let phase = PhaseContext::new(number, block.clone(), config.clone(), name);
            if out.insert(number, phase).is_some() {
                return Err(Error::invalid_configuration(format!(
                    "actor '{name}': duplicate phase number {number}"
                )));
            }
        }
        Ok(out)
    }

    /// The actor's configured `Name`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The enclosing workload context.
    pub fn workload(&self) -> &Arc<WorkloadContext> {
        &self.workload
    }

    /// Handle to the shared orchestrator.
    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.workload.orchestrator()
    }

    /// This actor's phase contexts, keyed by phase number. Empty when the
    /// block has no `Phases`.
    pub fn phases(&self) -> &BTreeMap<PhaseNumber, PhaseContext> {
        &self.phases
    }

    /// Typed access to a required actor-level key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        config::get_required(&self.config, key, &format!("actor '{}'", self.name))
    }

    /// Typed access to an optional actor-level key.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        config::get_opt(&self.config, key, &format!("actor '{}'", self.name))
    }

    /// Number of identical instances to produce for this block (`Threads`,
    /// default 1).
    pub fn threads(&self) -> Result<u32> {
        let threads: i64 = self.get_opt("Threads")?.unwrap_or(1);
        if threads < 1 {
            return Err(Error::invalid_configuration(format!(
                "actor '{}': 'Threads' must be at least 1, got {threads}",
                self.name
            )));
        }
        Ok(threads as u32)
    }

    /// Handle to the shared MongoDB client.
    pub fn client(&self) -> Client {
        self.workload.client()
    }

    /// A timer named for this actor instance, e.g. `Insert.id-3.insert`.
    pub fn timer(&self, operation: &str, id: ActorId) -> Timer {
        self.workload.registry().timer(&self.metrics_name(operation, id))
    }

    /// A counter named for this actor instance.
    pub fn counter(&self, operation: &str, id: ActorId) -> Counter {
        self.workload
            .registry()
            .counter(&self.metrics_name(operation, id))
    }

    /// A gauge named for this actor instance.
    pub fn gauge(&self, operation: &str, id: ActorId) -> Gauge {
        self.workload.registry().gauge(&self.metrics_name(operation, id))
    }

    fn metrics_name(&self, operation: &str, id: ActorId) -> String {
        format!("{}.id-{}.{}", self.name, id, operation)
    }
}

/// One phase block within an actor block.
///
/// Lookups fall back to the actor block for keys the phase does not set.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    number: PhaseNumber,
    config: Value,
    actor_config: Value,
    scope: String,
}

impl PhaseContext {
    fn new(number: PhaseNumber, config: Value, actor_config: Value, actor_name: &str) -> Self {
        Self {
            number,
            config,
            actor_config,
            scope: format!("actor '{actor_name}' phase {number}"),
        }
    }

    /// The resolved phase number.
    pub fn number(&self) -> PhaseNumber {
        self.number
    }

    fn raw_opt(&self, key: &str) -> Option<&Value> {
        self.config.get(key).or_else(|| self.actor_config.get(key))
    }

    /// Typed access to a required key, inheriting from the actor block.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.get_opt(key)?.ok_or_else(|| {
            Error::invalid_configuration(format!("{}: missing required key '{key}'", self.scope))
        })
    }

    /// Typed access to an optional key, inheriting from the actor block.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.raw_opt(key) {
            None => Ok(None),
            Some(found) => serde_yaml::from_value(found.clone()).map(Some).map_err(|e| {
                Error::invalid_configuration(format!("{}: key '{key}': {e}", self.scope))
            }),
        }
    }

    /// Build this phase's termination check from its `Repeat` and `Duration`
    /// keys. Negative values are invalid.
    pub fn iteration_check(&self) -> Result<IterationCompletionCheck> {
        let repeat = match self.get_opt::<i64>("Repeat")? {
            Some(repeat) if repeat < 0 => {
                return Err(Error::invalid_configuration(format!(
                    "{}: 'Repeat' must be non-negative, got {repeat}",
                    self.scope
                )));
            }
            Some(repeat) => Some(repeat as u64),
            None => None,
        };
        let duration = match self.raw_opt("Duration") {
            Some(value) => Some(config::duration_from_value(value, &self.scope)?),
            None => None,
        };
        Ok(IterationCompletionCheck::new(duration, repeat))
    }
}
