//! Actor trait, producers, and the producer registry
//!
//! An actor is a single-threaded unit of workload execution. The flow is:
//!
//! 1. the workload document is loaded and validated;
//! 2. each actor block's `Type` selects an [`ActorProducer`] from the
//!    [`Cast`], which turns the block into one or more actor instances
//!    (reading and validating configuration as it goes);
//! 3. the driver spawns one thread per actor and calls [`Actor::run`];
//! 4. all threads are joined before shutdown.
//!
//! Most actors hold a [`crate::phase::PhaseLoop`] and use it for all flow
//! control so they coordinate cleanly with every other actor in the
//! workload.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::context::ActorContext;
use crate::error::Result;

/// Identifies one actor instance within a workload. Assigned from the
/// workload context's counter during construction, before any thread starts.
pub type ActorId = u32;

/// A single-threaded unit of workload execution.
pub trait Actor: Send {
    /// The actor's configured name (shared by all instances of its block).
    fn name(&self) -> &str;

    /// The actor's main loop. Runs on a dedicated thread.
    ///
    /// An error returned here is fatal for this actor; the driver escalates
    /// it by aborting the orchestrator so the rest of the workload can shut
    /// down instead of waiting at a barrier forever.
    fn run(&mut self) -> Result<()>;
}

/// The actors produced for a workload.
pub type ActorVector = Vec<Box<dyn Actor>>;

/// Builds actor instances from an actor block.
///
/// Producers are registered in a [`Cast`] under the `Type` name they handle
/// and are invoked once per matching block. Configuration should be read and
/// validated here, at setup, not inside [`Actor::run`].
pub trait ActorProducer: Send + Sync {
    /// The `Type` value this producer handles.
    fn name(&self) -> &str;

    /// Produce the actor instances for one block. Honors the block's
    /// `Threads` count by producing that many instances.
    fn produce(&self, context: &ActorContext) -> Result<ActorVector>;
}

/// Registry of actor producers, keyed by type name.
#[derive(Clone, Default)]
pub struct Cast {
    producers: BTreeMap<String, Arc<dyn ActorProducer>>,
}

impl Cast {
    /// Create an empty cast.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a producer under its type name. A later registration for the
    /// same name replaces the earlier one.
    pub fn register(&mut self, producer: Arc<dyn ActorProducer>) {
        self.producers.insert(producer.name().to_string(), producer);
    }

    /// Look up the producer for a type name.
    pub fn producer(&self, name: &str) -> Option<&Arc<dyn ActorProducer>> {
        self.producers.get(name)
    }

    /// Registered type names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Cast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cast")
            .field("producers", &self.producers.keys().collect::<Vec<_>>())
            .finish()
    }
}
