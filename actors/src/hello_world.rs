//! An actor that logs a message per iteration. Needs no database, which
//! makes it the go-to type for trying out workload files and for exercising
//! the harness itself.

use mongoload_core::actor::{Actor, ActorId, ActorProducer, ActorVector};
use mongoload_core::context::ActorContext;
use mongoload_core::error::Result;
use mongoload_core::metrics::Counter;
use mongoload_core::phase::PhaseLoop;

struct PhaseConfig {
    message: String,
}

/// Logs its configured `Message` once per iteration.
pub struct HelloWorld {
    name: String,
    id: ActorId,
    operations: Counter,
    phases: PhaseLoop<PhaseConfig>,
}

impl HelloWorld {
    fn new(context: &ActorContext) -> Result<Self> {
        let id = context.workload().next_actor_id();
        Ok(Self {
            name: context.name().to_string(),
            id,
            operations: context.counter("operations", id),
            phases: PhaseLoop::from_context(context, |phase| {
                Ok(PhaseConfig {
                    message: phase
                        .get_opt("Message")?
                        .unwrap_or_else(|| "Hello, world!".to_string()),
                })
            })?,
        })
    }
}

impl Actor for HelloWorld {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<()> {
        let id = self.id;
        let operations = self.operations.clone();
        self.phases.run(|phase, config| {
            for _ in config.iterations() {
                tracing::info!(actor = id, phase, "{}", config.message);
                operations.incr();
            }
            Ok(())
        })
    }
}

/// Producer for `Type: HelloWorld` blocks.
pub struct HelloWorldProducer;

impl ActorProducer for HelloWorldProducer {
    fn name(&self) -> &str {
        "HelloWorld"
    }

    fn produce(&self, context: &ActorContext) -> Result<ActorVector> {
        let mut out: ActorVector = Vec::new();
        for _ in 0..context.threads()? {
            out.push(Box::new(HelloWorld::new(context)?));
        }
        Ok(out)
    }
}
