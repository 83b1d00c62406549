//! An actor that inserts and then removes a document each iteration, timing
//! the two operations separately. Useful for exercising a server's write
//! path without growing the collection.

use mongodb::bson::{doc, Document};
use mongodb::sync::Collection;

use mongoload_core::actor::{Actor, ActorId, ActorProducer, ActorVector};
use mongoload_core::context::{ActorContext, PhaseContext};
use mongoload_core::error::Result;
use mongoload_core::metrics::Timer;
use mongoload_core::phase::PhaseLoop;

struct PhaseConfig {
    collection: Collection<Document>,
    document: Document,
}

impl PhaseConfig {
    fn new(phase: &PhaseContext, client: &mongodb::sync::Client, id: ActorId) -> Result<Self> {
        let database: String = phase.get("Database")?;
        let collection: String = phase.get("Collection")?;
        Ok(Self {
            collection: client.database(&database).collection(&collection),
            // Each instance works on its own document, keyed by actor id.
            document: doc! { "_id": id as i64 },
        })
    }
}

/// Inserts a document keyed by its actor id, then deletes it again.
pub struct InsertRemove {
    name: String,
    id: ActorId,
    insert_timer: Timer,
    remove_timer: Timer,
    phases: PhaseLoop<PhaseConfig>,
}

impl InsertRemove {
    fn new(context: &ActorContext) -> Result<Self> {
        let id = context.workload().next_actor_id();
        let client = context.client();
        Ok(Self {
            name: context.name().to_string(),
            id,
            insert_timer: context.timer("insert", id),
            remove_timer: context.timer("remove", id),
            phases: PhaseLoop::from_context(context, |phase| {
                PhaseConfig::new(phase, &client, id)
            })?,
        })
    }
}

impl Actor for InsertRemove {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<()> {
        let id = self.id;
        let insert_timer = self.insert_timer.clone();
        let remove_timer = self.remove_timer.clone();
        self.phases.run(|phase, config| {
            for _ in config.iterations() {
                tracing::debug!(actor = id, phase, "inserting and removing");
                {
                    let stopwatch = insert_timer.start();
                    config.collection.insert_one(&config.document, None)?;
                    stopwatch.report();
                }
                {
                    let stopwatch = remove_timer.start();
                    config.collection.delete_many(config.document.clone(), None)?;
                    stopwatch.report();
                }
            }
            Ok(())
        })
    }
}

/// Producer for `Type: InsertRemove` blocks.
pub struct InsertRemoveProducer;

impl ActorProducer for InsertRemoveProducer {
    fn name(&self) -> &str {
        "InsertRemove"
    }

    fn produce(&self, context: &ActorContext) -> Result<ActorVector> {
        let mut out: ActorVector = Vec::new();
        for _ in 0..context.threads()? {
            out.push(Box::new(InsertRemove::new(context)?));
        }
        Ok(out)
    }
}
