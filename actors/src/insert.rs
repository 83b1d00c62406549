//! An actor that inserts one document per iteration.

use mongodb::bson::Document;
use mongodb::sync::Collection;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use mongoload_core::actor::{Actor, ActorId, ActorProducer, ActorVector};
use mongoload_core::context::{ActorContext, PhaseContext};
use mongoload_core::error::Result;
use mongoload_core::metrics::{Counter, Timer};
use mongoload_core::phase::PhaseLoop;

use crate::generators::DocumentGenerator;

struct PhaseConfig {
    collection: Collection<Document>,
    document: DocumentGenerator,
}

impl PhaseConfig {
    fn new(phase: &PhaseContext, client: &mongodb::sync::Client, rng: StdRng) -> Result<Self> {
        let database: String = phase.get("Database")?;
        let collection: String = phase.get("Collection")?;
        let template: serde_yaml::Value = phase.get("Document")?;
        Ok(Self {
            collection: client.database(&database).collection(&collection),
            document: DocumentGenerator::new(template, rng)?,
        })
    }
}

/// Inserts a document generated from its `Document` template into
/// `Database`/`Collection` once per iteration, timing each insert. The
/// template may use generator directives (see [`crate::generators`]), so
/// every iteration can insert a distinct document.
pub struct Insert {
    name: String,
    id: ActorId,
    insert_timer: Timer,
    operations: Counter,
    phases: PhaseLoop<PhaseConfig>,
}

impl Insert {
    fn new(context: &ActorContext) -> Result<Self> {
        let id = context.workload().next_actor_id();
        let client = context.client();
        // Every phase gets its own generator stream derived from the
        // actor's seeded generator, keeping runs reproducible.
        let mut rng = context.workload().create_rng()?;
        Ok(Self {
            name: context.name().to_string(),
            id,
            insert_timer: context.timer("insert", id),
            operations: context.counter("operations", id),
            phases: PhaseLoop::from_context(context, |phase| {
                PhaseConfig::new(phase, &client, StdRng::seed_from_u64(rng.next_u64()))
            })?,
        })
    }
}

impl Actor for Insert {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<()> {
        let id = self.id;
        let insert_timer = self.insert_timer.clone();
        let operations = self.operations.clone();
        self.phases.run(|phase, config| {
            for _ in config.iterations() {
                let stopwatch = insert_timer.start();
                let document = config.document.generate()?;
                config.collection.insert_one(&document, None)?;
                stopwatch.report();
                operations.incr();
                tracing::debug!(actor = id, phase, "inserted document");
            }
            Ok(())
        })
    }
}

/// Producer for `Type: Insert` blocks.
pub struct InsertProducer;

impl ActorProducer for InsertProducer {
    fn name(&self) -> &str {
        "Insert"
    }

    fn produce(&self, context: &ActorContext) -> Result<ActorVector> {
        let mut out: ActorVector = Vec::new();
        for _ in 0..context.threads()? {
            out.push(Box::new(Insert::new(context)?));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use crate::default_cast;
    use mongodb::bson::doc;
    use mongoload_core::config::WorkloadConfig;
    use mongoload_core::context::WorkloadContext;
    use mongoload_core::error::Error;
    use mongoload_core::metrics::Registry;
    use mongoload_core::orchestrator::Orchestrator;
    use std::sync::Arc;

    fn build(yaml: &str) -> mongoload_core::error::Result<usize> {
        let config = WorkloadConfig::parse(yaml)?;
        let (_, actors) = WorkloadContext::build(
            config,
            Registry::new(),
            Arc::new(Orchestrator::new()),
            "mongodb://localhost:27017",
            &default_cast(),
        )?;
        Ok(actors.len())
    }

    #[test]
    fn test_insert_constructs_from_config() {
        let yaml = "
SchemaVersion: 2018-07-01
Actors:
- Name: Inserter
  Type: Insert
  Database: test
  Threads: 2
  Phases:
  - Repeat: 10
    Collection: docs
    Document: { a: 1, nested: { b: hello } }
";
        assert_eq!(build(yaml).unwrap(), 2);
    }

    #[test]
    fn test_insert_accepts_generator_directives() {
        let yaml = "
SchemaVersion: 2018-07-01
RandomSeed: 99
Actors:
- Name: Inserter
  Type: Insert
  Database: test
  Phases:
  - Repeat: 10
    Collection: docs
    Document:
      balance: { ^RandomInt: { min: 0, max: 100 } }
      owner: { ^RandomString: { length: 8 } }
";
        assert_eq!(build(yaml).unwrap(), 1);
    }

    #[test]
    fn test_bad_generator_directive_fails_at_setup() {
        let yaml = "
SchemaVersion: 2018-07-01
Actors:
- Name: Inserter
  Type: Insert
  Database: test
  Phases:
  - Repeat: 1
    Collection: docs
    Document: { n: { ^RandomInt: { min: 9, max: 1 } } }
";
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(err.to_string().contains("greater than max"));
    }

    #[test]
    fn test_insert_requires_a_document() {
        let yaml = "
SchemaVersion: 2018-07-01
Actors:
- Name: Inserter
  Type: Insert
  Database: test
  Phases:
  - Repeat: 1
    Collection: docs
";
        let err = build(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration(_)));
        assert!(err.to_string().contains("Document"));
    }

    #[test]
    fn test_insert_requires_database_and_collection() {
        let yaml = "
SchemaVersion: 2018-07-01
Actors:
- Name: Inserter
  Type: Insert
  Phases:
  - Repeat: 1
    Document: { a: 1 }
";
        assert!(build(yaml).is_err());
    }

    #[test]
    fn test_document_transcoding_from_yaml() {
        let yaml = "
SchemaVersion: 2018-07-01
Actors:
- Name: Inserter
  Type: Insert
  Database: test
  Collection: docs
  Phases:
  - Repeat: 1
    Document: { a: 1, tags: [x, y] }
";
        // Construction succeeds only if the YAML mapping transcodes to BSON;
        // spot-check the shape independently (YAML integers land as 64-bit).
        assert_eq!(build(yaml).unwrap(), 1);
        let value: serde_yaml::Value = serde_yaml::from_str("{ a: 1, tags: [x, y] }").unwrap();
        let document = mongodb::bson::to_document(&value).unwrap();
        assert_eq!(document, doc! { "a": 1_i64, "tags": ["x", "y"] });
    }
}
