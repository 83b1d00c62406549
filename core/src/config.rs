//! Workload configuration document
//!
//! A workload is described by a YAML document:
//!
//! ```yaml
//! SchemaVersion: 2018-07-01
//! RandomSeed: 12345
//! Actors:
//! - Name: InsertSmallDocs
//!   Type: Insert
//!   Threads: 2
//!   Database: test
//!   Phases:
//!   - Phase: 0
//!     Repeat: 1000
//!     Collection: small
//!     Document: { a: 1 }
//!   - Duration: 1 minute
//!     Collection: small
//!     Document: { a: 1 }
//! ```
//!
//! This module owns parsing and document-level validation. Per-actor and
//! per-phase access goes through the typed-path getters on the context types
//! in [`crate::context`], which layer phase-over-actor key inheritance on top
//! of the raw document.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::error::{Error, Result};

/// The only workload schema version this harness understands.
pub const SCHEMA_VERSION: &str = "2018-07-01";

/// Seed used when the document does not set `RandomSeed`.
pub const DEFAULT_RANDOM_SEED: u64 = 269_849_313_357_703_264;

/// A parsed and version-checked workload document.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    root: Value,
}

impl WorkloadConfig {
    /// Parse a workload document from YAML text.
    ///
    /// Rejects documents that are not mappings or whose `SchemaVersion` is
    /// missing or unknown.
    pub fn parse(text: &str) -> Result<Self> {
        let root: Value = serde_yaml::from_str(text)
            .map_err(|e| Error::invalid_configuration(format!("workload is not valid YAML: {e}")))?;
        if !root.is_mapping() {
            return Err(Error::invalid_configuration(
                "workload document must be a mapping",
            ));
        }

        let version: String = get_required(&root, "SchemaVersion", "workload")?;
        if version != SCHEMA_VERSION {
            return Err(Error::invalid_configuration(format!(
                "unknown schema version '{version}' (expected '{SCHEMA_VERSION}')"
            )));
        }

        Ok(Self { root })
    }

    /// The workload's random seed (`RandomSeed`, defaulting to
    /// [`DEFAULT_RANDOM_SEED`]).
    pub fn random_seed(&self) -> Result<u64> {
        Ok(get_opt(&self.root, "RandomSeed", "workload")?.unwrap_or(DEFAULT_RANDOM_SEED))
    }

    /// The raw actor blocks, in document order. A workload without an
    /// `Actors` key has zero actors.
    pub fn actor_blocks(&self) -> Result<Vec<Value>> {
        match self.root.get("Actors") {
            None => Ok(Vec::new()),
            Some(Value::Sequence(blocks)) => Ok(blocks.clone()),
            Some(_) => Err(Error::invalid_configuration(
                "workload: 'Actors' must be a sequence of actor blocks",
            )),
        }
    }

    /// Typed access to an optional top-level key.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        get_opt(&self.root, key, "workload")
    }
}

/// Interpret a configuration value as a duration.
///
/// Integers are milliseconds; strings go through [`humantime`] (so
/// `"1 minute"`, `"50ms"`, and `"1h 30m"` all work). Negative values are
/// invalid.
pub fn duration_from_value(value: &Value, scope: &str) -> Result<Duration> {
    match value {
        Value::Number(number) => {
            let millis = number.as_i64().ok_or_else(|| {
                Error::invalid_configuration(format!(
                    "{scope}: duration must be a whole number of milliseconds"
                ))
            })?;
            if millis < 0 {
                return Err(Error::invalid_configuration(format!(
                    "{scope}: duration must be non-negative, got {millis}"
                )));
            }
            Ok(Duration::from_millis(millis as u64))
        }
        Value::String(text) => {
            // humantime wants the unit attached to its number; tolerate the
            // spaced form ("1 minute") the schema documents.
            let compact: String = text.split_whitespace().collect();
            humantime::parse_duration(&compact).map_err(|e| {
                Error::invalid_configuration(format!("{scope}: bad duration '{text}': {e}"))
            })
        }
        _ => Err(Error::invalid_configuration(format!(
            "{scope}: duration must be milliseconds or a duration string"
        ))),
    }
}

/// Typed read of an optional key from a mapping node.
pub(crate) fn get_opt<T: DeserializeOwned>(
    node: &Value,
    key: &str,
    scope: &str,
) -> Result<Option<T>> {
    match node.get(key) {
        None => Ok(None),
        Some(found) => serde_yaml::from_value(found.clone()).map(Some).map_err(|e| {
            Error::invalid_configuration(format!("{scope}: key '{key}': {e}"))
        }),
    }
}

/// Typed read of a required key from a mapping node.
pub(crate) fn get_required<T: DeserializeOwned>(node: &Value, key: &str, scope: &str) -> Result<T> {
    get_opt(node, key, scope)?.ok_or_else(|| {
        Error::invalid_configuration(format!("{scope}: missing required key '{key}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_workload() {
        let config = WorkloadConfig::parse("SchemaVersion: 2018-07-01\n").unwrap();
        assert_eq!(config.random_seed().unwrap(), DEFAULT_RANDOM_SEED);
        assert!(config.actor_blocks().unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_schema_version() {
        let err = WorkloadConfig::parse("SchemaVersion: 2017-01-01\n").unwrap_err();
        assert!(err.to_string().contains("schema version"));
    }

    #[test]
    fn test_parse_rejects_missing_schema_version() {
        let err = WorkloadConfig::parse("Actors: []\n").unwrap_err();
        assert!(err.to_string().contains("SchemaVersion"));
    }

    #[test]
    fn test_parse_rejects_non_mapping_document() {
        assert!(WorkloadConfig::parse("- just\n- a\n- list\n").is_err());
    }

    #[test]
    fn test_random_seed_override() {
        let config =
            WorkloadConfig::parse("SchemaVersion: 2018-07-01\nRandomSeed: 42\n").unwrap();
        assert_eq!(config.random_seed().unwrap(), 42);
    }

    #[test]
    fn test_actor_blocks_must_be_a_sequence() {
        let config = WorkloadConfig::parse("SchemaVersion: 2018-07-01\nActors: nope\n").unwrap();
        assert!(config.actor_blocks().is_err());
    }

    #[test]
    fn test_duration_from_integer_millis() {
        let value = serde_yaml::from_str("500").unwrap();
        assert_eq!(
            duration_from_value(&value, "test").unwrap(),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_duration_from_human_readable_string() {
        let value = serde_yaml::from_str("\"1 minute\"").unwrap();
        assert_eq!(
            duration_from_value(&value, "test").unwrap(),
            Duration::from_secs(60)
        );

        let value = serde_yaml::from_str("50ms").unwrap();
        assert_eq!(
            duration_from_value(&value, "test").unwrap(),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_duration_rejects_negative_millis() {
        let value = serde_yaml::from_str("-1").unwrap();
        let err = duration_from_value(&value, "test").unwrap_err();
        assert!(err.to_string().contains("non-negative"));
    }

    #[test]
    fn test_duration_rejects_garbage() {
        let value = serde_yaml::from_str("\"soon\"").unwrap();
        assert!(duration_from_value(&value, "test").is_err());

        let value = serde_yaml::from_str("[1, 2]").unwrap();
        assert!(duration_from_value(&value, "test").is_err());
    }
}
