//! Value generation for actor documents
//!
//! A document template is ordinary YAML; a single-key mapping whose key
//! starts with `^` is a generator directive and is replaced with a freshly
//! drawn value every time a document is generated:
//!
//! ```yaml
//! Document:
//!   owner: { ^RandomString: { length: 12 } }
//!   balance: { ^RandomInt: { min: 0, max: 10000 } }
//!   tags: [fixed, { ^RandomString: { length: 4 } }]
//! ```
//!
//! Generators draw from a [`StdRng`] handed in at construction, so document
//! streams are reproducible for a given workload seed.

use mongodb::bson::Document;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::Rng;
use serde_yaml::Value;

use mongoload_core::error::{Error, Result};

/// Produces a fresh BSON document per call from a YAML template.
pub struct DocumentGenerator {
    template: Value,
    rng: StdRng,
}

impl DocumentGenerator {
    /// Wrap a template and the generator's random source.
    ///
    /// The template is probed once (against a copy of the random state, so
    /// the real sequence is untouched) and bad templates fail here, at
    /// setup, rather than mid-run.
    pub fn new(template: Value, rng: StdRng) -> Result<Self> {
        if !template.is_mapping() {
            return Err(Error::invalid_configuration(
                "document template must be a mapping",
            ));
        }
        materialize(&template, &mut rng.clone())?;
        Ok(Self { template, rng })
    }

    /// Draw the next document.
    pub fn generate(&mut self) -> Result<Document> {
        materialize(&self.template, &mut self.rng)
    }
}

impl std::fmt::Debug for DocumentGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentGenerator")
            .field("template", &self.template)
            .finish()
    }
}

fn materialize(template: &Value, rng: &mut StdRng) -> Result<Document> {
    let rendered = render(template, rng)?;
    mongodb::bson::to_document(&rendered)
        .map_err(|e| Error::invalid_configuration(format!("document template: {e}")))
}

/// A single-key mapping with a `^`-prefixed key is a directive.
fn directive(value: &Value) -> Option<(&str, &Value)> {
    let mapping = value.as_mapping()?;
    if mapping.len() != 1 {
        return None;
    }
    let (key, args) = mapping.iter().next()?;
    let key = key.as_str()?;
    key.starts_with('^').then_some((key, args))
}

fn render(value: &Value, rng: &mut StdRng) -> Result<Value> {
    if let Some((name, args)) = directive(value) {
        return match name {
            "^RandomInt" => {
                let min = directive_arg(args, "min", name)?;
                let max = directive_arg(args, "max", name)?;
                if min > max {
                    return Err(Error::invalid_configuration(format!(
                        "{name}: min {min} is greater than max {max}"
                    )));
                }
                Ok(Value::from(rng.gen_range(min..=max)))
            }
            "^RandomString" => {
                let length = directive_arg(args, "length", name)?;
                if length < 0 {
                    return Err(Error::invalid_configuration(format!(
                        "{name}: length must be non-negative, got {length}"
                    )));
                }
                let text: String = (0..length)
                    .map(|_| char::from(rng.sample(Alphanumeric)))
                    .collect();
                Ok(Value::from(text))
            }
            other => Err(Error::invalid_configuration(format!(
                "unknown value generator '{other}'"
            ))),
        };
    }

    match value {
        Value::Mapping(mapping) => {
            let mut out = serde_yaml::Mapping::new();
            for (key, item) in mapping {
                out.insert(key.clone(), render(item, rng)?);
            }
            Ok(Value::Mapping(out))
        }
        Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render(item, rng)?);
            }
            Ok(Value::Sequence(out))
        }
        other => Ok(other.clone()),
    }
}

fn directive_arg(args: &Value, key: &str, name: &str) -> Result<i64> {
    args.get(key).and_then(Value::as_i64).ok_or_else(|| {
        Error::invalid_configuration(format!("{name}: missing or non-integer '{key}'"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use rand::SeedableRng;

    fn generator(yaml: &str, seed: u64) -> Result<DocumentGenerator> {
        let template: Value = serde_yaml::from_str(yaml).unwrap();
        DocumentGenerator::new(template, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_literal_template_generates_itself() {
        let mut gen = generator("{ a: 1, nested: { b: hello }, tags: [x, y] }", 1).unwrap();
        // YAML integers transcode as 64-bit.
        let expected = doc! { "a": 1_i64, "nested": { "b": "hello" }, "tags": ["x", "y"] };
        assert_eq!(gen.generate().unwrap(), expected);
        assert_eq!(gen.generate().unwrap(), expected);
    }

    #[test]
    fn test_random_int_stays_within_bounds() {
        let mut gen = generator("{ n: { ^RandomInt: { min: 5, max: 8 } } }", 2).unwrap();
        for _ in 0..50 {
            let n = gen.generate().unwrap().get_i64("n").unwrap();
            assert!((5..=8).contains(&n));
        }
    }

    #[test]
    fn test_random_string_has_requested_length() {
        let mut gen = generator("{ s: { ^RandomString: { length: 12 } } }", 3).unwrap();
        let document = gen.generate().unwrap();
        let s = document.get_str("s").unwrap();
        assert_eq!(s.len(), 12);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_directives_nest_inside_sequences_and_subdocuments() {
        let mut gen = generator(
            "{ outer: { inner: { ^RandomInt: { min: 0, max: 0 } } }, \
             list: [{ ^RandomInt: { min: 7, max: 7 } }] }",
            4,
        )
        .unwrap();
        let document = gen.generate().unwrap();
        assert_eq!(
            document.get_document("outer").unwrap().get_i64("inner").unwrap(),
            0
        );
        assert_eq!(
            document.get_array("list").unwrap()[0].as_i64().unwrap(),
            7
        );
    }

    #[test]
    fn test_same_seed_draws_the_same_stream() {
        let yaml = "{ n: { ^RandomInt: { min: 0, max: 1000000 } }, \
                    s: { ^RandomString: { length: 8 } } }";
        let mut first = generator(yaml, 42).unwrap();
        let mut second = generator(yaml, 42).unwrap();
        for _ in 0..5 {
            assert_eq!(first.generate().unwrap(), second.generate().unwrap());
        }
    }

    #[test]
    fn test_generated_documents_differ_across_draws() {
        let mut gen = generator("{ s: { ^RandomString: { length: 16 } } }", 5).unwrap();
        assert_ne!(gen.generate().unwrap(), gen.generate().unwrap());
    }

    #[test]
    fn test_bad_templates_fail_at_construction() {
        // Inverted bounds.
        let err = generator("{ n: { ^RandomInt: { min: 9, max: 1 } } }", 6).unwrap_err();
        assert!(err.to_string().contains("greater than max"));

        // Unknown directive.
        let err = generator("{ n: { ^Never: {} } }", 7).unwrap_err();
        assert!(err.to_string().contains("unknown value generator"));

        // Missing argument.
        assert!(generator("{ n: { ^RandomInt: { min: 1 } } }", 8).is_err());

        // Not a mapping at the top.
        let template: Value = serde_yaml::from_str("[1, 2]").unwrap();
        assert!(DocumentGenerator::new(template, StdRng::seed_from_u64(9)).is_err());
    }
}
