//! Built-in actor implementations for mongoload
//!
//! Every actor here follows the same shape: a private `PhaseConfig` built
//! once per configured phase from the [`PhaseContext`], a
//! [`PhaseLoop`](mongoload_core::phase::PhaseLoop) member that drives all
//! flow control, and metric handles captured at construction. The matching
//! `*Producer` types turn actor blocks into instances and are registered in
//! [`default_cast`].
//!
//! [`PhaseContext`]: mongoload_core::context::PhaseContext

use std::sync::Arc;

use mongoload_core::actor::Cast;

pub mod generators;
pub mod hello_world;
pub mod insert;
pub mod insert_remove;

pub use generators::DocumentGenerator;
pub use hello_world::HelloWorldProducer;
pub use insert::InsertProducer;
pub use insert_remove::InsertRemoveProducer;

/// The cast of all built-in actor types.
pub fn default_cast() -> Cast {
    let mut cast = Cast::new();
    cast.register(Arc::new(HelloWorldProducer));
    cast.register(Arc::new(InsertProducer));
    cast.register(Arc::new(InsertRemoveProducer));
    cast
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cast_registers_builtin_types() {
        let cast = default_cast();
        let names: Vec<_> = cast.names().collect();
        assert_eq!(names, vec!["HelloWorld", "Insert", "InsertRemove"]);
    }
}
