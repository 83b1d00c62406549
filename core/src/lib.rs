//! Core types and coordination machinery for mongoload
//!
//! This crate provides the foundational pieces of the workload harness:
//!
//! - Phase orchestration: the shared barrier coordinator every actor
//!   progresses through ([`orchestrator`])
//! - Per-actor phase loops and iteration bounds ([`phase`])
//! - Workload configuration and typed context access ([`config`],
//!   [`context`])
//! - The actor trait, producers, and their registry ([`actor`])
//! - Metrics collection and reporting ([`metrics`])
//! - The thread-per-actor driver ([`driver`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod actor;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod phase;

/// Core error types
pub mod prelude {
    pub use crate::error::{Error, Result};
}
