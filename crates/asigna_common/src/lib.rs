//! Asigna Common - Case assignment engine
//!
//! Shared library for the asigna workload-balancing daemon: takes citizen
//! complaint cases from a remote feature store, assigns each one to the
//! least-loaded eligible worker, stamps a unique case code, and provisions
//! the matching work order in the external task-tracking system.
//!
//! The engine itself is a pure function of (roster, cases, directory, config);
//! network session setup lives with the caller.

pub mod aliases;
pub mod codegen;
pub mod config;
pub mod error;
pub mod geometry;
pub mod orchestrator;
pub mod record;
pub mod roster;
pub mod store;
pub mod task;

pub use config::{AsignaConfig, PassConfig};
pub use error::{RunError, StoreError};
pub use orchestrator::{run_pass, RunOptions, RunReport};
pub use record::AttributeRecord;
pub use roster::{Role, Worker};
pub use store::{FeatureStore, MemoryFeatureStore, RestFeatureStore, Session};
