//! Project DAG materialization, worker wiring, and lifecycle (spec §4.1).
//!
//! This crate owns the pipeline runtime's concurrency model — one tokio
//! task per component, bounded mpsc edges, cancellation-aware send/recv —
//! but knows nothing about concrete adapters. Callers supply a
//! [`registry::ComponentFactory`] (see `hub-adapters`) to materialize input,
//! output, and ruleset components from their declared metadata.

pub mod dag;
pub mod health;
pub mod project;
pub mod registry;
pub mod worker;

pub use dag::{NodeSpec, ProjectSpec, Topology};
pub use health::{ComponentError, HealthMonitor, HealthRecord};
pub use project::{ComponentState, Project};
pub use registry::ComponentFactory;
