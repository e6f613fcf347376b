//! Core contracts shared by every AgentSmith-HUB crate.
//!
//! This crate has no knowledge of Kafka, Elasticsearch, Redis, or any other
//! concrete collaborator. It defines the vocabulary the rest of the workspace
//! is built against: the error taxonomy, the cancellation/deadline primitives
//! carried on every blocking call, the envelope type that flows along project
//! edges, and the trait boundary a component (input/output/ruleset/plugin)
//! must satisfy to be wired into a project DAG.

pub mod component;
pub mod context;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod keys;
pub mod status;

pub use component::{Component, ComponentKind, ComponentMeta};
pub use context::{CallContext, Cancellation, Deadline};
pub use envelope::{Envelope, Value};
pub use error::{ErrorCategory, ErrorContext, HubError};
pub use ids::{ComponentId, ProjectId, ProjectNodeSequence};
pub use status::Status;
