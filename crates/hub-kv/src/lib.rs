//! KV-store client abstraction (spec §4.5).
//!
//! `hub-kv` defines the single logical key-value server interface required
//! by every other subsystem, and wraps any implementation of it with the
//! three-stage resilience layer: circuit breaker, exponential-backoff retry,
//! and a small time-bounded local read cache used only while the breaker is
//! open. Composition follows the teacher's `Service`/`Layer` style — a
//! client is wrapped, never subclassed.

pub mod circuit;
pub mod client;
pub mod lock;
pub mod memory;
pub mod resilient;
pub mod retry;

pub use circuit::{CircuitBreaker, CircuitState};
pub use client::{KvClient, ScoredMember};
pub use lock::{DistributedLock, LockToken};
pub use memory::InMemoryKv;
pub use resilient::{ResilientClient, ResilientConfig};
pub use retry::RetryPolicy;
