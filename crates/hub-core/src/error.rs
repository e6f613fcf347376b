//! Error taxonomy, per spec §7.
//!
//! Every error surfaced above the adapter boundary is a [`HubError`]. Each
//! variant maps to exactly one row of the error table: `InvalidConfig`,
//! `NotFound`, `Conflict`, `Timeout`, `Transient`, `ComponentFailure`,
//! `Fatal`. Recovery policy (retried vs. surfaced vs. process exit) is driven
//! off [`HubError::category`], not off string matching.

use std::sync::Arc;

use crate::ids::{ComponentId, ProjectId, ProjectNodeSequence};

/// How a [`HubError`] should be treated by callers that automate recovery
/// (the KV resilience wrapper, the reconciliation loop, the plugin
/// respawn backoff).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Safe to retry with backoff; the caller should not surface this to a
    /// human without first exhausting its retry budget.
    Retryable,
    /// Retrying will not help; the caller should surface this immediately.
    NonRetryable,
    /// The process cannot make progress; the caller should exit non-zero.
    Fatal,
}

/// Structured context attached to a [`HubError`] when it is raised from the
/// pipeline path, so the log line carries `{project_id, pns, component_id,
/// cause}` as spec §7 requires.
#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    pub project_id: Option<ProjectId>,
    pub pns: Option<ProjectNodeSequence>,
    pub component_id: Option<ComponentId>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_pns(mut self, pns: ProjectNodeSequence) -> Self {
        self.pns = Some(pns);
        self
    }

    pub fn with_component(mut self, component_id: ComponentId) -> Self {
        self.component_id = Some(component_id);
        self
    }
}

/// Shared, cloneable error cause. `Arc` lets the same underlying failure be
/// attached to a component's `last_error` field and logged independently
/// without re-allocating the message.
pub type ErrorCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Clone, Debug, thiserror::Error)]
pub enum HubError {
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        message: String,
        context: ErrorContext,
    },

    #[error("not found: {id}")]
    NotFound { id: String, context: ErrorContext },

    #[error("conflict: {message}")]
    Conflict {
        message: String,
        context: ErrorContext,
    },

    #[error("timed out after {elapsed_ms}ms: {operation}")]
    Timeout {
        operation: String,
        elapsed_ms: u64,
        context: ErrorContext,
    },

    #[error("transient failure: {message}")]
    Transient {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
        context: ErrorContext,
    },

    #[error("component failure: {message}")]
    ComponentFailure {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
        context: ErrorContext,
    },

    #[error("fatal: {message}")]
    Fatal {
        message: String,
        #[source]
        cause: Option<ErrorCause>,
        context: ErrorContext,
    },
}

impl HubError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            HubError::InvalidConfig { .. }
            | HubError::NotFound { .. }
            | HubError::Conflict { .. }
            | HubError::ComponentFailure { .. } => ErrorCategory::NonRetryable,
            HubError::Timeout { .. } | HubError::Transient { .. } => ErrorCategory::Retryable,
            HubError::Fatal { .. } => ErrorCategory::Fatal,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            HubError::InvalidConfig { context, .. }
            | HubError::NotFound { context, .. }
            | HubError::Conflict { context, .. }
            | HubError::Timeout { context, .. }
            | HubError::Transient { context, .. }
            | HubError::ComponentFailure { context, .. }
            | HubError::Fatal { context, .. } => context,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        HubError::InvalidConfig {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        HubError::NotFound {
            id: id.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        HubError::Conflict {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_ms: u64) -> Self {
        HubError::Timeout {
            operation: operation.into(),
            elapsed_ms,
            context: ErrorContext::new(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        HubError::Transient {
            message: message.into(),
            cause: None,
            context: ErrorContext::new(),
        }
    }

    pub fn component_failure(message: impl Into<String>) -> Self {
        HubError::ComponentFailure {
            message: message.into(),
            cause: None,
            context: ErrorContext::new(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        HubError::Fatal {
            message: message.into(),
            cause: None,
            context: ErrorContext::new(),
        }
    }

    /// Attach structured context in place, used at the point an error crosses
    /// from a component into the pipeline runtime.
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        let slot = match &mut self {
            HubError::InvalidConfig { context, .. }
            | HubError::NotFound { context, .. }
            | HubError::Conflict { context, .. }
            | HubError::Timeout { context, .. }
            | HubError::Transient { context, .. }
            | HubError::ComponentFailure { context, .. }
            | HubError::Fatal { context, .. } => context,
        };
        *slot = context;
        self
    }
}

pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_matches_table() {
        assert_eq!(
            HubError::invalid_config("bad").category(),
            ErrorCategory::NonRetryable
        );
        assert_eq!(
            HubError::timeout("open", 10).category(),
            ErrorCategory::Retryable
        );
        assert_eq!(
            HubError::transient("blip").category(),
            ErrorCategory::Retryable
        );
        assert_eq!(
            HubError::fatal("kv unreachable").category(),
            ErrorCategory::Fatal
        );
    }

    #[test]
    fn context_round_trips() {
        let ctx = ErrorContext::new()
            .with_project(ProjectId::new("p1"))
            .with_component(ComponentId::new("i1"));
        let err = HubError::component_failure("adapter crashed").with_context(ctx);
        assert_eq!(
            err.context().project_id.as_ref().map(|p| p.as_str()),
            Some("p1")
        );
    }
}
