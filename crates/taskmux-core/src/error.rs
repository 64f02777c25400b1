//! Configuration-error taxonomy.
//!
//! These are the failures that refuse a dispatch before any subprocess is
//! launched. Runtime task failures are not errors at this level; they are
//! values on `TaskResult`.

use thiserror::Error;

use crate::state::TaskStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// The dependency graph (after parent expansion) contains a cycle.
    #[error("dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// A task names a backend the registry does not know.
    #[error("unknown backend '{name}' for task {task_id}")]
    UnknownBackend { task_id: String, name: String },

    /// A status write violates the transition graph.
    #[error("invalid status transition {from} -> {to} for task {task_id}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// A status write targets a task id the document does not contain.
    #[error("task {task_id} not found in state document")]
    TaskNotFound { task_id: String },

    /// The state document exists but cannot be parsed.
    #[error("unreadable state document at {path}: {reason}")]
    UnreadableState { path: String, reason: String },

    /// The batch input on stdin is malformed.
    #[error("malformed batch input: {0}")]
    MalformedBatchInput(String),
}
