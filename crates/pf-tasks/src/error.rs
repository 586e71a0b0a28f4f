//! Error types for task graph construction and execution.

use pf_core::CoreError;
use thiserror::Error;

use crate::task::Phase;

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskError {
    /// Tasks of one phase depend on each other in a loop.
    #[error("Dependency cycle among {phase} tasks: {}", .tasks.join(", "))]
    Cycle { phase: Phase, tasks: Vec<String> },

    /// Two writers declared for the same attribute within one step.
    #[error("Attribute {attr} is written by both '{first}' and '{second}'")]
    MultipleWriters {
        attr: String,
        first: String,
        second: String,
    },

    /// A task failed while executing.
    #[error("Task '{task}' failed: {message}")]
    Execution { task: String, message: String },

    /// The worker pool could not be created.
    #[error("Worker pool error: {what}")]
    Pool { what: String },

    #[error("Attribute access failed: {0}")]
    Core(#[from] CoreError),
}

impl TaskError {
    pub fn execution(task: impl Into<String>, message: impl ToString) -> Self {
        TaskError::Execution {
            task: task.into(),
            message: message.to_string(),
        }
    }

    /// True for errors that can only come out of [`crate::Schedule::build`].
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TaskError::Cycle { .. } | TaskError::MultipleWriters { .. } | TaskError::Pool { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_tasks() {
        let err = TaskError::Cycle {
            phase: Phase::PreStep,
            tasks: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("PreStep"));
        assert!(msg.contains("a, b"));
        assert!(err.is_configuration());
    }

    #[test]
    fn execution_is_not_configuration() {
        let err = TaskError::execution("l1.MnaPostStep", "boom");
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("boom"));
    }
}
