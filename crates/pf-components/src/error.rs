//! Error types for component operations.

use pf_core::CoreError;
use pf_tasks::TaskError;
use thiserror::Error;

/// Errors that can occur while building or stepping a component.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    #[error("Non-physical value: {what}")]
    NonPhysical { what: &'static str },

    #[error("Not supported: {what}")]
    NotSupported { what: &'static str },

    #[error("Convergence failed: {what} after {iterations} iterations")]
    ConvergenceFailed {
        what: &'static str,
        iterations: usize,
    },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    /// A task ran before `initialize` registered the component's attributes.
    #[error("Component '{component}' used before initialization")]
    NotInitialized { component: String },

    #[error("Attribute error: {0}")]
    Attribute(#[from] CoreError),
}

pub type ComponentResult<T> = Result<T, ComponentError>;

impl ComponentError {
    /// True when the error describes a bad component setup rather than a
    /// numerical failure while stepping.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ComponentError::NotSupported { .. }
                | ComponentError::InvalidArg { .. }
                | ComponentError::NotInitialized { .. }
        )
    }
}

impl From<ComponentError> for TaskError {
    fn from(e: ComponentError) -> Self {
        match e {
            ComponentError::Attribute(core) => TaskError::Core(core),
            other => TaskError::Execution {
                task: "<component>".to_string(),
                message: other.to_string(),
            },
        }
    }
}
