//! Error types for simulation construction and stepping.

use std::time::Duration;

use pf_components::ComponentError;
use pf_core::{CoreError, VariantId};
use pf_solver::SolverError;
use pf_tasks::TaskError;
use thiserror::Error;

/// Fatal problems found while building a simulation. The run never starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid option: {what}")]
    InvalidOption { what: String },

    #[error("Task graph: {0}")]
    Task(TaskError),

    #[error("System assembly: {0}")]
    Solver(SolverError),

    #[error("Component '{component}': {source}")]
    Component {
        component: String,
        source: ComponentError,
    },

    #[error("Unknown component '{name}'")]
    UnknownComponent { name: String },

    #[error("Unknown topology variant '{variant}'")]
    InvalidVariant { variant: String },

    #[error("Component name '{name}' used twice")]
    DuplicateComponent { name: String },

    #[error("Simulation has no components")]
    NoComponents,

    #[error("Attribute registry: {0}")]
    Core(#[from] CoreError),
}

impl From<TaskError> for ConfigError {
    fn from(e: TaskError) -> Self {
        ConfigError::Task(e)
    }
}

impl From<SolverError> for ConfigError {
    fn from(e: SolverError) -> Self {
        match e {
            SolverError::InvalidVariant { id } => ConfigError::InvalidVariant {
                variant: id.to_string(),
            },
            other => ConfigError::Solver(other),
        }
    }
}

/// Errors surfaced by a simulation or its controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// A task or the solve failed; the step was abandoned.
    #[error("Step {step} (t = {time} s) failed: {message}")]
    StepExecution {
        step: u64,
        time: f64,
        message: String,
    },

    #[error("Real-time drift {drift:?} exceeds limit {limit:?}")]
    RealTimeDriftExceeded { drift: Duration, limit: Duration },

    #[error("Step cancelled")]
    Cancelled,

    #[error("Invalid state: {what}")]
    InvalidState { what: String },

    #[error("Simulation controller thread is gone")]
    ControllerGone,
}

pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    pub(crate) fn invalid_state(what: impl Into<String>) -> Self {
        SimError::InvalidState { what: what.into() }
    }

    pub(crate) fn unknown_variant(id: VariantId) -> Self {
        SimError::Configuration(ConfigError::InvalidVariant {
            variant: id.to_string(),
        })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, SimError::Configuration(_))
    }

    pub fn is_step_execution(&self) -> bool {
        matches!(self, SimError::StepExecution { .. })
    }
}

/// Failure of an external data source or sink.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct InterfaceError {
    pub message: String,
}

impl InterfaceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<CoreError> for InterfaceError {
    fn from(e: CoreError) -> Self {
        Self::new(e.to_string())
    }
}
