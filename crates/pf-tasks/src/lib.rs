//! Task graph and scheduler for per-step simulation work.
//!
//! Every piece of per-step work (a component computing its source
//! contribution, a component reading back the solution, an external
//! interface exchanging data) is a [`Task`] tagged with a [`Phase`] and an
//! explicit list of attributes it reads and writes.
//!
//! # Architecture
//!
//! - [`Schedule::build`] validates single-writer discipline, derives
//!   write→read edges inside each phase and layers them with Kahn's algorithm.
//!   A cycle inside a phase is a construction error.
//! - [`Scheduler`] executes one phase layer by layer on a bounded rayon pool;
//!   the end of each layer is a barrier and the cancellation flag is checked
//!   between layers only, never inside a task.
//!
//! Layers are computed once and reused every step.

pub mod error;
pub mod graph;
pub mod scheduler;
pub mod task;

pub use error::{TaskError, TaskResult};
pub use graph::Schedule;
pub use scheduler::{ExecutionPolicy, PhaseOutcome, Scheduler};
pub use task::{Dependencies, FnTask, Phase, Task, TaskRef};
