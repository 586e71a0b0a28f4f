//! The unit of per-step work.

use core::fmt;
use std::sync::Arc;

use pf_core::{AttrId, StepContext};

use crate::error::TaskResult;

/// Which side of the global solve a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before the solve: compute source contributions from the previous solution.
    PreStep,
    /// After the solve: read back the new solution and advance state.
    PostStep,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::PreStep => f.write_str("PreStep"),
            Phase::PostStep => f.write_str("PostStep"),
        }
    }
}

/// Attributes a task reads and writes during one step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    pub reads: Vec<AttrId>,
    pub writes: Vec<AttrId>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, attr: impl Into<AttrId>) -> Self {
        self.reads.push(attr.into());
        self
    }

    pub fn write(mut self, attr: impl Into<AttrId>) -> Self {
        self.writes.push(attr.into());
        self
    }

    pub fn read_all<A: Into<AttrId>>(mut self, attrs: impl IntoIterator<Item = A>) -> Self {
        self.reads.extend(attrs.into_iter().map(Into::into));
        self
    }

    pub fn write_all<A: Into<AttrId>>(mut self, attrs: impl IntoIterator<Item = A>) -> Self {
        self.writes.extend(attrs.into_iter().map(Into::into));
        self
    }
}

/// A unit of work executed once per step.
///
/// Tasks are built once and reused every step. They hold no state of their
/// own between steps; everything flows through the attributes they declare.
pub trait Task: Send + Sync {
    fn name(&self) -> &str;

    fn phase(&self) -> Phase;

    fn dependencies(&self) -> &Dependencies;

    fn execute(&self, ctx: &StepContext<'_>) -> TaskResult<()>;
}

pub type TaskRef = Arc<dyn Task>;

type TaskFn = dyn Fn(&StepContext<'_>) -> TaskResult<()> + Send + Sync;

/// Task backed by a closure.
pub struct FnTask {
    name: String,
    phase: Phase,
    deps: Dependencies,
    body: Box<TaskFn>,
}

impl FnTask {
    pub fn new(
        name: impl Into<String>,
        phase: Phase,
        deps: Dependencies,
        body: impl Fn(&StepContext<'_>) -> TaskResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            phase,
            deps,
            body: Box::new(body),
        }
    }

    pub fn into_ref(self) -> TaskRef {
        Arc::new(self)
    }
}

impl Task for FnTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn dependencies(&self) -> &Dependencies {
        &self.deps
    }

    fn execute(&self, ctx: &StepContext<'_>) -> TaskResult<()> {
        (self.body)(ctx)
    }
}

impl fmt::Debug for FnTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTask")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("deps", &self.deps)
            .finish()
    }
}
