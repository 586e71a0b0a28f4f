//! Per-step execution context.

use crate::attribute::AttributeStore;
use crate::numeric::Real;
use crate::topology::Topology;

/// Everything a task may look at while it runs.
///
/// Borrowed for the duration of one phase; shared across worker threads.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub attrs: &'a AttributeStore,
    pub topology: &'a Topology,
    /// Simulation time of the step being computed (seconds).
    pub time: Real,
    /// 0-based index of the step being computed.
    pub step: u64,
    /// Fixed timestep (seconds).
    pub dt: Real,
}

impl<'a> StepContext<'a> {
    pub fn new(attrs: &'a AttributeStore, topology: &'a Topology, time: Real, step: u64, dt: Real) -> Self {
        Self {
            attrs,
            topology,
            time,
            step,
            dt,
        }
    }
}
