//! External data sources and sinks exchanged once per step.
//!
//! An interface imports values into attributes before the solve and exports
//! attribute values after it. Both directions are ordinary tasks, so they
//! are ordered by the same dependency graph as the components: a source
//! whose setpoint is imported runs after the import task.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

use pf_core::{Attr, AttrId, Complex, Real, StepContext};
use pf_tasks::{Dependencies, FnTask, Phase, TaskError, TaskRef};

use crate::error::InterfaceError;

pub trait ExternalInterface: Send + Sync {
    fn name(&self) -> &str;

    /// Attributes written by [`ExternalInterface::import`].
    fn imports(&self) -> Vec<AttrId>;

    /// Attributes read by [`ExternalInterface::export`].
    fn exports(&self) -> Vec<AttrId>;

    /// Runs in PreStep.
    fn import(&self, ctx: &StepContext<'_>) -> Result<(), InterfaceError>;

    /// Runs in PostStep.
    fn export(&self, ctx: &StepContext<'_>) -> Result<(), InterfaceError>;
}

/// `<name>.Import` and `<name>.Export` tasks; a direction with no
/// attributes gets no task.
pub(crate) fn interface_tasks(interface: &Arc<dyn ExternalInterface>) -> Vec<TaskRef> {
    let mut tasks = Vec::new();

    let imports = interface.imports();
    if !imports.is_empty() {
        let name = format!("{}.Import", interface.name());
        let iface = Arc::clone(interface);
        let task_name = name.clone();
        tasks.push(
            FnTask::new(
                name,
                Phase::PreStep,
                Dependencies::new().write_all(imports),
                move |ctx| {
                    iface
                        .import(ctx)
                        .map_err(|e| TaskError::execution(&task_name, e))
                },
            )
            .into_ref(),
        );
    }

    let exports = interface.exports();
    if !exports.is_empty() {
        let name = format!("{}.Export", interface.name());
        let iface = Arc::clone(interface);
        let task_name = name.clone();
        tasks.push(
            FnTask::new(
                name,
                Phase::PostStep,
                Dependencies::new().read_all(exports),
                move |ctx| {
                    iface
                        .export(ctx)
                        .map_err(|e| TaskError::execution(&task_name, e))
                },
            )
            .into_ref(),
        );
    }

    tasks
}

/// Exported attribute values of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSample {
    pub step: u64,
    pub time: Real,
    pub values: Vec<Complex>,
}

/// Caller side of a [`ChannelInterface`].
pub struct ChannelEnds {
    /// One vector per step, matching the import list.
    pub setpoints: Sender<Vec<Complex>>,
    pub samples: Receiver<ExportSample>,
}

/// Queue-backed interface: setpoints in, samples out.
///
/// Every step consumes exactly one setpoint vector. An empty queue fails the
/// step instead of reusing stale values.
pub struct ChannelInterface {
    name: String,
    imports: Vec<Attr<Complex>>,
    exports: Vec<Attr<Complex>>,
    setpoints: Mutex<Receiver<Vec<Complex>>>,
    samples: Sender<ExportSample>,
}

impl ChannelInterface {
    pub fn new(
        name: impl Into<String>,
        imports: Vec<Attr<Complex>>,
        exports: Vec<Attr<Complex>>,
    ) -> (Self, ChannelEnds) {
        let (setpoint_tx, setpoint_rx) = mpsc::channel();
        let (sample_tx, sample_rx) = mpsc::channel();
        let iface = Self {
            name: name.into(),
            imports,
            exports,
            setpoints: Mutex::new(setpoint_rx),
            samples: sample_tx,
        };
        let ends = ChannelEnds {
            setpoints: setpoint_tx,
            samples: sample_rx,
        };
        (iface, ends)
    }
}

impl ExternalInterface for ChannelInterface {
    fn name(&self) -> &str {
        &self.name
    }

    fn imports(&self) -> Vec<AttrId> {
        self.imports.iter().map(|a| a.id()).collect()
    }

    fn exports(&self) -> Vec<AttrId> {
        self.exports.iter().map(|a| a.id()).collect()
    }

    fn import(&self, ctx: &StepContext<'_>) -> Result<(), InterfaceError> {
        let next = self
            .setpoints
            .lock()
            .map_err(|_| InterfaceError::new("setpoint queue lock poisoned"))?
            .try_recv();
        let values = match next {
            Ok(values) => values,
            Err(TryRecvError::Empty) => {
                return Err(InterfaceError::new(format!(
                    "no setpoint queued for step {}",
                    ctx.step
                )));
            }
            Err(TryRecvError::Disconnected) => {
                return Err(InterfaceError::new("setpoint sender dropped"));
            }
        };
        if values.len() != self.imports.len() {
            return Err(InterfaceError::new(format!(
                "expected {} setpoints, got {}",
                self.imports.len(),
                values.len()
            )));
        }
        for (&attr, value) in self.imports.iter().zip(values) {
            ctx.attrs.set(attr, value)?;
        }
        Ok(())
    }

    fn export(&self, ctx: &StepContext<'_>) -> Result<(), InterfaceError> {
        let values = self
            .exports
            .iter()
            .map(|&attr| ctx.attrs.get(attr))
            .collect::<Result<Vec<_>, _>>()?;
        self.samples
            .send(ExportSample {
                step: ctx.step,
                time: ctx.time,
                values,
            })
            .map_err(|_| InterfaceError::new("sample receiver dropped"))
    }
}
