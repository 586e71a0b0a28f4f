//! The per-step sequence: PreStep tasks, solve, PostStep tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pf_components::MnaComponent;
use pf_core::timing::{AccumulatingTimer, Timer};
use pf_core::{Attr, AttributeStore, ComplexVector, Real, StepContext, Topology, VariantId};
use pf_solver::Assembler;
use pf_tasks::{Phase, PhaseOutcome, Schedule, Scheduler};
use tracing::{debug, error, info, trace};

use crate::builder::SOLVER_OWNER;
use crate::error::{ConfigError, SimError, SimResult};
use crate::events::EventSchedule;
use crate::external::{ExternalInterface, interface_tasks};
use crate::options::SimOptions;
use crate::record::{StepObserver, StepRecord};

pub(crate) struct SimulationParts {
    pub options: SimOptions,
    pub attrs: AttributeStore,
    pub components: Vec<Arc<dyn MnaComponent>>,
    pub scheduler: Scheduler,
    pub assembler: Assembler,
    pub events: EventSchedule,
    pub observers: Vec<Box<dyn StepObserver>>,
    pub left_vector: Attr<ComplexVector>,
}

/// Wall-clock time spent in each part of a step.
#[derive(Debug, Default)]
pub struct StepTimings {
    pub pre_step: AccumulatingTimer,
    pub solve: AccumulatingTimer,
    pub post_step: AccumulatingTimer,
}

/// A built network ready to be stepped.
///
/// Owns the attribute store, the task schedule and the assembler. Stepping
/// needs `&mut self`; callers sharing a simulation across threads wrap it in
/// a lock so readers never see a half-finished step.
pub struct Simulation {
    options: SimOptions,
    attrs: AttributeStore,
    components: Vec<Arc<dyn MnaComponent>>,
    scheduler: Scheduler,
    assembler: Assembler,
    events: EventSchedule,
    requested_variant: Option<VariantId>,
    observers: Vec<Box<dyn StepObserver>>,
    interfaces: Vec<Arc<dyn ExternalInterface>>,
    left_vector: Attr<ComplexVector>,
    /// Solution of the last fully completed step.
    last_solution: ComplexVector,
    cancel: Arc<AtomicBool>,
    steps_done: u64,
    total_steps: u64,
    failure: Option<SimError>,
    timings: StepTimings,
}

impl Simulation {
    pub(crate) fn from_parts(parts: SimulationParts) -> Self {
        let size = parts.assembler.size();
        let total_steps = parts.options.total_steps();
        Self {
            options: parts.options,
            attrs: parts.attrs,
            components: parts.components,
            scheduler: parts.scheduler,
            assembler: parts.assembler,
            events: parts.events,
            requested_variant: None,
            observers: parts.observers,
            interfaces: Vec::new(),
            left_vector: parts.left_vector,
            last_solution: ComplexVector::zeros(size),
            cancel: Arc::new(AtomicBool::new(false)),
            steps_done: 0,
            total_steps,
            failure: None,
            timings: StepTimings::default(),
        }
    }

    pub fn options(&self) -> &SimOptions {
        &self.options
    }

    pub fn attrs(&self) -> &AttributeStore {
        &self.attrs
    }

    pub fn schedule(&self) -> &Schedule {
        self.scheduler.schedule()
    }

    pub fn component(&self, name: &str) -> Option<&Arc<dyn MnaComponent>> {
        self.components.iter().find(|c| c.name() == name)
    }

    /// Number of completed steps.
    pub fn steps_done(&self) -> u64 {
        self.steps_done
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Simulation time of the next step to run.
    pub fn time(&self) -> Real {
        self.steps_done as Real * self.options.dt
    }

    pub fn is_finished(&self) -> bool {
        self.steps_done >= self.total_steps
    }

    /// The error that ended the run, if any.
    pub fn failure(&self) -> Option<&SimError> {
        self.failure.as_ref()
    }

    /// Solution vector of the last completed step.
    pub fn lvector(&self) -> &ComplexVector {
        &self.last_solution
    }

    pub fn timings(&self) -> &StepTimings {
        &self.timings
    }

    pub fn active_variant(&self) -> VariantId {
        self.assembler.active()
    }

    pub fn active_topology(&self) -> &Topology {
        self.assembler.active_topology()
    }

    pub fn find_variant(&self, name: &str) -> Option<VariantId> {
        self.assembler.find_variant(name)
    }

    pub fn variant_count(&self) -> usize {
        self.assembler.variant_count()
    }

    /// Flag checked by the scheduler between layers.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn add_observer(&mut self, observer: impl StepObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Swap to a precomputed variant at the next step boundary.
    pub fn request_variant(&mut self, id: VariantId) -> SimResult<()> {
        if self.assembler.variant(id).is_none() {
            return Err(SimError::unknown_variant(id));
        }
        self.requested_variant = Some(id);
        Ok(())
    }

    /// Register an external interface and rebuild the schedule around it.
    ///
    /// Only allowed before the first step. On error the previous schedule
    /// stays in place.
    pub fn add_external_interface(&mut self, interface: Arc<dyn ExternalInterface>) -> SimResult<()> {
        if self.steps_done > 0 {
            return Err(SimError::invalid_state(
                "external interfaces must be added before the first step",
            ));
        }

        let mut tasks = self.scheduler.schedule().tasks().to_vec();
        tasks.extend(interface_tasks(&interface));
        let schedule = Schedule::build(tasks, &[(self.left_vector.id(), SOLVER_OWNER)], &self.attrs)
            .map_err(ConfigError::from)?;
        self.scheduler = Scheduler::new(schedule, self.options.policy, self.options.threads)
            .map_err(ConfigError::from)?;

        info!(interface = interface.name(), "external interface registered");
        self.interfaces.push(interface);
        Ok(())
    }

    /// Run one step. Returns whether more steps remain.
    ///
    /// A failed step ends the run: later calls return `InvalidState` and
    /// [`Simulation::lvector`] keeps the last completed solution.
    pub fn step(&mut self) -> SimResult<bool> {
        if let Some(err) = &self.failure {
            return Err(SimError::invalid_state(format!("run already failed: {err}")));
        }
        if self.assembler.is_released() {
            return Err(SimError::invalid_state("solver resources released"));
        }
        if self.is_finished() {
            return Ok(false);
        }

        let step = self.steps_done;
        let time = step as Real * self.options.dt;
        trace!(step, time, "step begin");

        match self.run_step(step, time) {
            Ok(()) => {}
            Err(StepFailure::Cancelled) => {
                debug!(step, time, "step cancelled");
                return Err(SimError::Cancelled);
            }
            Err(StepFailure::Failed(message)) => {
                error!(step, time, %message, "step failed");
                let err = SimError::StepExecution {
                    step,
                    time,
                    message,
                };
                self.failure = Some(err.clone());
                return Err(err);
            }
        }

        self.steps_done += 1;
        if !self.observers.is_empty() {
            match StepRecord::capture(&self.attrs, step, time) {
                Ok(record) => {
                    for observer in &mut self.observers {
                        observer.on_step(&record);
                    }
                }
                Err(e) => {
                    let err = SimError::StepExecution {
                        step,
                        time,
                        message: format!("recording failed: {e}"),
                    };
                    error!(step, time, error = %err, "step record failed");
                    self.failure = Some(err.clone());
                    return Err(err);
                }
            }
        }

        let more = !self.is_finished();
        if !more {
            info!(
                simulation = %self.options.name,
                steps = self.steps_done,
                avg_step_s = self.timings.pre_step.average_seconds()
                    + self.timings.solve.average_seconds()
                    + self.timings.post_step.average_seconds(),
                "simulation finished"
            );
        }
        Ok(more)
    }

    /// Step until the final time or the first error.
    pub fn run(&mut self) -> SimResult<()> {
        while self.step()? {}
        Ok(())
    }

    /// Drop every factorization. Results stay readable; stepping fails.
    pub fn release(&mut self) {
        self.assembler.release();
    }

    pub fn is_released(&self) -> bool {
        self.assembler.is_released()
    }

    fn run_step(&mut self, step: u64, time: Real) -> Result<(), StepFailure> {
        let due = self.events.due(time);
        if let Some(variant) = self.requested_variant.take().or(due) {
            self.assembler.activate(variant).map_err(StepFailure::failed)?;
            debug!(
                step,
                time,
                variant = self.assembler.variant(variant).map_or("?", |v| v.name()),
                "topology variant active"
            );
        }

        let timer = Timer::start();
        self.run_phase(Phase::PreStep, step, time)?;
        timer.stop_into(&self.timings.pre_step);

        if self.cancel.load(Ordering::Acquire) {
            return Err(StepFailure::Cancelled);
        }
        let timer = Timer::start();
        self.assembler.step(&self.attrs).map_err(StepFailure::failed)?;
        timer.stop_into(&self.timings.solve);

        let timer = Timer::start();
        self.run_phase(Phase::PostStep, step, time)?;
        timer.stop_into(&self.timings.post_step);

        let last = &mut self.last_solution;
        self.attrs
            .read(self.left_vector, |x| last.copy_from(x))
            .map_err(StepFailure::failed)?;
        Ok(())
    }

    fn run_phase(&self, phase: Phase, step: u64, time: Real) -> Result<(), StepFailure> {
        let ctx = StepContext::new(
            &self.attrs,
            self.assembler.active_topology(),
            time,
            step,
            self.options.dt,
        );
        match self
            .scheduler
            .run_phase(phase, &ctx, &self.cancel)
            .map_err(StepFailure::failed)?
        {
            PhaseOutcome::Completed => Ok(()),
            PhaseOutcome::Cancelled { layers_done } => {
                trace!(%phase, layers_done, "phase stopped at layer boundary");
                Err(StepFailure::Cancelled)
            }
        }
    }
}

enum StepFailure {
    Cancelled,
    Failed(String),
}

impl StepFailure {
    fn failed(e: impl ToString) -> Self {
        StepFailure::Failed(e.to_string())
    }
}
