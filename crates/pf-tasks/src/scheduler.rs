//! Layered phase execution on a bounded worker pool.

use std::sync::atomic::{AtomicBool, Ordering};

use pf_core::StepContext;
use rayon::prelude::*;
use tracing::trace;

use crate::error::{TaskError, TaskResult};
use crate::graph::Schedule;
use crate::task::Phase;

/// How tasks inside one layer are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ExecutionPolicy {
    /// Layers run on the worker pool.
    #[default]
    Parallel,
    /// Layers run on the calling thread in schedule order.
    Sequential,
}

/// Result of running one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Completed,
    /// Cancellation was observed at a layer boundary.
    Cancelled { layers_done: usize },
}

/// Executes a [`Schedule`] phase by phase.
pub struct Scheduler {
    schedule: Schedule,
    policy: ExecutionPolicy,
    pool: Option<rayon::ThreadPool>,
}

impl Scheduler {
    /// Create a scheduler; `threads == 0` lets rayon pick the pool size.
    pub fn new(schedule: Schedule, policy: ExecutionPolicy, threads: usize) -> TaskResult<Self> {
        let pool = match policy {
            ExecutionPolicy::Parallel => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("pf-worker-{i}"))
                    .build()
                    .map_err(|e| TaskError::Pool {
                        what: e.to_string(),
                    })?,
            ),
            ExecutionPolicy::Sequential => None,
        };

        Ok(Self {
            schedule,
            policy,
            pool,
        })
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    /// Run every layer of `phase`, checking `cancel` between layers.
    pub fn run_phase(
        &self,
        phase: Phase,
        ctx: &StepContext<'_>,
        cancel: &AtomicBool,
    ) -> TaskResult<PhaseOutcome> {
        for (i, layer) in self.schedule.layers(phase).iter().enumerate() {
            if cancel.load(Ordering::Acquire) {
                trace!(%phase, layer = i, "phase cancelled at layer boundary");
                return Ok(PhaseOutcome::Cancelled { layers_done: i });
            }
            self.run_layer(layer, ctx)?;
        }
        Ok(PhaseOutcome::Completed)
    }

    /// Sequential variant where `permute` reorders each layer before it runs.
    ///
    /// Correct schedules give the same attribute values for any permutation.
    pub fn run_phase_permuted(
        &self,
        phase: Phase,
        ctx: &StepContext<'_>,
        permute: &mut dyn FnMut(usize, &mut [usize]),
    ) -> TaskResult<()> {
        let mut scratch = Vec::new();
        for (i, layer) in self.schedule.layers(phase).iter().enumerate() {
            scratch.clear();
            scratch.extend_from_slice(layer);
            permute(i, &mut scratch);
            for &t in &scratch {
                self.execute(t, ctx)?;
            }
        }
        Ok(())
    }

    fn run_layer(&self, layer: &[usize], ctx: &StepContext<'_>) -> TaskResult<()> {
        match (&self.pool, layer.len()) {
            (Some(pool), n) if n > 1 => pool.install(|| {
                layer
                    .par_iter()
                    .try_for_each(|&t| self.execute(t, ctx))
            }),
            _ => layer.iter().try_for_each(|&t| self.execute(t, ctx)),
        }
    }

    fn execute(&self, index: usize, ctx: &StepContext<'_>) -> TaskResult<()> {
        match self.schedule.task(index) {
            Some(task) => task.execute(ctx),
            None => Err(TaskError::execution(
                format!("#{index}"),
                "task index outside schedule",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Dependencies, FnTask, TaskRef};
    use pf_core::{Attr, AttributeRegistry, AttributeStore, Real, Topology};
    use std::sync::Arc;

    fn chain(store_attrs: &[Attr<Real>]) -> Vec<TaskRef> {
        let a = store_attrs.to_vec();
        vec![
            FnTask::new("seed", Phase::PreStep, Dependencies::new().write(a[0]), {
                let out = a[0];
                move |ctx| Ok(ctx.attrs.set(out, 2.0)?)
            })
            .into_ref(),
            FnTask::new(
                "double",
                Phase::PreStep,
                Dependencies::new().read(a[0]).write(a[1]),
                {
                    let (inp, out) = (a[0], a[1]);
                    move |ctx| {
                        let v = ctx.attrs.get(inp)?;
                        Ok(ctx.attrs.set(out, 2.0 * v)?)
                    }
                },
            )
            .into_ref(),
        ]
    }

    fn store(n: usize) -> (Vec<Attr<Real>>, AttributeStore) {
        let mut reg = AttributeRegistry::new();
        let ids = (0..n)
            .map(|i| reg.register("s", &format!("a{i}"), 0.0).unwrap())
            .collect();
        (ids, reg.freeze())
    }

    #[test]
    fn parallel_and_sequential_agree() {
        for policy in [ExecutionPolicy::Parallel, ExecutionPolicy::Sequential] {
            let (a, attrs) = store(2);
            let sched = Schedule::build(chain(&a), &[], &attrs).unwrap();
            let scheduler = Scheduler::new(sched, policy, 2).unwrap();
            let topo = Topology::default();
            let ctx = StepContext::new(&attrs, &topo, 0.0, 0, 1e-3);
            let cancel = AtomicBool::new(false);
            let outcome = scheduler.run_phase(Phase::PreStep, &ctx, &cancel).unwrap();
            assert_eq!(outcome, PhaseOutcome::Completed);
            assert_eq!(attrs.get(a[1]).unwrap(), 4.0);
        }
    }

    #[test]
    fn cancellation_is_observed_before_first_layer() {
        let (a, attrs) = store(2);
        let sched = Schedule::build(chain(&a), &[], &attrs).unwrap();
        let scheduler = Scheduler::new(sched, ExecutionPolicy::Sequential, 1).unwrap();
        let topo = Topology::default();
        let ctx = StepContext::new(&attrs, &topo, 0.0, 0, 1e-3);
        let cancel = AtomicBool::new(true);
        let outcome = scheduler.run_phase(Phase::PreStep, &ctx, &cancel).unwrap();
        assert_eq!(outcome, PhaseOutcome::Cancelled { layers_done: 0 });
        assert_eq!(attrs.get(a[1]).unwrap(), 0.0);
    }

    #[test]
    fn cancellation_set_by_a_task_stops_at_next_boundary() {
        let (a, attrs) = store(2);
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let mut tasks = chain(&a);
        // Replace the seed task with one that requests cancellation mid-phase.
        tasks[0] = FnTask::new("seed", Phase::PreStep, Dependencies::new().write(a[0]), {
            let out = a[0];
            move |ctx| {
                flag.store(true, Ordering::Release);
                Ok(ctx.attrs.set(out, 2.0)?)
            }
        })
        .into_ref();
        let sched = Schedule::build(tasks, &[], &attrs).unwrap();
        let scheduler = Scheduler::new(sched, ExecutionPolicy::Parallel, 2).unwrap();
        let topo = Topology::default();
        let ctx = StepContext::new(&attrs, &topo, 0.0, 0, 1e-3);

        let outcome = scheduler.run_phase(Phase::PreStep, &ctx, &cancel).unwrap();
        assert_eq!(outcome, PhaseOutcome::Cancelled { layers_done: 1 });
        // The first task ran to completion; the second never started.
        assert_eq!(attrs.get(a[0]).unwrap(), 2.0);
        assert_eq!(attrs.get(a[1]).unwrap(), 0.0);
    }

    #[test]
    fn task_error_propagates() {
        let (a, attrs) = store(1);
        let tasks = vec![
            FnTask::new("fails", Phase::PostStep, Dependencies::new().write(a[0]), |_| {
                Err(TaskError::execution("fails", "diverged"))
            })
            .into_ref(),
        ];
        let sched = Schedule::build(tasks, &[], &attrs).unwrap();
        let scheduler = Scheduler::new(sched, ExecutionPolicy::Parallel, 2).unwrap();
        let topo = Topology::default();
        let ctx = StepContext::new(&attrs, &topo, 0.0, 0, 1e-3);
        let err = scheduler
            .run_phase(Phase::PostStep, &ctx, &AtomicBool::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("diverged"));
    }
}
