//! Randomized checks of schedule ordering, cycle rejection and
//! order-independence inside a layer.

use std::sync::atomic::AtomicBool;

use pf_core::{Attr, AttributeRegistry, AttributeStore, Real, StepContext, Topology};
use pf_tasks::{
    Dependencies, ExecutionPolicy, FnTask, Phase, Schedule, Scheduler, TaskError, TaskRef,
};
use proptest::prelude::*;

fn store(n: usize) -> (Vec<Attr<Real>>, AttributeStore) {
    let mut reg = AttributeRegistry::new();
    let ids = (0..n)
        .map(|i| reg.register("node", &format!("x{i}"), 0.0).unwrap())
        .collect();
    (ids, reg.freeze())
}

/// Indices read by task `i`: the low bits of `mask` restricted to earlier tasks.
fn reads_of(i: usize, mask: u32) -> Vec<usize> {
    (0..i).filter(|j| mask & (1 << j) != 0).collect()
}

/// Task `i` writes `x_i = 0.5 * sum(reads) + i + 1` so every result depends
/// on its inputs having been written first.
fn dag_tasks(attrs: &[Attr<Real>], masks: &[u32], order: &[usize], phase_bits: u32) -> Vec<TaskRef> {
    order
        .iter()
        .map(|&i| {
            let reads: Vec<Attr<Real>> = reads_of(i, masks[i]).into_iter().map(|j| attrs[j]).collect();
            let out = attrs[i];
            let phase = if phase_bits & (1 << i) != 0 {
                Phase::PostStep
            } else {
                Phase::PreStep
            };
            let deps = Dependencies::new().read_all(reads.iter().copied()).write(out);
            FnTask::new(format!("t{i}"), phase, deps, move |ctx| {
                let mut acc = 0.0;
                for r in &reads {
                    acc += ctx.attrs.get(*r)?;
                }
                ctx.attrs.set(out, 0.5 * acc + (i as Real) + 1.0)?;
                Ok(())
            })
            .into_ref()
        })
        .collect()
}

fn dag() -> impl Strategy<Value = (usize, Vec<u32>, Vec<usize>, u32)> {
    (1usize..12).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec(any::<u32>(), n),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
            any::<u32>(),
        )
    })
}

proptest! {
    #[test]
    fn writers_always_run_in_earlier_layers((n, masks, order, phases) in dag()) {
        let (attrs, st) = store(n);
        let tasks = dag_tasks(&attrs, &masks, &order, phases);
        let sched = Schedule::build(tasks, &[], &st).unwrap();
        let layer = sched.layer_of();

        for i in 0..n {
            let reader = sched.find(&format!("t{i}")).unwrap();
            for j in reads_of(i, masks[i]) {
                let writer = sched.find(&format!("t{j}")).unwrap();
                let same_phase = sched.tasks()[reader].phase() == sched.tasks()[writer].phase();
                if same_phase {
                    prop_assert!(
                        layer[writer] < layer[reader],
                        "t{} (layer {}) must precede t{} (layer {})",
                        j, layer[writer], i, layer[reader]
                    );
                }
            }
        }

        let scheduled: usize = [Phase::PreStep, Phase::PostStep]
            .iter()
            .map(|p| sched.layers(*p).iter().map(Vec::len).sum::<usize>())
            .sum();
        prop_assert_eq!(scheduled, n);
    }

    #[test]
    fn injected_cycle_is_always_rejected(n in 2usize..10, post in any::<bool>()) {
        let (attrs, st) = store(n);
        let phase = if post { Phase::PostStep } else { Phase::PreStep };
        // t_i reads x_{i-1}; t_0 closes the loop by reading x_{n-1}.
        let tasks: Vec<TaskRef> = (0..n)
            .map(|i| {
                let prev = attrs[(i + n - 1) % n];
                FnTask::new(
                    format!("t{i}"),
                    phase,
                    Dependencies::new().read(prev).write(attrs[i]),
                    |_| Ok(()),
                )
                .into_ref()
            })
            .collect();

        match Schedule::build(tasks, &[], &st) {
            Err(TaskError::Cycle { phase: p, tasks }) => {
                prop_assert_eq!(p, phase);
                prop_assert_eq!(tasks.len(), n);
            }
            Err(other) => prop_assert!(false, "unexpected error {}", other),
            Ok(_) => prop_assert!(false, "cycle was accepted"),
        }
    }

    #[test]
    fn layer_permutations_give_bit_identical_values(
        (n, masks, order, _phases) in dag(),
        seeds in prop::collection::vec(any::<u64>(), 4),
    ) {
        let (attrs, reference) = store(n);
        let tasks = dag_tasks(&attrs, &masks, &order, 0);
        let sched = Schedule::build(tasks, &[], &reference).unwrap();
        let scheduler = Scheduler::new(sched, ExecutionPolicy::Sequential, 1).unwrap();
        let topo = Topology::default();

        let ctx = StepContext::new(&reference, &topo, 0.0, 0, 1e-3);
        scheduler
            .run_phase(Phase::PreStep, &ctx, &AtomicBool::new(false))
            .unwrap();
        let expected: Vec<u64> = attrs
            .iter()
            .map(|a| reference.get(*a).unwrap().to_bits())
            .collect();

        for seed in seeds {
            // Same registration order gives the same handles in a fresh store.
            let (_, fresh) = store(n);
            let ctx = StepContext::new(&fresh, &topo, 0.0, 0, 1e-3);
            let mut permute = |layer: usize, tasks: &mut [usize]| {
                let len = tasks.len();
                if len > 1 {
                    let mix = seed.rotate_left(layer as u32);
                    tasks.rotate_left((mix % len as u64) as usize);
                    if mix & 1 == 1 {
                        tasks.reverse();
                    }
                }
            };
            scheduler
                .run_phase_permuted(Phase::PreStep, &ctx, &mut permute)
                .unwrap();
            let got: Vec<u64> = attrs.iter().map(|a| fresh.get(*a).unwrap().to_bits()).collect();
            prop_assert_eq!(&got, &expected);
        }

        // The worker pool must agree as well.
        let (_, pooled) = store(n);
        let tasks = dag_tasks(&attrs, &masks, &order, 0);
        let sched = Schedule::build(tasks, &[], &pooled).unwrap();
        let parallel = Scheduler::new(sched, ExecutionPolicy::Parallel, 4).unwrap();
        let ctx = StepContext::new(&pooled, &topo, 0.0, 0, 1e-3);
        parallel
            .run_phase(Phase::PreStep, &ctx, &AtomicBool::new(false))
            .unwrap();
        let got: Vec<u64> = attrs.iter().map(|a| pooled.get(*a).unwrap().to_bits()).collect();
        prop_assert_eq!(got, expected);
    }
}
