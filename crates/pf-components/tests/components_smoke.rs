//! Component tasks driven through a hand-rolled step loop.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use pf_components::{
    Capacitor, ComponentError, InitContext, Inductor, IntegrationMethod, MnaComponent, Resistor,
    RxLoad, VoltageSource, component_tasks,
};
use pf_core::units::{farad, henry, ohm, volt, watt};
use pf_core::{
    Attr, AttributeRegistry, AttributeStore, Complex, ComplexVector, ComponentId, StepContext,
    SystemMatrix, Terminal, Topology,
};
use pf_tasks::{ExecutionPolicy, Phase, Schedule, Scheduler, TaskRef};

const OMEGA: f64 = 2.0 * std::f64::consts::PI * 50.0;
const DT: f64 = 1e-3;

struct Network {
    attrs: AttributeStore,
    comps: Vec<Arc<dyn MnaComponent>>,
    x: Attr<ComplexVector>,
    matrix: SystemMatrix,
    scheduler: Scheduler,
    topology: Topology,
}

impl Network {
    /// `nodes` network nodes plus one virtual row per voltage source.
    fn build(nodes: usize, mut comps: Vec<Box<dyn MnaComponent>>) -> Self {
        let size = nodes + comps.iter().map(|c| c.virtual_nodes()).sum::<usize>();
        let mut reg = AttributeRegistry::new();
        let x = reg
            .register("solver", "left_vector", ComplexVector::zeros(size))
            .unwrap();
        {
            let mut init = InitContext::new(&mut reg, x, OMEGA, DT, nodes);
            for (i, c) in comps.iter_mut().enumerate() {
                init.set_owner(ComponentId::from_index(i as u32));
                c.initialize(&mut init).unwrap();
            }
        }
        let attrs = reg.freeze();
        let comps: Vec<Arc<dyn MnaComponent>> = comps.into_iter().map(Arc::from).collect();
        let topology = Topology::all_active(comps.len());

        let mut matrix = SystemMatrix::zeros(size);
        for c in &comps {
            c.stamp_matrix(&mut matrix, &topology).unwrap();
        }

        let tasks: Vec<TaskRef> = comps
            .iter()
            .enumerate()
            .flat_map(|(i, c)| component_tasks(c, ComponentId::from_index(i as u32), x))
            .collect();
        let schedule = Schedule::build(tasks, &[(x.id(), "solver")], &attrs).unwrap();
        let scheduler = Scheduler::new(schedule, ExecutionPolicy::Sequential, 1).unwrap();

        Self {
            attrs,
            comps,
            x,
            matrix,
            scheduler,
            topology,
        }
    }

    fn step(&self, k: u64) {
        let ctx = StepContext::new(&self.attrs, &self.topology, k as f64 * DT, k, DT);
        let cancel = AtomicBool::new(false);
        self.scheduler.run_phase(Phase::PreStep, &ctx, &cancel).unwrap();

        let mut b = ComplexVector::zeros(self.matrix.size());
        for c in &self.comps {
            if let Some(rv) = c.right_vector() {
                self.attrs
                    .read(rv, |stamp| {
                        for &(i, v) in stamp.entries() {
                            b[i] += v;
                        }
                    })
                    .unwrap();
            }
        }
        let solution = self.matrix.as_matrix().clone().lu().solve(&b).unwrap();
        self.attrs.set(self.x, solution).unwrap();

        self.scheduler.run_phase(Phase::PostStep, &ctx, &cancel).unwrap();
    }

    fn current(&self, index: usize) -> Complex {
        let io = self.comps[index].interface().unwrap();
        self.attrs.get(io.i_intf).unwrap()
    }
}

#[test]
fn source_and_resistor_read_back() {
    let net = Network::build(
        1,
        vec![
            Box::new(VoltageSource::new(
                "vs",
                Terminal::Node(0),
                Terminal::Ground,
                Complex::new(100.0, 0.0),
            )),
            Box::new(Resistor::new("r", Terminal::Node(0), Terminal::Ground, ohm(10.0))),
        ],
    );
    net.step(0);

    assert!((net.current(1) - Complex::new(10.0, 0.0)).norm() < 1e-9);
    // Source current flows from its positive terminal through the source.
    assert!((net.current(0) - Complex::new(-10.0, 0.0)).norm() < 1e-9);
}

#[test]
fn rl_branch_converges_to_phasor_solution() {
    for method in [
        IntegrationMethod::Trapezoidal,
        IntegrationMethod::BackwardEuler,
        IntegrationMethod::ForwardEuler,
    ] {
        let net = Network::build(
            2,
            vec![
                Box::new(VoltageSource::new(
                    "vs",
                    Terminal::Node(0),
                    Terminal::Ground,
                    Complex::new(100.0, 0.0),
                )),
                Box::new(Resistor::new("r", Terminal::Node(0), Terminal::Node(1), ohm(1.0))),
                Box::new(
                    Inductor::new("l", Terminal::Node(1), Terminal::Ground, henry(0.01))
                        .with_method(method),
                ),
            ],
        );
        for k in 0..600 {
            net.step(k);
        }
        let expected = Complex::new(100.0, 0.0) / Complex::new(1.0, OMEGA * 0.01);
        let got = net.current(2);
        assert!(
            (got - expected).norm() < 1e-3 * expected.norm(),
            "{method:?}: {got} vs {expected}"
        );
    }
}

#[test]
fn rx_load_sums_its_parts() {
    let load = RxLoad::new("load", Terminal::Node(0), watt(1000.0), watt(500.0), volt(100.0))
        .with_method(IntegrationMethod::BackwardEuler);
    let net = Network::build(
        1,
        vec![
            Box::new(VoltageSource::new(
                "vs",
                Terminal::Node(0),
                Terminal::Ground,
                Complex::new(100.0, 0.0),
            )),
            Box::new(load),
        ],
    );

    // Part tasks run before the load's own PostStep.
    let sched = net.scheduler.schedule();
    let layer = sched.layer_of();
    let load_post = sched.find("load.MnaPostStep").unwrap();
    let part_post = sched.find("load.L.MnaPostStep").unwrap();
    assert!(layer[part_post] < layer[load_post]);
    assert!(sched.find("load.R.MnaPostStep").is_some());

    for k in 0..400 {
        net.step(k);
    }
    // I = conj(S) / conj(V) = (P - jQ) / V
    let expected = Complex::new(10.0, -5.0);
    assert!(
        (net.current(1) - expected).norm() < 1e-3,
        "{}",
        net.current(1)
    );
}

#[test]
fn capacitor_steady_state_current() {
    let net = Network::build(
        2,
        vec![
            Box::new(VoltageSource::new(
                "vs",
                Terminal::Node(0),
                Terminal::Ground,
                Complex::new(100.0, 0.0),
            )),
            Box::new(Resistor::new("r", Terminal::Node(0), Terminal::Node(1), ohm(10.0))),
            Box::new(Capacitor::new("c", Terminal::Node(1), Terminal::Ground, farad(1e-4))),
        ],
    );
    for k in 0..400 {
        net.step(k);
    }
    let zc = Complex::new(1.0, 0.0) / Complex::new(0.0, OMEGA * 1e-4);
    let expected = Complex::new(100.0, 0.0) / (Complex::new(10.0, 0.0) + zc);
    assert!((net.current(2) - expected).norm() < 1e-3 * expected.norm());
}

#[test]
fn forward_euler_capacitor_is_rejected_at_initialize() {
    let mut reg = AttributeRegistry::new();
    let x = reg
        .register("solver", "left_vector", ComplexVector::zeros(1))
        .unwrap();
    let mut init = InitContext::new(&mut reg, x, OMEGA, DT, 1);
    let mut c = Capacitor::new("c", Terminal::Node(0), Terminal::Ground, farad(1e-6))
        .with_method(IntegrationMethod::ForwardEuler);
    let err = c.initialize(&mut init).unwrap_err();
    assert!(matches!(err, ComponentError::NotSupported { .. }));
}

#[test]
fn uninitialized_component_reports_itself() {
    let l = Inductor::new("l1", Terminal::Node(0), Terminal::Ground, henry(1.0));
    let mut m = SystemMatrix::zeros(1);
    let err = l.stamp_matrix(&mut m, &Topology::all_active(1)).unwrap_err();
    assert_eq!(
        err,
        ComponentError::NotInitialized {
            component: "l1".to_string()
        }
    );
}

#[test]
fn invalid_parameters_are_configuration_errors() {
    let mut reg = AttributeRegistry::new();
    let x = reg
        .register("solver", "left_vector", ComplexVector::zeros(1))
        .unwrap();
    let mut init = InitContext::new(&mut reg, x, OMEGA, DT, 1);
    let mut r = Resistor::new("r", Terminal::Node(0), Terminal::Ground, ohm(-1.0));
    assert!(r.initialize(&mut init).unwrap_err().is_configuration());

    let mut load = RxLoad::new("load", Terminal::Ground, watt(1.0), watt(0.0), volt(1.0));
    assert!(load.initialize(&mut init).is_err());
}
