//! Run control from another thread.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use pf_components::{
    Inductor, IntegrationMethod, MachineParams, Resistor, SynchronousMachine, VoltageSource,
};
use pf_core::units::{henry, ohm, s, volt, watt};
use pf_core::{Complex, Terminal, VariantId};
use pf_sim::{
    ChannelInterface, ControllerState, RealTimeOptions, RecordCollector, SimError, SimOptions,
    SimulationBuilder, SimulationController, StepRecord,
};

const DT: f64 = 1e-3;

fn rl_builder(final_time: f64) -> SimulationBuilder {
    let options = SimOptions {
        final_time,
        ..SimOptions::new("ctl")
    };
    let mut b = SimulationBuilder::new(options);
    b.add_component(VoltageSource::new(
        "vs",
        Terminal::Node(0),
        Terminal::Ground,
        Complex::new(100.0, 0.0),
    ));
    b.add_component(Resistor::new("r", Terminal::Node(0), Terminal::Node(1), ohm(10.0)));
    b.add_component(Inductor::new("l", Terminal::Node(1), Terminal::Ground, henry(0.05)));
    b
}

#[test]
fn each_step_call_advances_exactly_one_timestep() {
    let ctl = SimulationController::spawn(rl_builder(0.3).build().unwrap()).unwrap();
    assert_eq!(ctl.state(), ControllerState::Stopped);

    for k in 1..=5u64 {
        assert!(ctl.step().unwrap());
        assert_eq!(ctl.state(), ControllerState::Paused);
        assert_eq!(ctl.steps_done(), k);
        assert!((ctl.time() - k as f64 * DT).abs() < 1e-15);
    }
    let x = ctl.lvector().unwrap();
    assert_eq!(x.len(), 3);
    assert_eq!(ctl.with_simulation(|s| s.steps_done()).unwrap(), 5);
}

#[test]
fn last_single_step_finishes_the_run() {
    let ctl = SimulationController::spawn(rl_builder(0.003).build().unwrap()).unwrap();
    assert!(ctl.step().unwrap());
    assert!(ctl.step().unwrap());
    assert!(!ctl.step().unwrap());
    assert_eq!(ctl.state(), ControllerState::Done);
    assert!(!ctl.step().unwrap());
    assert_eq!(ctl.steps_done(), 3);
}

#[test]
fn start_runs_to_completion() {
    let ctl = SimulationController::spawn(rl_builder(0.3).build().unwrap()).unwrap();
    ctl.start().unwrap();
    ctl.wait().unwrap();
    assert_eq!(ctl.state(), ControllerState::Done);
    assert_eq!(ctl.steps_done(), 300);
    assert!(ctl.last_error().is_none());

    let sim = ctl.join().unwrap();
    assert!(sim.is_released());
    assert!(sim.is_finished());
}

#[test]
fn pause_and_resume_match_an_uninterrupted_run() {
    let reference = RecordCollector::new();
    let mut b = rl_builder(2.0);
    b.add_observer(reference.clone());
    b.build().unwrap().run().unwrap();

    let controlled = RecordCollector::new();
    let (reached_tx, reached_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let mut b = rl_builder(2.0);
    b.add_observer(controlled.clone());
    b.add_observer(move |r: &StepRecord| {
        if r.step == 50 {
            let _ = reached_tx.send(());
            let _ = resume_rx.recv();
        }
    });
    let ctl = SimulationController::spawn(b.build().unwrap()).unwrap();

    thread::scope(|s| {
        ctl.start().unwrap();
        reached_rx.recv().unwrap();
        let pauser = s.spawn(|| ctl.pause());
        thread::sleep(Duration::from_millis(20));
        resume_tx.send(()).unwrap();
        pauser.join().unwrap().unwrap();
    });

    assert_eq!(ctl.state(), ControllerState::Paused);
    let paused_at = ctl.steps_done();
    assert!(paused_at > 50 && paused_at < 2000);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(ctl.steps_done(), paused_at);

    ctl.start().unwrap();
    ctl.wait().unwrap();
    assert_eq!(controlled.records(), reference.records());
}

#[test]
fn stop_ends_the_run_and_rejects_restarts() {
    let ctl = SimulationController::spawn(rl_builder(0.3).build().unwrap()).unwrap();
    ctl.step().unwrap();
    ctl.stop().unwrap();
    assert_eq!(ctl.state(), ControllerState::Done);
    assert!(ctl.wait_timeout(Duration::from_secs(1)).unwrap());
    assert!(matches!(ctl.start(), Err(SimError::InvalidState { .. })));
    assert!(matches!(ctl.pause(), Err(SimError::InvalidState { .. })));
    assert!(!ctl.step().unwrap());
    // Results of the completed step stay readable.
    assert_eq!(ctl.steps_done(), 1);
    assert_eq!(ctl.lvector().unwrap().len(), 3);
    assert!(ctl.with_simulation(|s| s.is_released()).unwrap());
}

#[test]
fn stop_while_running_is_observed_promptly() {
    let ctl = SimulationController::spawn(rl_builder(1000.0).build().unwrap()).unwrap();
    ctl.start().unwrap();
    thread::sleep(Duration::from_millis(5));
    ctl.stop().unwrap();
    assert_eq!(ctl.state(), ControllerState::Done);
    assert!(ctl.steps_done() < 1_000_000);
    assert!(ctl.last_error().is_none());
}

#[test]
fn control_errors_for_invalid_transitions() {
    let ctl = SimulationController::spawn(rl_builder(0.3).build().unwrap()).unwrap();
    assert!(matches!(ctl.pause(), Err(SimError::InvalidState { .. })));
    assert!(ctl.switch_variant(VariantId::from_index(5)).unwrap_err().is_configuration());
    ctl.switch_variant(VariantId::from_index(0)).unwrap();
    // Nothing is running, so nothing would ever wake a waiter.
    assert!(matches!(ctl.wait(), Err(SimError::InvalidState { .. })));
    assert!(matches!(
        ctl.wait_timeout(Duration::from_millis(10)),
        Err(SimError::InvalidState { .. })
    ));
}

#[test]
fn wait_returns_when_the_run_is_paused() {
    let options = SimOptions {
        final_time: 10.0,
        realtime: Some(RealTimeOptions {
            max_drift: None,
            start_at: None,
        }),
        ..SimOptions::new("paced")
    };
    let mut b = SimulationBuilder::new(options);
    b.add_component(VoltageSource::new(
        "vs",
        Terminal::Node(0),
        Terminal::Ground,
        Complex::new(1.0, 0.0),
    ));
    b.add_component(Resistor::new("r", Terminal::Node(0), Terminal::Ground, ohm(1.0)));
    let ctl = SimulationController::spawn(b.build().unwrap()).unwrap();

    ctl.start().unwrap();
    let (woke_tx, woke_rx) = mpsc::channel();
    thread::scope(|s| {
        s.spawn(|| {
            let _ = woke_tx.send(ctl.wait());
        });
        thread::sleep(Duration::from_millis(20));
        ctl.pause().unwrap();
        let outcome = woke_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("waiter still blocked after pause");
        assert_eq!(outcome, Ok(()));
    });

    assert_eq!(ctl.state(), ControllerState::Paused);
    assert!(matches!(ctl.wait(), Err(SimError::InvalidState { .. })));

    // A single step leaves the run paused; waiting is still refused.
    assert!(ctl.step().unwrap());
    assert!(matches!(ctl.wait(), Err(SimError::InvalidState { .. })));
    ctl.stop().unwrap();
    assert_eq!(ctl.wait(), Ok(()));
}

#[test]
fn failed_step_ends_the_run_with_its_error() {
    let mut sim = rl_builder(0.3).build().unwrap();
    let v_ref = sim.attrs().find::<Complex>("vs", "v_ref").unwrap();
    let (iface, ends) = ChannelInterface::new("scada", vec![v_ref], vec![]);
    sim.add_external_interface(std::sync::Arc::new(iface)).unwrap();
    for _ in 0..3 {
        ends.setpoints.send(vec![Complex::new(100.0, 0.0)]).unwrap();
    }
    let ctl = SimulationController::spawn(sim).unwrap();

    ctl.start().unwrap();
    let err = ctl.wait().unwrap_err();
    match &err {
        SimError::StepExecution { step, message, .. } => {
            assert_eq!(*step, 3);
            assert!(message.contains("scada.Import"), "{message}");
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(ctl.state(), ControllerState::Done);
    assert_eq!(ctl.last_error(), Some(err.clone()));
    assert_eq!(ctl.steps_done(), 3);
    assert!(ctl.with_simulation(|s| s.failure() == Some(&err)).unwrap());
    assert!(!ctl.step().unwrap());
}

#[test]
fn machine_convergence_failure_stops_the_controller() {
    let mut options = SimOptions::new("coarse");
    options.dt = 0.5;
    options.final_time = 5.0;
    let mut b = SimulationBuilder::new(options);
    let params = MachineParams {
        emf: volt(1100.0),
        reactance: ohm(0.3),
        rated_power: watt(1e6),
        inertia: s(3.0),
        damping: 1.0,
    };
    // Started away from equilibrium so the rotor state must move.
    b.add_component(
        SynchronousMachine::new("gen", Terminal::Node(0), params, watt(0.5e6), 0.0)
            .with_method(IntegrationMethod::BackwardEuler),
    );
    b.add_component(Inductor::new("line", Terminal::Node(0), Terminal::Node(1), henry(1e-3)));
    b.add_component(VoltageSource::new(
        "bus",
        Terminal::Node(1),
        Terminal::Ground,
        Complex::new(1000.0, 0.0),
    ));
    let ctl = SimulationController::spawn(b.build().unwrap()).unwrap();

    ctl.start().unwrap();
    match ctl.wait() {
        Err(SimError::StepExecution { step, message, .. }) => {
            assert_eq!(step, 0);
            assert!(message.contains("gen.MnaPostStep"), "{message}");
            assert!(message.contains("Convergence failed"), "{message}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(ctl.state(), ControllerState::Done);
    assert_eq!(ctl.steps_done(), 0);
    assert!(ctl.last_error().is_some());
}

#[test]
fn realtime_pacing_follows_the_wall_clock() {
    let options = SimOptions {
        final_time: 0.05,
        realtime: Some(RealTimeOptions {
            max_drift: None,
            start_at: None,
        }),
        ..SimOptions::new("rt")
    };
    let mut b = SimulationBuilder::new(options);
    b.add_component(VoltageSource::new(
        "vs",
        Terminal::Node(0),
        Terminal::Ground,
        Complex::new(1.0, 0.0),
    ));
    b.add_component(Resistor::new("r", Terminal::Node(0), Terminal::Ground, ohm(1.0)));
    let ctl = SimulationController::spawn(b.build().unwrap()).unwrap();

    let started = Instant::now();
    ctl.start().unwrap();
    ctl.wait().unwrap();
    // Step k may not start before k * dt; the last one is step 49.
    assert!(started.elapsed() >= Duration::from_millis(45));
    assert_eq!(ctl.steps_done(), 50);
    let stats = ctl.realtime_stats();
    assert!(stats.max_overrun >= stats.current_drift || stats.deadline_misses == 0);
}

#[test]
fn excessive_drift_stops_the_run() {
    let limit = Duration::from_millis(100);
    let options = SimOptions {
        realtime: Some(RealTimeOptions {
            max_drift: Some(limit),
            start_at: Instant::now().checked_sub(Duration::from_secs(5)),
        }),
        ..SimOptions::new("late")
    };
    let mut b = SimulationBuilder::new(options);
    b.add_component(VoltageSource::new(
        "vs",
        Terminal::Node(0),
        Terminal::Ground,
        Complex::new(1.0, 0.0),
    ));
    b.add_component(Resistor::new("r", Terminal::Node(0), Terminal::Ground, ohm(1.0)));
    let ctl = SimulationController::spawn(b.build().unwrap()).unwrap();

    ctl.start().unwrap();
    let err = ctl.wait().unwrap_err();
    assert!(matches!(err, SimError::RealTimeDriftExceeded { limit: l, .. } if l == limit));
    assert_eq!(ctl.state(), ControllerState::Done);
    assert_eq!(ctl.steps_done(), 1);
    assert!(ctl.realtime_stats().deadline_misses >= 1);
}
