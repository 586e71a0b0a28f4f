//! Setpoints imported from, and measurements exported to, an outside party.

use std::sync::Arc;

use pf_components::{Resistor, VoltageSource};
use pf_core::units::ohm;
use pf_core::{Complex, Terminal};
use pf_sim::{ChannelInterface, SimError, SimOptions, Simulation, SimulationBuilder};

fn divider() -> Simulation {
    let mut b = SimulationBuilder::new(SimOptions::new("ext"));
    b.add_component(VoltageSource::new(
        "vs",
        Terminal::Node(0),
        Terminal::Ground,
        Complex::new(0.0, 0.0),
    ));
    b.add_component(Resistor::new("r", Terminal::Node(0), Terminal::Ground, ohm(4.0)));
    b.build().unwrap()
}

#[test]
fn imported_setpoints_drive_the_source_and_samples_follow() {
    let mut sim = divider();
    let v_ref = sim.attrs().find::<Complex>("vs", "v_ref").unwrap();
    let i_r = sim.attrs().find::<Complex>("r", "i_intf").unwrap();
    let (iface, ends) = ChannelInterface::new("scada", vec![v_ref], vec![i_r]);
    sim.add_external_interface(Arc::new(iface)).unwrap();

    let import = sim.schedule().find("scada.Import").unwrap();
    let source = sim.schedule().find("vs.MnaPreStep").unwrap();
    let layer = sim.schedule().layer_of();
    assert!(layer[import] < layer[source]);

    for v in [8.0, 12.0, 20.0] {
        ends.setpoints.send(vec![Complex::new(v, 0.0)]).unwrap();
    }
    for _ in 0..3 {
        assert!(sim.step().unwrap());
    }

    let samples: Vec<_> = ends.samples.try_iter().collect();
    assert_eq!(samples.len(), 3);
    for (sample, v) in samples.iter().zip([8.0, 12.0, 20.0]) {
        assert!((sample.values[0] - Complex::new(v / 4.0, 0.0)).norm() < 1e-12);
    }
    assert_eq!(samples[2].step, 2);
}

#[test]
fn empty_queue_fails_the_step_and_keeps_last_results() {
    let mut sim = divider();
    let v_ref = sim.attrs().find::<Complex>("vs", "v_ref").unwrap();
    let (iface, ends) = ChannelInterface::new("scada", vec![v_ref], vec![]);
    sim.add_external_interface(Arc::new(iface)).unwrap();

    ends.setpoints.send(vec![Complex::new(6.0, 0.0)]).unwrap();
    sim.step().unwrap();
    let before = sim.lvector().clone();

    let err = sim.step().unwrap_err();
    match &err {
        SimError::StepExecution { step, message, .. } => {
            assert_eq!(*step, 1);
            assert!(message.contains("scada.Import"), "{message}");
        }
        other => panic!("unexpected {other}"),
    }
    assert_eq!(sim.failure(), Some(&err));
    assert_eq!(sim.steps_done(), 1);
    assert_eq!(sim.lvector(), &before);
    assert!((before[0] - Complex::new(6.0, 0.0)).norm() < 1e-12);

    // The run is over; a queued setpoint does not revive it.
    ends.setpoints.send(vec![Complex::new(6.0, 0.0)]).unwrap();
    assert!(matches!(sim.step(), Err(SimError::InvalidState { .. })));
}

#[test]
fn interfaces_cannot_join_a_running_simulation() {
    let mut sim = divider();
    sim.step().unwrap();
    let v_ref = sim.attrs().find::<Complex>("vs", "v_ref").unwrap();
    let (iface, _ends) = ChannelInterface::new("late", vec![v_ref], vec![]);
    assert!(matches!(
        sim.add_external_interface(Arc::new(iface)),
        Err(SimError::InvalidState { .. })
    ));
}
