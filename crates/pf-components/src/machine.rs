//! Classical synchronous machine: EMF behind reactance with swing dynamics.

use pf_core::units::{Power, Resistance, Time, Voltage};
use pf_core::{
    Attr, Complex, ComplexVector, J, Real, RealVector, SourceStamp, StepContext, SystemMatrix,
    Terminal, Topology, polar,
};
use pf_tasks::Dependencies;
use tracing::debug;

use crate::common::{check_finite, check_finite_complex, check_positive, node_voltage, not_initialized};
use crate::error::{ComponentError, ComponentResult};
use crate::integrator::{IntegrationMethod, OdeModel};
use crate::traits::{InitContext, Interface, MnaComponent};

/// Machine parameters.
#[derive(Debug, Clone, Copy)]
pub struct MachineParams {
    /// Internal EMF magnitude.
    pub emf: Voltage,
    /// Transient reactance.
    pub reactance: Resistance,
    /// Rated apparent power, the per-unit base of the swing equation.
    pub rated_power: Power,
    /// Inertia constant H.
    pub inertia: Time,
    /// Damping in per-unit power per per-unit slip.
    pub damping: Real,
}

#[derive(Debug, Clone, Copy)]
struct MachineAttrs {
    io: Interface,
    right_vector: Attr<SourceStamp>,
    /// `[rotor angle (rad), slip (pu)]`
    state: Attr<RealVector>,
    p_mech: Attr<Real>,
    p_elec: Attr<Real>,
}

/// Single-terminal generator connected from its terminal to ground.
///
/// The network sees a Norton equivalent: admittance `1/(jX)` and an injected
/// current `E∠δ / (jX)`. After each solve the rotor state advances one step
/// with the instance's integration method, holding the terminal voltage of
/// the solve constant over the step.
#[derive(Debug, Clone)]
pub struct SynchronousMachine {
    name: String,
    terminals: [Terminal; 1],
    pub params: MachineParams,
    pub mech_power: Power,
    pub initial_angle: Real,
    pub method: IntegrationMethod,
    omega: Real,
    attrs: Option<MachineAttrs>,
}

/// Swing equation with the terminal voltage frozen.
struct Swing {
    emf: Real,
    reactance: Real,
    terminal: Complex,
    p_mech: Real,
    s_base: Real,
    inertia: Real,
    damping: Real,
    omega: Real,
}

impl Swing {
    /// Current delivered to the network at rotor angle `delta`.
    fn current(&self, delta: Real) -> Complex {
        (polar(self.emf, delta) - self.terminal) / (J * self.reactance)
    }

    fn electrical_power(&self, delta: Real) -> Real {
        (polar(self.emf, delta) * self.current(delta).conj()).re
    }
}

impl OdeModel for Swing {
    type State = [Real; 2];

    fn rhs(&self, _t: Real, x: &[Real; 2]) -> ComponentResult<[Real; 2]> {
        let [delta, slip] = *x;
        let pe = self.electrical_power(delta);
        check_finite(pe, "electrical power")?;
        let accel = ((self.p_mech - pe) / self.s_base - self.damping * slip) / (2.0 * self.inertia);
        Ok([self.omega * slip, accel])
    }

    fn add(&self, a: &[Real; 2], b: &[Real; 2]) -> [Real; 2] {
        [a[0] + b[0], a[1] + b[1]]
    }

    fn scale(&self, a: &[Real; 2], scale: Real) -> [Real; 2] {
        [a[0] * scale, a[1] * scale]
    }

    fn distance(&self, a: &[Real; 2], b: &[Real; 2]) -> Real {
        (a[0] - b[0]).abs().max((a[1] - b[1]).abs())
    }
}

impl SynchronousMachine {
    pub fn new(
        name: impl Into<String>,
        terminal: Terminal,
        params: MachineParams,
        mech_power: Power,
        initial_angle: Real,
    ) -> Self {
        Self {
            name: name.into(),
            terminals: [terminal],
            params,
            mech_power,
            initial_angle,
            method: IntegrationMethod::ForwardEuler,
            omega: 0.0,
            attrs: None,
        }
    }

    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self
    }

    /// Mechanical power setpoint, drivable from an external interface.
    pub fn p_mech(&self) -> Option<Attr<Real>> {
        self.attrs.map(|a| a.p_mech)
    }

    pub fn state(&self) -> Option<Attr<RealVector>> {
        self.attrs.map(|a| a.state)
    }

    fn attrs(&self) -> ComponentResult<MachineAttrs> {
        self.attrs.ok_or_else(|| not_initialized(&self.name))
    }

    fn admittance(&self) -> Complex {
        Complex::new(1.0, 0.0) / (J * self.params.reactance.value)
    }

    fn read_state(ctx: &StepContext<'_>, attr: Attr<RealVector>) -> ComponentResult<[Real; 2]> {
        let state = ctx.attrs.read(attr, |s| {
            (s.len() == 2).then(|| [s[0], s[1]])
        })?;
        state.ok_or(ComponentError::NonPhysical {
            what: "machine state vector",
        })
    }
}

impl MnaComponent for SynchronousMachine {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        if self.terminals[0].is_ground() {
            return Err(ComponentError::InvalidArg {
                what: "machine terminal is grounded",
            });
        }
        check_positive(self.params.emf.value, "machine EMF")?;
        check_positive(self.params.reactance.value, "machine reactance")?;
        check_positive(self.params.rated_power.value, "machine rated power")?;
        check_positive(self.params.inertia.value, "machine inertia")?;
        check_finite(self.params.damping, "machine damping")?;
        check_finite(self.mech_power.value, "mechanical power")?;
        check_finite(self.initial_angle, "initial rotor angle")?;
        self.omega = check_positive(init.omega(), "base angular frequency")?;

        let initial = RealVector::from_vec(vec![self.initial_angle, 0.0]);
        self.attrs = Some(MachineAttrs {
            io: Interface::register(init, &self.name)?,
            right_vector: init.register(&self.name, "right_vector", SourceStamp::new())?,
            state: init.register_logged(&self.name, "state", initial)?,
            p_mech: init.register(&self.name, "p_mech", self.mech_power.value)?,
            p_elec: init.register_logged(&self.name, "p_elec", 0.0)?,
        });
        debug!(machine = %self.name, angle = self.initial_angle, "machine initialized");
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix, _topology: &Topology) -> ComponentResult<()> {
        matrix.stamp_admittance(self.terminals[0], Terminal::Ground, self.admittance())?;
        Ok(())
    }

    fn stamp_source(&self, ctx: &StepContext<'_>, rhs: &mut SourceStamp) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let [delta, _] = Self::read_state(ctx, attrs.state)?;
        let injection = polar(self.params.emf.value, delta) * self.admittance();
        check_finite_complex(injection, "machine current injection")?;
        rhs.add(self.terminals[0], injection);
        Ok(())
    }

    fn update_from_solution(
        &self,
        ctx: &StepContext<'_>,
        solution: &ComplexVector,
    ) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let state = Self::read_state(ctx, attrs.state)?;
        let swing = Swing {
            emf: self.params.emf.value,
            reactance: self.params.reactance.value,
            terminal: node_voltage(solution, self.terminals[0])?,
            p_mech: ctx.attrs.get(attrs.p_mech)?,
            s_base: self.params.rated_power.value,
            inertia: self.params.inertia.value,
            damping: self.params.damping,
            omega: self.omega,
        };

        let current = swing.current(state[0]);
        let p_elec = swing.electrical_power(state[0]);
        let next = self.method.step(&swing, ctx.time, &state, ctx.dt)?;
        check_finite(next[0], "rotor angle")?;
        check_finite(next[1], "rotor slip")?;

        ctx.attrs.set(attrs.io.v_intf, swing.terminal)?;
        ctx.attrs.set(attrs.io.i_intf, -current)?;
        ctx.attrs.set(attrs.p_elec, p_elec)?;
        ctx.attrs.write(attrs.state, |s| {
            s[0] = next[0];
            s[1] = next[1];
        })?;
        Ok(())
    }

    fn pre_step_dependencies(&self) -> Dependencies {
        match self.attrs {
            Some(a) => Dependencies::new().read(a.state),
            None => Dependencies::new(),
        }
    }

    fn post_step_dependencies(&self) -> Dependencies {
        match self.attrs {
            Some(a) => Dependencies::new()
                .read(a.state)
                .read(a.p_mech)
                .write(a.state)
                .write(a.p_elec)
                .write(a.io.i_intf)
                .write(a.io.v_intf),
            None => Dependencies::new(),
        }
    }

    fn right_vector(&self) -> Option<Attr<SourceStamp>> {
        self.attrs.map(|a| a.right_vector)
    }

    fn interface(&self) -> Option<Interface> {
        self.attrs.map(|a| a.io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swing(terminal: Complex, p_mech: Real) -> Swing {
        Swing {
            emf: 1.1,
            reactance: 0.3,
            terminal,
            p_mech,
            s_base: 1.0,
            inertia: 3.0,
            damping: 1.0,
            omega: 2.0 * core::f64::consts::PI * 50.0,
        }
    }

    #[test]
    fn power_angle_curve() {
        // Pe = E V sin(δ) / X against an infinite bus at angle zero.
        let s = swing(Complex::new(1.0, 0.0), 0.0);
        let delta: Real = 0.4;
        let expected = 1.1 * 1.0 * delta.sin() / 0.3;
        assert!((s.electrical_power(delta) - expected).abs() < 1e-12);
    }

    #[test]
    fn equilibrium_is_a_fixed_point_for_every_method() {
        let delta = (0.5_f64 * 0.3 / 1.1).asin();
        let s = swing(Complex::new(1.0, 0.0), 0.5);
        for method in [
            IntegrationMethod::ForwardEuler,
            IntegrationMethod::BackwardEuler,
            IntegrationMethod::Trapezoidal,
        ] {
            let next = method.step(&s, 0.0, &[delta, 0.0], 1e-3).unwrap();
            assert!((next[0] - delta).abs() < 1e-9, "{method:?}");
            assert!(next[1].abs() < 1e-9, "{method:?}");
        }
    }

    #[test]
    fn surplus_mechanical_power_accelerates() {
        let delta = 0.2;
        let s = swing(Complex::new(1.0, 0.0), 2.0);
        let next = IntegrationMethod::Trapezoidal
            .step(&s, 0.0, &[delta, 0.0], 1e-3)
            .unwrap();
        assert!(next[1] > 0.0);
        assert!(next[0] > delta);
    }

    #[test]
    fn oversized_step_reports_convergence_failure() {
        // ω·dt in the hundreds: the fixed-point map is not a contraction.
        let s = swing(Complex::new(1.0, 0.0), 0.5);
        for method in [IntegrationMethod::BackwardEuler, IntegrationMethod::Trapezoidal] {
            let err = method.step(&s, 0.0, &[0.0, 0.05], 1.0).unwrap_err();
            assert!(
                matches!(err, ComponentError::ConvergenceFailed { .. }),
                "{method:?}: {err}"
            );
        }
    }
}
