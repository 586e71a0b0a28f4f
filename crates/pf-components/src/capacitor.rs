//! Capacitor as a dynamic-phasor companion model.

use pf_core::units::Capacitance;
use pf_core::{
    Attr, Complex, ComplexVector, Real, SourceStamp, StepContext, SystemMatrix, Terminal, Topology,
};
use pf_tasks::Dependencies;

use crate::common::{check_positive, not_initialized};
use crate::companion::{BranchAttrs, Companion};
use crate::error::{ComponentError, ComponentResult};
use crate::integrator::IntegrationMethod;
use crate::traits::{InitContext, Interface, MnaComponent};

/// Two-terminal capacitor. Only implicit methods are accepted.
#[derive(Debug, Clone)]
pub struct Capacitor {
    name: String,
    terminals: [Terminal; 2],
    pub capacitance: Capacitance,
    pub method: IntegrationMethod,
    companion: Option<Companion>,
    attrs: Option<BranchAttrs>,
}

impl Capacitor {
    pub fn new(name: impl Into<String>, a: Terminal, b: Terminal, capacitance: Capacitance) -> Self {
        Self {
            name: name.into(),
            terminals: [a, b],
            capacitance,
            method: IntegrationMethod::default(),
            companion: None,
            attrs: None,
        }
    }

    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self
    }

    pub fn companion(
        method: IntegrationMethod,
        c: Real,
        omega: Real,
        dt: Real,
    ) -> ComponentResult<Companion> {
        let jwc = Complex::new(0.0, omega * c);
        match method {
            IntegrationMethod::Trapezoidal => {
                let k = Complex::new(2.0 * c / dt, 0.0);
                Ok(Companion {
                    g: k + jwc,
                    hist_v: -(k - jwc),
                    hist_i: Complex::new(-1.0, 0.0),
                })
            }
            IntegrationMethod::BackwardEuler => {
                let k = Complex::new(c / dt, 0.0);
                Ok(Companion {
                    g: k + jwc,
                    hist_v: -k,
                    hist_i: Complex::default(),
                })
            }
            IntegrationMethod::ForwardEuler => Err(ComponentError::NotSupported {
                what: "forward Euler capacitor has no admittance stamp",
            }),
        }
    }

    fn parts(&self) -> ComponentResult<(Companion, BranchAttrs)> {
        match (self.companion, self.attrs) {
            (Some(c), Some(a)) => Ok((c, a)),
            _ => Err(not_initialized(&self.name)),
        }
    }
}

impl MnaComponent for Capacitor {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        let c = check_positive(self.capacitance.value, "capacitance")?;
        let dt = check_positive(init.dt(), "timestep")?;
        self.companion = Some(Self::companion(self.method, c, init.omega(), dt)?);
        self.attrs = Some(BranchAttrs::register(init, &self.name)?);
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix, _topology: &Topology) -> ComponentResult<()> {
        let (companion, _) = self.parts()?;
        let [a, b] = self.terminals;
        companion.stamp_matrix(matrix, a, b)
    }

    fn stamp_source(&self, ctx: &StepContext<'_>, rhs: &mut SourceStamp) -> ComponentResult<()> {
        let (companion, attrs) = self.parts()?;
        let [a, b] = self.terminals;
        companion.stamp_source(ctx, attrs.io, a, b, rhs)
    }

    fn update_from_solution(
        &self,
        ctx: &StepContext<'_>,
        solution: &ComplexVector,
    ) -> ComponentResult<()> {
        let (companion, attrs) = self.parts()?;
        let [a, b] = self.terminals;
        companion.update(ctx, attrs.io, a, b, solution)
    }

    fn pre_step_dependencies(&self) -> Dependencies {
        self.attrs
            .map(|a| a.pre_step_dependencies())
            .unwrap_or_default()
    }

    fn post_step_dependencies(&self) -> Dependencies {
        self.attrs
            .map(|a| a.post_step_dependencies())
            .unwrap_or_default()
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

    #[test]
    fn steady_state_matches_admittance() {
        // Steady voltage v gives i = jωC v for both implicit methods.
        let (c, omega, dt) = (1e-6, 314.159, 1e-4);
        for method in [IntegrationMethod::Trapezoidal, IntegrationMethod::BackwardEuler] {
            let comp = Capacitor::companion(method, c, omega, dt).unwrap();
            let v = Complex::new(100.0, 20.0);
            let i = Complex::new(0.0, omega * c) * v;
            let next = comp.g * v + comp.hist_v * v + comp.hist_i * i;
            assert!((next - i).norm() < 1e-9, "{method:?}");
        }
    }

    #[test]
    fn forward_euler_is_rejected() {
        let err = Capacitor::companion(IntegrationMethod::ForwardEuler, 1e-6, 1.0, 1e-3).unwrap_err();
        assert!(err.is_configuration());
    }
}
