//! Inductor as a dynamic-phasor companion model.

use pf_core::units::Inductance;
use pf_core::{
    Attr, Complex, ComplexVector, Real, SourceStamp, StepContext, SystemMatrix, Terminal,
    Topology, J,
};
use pf_tasks::Dependencies;

use crate::common::{check_positive, not_initialized};
use crate::companion::{BranchAttrs, Companion};
use crate::error::ComponentResult;
use crate::integrator::IntegrationMethod;
use crate::traits::{InitContext, Interface, MnaComponent};

/// Two-terminal inductor.
///
/// Forward Euler leaves the matrix untouched and injects the extrapolated
/// current; the implicit methods stamp a companion admittance.
#[derive(Debug, Clone)]
pub struct Inductor {
    name: String,
    terminals: [Terminal; 2],
    pub inductance: Inductance,
    pub method: IntegrationMethod,
    companion: Option<Companion>,
    attrs: Option<BranchAttrs>,
}

impl Inductor {
    pub fn new(name: impl Into<String>, a: Terminal, b: Terminal, inductance: Inductance) -> Self {
        Self {
            name: name.into(),
            terminals: [a, b],
            inductance,
            method: IntegrationMethod::default(),
            companion: None,
            attrs: None,
        }
    }

    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self
    }

    /// Companion coefficients for inductance `l` at `omega` and step `dt`.
    pub fn companion(method: IntegrationMethod, l: Real, omega: Real, dt: Real) -> Companion {
        match method {
            IntegrationMethod::Trapezoidal => {
                let b = Complex::new(0.0, 0.5 * omega * dt);
                let one = Complex::new(1.0, 0.0);
                let g = Complex::new(dt / (2.0 * l), 0.0) / (one + b);
                Companion {
                    g,
                    hist_v: g,
                    hist_i: (one - b) / (one + b),
                }
            }
            IntegrationMethod::BackwardEuler => {
                let denom = Complex::new(1.0, 0.0) + J * (omega * dt);
                Companion {
                    g: Complex::new(dt / l, 0.0) / denom,
                    hist_v: Complex::default(),
                    hist_i: Complex::new(1.0, 0.0) / denom,
                }
            }
            IntegrationMethod::ForwardEuler => Companion {
                g: Complex::default(),
                hist_v: Complex::new(dt / l, 0.0),
                hist_i: Complex::new(1.0, 0.0) - J * (omega * dt),
            },
        }
    }

    fn parts(&self) -> ComponentResult<(Companion, BranchAttrs)> {
        match (self.companion, self.attrs) {
            (Some(c), Some(a)) => Ok((c, a)),
            _ => Err(not_initialized(&self.name)),
        }
    }
}

impl MnaComponent for Inductor {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        let l = check_positive(self.inductance.value, "inductance")?;
        let dt = check_positive(init.dt(), "timestep")?;
        self.companion = Some(Self::companion(self.method, l, init.omega(), dt));
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
