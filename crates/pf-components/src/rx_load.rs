//! Constant-impedance load built from primitive components.

use std::sync::Arc;

use pf_core::units::{Power, Voltage, farad, henry, ohm};
use pf_core::{
    Attr, Complex, ComplexVector, SourceStamp, StepContext, SystemMatrix, Terminal, Topology,
};
use pf_tasks::Dependencies;
use tracing::debug;

use crate::capacitor::Capacitor;
use crate::common::{check_finite, check_positive, node_voltage, not_initialized};
use crate::error::{ComponentError, ComponentResult};
use crate::inductor::Inductor;
use crate::integrator::IntegrationMethod;
use crate::resistor::Resistor;
use crate::traits::{InitContext, Interface, MnaComponent};

#[derive(Debug, Clone)]
struct RxLoadAttrs {
    io: Interface,
    right_vector: Attr<SourceStamp>,
    part_currents: Vec<Attr<Complex>>,
    part_sources: Vec<Attr<SourceStamp>>,
}

/// Load drawing `P + jQ` at nominal voltage, connected from its terminal to
/// ground.
///
/// Realized as parallel parts: `R = V²/P`, and `L = V²/(Qω)` for inductive
/// or `C = -Q/(V²ω)` for capacitive loads. The parts run their own tasks; the
/// load's tasks only sum what they publish.
pub struct RxLoad {
    name: String,
    terminals: [Terminal; 1],
    pub active_power: Power,
    pub reactive_power: Power,
    pub nominal_voltage: Voltage,
    pub method: IntegrationMethod,
    parts: Vec<Arc<dyn MnaComponent>>,
    attrs: Option<RxLoadAttrs>,
}

impl RxLoad {
    pub fn new(
        name: impl Into<String>,
        terminal: Terminal,
        active_power: Power,
        reactive_power: Power,
        nominal_voltage: Voltage,
    ) -> Self {
        Self {
            name: name.into(),
            terminals: [terminal],
            active_power,
            reactive_power,
            nominal_voltage,
            method: IntegrationMethod::default(),
            parts: Vec::new(),
            attrs: None,
        }
    }

    pub fn with_method(mut self, method: IntegrationMethod) -> Self {
        self.method = method;
        self
    }

    fn build_parts(&self, init: &mut InitContext<'_>) -> ComponentResult<Vec<Arc<dyn MnaComponent>>> {
        let node = self.terminals[0];
        let v = check_positive(self.nominal_voltage.value, "nominal voltage")?;
        let p = self.active_power.value;
        let q = self.reactive_power.value;
        check_finite(p, "active power")?;
        check_finite(q, "reactive power")?;
        if p < 0.0 {
            return Err(ComponentError::InvalidArg {
                what: "load active power must not be negative",
            });
        }
        if p == 0.0 && q == 0.0 {
            return Err(ComponentError::InvalidArg {
                what: "load draws no power",
            });
        }

        let omega = init.omega();
        let v2 = v * v;
        let mut parts: Vec<Arc<dyn MnaComponent>> = Vec::new();

        if p > 0.0 {
            let mut r = Resistor::new(format!("{}.R", self.name), node, Terminal::Ground, ohm(v2 / p));
            r.initialize(init)?;
            parts.push(Arc::new(r));
        }
        if q > 0.0 {
            let l = v2 / (q * check_positive(omega, "base angular frequency")?);
            let mut ind = Inductor::new(format!("{}.L", self.name), node, Terminal::Ground, henry(l))
                .with_method(self.method);
            ind.initialize(init)?;
            parts.push(Arc::new(ind));
        } else if q < 0.0 {
            let c = -q / (v2 * check_positive(omega, "base angular frequency")?);
            let mut cap = Capacitor::new(format!("{}.C", self.name), node, Terminal::Ground, farad(c))
                .with_method(self.method);
            cap.initialize(init)?;
            parts.push(Arc::new(cap));
        }

        debug!(load = %self.name, parts = parts.len(), "load parts built");
        Ok(parts)
    }

    fn attrs(&self) -> ComponentResult<&RxLoadAttrs> {
        self.attrs.as_ref().ok_or_else(|| not_initialized(&self.name))
    }
}

impl MnaComponent for RxLoad {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        if self.terminals[0].is_ground() {
            return Err(ComponentError::InvalidArg {
                what: "load terminal is grounded",
            });
        }
        let parts = self.build_parts(init)?;

        let mut part_currents = Vec::with_capacity(parts.len());
        let mut part_sources = Vec::new();
        for part in &parts {
            let io = part.interface().ok_or_else(|| not_initialized(part.name()))?;
            part_currents.push(io.i_intf);
            part_sources.extend(part.right_vector());
        }

        self.attrs = Some(RxLoadAttrs {
            io: Interface::register(init, &self.name)?,
            right_vector: init.register(&self.name, "right_vector", SourceStamp::new())?,
            part_currents,
            part_sources,
        });
        self.parts = parts;
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix, topology: &Topology) -> ComponentResult<()> {
        for part in &self.parts {
            part.stamp_matrix(matrix, topology)?;
        }
        Ok(())
    }

    fn stamp_source(&self, ctx: &StepContext<'_>, rhs: &mut SourceStamp) -> ComponentResult<()> {
        for &rv in &self.attrs()?.part_sources {
            ctx.attrs.read(rv, |part| rhs.extend_from(part))?;
        }
        Ok(())
    }

    fn update_from_solution(
        &self,
        ctx: &StepContext<'_>,
        solution: &ComplexVector,
    ) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let mut i = Complex::default();
        for &part in &attrs.part_currents {
            i += ctx.attrs.get(part)?;
        }
        ctx.attrs
            .set(attrs.io.v_intf, node_voltage(solution, self.terminals[0])?)?;
        ctx.attrs.set(attrs.io.i_intf, i)?;
        Ok(())
    }

    fn pre_step_dependencies(&self) -> Dependencies {
        match &self.attrs {
            Some(a) => Dependencies::new().read_all(a.part_sources.iter().copied()),
            None => Dependencies::new(),
        }
    }

    fn post_step_dependencies(&self) -> Dependencies {
        match &self.attrs {
            Some(a) => Dependencies::new()
                .read_all(a.part_currents.iter().copied())
                .write(a.io.i_intf)
                .write(a.io.v_intf),
            None => Dependencies::new(),
        }
    }

    fn right_vector(&self) -> Option<Attr<SourceStamp>> {
        self.attrs.as_ref().map(|a| a.right_vector)
    }

    fn interface(&self) -> Option<Interface> {
        self.attrs.as_ref().map(|a| a.io)
    }

    fn subcomponents(&self) -> &[Arc<dyn MnaComponent>] {
        &self.parts
    }
}
