//! Linear resistor.

use pf_core::units::Resistance;
use pf_core::{Complex, ComplexVector, StepContext, SystemMatrix, Terminal, Topology};
use pf_tasks::Dependencies;

use crate::common::{branch_voltage, check_positive, not_initialized};
use crate::error::ComponentResult;
use crate::traits::{InitContext, Interface, MnaComponent};

/// Two-terminal resistor; stamps a real conductance.
#[derive(Debug, Clone)]
pub struct Resistor {
    name: String,
    terminals: [Terminal; 2],
    pub resistance: Resistance,
    attrs: Option<Interface>,
}

impl Resistor {
    pub fn new(name: impl Into<String>, a: Terminal, b: Terminal, resistance: Resistance) -> Self {
        Self {
            name: name.into(),
            terminals: [a, b],
            resistance,
            attrs: None,
        }
    }

    fn conductance(&self) -> Complex {
        Complex::new(1.0 / self.resistance.value, 0.0)
    }
}

impl MnaComponent for Resistor {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        check_positive(self.resistance.value, "resistance")?;
        self.attrs = Some(Interface::register(init, &self.name)?);
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix, _topology: &Topology) -> ComponentResult<()> {
        let [a, b] = self.terminals;
        matrix.stamp_admittance(a, b, self.conductance())?;
        Ok(())
    }

    fn update_from_solution(
        &self,
        ctx: &StepContext<'_>,
        solution: &ComplexVector,
    ) -> ComponentResult<()> {
        let io = self.attrs.ok_or_else(|| not_initialized(&self.name))?;
        let [a, b] = self.terminals;
        let v = branch_voltage(solution, a, b)?;
        ctx.attrs.set(io.v_intf, v)?;
        ctx.attrs.set(io.i_intf, v * self.conductance())?;
        Ok(())
    }

    fn post_step_dependencies(&self) -> Dependencies {
        match self.attrs {
            Some(io) => Dependencies::new().write(io.i_intf).write(io.v_intf),
            None => Dependencies::new(),
        }
    }

    fn interface(&self) -> Option<Interface> {
        self.attrs
    }
}
