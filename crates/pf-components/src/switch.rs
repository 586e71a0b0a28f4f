//! Two-position switch whose state belongs to the topology variant.

use pf_core::units::Resistance;
use pf_core::{
    Complex, ComplexVector, ComponentId, StepContext, SystemMatrix, Terminal, Topology,
};
use pf_tasks::Dependencies;

use crate::common::{branch_voltage, check_positive, not_initialized};
use crate::error::{ComponentError, ComponentResult};
use crate::traits::{InitContext, Interface, MnaComponent};

/// Switch modeled as a resistance that is either small (closed) or large
/// (open). Each topology variant fixes the position, so the matrix entry is
/// constant within a variant.
#[derive(Debug, Clone)]
pub struct Switch {
    name: String,
    terminals: [Terminal; 2],
    pub r_open: Resistance,
    pub r_closed: Resistance,
    id: Option<ComponentId>,
    attrs: Option<Interface>,
}

impl Switch {
    pub fn new(
        name: impl Into<String>,
        a: Terminal,
        b: Terminal,
        r_open: Resistance,
        r_closed: Resistance,
    ) -> Self {
        Self {
            name: name.into(),
            terminals: [a, b],
            r_open,
            r_closed,
            id: None,
            attrs: None,
        }
    }

    /// Id under which variants record this switch's position.
    pub fn id(&self) -> Option<ComponentId> {
        self.id
    }

    fn conductance(&self, topology: &Topology) -> ComponentResult<Complex> {
        let id = self.id.ok_or_else(|| not_initialized(&self.name))?;
        let r = if topology.is_closed(id) {
            self.r_closed.value
        } else {
            self.r_open.value
        };
        Ok(Complex::new(1.0 / r, 0.0))
    }
}

impl MnaComponent for Switch {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        let open = check_positive(self.r_open.value, "open resistance")?;
        let closed = check_positive(self.r_closed.value, "closed resistance")?;
        if closed >= open {
            return Err(ComponentError::InvalidArg {
                what: "closed resistance must be below open resistance",
            });
        }
        self.id = Some(init.owner());
        self.attrs = Some(Interface::register(init, &self.name)?);
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix, topology: &Topology) -> ComponentResult<()> {
        let [a, b] = self.terminals;
        matrix.stamp_admittance(a, b, self.conductance(topology)?)?;
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
        ctx.attrs.set(io.i_intf, v * self.conductance(ctx.topology)?)?;
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
