//! Ideal voltage and current sources.
//!
//! Setpoints live in attributes (`v_ref`, `i_ref`) so an external interface
//! can drive them between steps.

use pf_core::units::{Current, Voltage};
use pf_core::{
    Attr, Complex, ComplexVector, SourceStamp, StepContext, SystemMatrix, Terminal, Topology,
};
use pf_tasks::Dependencies;

use crate::common::{branch_voltage, check_finite_complex, not_initialized, solution_entry};
use crate::error::ComponentResult;
use crate::traits::{InitContext, Interface, MnaComponent};

#[derive(Debug, Clone, Copy)]
struct VoltageSourceAttrs {
    io: Interface,
    v_ref: Attr<Complex>,
    right_vector: Attr<SourceStamp>,
    branch: usize,
}

/// Ideal voltage source `v(pos) - v(neg) = v_ref`.
///
/// Adds one virtual row holding the branch current, which flows from `pos`
/// through the source to `neg`.
#[derive(Debug, Clone)]
pub struct VoltageSource {
    name: String,
    terminals: [Terminal; 2],
    initial: Complex,
    attrs: Option<VoltageSourceAttrs>,
}

impl VoltageSource {
    pub fn new(name: impl Into<String>, pos: Terminal, neg: Terminal, v_ref: Complex) -> Self {
        Self {
            name: name.into(),
            terminals: [pos, neg],
            initial: v_ref,
            attrs: None,
        }
    }

    /// Source with a real-valued phasor of the given magnitude.
    pub fn from_magnitude(name: impl Into<String>, pos: Terminal, neg: Terminal, v: Voltage) -> Self {
        Self::new(name, pos, neg, Complex::new(v.value, 0.0))
    }

    pub fn v_ref(&self) -> Option<Attr<Complex>> {
        self.attrs.map(|a| a.v_ref)
    }

    /// System index of the branch-current row.
    pub fn branch_index(&self) -> Option<usize> {
        self.attrs.map(|a| a.branch)
    }

    fn attrs(&self) -> ComponentResult<VoltageSourceAttrs> {
        self.attrs.ok_or_else(|| not_initialized(&self.name))
    }
}

impl MnaComponent for VoltageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn virtual_nodes(&self) -> usize {
        1
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        check_finite_complex(self.initial, "source voltage")?;
        let branch = init.allocate_virtual();
        self.attrs = Some(VoltageSourceAttrs {
            io: Interface::register(init, &self.name)?,
            v_ref: init.register(&self.name, "v_ref", self.initial)?,
            right_vector: init.register(&self.name, "right_vector", SourceStamp::new())?,
            branch,
        });
        Ok(())
    }

    fn stamp_matrix(&self, matrix: &mut SystemMatrix, _topology: &Topology) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let [pos, neg] = self.terminals;
        let k = Terminal::Node(attrs.branch);
        let one = Complex::new(1.0, 0.0);
        matrix.add(pos, k, one)?;
        matrix.add(k, pos, one)?;
        matrix.add(neg, k, -one)?;
        matrix.add(k, neg, -one)?;
        Ok(())
    }

    fn stamp_source(&self, ctx: &StepContext<'_>, rhs: &mut SourceStamp) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let v = ctx.attrs.get(attrs.v_ref)?;
        check_finite_complex(v, "source voltage")?;
        rhs.add_index(attrs.branch, v);
        Ok(())
    }

    fn update_from_solution(
        &self,
        ctx: &StepContext<'_>,
        solution: &ComplexVector,
    ) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let [pos, neg] = self.terminals;
        ctx.attrs
            .set(attrs.io.v_intf, branch_voltage(solution, pos, neg)?)?;
        ctx.attrs
            .set(attrs.io.i_intf, solution_entry(solution, attrs.branch)?)?;
        Ok(())
    }

    fn pre_step_dependencies(&self) -> Dependencies {
        match self.attrs {
            Some(a) => Dependencies::new().read(a.v_ref),
            None => Dependencies::new(),
        }
    }

    fn post_step_dependencies(&self) -> Dependencies {
        match self.attrs {
            Some(a) => Dependencies::new().write(a.io.i_intf).write(a.io.v_intf),
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

#[derive(Debug, Clone, Copy)]
struct CurrentSourceAttrs {
    io: Interface,
    i_ref: Attr<Complex>,
    right_vector: Attr<SourceStamp>,
}

/// Ideal current source; `i_ref` flows through it from `a` to `b`.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    name: String,
    terminals: [Terminal; 2],
    initial: Complex,
    attrs: Option<CurrentSourceAttrs>,
}

impl CurrentSource {
    pub fn new(name: impl Into<String>, a: Terminal, b: Terminal, i_ref: Complex) -> Self {
        Self {
            name: name.into(),
            terminals: [a, b],
            initial: i_ref,
            attrs: None,
        }
    }

    pub fn from_magnitude(name: impl Into<String>, a: Terminal, b: Terminal, i: Current) -> Self {
        Self::new(name, a, b, Complex::new(i.value, 0.0))
    }

    pub fn i_ref(&self) -> Option<Attr<Complex>> {
        self.attrs.map(|a| a.i_ref)
    }

    fn attrs(&self) -> ComponentResult<CurrentSourceAttrs> {
        self.attrs.ok_or_else(|| not_initialized(&self.name))
    }
}

impl MnaComponent for CurrentSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()> {
        check_finite_complex(self.initial, "source current")?;
        self.attrs = Some(CurrentSourceAttrs {
            io: Interface::register(init, &self.name)?,
            i_ref: init.register(&self.name, "i_ref", self.initial)?,
            right_vector: init.register(&self.name, "right_vector", SourceStamp::new())?,
        });
        Ok(())
    }

    fn stamp_matrix(&self, _matrix: &mut SystemMatrix, _topology: &Topology) -> ComponentResult<()> {
        Ok(())
    }

    fn stamp_source(&self, ctx: &StepContext<'_>, rhs: &mut SourceStamp) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let i = ctx.attrs.get(attrs.i_ref)?;
        check_finite_complex(i, "source current")?;
        let [a, b] = self.terminals;
        rhs.add_branch_current(a, b, i);
        Ok(())
    }

    fn update_from_solution(
        &self,
        ctx: &StepContext<'_>,
        solution: &ComplexVector,
    ) -> ComponentResult<()> {
        let attrs = self.attrs()?;
        let [a, b] = self.terminals;
        ctx.attrs.set(attrs.io.v_intf, branch_voltage(solution, a, b)?)?;
        ctx.attrs.set(attrs.io.i_intf, ctx.attrs.get(attrs.i_ref)?)?;
        Ok(())
    }

    fn pre_step_dependencies(&self) -> Dependencies {
        match self.attrs {
            Some(a) => Dependencies::new().read(a.i_ref),
            None => Dependencies::new(),
        }
    }

    fn post_step_dependencies(&self) -> Dependencies {
        match self.attrs {
            Some(a) => Dependencies::new()
                .read(a.i_ref)
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
