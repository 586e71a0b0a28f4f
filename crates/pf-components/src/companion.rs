//! Discretized companion model shared by energy-storage elements.
//!
//! After discretization a reactive branch reduces to an admittance `g` in
//! parallel with a history current source:
//!
//! ```text
//! i(k)   = g * v(k) + i_h(k)
//! i_h(k) = hist_v * v(k-1) + hist_i * i(k-1)
//! ```
//!
//! The history current flows from the first to the second terminal.

use pf_core::{Attr, Complex, ComplexVector, SourceStamp, StepContext, SystemMatrix, Terminal};
use pf_tasks::Dependencies;

use crate::common::{branch_voltage, check_finite_complex};
use crate::error::ComponentResult;
use crate::traits::{InitContext, Interface};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Companion {
    pub g: Complex,
    pub hist_v: Complex,
    pub hist_i: Complex,
}

/// Attributes of a companion branch.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BranchAttrs {
    pub io: Interface,
    pub right_vector: Attr<SourceStamp>,
}

impl BranchAttrs {
    pub fn register(init: &mut InitContext<'_>, owner: &str) -> ComponentResult<Self> {
        Ok(Self {
            io: Interface::register(init, owner)?,
            right_vector: init.register(owner, "right_vector", SourceStamp::new())?,
        })
    }

    pub fn pre_step_dependencies(&self) -> Dependencies {
        Dependencies::new().read(self.io.i_intf).read(self.io.v_intf)
    }

    pub fn post_step_dependencies(&self) -> Dependencies {
        Dependencies::new()
            .read(self.io.i_intf)
            .read(self.io.v_intf)
            .write(self.io.i_intf)
            .write(self.io.v_intf)
    }
}

impl Companion {
    /// History current from the previous step's terminal values.
    pub fn history(&self, ctx: &StepContext<'_>, io: Interface) -> ComponentResult<Complex> {
        let v_prev = ctx.attrs.get(io.v_intf)?;
        let i_prev = ctx.attrs.get(io.i_intf)?;
        Ok(self.hist_v * v_prev + self.hist_i * i_prev)
    }

    pub fn stamp_matrix(&self, matrix: &mut SystemMatrix, a: Terminal, b: Terminal) -> ComponentResult<()> {
        if self.g != Complex::default() {
            matrix.stamp_admittance(a, b, self.g)?;
        }
        Ok(())
    }

    pub fn stamp_source(
        &self,
        ctx: &StepContext<'_>,
        io: Interface,
        a: Terminal,
        b: Terminal,
        rhs: &mut SourceStamp,
    ) -> ComponentResult<()> {
        let i_h = self.history(ctx, io)?;
        rhs.add_branch_current(a, b, i_h);
        Ok(())
    }

    /// Read back the branch voltage and close the current equation.
    ///
    /// The history term is recomputed from the attributes that still hold the
    /// previous step's values, so it equals what the PreStep task stamped.
    pub fn update(
        &self,
        ctx: &StepContext<'_>,
        io: Interface,
        a: Terminal,
        b: Terminal,
        solution: &ComplexVector,
    ) -> ComponentResult<()> {
        let i_h = self.history(ctx, io)?;
        let v = branch_voltage(solution, a, b)?;
        let i = self.g * v + i_h;
        check_finite_complex(i, "branch current")?;
        ctx.attrs.set(io.v_intf, v)?;
        ctx.attrs.set(io.i_intf, i)?;
        Ok(())
    }
}
