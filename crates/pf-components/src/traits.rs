//! Core traits for network components.

use std::sync::Arc;

use pf_core::{
    Attr, AttributeRegistry, AttributeType, Complex, ComplexVector, ComponentId, Real,
    SourceStamp, StepContext, SystemMatrix, Terminal, Topology,
};
use pf_tasks::Dependencies;

use crate::error::ComponentResult;

/// Construction-time services handed to [`MnaComponent::initialize`].
///
/// One context is shared by all components of a simulation; the builder
/// points it at each top-level component in turn.
pub struct InitContext<'a> {
    registry: &'a mut AttributeRegistry,
    left_vector: Attr<ComplexVector>,
    omega: Real,
    dt: Real,
    owner: ComponentId,
    next_virtual: usize,
}

impl<'a> InitContext<'a> {
    /// `first_virtual` is the first system index after the network nodes.
    pub fn new(
        registry: &'a mut AttributeRegistry,
        left_vector: Attr<ComplexVector>,
        omega: Real,
        dt: Real,
        first_virtual: usize,
    ) -> Self {
        Self {
            registry,
            left_vector,
            omega,
            dt,
            owner: ComponentId::from_index(0),
            next_virtual: first_virtual,
        }
    }

    /// Top-level component that subsequent registrations belong to.
    pub fn set_owner(&mut self, owner: ComponentId) {
        self.owner = owner;
    }

    pub fn owner(&self) -> ComponentId {
        self.owner
    }

    /// Base angular frequency of the dynamic phasors (rad/s).
    pub fn omega(&self) -> Real {
        self.omega
    }

    pub fn dt(&self) -> Real {
        self.dt
    }

    /// Solution vector written by the solver after every solve.
    pub fn left_vector(&self) -> Attr<ComplexVector> {
        self.left_vector
    }

    /// Reserve one extra row/column (branch current of an ideal source).
    pub fn allocate_virtual(&mut self) -> usize {
        let index = self.next_virtual;
        self.next_virtual += 1;
        index
    }

    /// One past the highest system index handed out so far.
    pub fn system_size(&self) -> usize {
        self.next_virtual
    }

    pub fn register<T: AttributeType>(
        &mut self,
        owner: &str,
        name: &str,
        initial: T,
    ) -> ComponentResult<Attr<T>> {
        Ok(self.registry.register(owner, name, initial)?)
    }

    /// Register an attribute that shows up in step records.
    pub fn register_logged<T: AttributeType>(
        &mut self,
        owner: &str,
        name: &str,
        initial: T,
    ) -> ComponentResult<Attr<T>> {
        Ok(self.registry.register_logged(owner, name, initial)?)
    }
}

/// Terminal current and voltage every component publishes.
///
/// `i_intf` flows through the component from its first to its second
/// terminal; `v_intf` is the first terminal's voltage minus the second's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub i_intf: Attr<Complex>,
    pub v_intf: Attr<Complex>,
}

impl Interface {
    pub fn register(init: &mut InitContext<'_>, owner: &str) -> ComponentResult<Self> {
        Ok(Self {
            i_intf: init.register_logged(owner, "i_intf", Complex::default())?,
            v_intf: init.register_logged(owner, "v_intf", Complex::default())?,
        })
    }
}

/// An electrical element's contribution to the nodal equations.
///
/// Lifecycle: constructed with parameters, then `initialize` registers the
/// attributes the component publishes. After that the component is shared
/// behind an `Arc` and only touched through `&self`; every piece of mutable
/// state lives in attributes.
///
/// Per step the component is driven by two tasks:
/// - PreStep: `stamp_source` fills the component's own `right_vector`.
/// - PostStep: `update_from_solution` reads back terminal values and
///   advances internal state.
///
/// `stamp_matrix` runs once per topology variant.
pub trait MnaComponent: Send + Sync {
    fn name(&self) -> &str;

    /// Terminals in declaration order.
    fn terminals(&self) -> &[Terminal];

    /// Extra system rows this component needs.
    fn virtual_nodes(&self) -> usize {
        0
    }

    fn initialize(&mut self, init: &mut InitContext<'_>) -> ComponentResult<()>;

    /// Add admittance entries for the given variant.
    fn stamp_matrix(&self, matrix: &mut SystemMatrix, topology: &Topology) -> ComponentResult<()>;

    /// Accumulate right-hand-side injections for the step in `ctx`.
    ///
    /// `rhs` is already cleared. Components without sources leave it empty.
    fn stamp_source(&self, _ctx: &StepContext<'_>, _rhs: &mut SourceStamp) -> ComponentResult<()> {
        Ok(())
    }

    fn update_from_solution(
        &self,
        ctx: &StepContext<'_>,
        solution: &ComplexVector,
    ) -> ComponentResult<()>;

    /// Attributes read by the PreStep task besides its own `right_vector`.
    fn pre_step_dependencies(&self) -> Dependencies {
        Dependencies::new()
    }

    /// Attributes of the PostStep task besides the solution vector.
    fn post_step_dependencies(&self) -> Dependencies;

    /// Right-hand-side contribution; `None` for purely passive components,
    /// which then get no PreStep task.
    fn right_vector(&self) -> Option<Attr<SourceStamp>> {
        None
    }

    fn interface(&self) -> Option<Interface>;

    /// Owned parts whose tasks run alongside this component's.
    fn subcomponents(&self) -> &[Arc<dyn MnaComponent>] {
        &[]
    }
}
