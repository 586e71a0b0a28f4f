//! Right-hand-side assembly and solve against the active variant.

use std::sync::Arc;

use pf_components::MnaComponent;
use pf_core::{Attr, AttributeStore, ComplexVector, ComponentId, Topology, VariantId};
use tracing::{debug, info};

use crate::error::{SolverError, SolverResult};
use crate::variant::TopologyVariant;

/// Owner of the variant table, the RHS buffer and the solve.
///
/// The solution is written into the `left_vector` attribute, which no task
/// may write; components read it during PostStep.
pub struct Assembler {
    size: usize,
    components: Vec<Arc<dyn MnaComponent>>,
    left_vector: Attr<ComplexVector>,
    variants: Vec<TopologyVariant>,
    active: usize,
    topology: Topology,
    rhs: ComplexVector,
    released: bool,
}

impl Assembler {
    /// `components` are the top-level components, indexed by [`ComponentId`].
    pub fn new(
        size: usize,
        components: Vec<Arc<dyn MnaComponent>>,
        left_vector: Attr<ComplexVector>,
    ) -> SolverResult<Self> {
        if size == 0 {
            return Err(SolverError::EmptySystem);
        }
        let topology = Topology::all_active(components.len());
        Ok(Self {
            size,
            components,
            left_vector,
            variants: Vec::new(),
            active: 0,
            topology,
            rhs: ComplexVector::zeros(size),
            released: false,
        })
    }

    /// Build and factorize a variant. The first one added becomes active.
    pub fn add_variant(
        &mut self,
        name: impl Into<String>,
        topology: Topology,
    ) -> SolverResult<VariantId> {
        if self.released {
            return Err(SolverError::Released);
        }
        let variant = TopologyVariant::build(name, topology, &self.components, self.size)?;
        info!(
            variant = variant.name(),
            size = self.size,
            active_components = variant.topology().active_count(),
            "topology variant factorized"
        );

        let id = VariantId::from_usize(self.variants.len());
        if self.variants.is_empty() {
            self.topology = variant.topology().clone();
        }
        self.variants.push(variant);
        Ok(id)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    pub fn variant(&self, id: VariantId) -> Option<&TopologyVariant> {
        self.variants.get(id.slot())
    }

    pub fn find_variant(&self, name: &str) -> Option<VariantId> {
        self.variants
            .iter()
            .position(|v| v.name() == name)
            .map(VariantId::from_usize)
    }

    pub fn active(&self) -> VariantId {
        VariantId::from_usize(self.active)
    }

    /// Topology of the active variant; stays readable after [`Assembler::release`].
    pub fn active_topology(&self) -> &Topology {
        &self.topology
    }

    /// Swap the active variant. Only called between steps.
    pub fn activate(&mut self, id: VariantId) -> SolverResult<()> {
        if self.released {
            return Err(SolverError::Released);
        }
        let variant = self
            .variants
            .get(id.slot())
            .ok_or(SolverError::InvalidVariant { id })?;
        if id.slot() != self.active {
            debug!(from = self.variants[self.active].name(), to = variant.name(), "variant switched");
            self.topology = variant.topology().clone();
            self.active = id.slot();
        }
        Ok(())
    }

    /// Zero the RHS and add the `right_vector` of every active component.
    pub fn assemble_rhs(&mut self, attrs: &AttributeStore) -> SolverResult<()> {
        self.rhs.fill(Default::default());
        for (i, component) in self.components.iter().enumerate() {
            if !self.topology.is_active(ComponentId::from_usize(i)) {
                continue;
            }
            let Some(rv) = component.right_vector() else {
                continue;
            };
            let rhs = &mut self.rhs;
            let size = self.size;
            attrs.read(rv, |stamp| {
                for &(index, value) in stamp.entries() {
                    if index >= size {
                        return Err(SolverError::DimensionMismatch {
                            what: "source stamp index",
                            expected: size,
                            actual: index,
                        });
                    }
                    rhs[index] += value;
                }
                Ok(())
            })??;
        }
        Ok(())
    }

    pub fn rhs(&self) -> &ComplexVector {
        &self.rhs
    }

    /// Solve the active variant against the assembled RHS and publish the
    /// result to `left_vector`.
    pub fn solve(&mut self, attrs: &AttributeStore) -> SolverResult<()> {
        if self.released {
            return Err(SolverError::Released);
        }
        let variant = self
            .variants
            .get(self.active)
            .ok_or(SolverError::InvalidVariant {
                id: VariantId::from_usize(self.active),
            })?;

        if !variant.factorization().solve_mut(&mut self.rhs) {
            return Err(SolverError::SingularSystem {
                variant: variant.name().to_string(),
                row: 0,
                pivot: 0.0,
            });
        }
        if let Some(index) = self
            .rhs
            .iter()
            .position(|z| !(z.re.is_finite() && z.im.is_finite()))
        {
            return Err(SolverError::NonFinite {
                what: "solution",
                index,
            });
        }

        let solution = &self.rhs;
        attrs.write(self.left_vector, |x| {
            if x.len() != solution.len() {
                return Err(SolverError::DimensionMismatch {
                    what: "left vector",
                    expected: solution.len(),
                    actual: x.len(),
                });
            }
            x.copy_from(solution);
            Ok(())
        })?
    }

    /// Assemble and solve in one call.
    pub fn step(&mut self, attrs: &AttributeStore) -> SolverResult<()> {
        self.assemble_rhs(attrs)?;
        self.solve(attrs)
    }

    /// Drop all factorizations. Later solves fail with [`SolverError::Released`].
    pub fn release(&mut self) {
        if !self.released {
            debug!(variants = self.variants.len(), "solver resources released");
            self.variants.clear();
            self.released = true;
        }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn left_vector(&self) -> Attr<ComplexVector> {
        self.left_vector
    }
}
