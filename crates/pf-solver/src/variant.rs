//! Precomputed system matrix per topology.

use std::sync::Arc;

use pf_components::MnaComponent;
use pf_core::{ComponentId, SystemMatrix, Topology};

use crate::error::{SolverError, SolverResult};
use crate::factor::{Factorization, factorize};

/// One topology with its stamped matrix and factorization.
///
/// Immutable once built; switching variants swaps which one the assembler
/// solves with.
pub struct TopologyVariant {
    name: String,
    topology: Topology,
    matrix: SystemMatrix,
    lu: Factorization,
}

impl TopologyVariant {
    /// Stamp every component active in `topology` and factorize the result.
    pub fn build(
        name: impl Into<String>,
        topology: Topology,
        components: &[Arc<dyn MnaComponent>],
        size: usize,
    ) -> SolverResult<Self> {
        let name = name.into();
        if topology.component_count() != components.len() {
            return Err(SolverError::DimensionMismatch {
                what: "topology component count",
                expected: components.len(),
                actual: topology.component_count(),
            });
        }

        let mut matrix = SystemMatrix::zeros(size);
        for (i, component) in components.iter().enumerate() {
            if topology.is_active(ComponentId::from_usize(i)) {
                component.stamp_matrix(&mut matrix, &topology)?;
            }
        }

        let lu = factorize(&matrix, &name)?;
        Ok(Self {
            name,
            topology,
            matrix,
            lu,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn matrix(&self) -> &SystemMatrix {
        &self.matrix
    }

    pub fn factorization(&self) -> &Factorization {
        &self.lu
    }
}
