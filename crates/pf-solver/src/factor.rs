//! Eager LU factorization with a singularity check.

use nalgebra::{DMatrix, Dyn, LU};
use pf_core::{Complex, SystemMatrix};

use crate::error::{SolverError, SolverResult};

pub type Factorization = LU<Complex, Dyn, Dyn>;

/// Pivots below this fraction of the largest matrix entry count as zero.
pub const RELATIVE_PIVOT_TOLERANCE: f64 = 1e-12;

/// Factorize `matrix`, rejecting singular or near-singular systems.
///
/// `name` only labels the error.
pub fn factorize(matrix: &SystemMatrix, name: &str) -> SolverResult<Factorization> {
    let n = matrix.size();
    if n == 0 {
        return Err(SolverError::EmptySystem);
    }

    let a: &DMatrix<Complex> = matrix.as_matrix();
    let scale = a.iter().map(|z| z.norm()).fold(0.0_f64, f64::max);
    for (index, z) in a.iter().enumerate() {
        if !(z.re.is_finite() && z.im.is_finite()) {
            return Err(SolverError::NonFinite {
                what: "system matrix entry",
                index,
            });
        }
    }

    let lu = a.clone().lu();
    let u = lu.u();
    for row in 0..n {
        let pivot = u[(row, row)].norm();
        if !lu.is_invertible() || pivot <= RELATIVE_PIVOT_TOLERANCE * scale {
            return Err(SolverError::SingularSystem {
                variant: name.to_string(),
                row,
                pivot,
            });
        }
    }

    Ok(lu)
}
