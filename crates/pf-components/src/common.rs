//! Common utilities for component calculations.

use pf_core::numeric::{ensure_finite, ensure_finite_complex};
use pf_core::{Complex, ComplexVector, CoreError, Real, Terminal};

use crate::error::{ComponentError, ComponentResult};

/// Ensure a value is finite, returning ComponentError if not.
pub fn check_finite(value: Real, what: &'static str) -> ComponentResult<()> {
    ensure_finite(value, what).map_err(|_| ComponentError::NonPhysical { what })?;
    Ok(())
}

pub fn check_finite_complex(value: Complex, what: &'static str) -> ComponentResult<()> {
    ensure_finite_complex(value, what).map_err(|_| ComponentError::NonPhysical { what })?;
    Ok(())
}

/// Strictly positive, finite parameter.
pub fn check_positive(value: Real, what: &'static str) -> ComponentResult<Real> {
    check_finite(value, what)?;
    if value <= 0.0 {
        return Err(ComponentError::InvalidArg { what });
    }
    Ok(value)
}

/// Voltage of a terminal in the solution vector; ground is zero.
pub fn node_voltage(solution: &ComplexVector, terminal: Terminal) -> ComponentResult<Complex> {
    match terminal.index() {
        None => Ok(Complex::default()),
        Some(i) => solution.get(i).copied().ok_or_else(|| {
            CoreError::IndexOob {
                what: "solution vector",
                index: i,
                len: solution.len(),
            }
            .into()
        }),
    }
}

/// `v(a) - v(b)`.
pub fn branch_voltage(
    solution: &ComplexVector,
    a: Terminal,
    b: Terminal,
) -> ComponentResult<Complex> {
    Ok(node_voltage(solution, a)? - node_voltage(solution, b)?)
}

/// Raw solution entry (virtual rows).
pub fn solution_entry(solution: &ComplexVector, index: usize) -> ComponentResult<Complex> {
    solution.get(index).copied().ok_or_else(|| {
        CoreError::IndexOob {
            what: "solution vector",
            index,
            len: solution.len(),
        }
        .into()
    })
}

pub(crate) fn not_initialized(name: &str) -> ComponentError {
    ComponentError::NotInitialized {
        component: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_finite() {
        assert!(check_finite(1.0, "test").is_ok());
        assert!(check_finite(f64::INFINITY, "test").is_err());
        assert!(check_finite_complex(Complex::new(0.0, f64::NAN), "test").is_err());
    }

    #[test]
    fn test_check_positive() {
        assert_eq!(check_positive(2.0, "r").unwrap(), 2.0);
        assert!(matches!(
            check_positive(0.0, "r"),
            Err(ComponentError::InvalidArg { what: "r" })
        ));
        assert!(check_positive(f64::NAN, "r").is_err());
    }

    #[test]
    fn ground_reads_zero() {
        let x = ComplexVector::from_element(2, Complex::new(5.0, 1.0));
        assert_eq!(node_voltage(&x, Terminal::Ground).unwrap(), Complex::default());
        assert_eq!(
            branch_voltage(&x, Terminal::Node(0), Terminal::Ground).unwrap(),
            Complex::new(5.0, 1.0)
        );
        assert!(node_voltage(&x, Terminal::Node(4)).is_err());
        assert!(solution_entry(&x, 2).is_err());
    }
}
