use crate::CoreError;

/// Floating point type used throughout system
pub type Real = f64;

/// Complex phasor type used by the network equations.
pub type Complex = nalgebra::Complex<Real>;

/// Imaginary unit.
pub const J: Complex = Complex::new(0.0, 1.0);

/// One tolerance for everything
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

/// Complex counterpart of [`nearly_equal`], comparing the distance of the two phasors.
pub fn nearly_equal_complex(a: Complex, b: Complex, tol: Tolerances) -> bool {
    let diff = (a - b).norm();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.norm().max(b.norm())
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, CoreError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}

pub fn ensure_finite_complex(v: Complex, what: &'static str) -> Result<Complex, CoreError> {
    ensure_finite(v.re, what)?;
    ensure_finite(v.im, what)?;
    Ok(v)
}

/// Phasor from magnitude and angle (radians).
pub fn polar(magnitude: Real, angle: Real) -> Complex {
    Complex::from_polar(magnitude, angle)
}
