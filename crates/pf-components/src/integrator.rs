//! Fixed-step integration of component-internal state.

use pf_core::Real;

use crate::error::{ComponentError, ComponentResult};

/// Implicit methods iterate at most this often before giving up.
pub const MAX_FIXED_POINT_ITERATIONS: usize = 50;

/// Convergence threshold on the state update, see [`OdeModel::distance`].
pub const FIXED_POINT_TOLERANCE: Real = 1e-10;

/// Continuous dynamics `x_dot = f(t, x)` of a component's internal state.
pub trait OdeModel {
    type State: Clone;

    fn rhs(&self, t: Real, x: &Self::State) -> ComponentResult<Self::State>;

    /// Element-wise `a + b`.
    fn add(&self, a: &Self::State, b: &Self::State) -> Self::State;

    /// `scale * a`.
    fn scale(&self, a: &Self::State, scale: Real) -> Self::State;

    /// Norm of the difference between two states.
    fn distance(&self, a: &Self::State, b: &Self::State) -> Real;
}

/// Integration scheme, chosen per component instance.
///
/// Companion-model components (inductor, capacitor) use the variant to pick
/// their discretization; components with an explicit ODE state advance it
/// through [`IntegrationMethod::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// Explicit, first order.
    ForwardEuler,
    /// Implicit, first order, strongly damped.
    BackwardEuler,
    /// Implicit, second order.
    #[default]
    Trapezoidal,
}

impl IntegrationMethod {
    pub fn name(self) -> &'static str {
        match self {
            IntegrationMethod::ForwardEuler => "forward-euler",
            IntegrationMethod::BackwardEuler => "backward-euler",
            IntegrationMethod::Trapezoidal => "trapezoidal",
        }
    }

    pub fn is_implicit(self) -> bool {
        !matches!(self, IntegrationMethod::ForwardEuler)
    }

    /// Advance `x` from `t` to `t + dt`.
    ///
    /// Implicit variants are solved by fixed-point iteration seeded with the
    /// forward Euler predictor. Failure to converge is reported, never
    /// clamped.
    pub fn step<M: OdeModel>(
        self,
        model: &M,
        t: Real,
        x: &M::State,
        dt: Real,
    ) -> ComponentResult<M::State> {
        let f0 = model.rhs(t, x)?;
        let predictor = model.add(x, &model.scale(&f0, dt));

        match self {
            IntegrationMethod::ForwardEuler => Ok(predictor),
            IntegrationMethod::BackwardEuler => fixed_point(model, predictor, |next| {
                let f1 = model.rhs(t + dt, next)?;
                Ok(model.add(x, &model.scale(&f1, dt)))
            }),
            IntegrationMethod::Trapezoidal => fixed_point(model, predictor, |next| {
                let f1 = model.rhs(t + dt, next)?;
                Ok(model.add(x, &model.scale(&model.add(&f0, &f1), 0.5 * dt)))
            }),
        }
    }
}

fn fixed_point<M: OdeModel>(
    model: &M,
    mut guess: M::State,
    update: impl Fn(&M::State) -> ComponentResult<M::State>,
) -> ComponentResult<M::State> {
    for _ in 0..MAX_FIXED_POINT_ITERATIONS {
        let next = update(&guess)?;
        let change = model.distance(&next, &guess);
        if !change.is_finite() {
            return Err(ComponentError::NonPhysical {
                what: "implicit integration diverged",
            });
        }
        guess = next;
        if change <= FIXED_POINT_TOLERANCE {
            return Ok(guess);
        }
    }
    Err(ComponentError::ConvergenceFailed {
        what: "implicit integration",
        iterations: MAX_FIXED_POINT_ITERATIONS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// x_dot = -k x
    struct Decay(Real);

    impl OdeModel for Decay {
        type State = Real;

        fn rhs(&self, _t: Real, x: &Real) -> ComponentResult<Real> {
            Ok(-self.0 * x)
        }
        fn add(&self, a: &Real, b: &Real) -> Real {
            a + b
        }
        fn scale(&self, a: &Real, scale: Real) -> Real {
            a * scale
        }
        fn distance(&self, a: &Real, b: &Real) -> Real {
            (a - b).abs()
        }
    }

    #[test]
    fn forward_euler_single_step() {
        let x = IntegrationMethod::ForwardEuler
            .step(&Decay(2.0), 0.0, &1.0, 0.1)
            .unwrap();
        assert!((x - 0.8).abs() < 1e-15);
    }

    #[test]
    fn implicit_methods_match_closed_form() {
        let (k, dt) = (2.0, 0.1);
        let be = IntegrationMethod::BackwardEuler
            .step(&Decay(k), 0.0, &1.0, dt)
            .unwrap();
        assert!((be - 1.0 / (1.0 + k * dt)).abs() < 1e-9);

        let tr = IntegrationMethod::Trapezoidal
            .step(&Decay(k), 0.0, &1.0, dt)
            .unwrap();
        let exact = (1.0 - 0.5 * k * dt) / (1.0 + 0.5 * k * dt);
        assert!((tr - exact).abs() < 1e-9);
    }

    #[test]
    fn stiff_fixed_point_reports_failure() {
        // k*dt > 2 makes the fixed-point map expansive.
        let err = IntegrationMethod::BackwardEuler
            .step(&Decay(50.0), 0.0, &1.0, 0.1)
            .unwrap_err();
        assert!(matches!(
            err,
            ComponentError::ConvergenceFailed { .. } | ComponentError::NonPhysical { .. }
        ));
    }

    #[test]
    fn default_is_trapezoidal() {
        assert_eq!(IntegrationMethod::default(), IntegrationMethod::Trapezoidal);
        assert!(IntegrationMethod::Trapezoidal.is_implicit());
        assert!(!IntegrationMethod::ForwardEuler.is_implicit());
        assert_eq!(IntegrationMethod::BackwardEuler.name(), "backward-euler");
    }
}
