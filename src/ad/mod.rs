//! Scalar abstraction for differentiable model code.
//!
//! Every physiological term in the simulator is written once, generically over
//! [`Scalar`]. Two implementations exist:
//!
//! - `f64`: plain evaluation, used for validation passes, batch evaluation and
//!   the service boundary where no gradient is needed
//! - [`Var`]: a handle onto a reverse-mode [`Tape`], used during training so the
//!   gradient of the loss with respect to every parameter is available after a
//!   single backward sweep
//!
//! ```ignore
//! use glucofit::ad::{Scalar, Tape};
//!
//! let tape = Tape::new();
//! let x = tape.var(2.0);
//! let y = x * x + x.exp();
//! let grad = tape.gradient(y, &[x]);
//! assert!((grad[0] - (4.0 + 2.0_f64.exp())).abs() < 1e-12);
//! ```

mod tape;

use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

pub use tape::{Tape, Var};

/// Numeric type the simulator, loss and parameter transforms are generic over.
pub trait Scalar:
    Copy
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Add<f64, Output = Self>
    + Sub<f64, Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
    + Sum<Self>
{
    /// A value that carries no derivative information
    fn constant(value: f64) -> Self;

    /// The primal value
    fn value(&self) -> f64;

    fn exp(self) -> Self;

    fn ln(self) -> Self;

    fn powi(self, n: i32) -> Self;

    fn abs(self) -> Self;

    fn recip(self) -> Self;

    /// Logistic function, evaluated without overflow for any finite input
    fn sigmoid(self) -> Self;

    /// Clamp into `[lo, hi]`; the derivative is zero outside the interval
    fn clamp(self, lo: f64, hi: f64) -> Self;

    /// `max(0, x)`
    fn relu(self) -> Self {
        if self.value() > 0.0 {
            self
        } else {
            Self::constant(0.0)
        }
    }

    fn square(self) -> Self {
        self * self
    }

    fn is_finite(&self) -> bool {
        self.value().is_finite()
    }
}

/// Numerically stable logistic function.
#[inline]
pub(crate) fn logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl Scalar for f64 {
    #[inline]
    fn constant(value: f64) -> Self {
        value
    }

    #[inline]
    fn value(&self) -> f64 {
        *self
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn powi(self, n: i32) -> Self {
        f64::powi(self, n)
    }

    #[inline]
    fn abs(self) -> Self {
        f64::abs(self)
    }

    #[inline]
    fn recip(self) -> Self {
        f64::recip(self)
    }

    #[inline]
    fn sigmoid(self) -> Self {
        logistic(self)
    }

    #[inline]
    fn clamp(self, lo: f64, hi: f64) -> Self {
        f64::clamp(self, lo, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn generic_poly<S: Scalar>(x: S) -> S {
        x.square() * 3.0 - x + 1.0
    }

    #[test]
    fn test_f64_scalar_matches_inherent_methods() {
        assert_eq!(Scalar::exp(1.5_f64), 1.5_f64.exp());
        assert_eq!(Scalar::powi(2.0_f64, 3), 8.0);
        assert_eq!(Scalar::clamp(5.0_f64, -1.0, 1.0), 1.0);
        assert_eq!(Scalar::relu(-3.0_f64), 0.0);
        assert_eq!(generic_poly(2.0_f64), 11.0);
    }

    #[test]
    fn test_logistic_is_stable_for_extreme_inputs() {
        assert_eq!(logistic(1.0e4), 1.0);
        assert_eq!(logistic(-1.0e4), 0.0);
        assert!(logistic(-745.0).is_finite());
        assert_relative_eq!(logistic(0.0), 0.5);
    }
}
