use std::cell::RefCell;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};

use super::{logistic, Scalar};

const NONE: usize = usize::MAX;

/// One recorded operation: up to two parents and the local partial
/// derivative of the result with respect to each.
#[derive(Clone, Copy)]
struct Node {
    parents: [(usize, f64); 2],
}

/// Reverse-mode recording of a forward pass.
///
/// A tape is created per training example, parameters are registered with
/// [`Tape::var`], the model is evaluated on the returned [`Var`]s and
/// [`Tape::gradient`] sweeps the recording backwards once.
///
/// The tape uses interior mutability and is therefore not `Sync`: one
/// gradient-bearing forward pass belongs to one thread.
#[derive(Default)]
pub struct Tape {
    nodes: RefCell<Vec<Node>>,
}

impl fmt::Debug for Tape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tape").field("len", &self.len()).finish()
    }
}

impl Tape {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded nodes
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register an independent variable
    pub fn var(&self, value: f64) -> Var<'_> {
        let index = self.push([(NONE, 0.0), (NONE, 0.0)]);
        Var {
            tape: Some(self),
            index,
            value,
        }
    }

    /// Register one independent variable per value, in order
    pub fn vars(&self, values: &[f64]) -> Vec<Var<'_>> {
        values.iter().map(|&v| self.var(v)).collect()
    }

    fn push(&self, parents: [(usize, f64); 2]) -> usize {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(Node { parents });
        nodes.len() - 1
    }

    /// Gradient of `output` with respect to each of `inputs`.
    ///
    /// Inputs that are constants, or that `output` does not depend on,
    /// receive a zero.
    pub fn gradient(&self, output: Var<'_>, inputs: &[Var<'_>]) -> Vec<f64> {
        if output.index == NONE {
            return vec![0.0; inputs.len()];
        }
        let nodes = self.nodes.borrow();
        let mut adjoint = vec![0.0; output.index + 1];
        adjoint[output.index] = 1.0;

        for i in (0..=output.index).rev() {
            let a = adjoint[i];
            if a == 0.0 {
                continue;
            }
            for &(parent, partial) in &nodes[i].parents {
                if parent != NONE {
                    adjoint[parent] += partial * a;
                }
            }
        }

        inputs
            .iter()
            .map(|v| adjoint.get(v.index).copied().unwrap_or(0.0))
            .collect()
    }
}

/// A value recorded on a [`Tape`], or a constant that is not recorded at all.
#[derive(Clone, Copy)]
pub struct Var<'t> {
    tape: Option<&'t Tape>,
    index: usize,
    value: f64,
}

impl fmt::Debug for Var<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tape.is_some() {
            write!(f, "Var({} @ {})", self.value, self.index)
        } else {
            write!(f, "Var({})", self.value)
        }
    }
}

impl<'t> Var<'t> {
    pub fn constant(value: f64) -> Self {
        Var {
            tape: None,
            index: NONE,
            value,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn is_constant(&self) -> bool {
        self.tape.is_none()
    }

    #[inline]
    fn unary(self, value: f64, partial: f64) -> Self {
        match self.tape {
            Some(tape) => Var {
                tape: Some(tape),
                index: tape.push([(self.index, partial), (NONE, 0.0)]),
                value,
            },
            None => Var::constant(value),
        }
    }

    #[inline]
    fn binary(a: Self, b: Self, value: f64, da: f64, db: f64) -> Self {
        if let (Some(ta), Some(tb)) = (a.tape, b.tape) {
            debug_assert!(std::ptr::eq(ta, tb), "mixing values from two tapes");
        }
        match a.tape.or(b.tape) {
            Some(tape) => {
                let pa = if a.tape.is_some() {
                    (a.index, da)
                } else {
                    (NONE, 0.0)
                };
                let pb = if b.tape.is_some() {
                    (b.index, db)
                } else {
                    (NONE, 0.0)
                };
                Var {
                    tape: Some(tape),
                    index: tape.push([pa, pb]),
                    value,
                }
            }
            None => Var::constant(value),
        }
    }
}

impl<'t> Add for Var<'t> {
    type Output = Var<'t>;
    fn add(self, rhs: Var<'t>) -> Var<'t> {
        Var::binary(self, rhs, self.value + rhs.value, 1.0, 1.0)
    }
}

impl<'t> Sub for Var<'t> {
    type Output = Var<'t>;
    fn sub(self, rhs: Var<'t>) -> Var<'t> {
        Var::binary(self, rhs, self.value - rhs.value, 1.0, -1.0)
    }
}

impl<'t> Mul for Var<'t> {
    type Output = Var<'t>;
    fn mul(self, rhs: Var<'t>) -> Var<'t> {
        Var::binary(self, rhs, self.value * rhs.value, rhs.value, self.value)
    }
}

impl<'t> Div for Var<'t> {
    type Output = Var<'t>;
    fn div(self, rhs: Var<'t>) -> Var<'t> {
        let value = self.value / rhs.value;
        Var::binary(self, rhs, value, 1.0 / rhs.value, -value / rhs.value)
    }
}

impl<'t> Neg for Var<'t> {
    type Output = Var<'t>;
    fn neg(self) -> Var<'t> {
        self.unary(-self.value, -1.0)
    }
}

impl<'t> Add<f64> for Var<'t> {
    type Output = Var<'t>;
    fn add(self, rhs: f64) -> Var<'t> {
        self.unary(self.value + rhs, 1.0)
    }
}

impl<'t> Sub<f64> for Var<'t> {
    type Output = Var<'t>;
    fn sub(self, rhs: f64) -> Var<'t> {
        self.unary(self.value - rhs, 1.0)
    }
}

impl<'t> Mul<f64> for Var<'t> {
    type Output = Var<'t>;
    fn mul(self, rhs: f64) -> Var<'t> {
        self.unary(self.value * rhs, rhs)
    }
}

impl<'t> Div<f64> for Var<'t> {
    type Output = Var<'t>;
    fn div(self, rhs: f64) -> Var<'t> {
        self.unary(self.value / rhs, 1.0 / rhs)
    }
}

impl<'t> Add<Var<'t>> for f64 {
    type Output = Var<'t>;
    fn add(self, rhs: Var<'t>) -> Var<'t> {
        rhs + self
    }
}

impl<'t> Sub<Var<'t>> for f64 {
    type Output = Var<'t>;
    fn sub(self, rhs: Var<'t>) -> Var<'t> {
        rhs.unary(self - rhs.value, -1.0)
    }
}

impl<'t> Mul<Var<'t>> for f64 {
    type Output = Var<'t>;
    fn mul(self, rhs: Var<'t>) -> Var<'t> {
        rhs * self
    }
}

impl<'t> Div<Var<'t>> for f64 {
    type Output = Var<'t>;
    fn div(self, rhs: Var<'t>) -> Var<'t> {
        let value = self / rhs.value;
        rhs.unary(value, -value / rhs.value)
    }
}

impl<'t> Sum for Var<'t> {
    fn sum<I: Iterator<Item = Var<'t>>>(iter: I) -> Var<'t> {
        iter.fold(Var::constant(0.0), |acc, v| acc + v)
    }
}

impl Scalar for Var<'_> {
    fn constant(value: f64) -> Self {
        Var::constant(value)
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn exp(self) -> Self {
        let e = self.value.exp();
        self.unary(e, e)
    }

    fn ln(self) -> Self {
        self.unary(self.value.ln(), 1.0 / self.value)
    }

    fn powi(self, n: i32) -> Self {
        let d = if n == 0 {
            0.0
        } else {
            n as f64 * self.value.powi(n - 1)
        };
        self.unary(self.value.powi(n), d)
    }

    fn abs(self) -> Self {
        let d = if self.value > 0.0 {
            1.0
        } else if self.value < 0.0 {
            -1.0
        } else {
            0.0
        };
        self.unary(self.value.abs(), d)
    }

    fn recip(self) -> Self {
        let r = 1.0 / self.value;
        self.unary(r, -r * r)
    }

    fn sigmoid(self) -> Self {
        let s = logistic(self.value);
        self.unary(s, s * (1.0 - s))
    }

    fn clamp(self, lo: f64, hi: f64) -> Self {
        if self.value < lo {
            Var::constant(lo)
        } else if self.value > hi {
            Var::constant(hi)
        } else {
            self
        }
    }
}
