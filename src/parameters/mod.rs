//! Learnable physiological parameters.
//!
//! A [`ParameterSet`] stores only unconstrained raw values. Model code never
//! reads it directly: it reads a [`ParameterView`], which is lifted from the
//! set onto a numeric type ([`f64`] or a tape [`Var`]) and exposes the bounded
//! physiological quantities through smooth monotonic transforms. Unconstrained
//! gradient descent on the raw values can therefore never push a derived
//! parameter outside its range.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ad::{Scalar, Tape, Var};
use crate::{GlucoseError, Params};

/// Distance kept from the ends of every bounded interval, so that the
/// transforms stay strictly inside their range even when the logistic
/// function saturates in floating point.
const EDGE: f64 = 1e-9;

/// An open interval a bounded parameter is mapped into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lo: f64,
    pub hi: f64,
}

impl Bounds {
    pub const fn new(lo: f64, hi: f64) -> Self {
        Bounds { lo, hi }
    }

    /// Map an unconstrained value into the interval
    pub fn squash<S: Scalar>(&self, raw: S) -> S {
        unit_squash(raw) * (self.hi - self.lo) + self.lo
    }

    /// Strict containment
    pub fn contains(&self, value: f64) -> bool {
        value > self.lo && value < self.hi
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.lo + self.hi)
    }
}

/// User-specific absorption speed multiplier
pub const SPEED_MULTIPLIER: Bounds = Bounds::new(0.7, 1.3);
/// Baseline carbohydrate absorption rate
pub const BASE_ABSORPTION: Bounds = Bounds::new(0.015, 0.04);
/// Sensitivity of absorption to the fiber ratio
pub const FIBER_SENSITIVITY: Bounds = Bounds::new(0.0, 0.5);
/// Absorption amplification for liquid meals
pub const LIQUID_AMPLIFICATION: Bounds = Bounds::new(0.4, 0.7);
/// Base of the night suppression factor
pub const NIGHT_SUPPRESSION: Bounds = Bounds::new(0.5, 1.5);

#[inline]
fn unit_squash<S: Scalar>(raw: S) -> S {
    raw.sigmoid() * (1.0 - 2.0 * EDGE) + EDGE
}

/// The scalar parameters of the glucose model, all unconstrained.
///
/// Field order is the flattening order used by the optimizer and by
/// checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, glucofit_macros::Params)]
pub struct RawParameters {
    /// Carbohydrate sensitivity
    pub beta1: f64,
    /// Night offset
    pub beta2: f64,
    /// Night-time carbohydrate penalty
    pub beta3: f64,
    /// Insulin effect
    pub beta4: f64,
    /// Activity effect
    pub beta5: f64,
    /// Heart-signal weights
    pub beta6: f64,
    pub beta7: f64,
    pub beta8: f64,
    pub beta9: f64,
    /// Baseline glucose offset
    pub gb: f64,
    /// Fat/protein absorption delay
    pub eta_fp_u: f64,
    pub eta_liq_raw: f64,
    pub su_raw: f64,
    pub k_base_raw: f64,
    pub delta_raw: f64,
    pub alpha_raw: f64,
    /// Liquid acceleration of the carbohydrate term
    pub rho: f64,
    /// Natural log of the noise standard deviation
    pub log_sigma: f64,
}

impl Default for RawParameters {
    fn default() -> Self {
        RawParameters {
            beta1: 0.01,
            beta2: 0.01,
            beta3: 0.01,
            beta4: 0.01,
            beta5: 0.01,
            beta6: 0.0,
            beta7: 0.0,
            beta8: 0.0,
            beta9: 0.0,
            gb: 96.0,
            eta_fp_u: 0.01,
            eta_liq_raw: 0.4,
            su_raw: 0.1,
            k_base_raw: 0.0,
            delta_raw: 0.0,
            alpha_raw: 0.3,
            rho: 0.2,
            log_sigma: 0.5_f64.ln(),
        }
    }
}

/// Number of linear-combination weights
pub const NUM_BETAS: usize = 9;

/// The complete learnable state: scalar parameters plus one duration exponent
/// per oral medication identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    raw: RawParameters,
    #[serde(default)]
    medication_theta: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new(raw: RawParameters) -> Self {
        ParameterSet {
            raw,
            medication_theta: BTreeMap::new(),
        }
    }

    pub fn raw(&self) -> &RawParameters {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut RawParameters {
        &mut self.raw
    }

    /// Add a duration exponent for `med_id`, starting at the class prior
    /// (θ = 0). Already registered identifiers keep their value.
    pub fn register_medication(&mut self, med_id: impl Into<String>) {
        self.medication_theta.entry(med_id.into()).or_insert(0.0);
    }

    pub fn medication_theta(&self, med_id: &str) -> Option<f64> {
        self.medication_theta.get(med_id).copied()
    }

    pub fn set_medication_theta(&mut self, med_id: impl Into<String>, theta: f64) {
        self.medication_theta.insert(med_id.into(), theta);
    }

    /// Total number of learnable values
    pub fn len(&self) -> usize {
        RawParameters::num_params() + self.medication_theta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Names in flattening order; exponents are prefixed with `theta:`
    pub fn names(&self) -> Vec<String> {
        RawParameters::field_names()
            .iter()
            .map(|n| n.to_string())
            .chain(self.medication_theta.keys().map(|k| format!("theta:{k}")))
            .collect()
    }

    /// Flatten into a vector (raw fields, then exponents by identifier)
    pub fn to_vec(&self) -> Vec<f64> {
        let mut values = self.raw.to_vec();
        values.extend(self.medication_theta.values().copied());
        values
    }

    /// Overwrite every value from a flat slice in [`ParameterSet::to_vec`] order
    pub fn set_from_slice(&mut self, values: &[f64]) -> Result<(), GlucoseError> {
        if values.len() != self.len() {
            return Err(GlucoseError::LengthMismatch {
                what: "parameter vector".to_string(),
                expected: self.len(),
                got: values.len(),
            });
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(GlucoseError::invalid(
                "parameter value",
                bad,
                "must be finite",
            ));
        }
        let n = RawParameters::num_params();
        self.raw = RawParameters::from_slice(&values[..n]);
        for (theta, v) in self.medication_theta.values_mut().zip(&values[n..]) {
            *theta = *v;
        }
        Ok(())
    }

    /// One flag per flattened value, `true` when its name is listed in `frozen`
    pub fn frozen_mask(&self, frozen: &[String]) -> Vec<bool> {
        self.names()
            .iter()
            .map(|name| frozen.iter().any(|f| f == name))
            .collect()
    }

    /// Plain numeric view, no gradient tracking
    pub fn view(&self) -> ParameterView<f64> {
        self.lift(&self.to_vec())
    }

    /// Register every value on `tape` and return the view together with the
    /// registered variables, in flattening order.
    pub fn view_on<'t>(&self, tape: &'t Tape) -> (ParameterView<Var<'t>>, Vec<Var<'t>>) {
        let vars = tape.vars(&self.to_vec());
        (self.lift(&vars), vars)
    }

    fn lift<S: Scalar>(&self, values: &[S]) -> ParameterView<S> {
        let beta = std::array::from_fn(|i| values[i]);
        let n = RawParameters::num_params();
        let medication_theta = self
            .medication_theta
            .keys()
            .cloned()
            .zip(values[n..].iter().copied())
            .collect();
        ParameterView {
            beta,
            gb: values[9],
            eta_fp_u: values[10],
            eta_liq_raw: values[11],
            su_raw: values[12],
            k_base_raw: values[13],
            delta_raw: values[14],
            alpha_raw: values[15],
            rho: values[16],
            log_sigma: values[17],
            medication_theta,
        }
    }
}

/// Read-only parameter values for one forward pass.
#[derive(Debug, Clone)]
pub struct ParameterView<S> {
    /// β1..β9, zero-indexed
    pub beta: [S; NUM_BETAS],
    pub gb: S,
    pub eta_fp_u: S,
    pub eta_liq_raw: S,
    pub su_raw: S,
    pub k_base_raw: S,
    pub delta_raw: S,
    pub alpha_raw: S,
    pub rho: S,
    pub log_sigma: S,
    medication_theta: BTreeMap<String, S>,
}

impl<S: Scalar> ParameterView<S> {
    /// Absorption speed multiplier in (0.7, 1.3)
    pub fn su(&self) -> S {
        SPEED_MULTIPLIER.squash(self.su_raw)
    }

    /// Baseline absorption rate in (0.015, 0.04)
    pub fn k_base(&self) -> S {
        BASE_ABSORPTION.squash(self.k_base_raw)
    }

    /// Fiber sensitivity in (0, 0.5)
    pub fn alpha(&self) -> S {
        FIBER_SENSITIVITY.squash(self.alpha_raw)
    }

    /// Liquid amplification in (0.4, 0.7)
    pub fn eta_liq(&self) -> S {
        LIQUID_AMPLIFICATION.squash(self.eta_liq_raw)
    }

    /// Night suppression base in (0.5, 1.5)
    pub fn delta_u(&self) -> S {
        NIGHT_SUPPRESSION.squash(self.delta_raw)
    }

    /// Fraction of endogenous secretion suppressed at night, `σ(delta_u)`
    pub fn night_suppression(&self) -> S {
        self.delta_u().sigmoid()
    }

    /// Noise standard deviation
    pub fn sigma(&self) -> S {
        self.log_sigma.exp()
    }

    pub fn medication_theta(&self, med_id: &str) -> Option<S> {
        self.medication_theta.get(med_id).copied()
    }

    pub fn medication_thetas(&self) -> impl Iterator<Item = (&str, S)> + '_ {
        self.medication_theta.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
