//! Carbohydrate absorption.
//!
//! Each meal is absorbed along a saturating exponential whose rate constant
//! depends on the user's parameters and on the composition of the meal.

use crate::ad::Scalar;
use crate::data::Meal;
use crate::parameters::ParameterView;
use crate::GlucoseError;

/// Absorption rate constant of one meal.
///
/// `k = k_base · su · 1/(1 + α·fiber) · (1 + η_liq if liquid) · 1/(1 + η_fp·fatprotein)`
/// where α is the meal's own fiber sensitivity when it has one.
///
/// # Errors
///
/// Fails when the meal's composition is outside its domain.
pub fn absorption_rate<S: Scalar>(meal: &Meal, params: &ParameterView<S>) -> Result<S, GlucoseError> {
    meal.validate()?;
    let alpha = match meal.fiber_sensitivity() {
        Some(alpha) => S::constant(alpha),
        None => params.alpha(),
    };
    let fiber = (alpha * meal.fiber_ratio() + 1.0).recip();
    let fatprotein = (params.eta_fp_u * meal.fatprotein() + 1.0).recip();
    let mut k = params.k_base() * params.su() * fiber * fatprotein;
    if meal.is_liquid() {
        k = k * (params.eta_liq() + 1.0);
    }
    if !k.is_finite() || k.value() <= 0.0 {
        return Err(GlucoseError::invalid(
            "absorption rate",
            k.value(),
            "must be positive and finite",
        ));
    }
    Ok(k)
}

/// Rate constants for every meal, `None` where the rate could not be computed.
///
/// Rates do not depend on time, so the simulator evaluates them once per
/// rollout. Failures are logged and the meal contributes nothing.
pub fn absorption_rates<S: Scalar>(meals: &[Meal], params: &ParameterView<S>) -> Vec<Option<S>> {
    meals
        .iter()
        .enumerate()
        .map(|(i, meal)| match absorption_rate(meal, params) {
            Ok(k) => Some(k),
            Err(e) => {
                tracing::warn!("Skipping meal {} in absorption: {}", i, e);
                None
            }
        })
        .collect()
}

/// Saturating exponential kernel `1 − e^(−k·Δt)`, exactly zero for `Δt ≤ 0`
#[inline]
pub fn absorbed_fraction<S: Scalar>(k: S, elapsed: f64) -> S {
    if elapsed <= 0.0 {
        return S::constant(0.0);
    }
    S::constant(1.0) - (-(k * elapsed)).exp()
}

/// Carbohydrate absorbed from `meal` by time `t`, never negative
pub fn absorbed_carbs<S: Scalar>(meal: &Meal, k: S, t: f64) -> S {
    (absorbed_fraction(k, meal.elapsed(t)) * meal.carbs()).relu()
}

/// Total absorbed carbohydrate over all meals at time `t`
pub fn carb_effect<S: Scalar>(t: f64, meals: &[Meal], rates: &[Option<S>]) -> S {
    meals
        .iter()
        .zip(rates)
        .filter_map(|(meal, k)| k.map(|k| absorbed_carbs(meal, k, t)))
        .sum()
}
