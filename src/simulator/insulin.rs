//! Insulin-analogous effects: endogenous secretion, administered insulin and
//! oral medication.
//!
//! Exogenous and oral kernels are defined in hours. Callers convert elapsed
//! time with [`TimeUnit::to_hours`] before evaluating them.

use super::absorption::absorbed_fraction;
use super::TimeUnit;
use crate::ad::Scalar;
use crate::data::{InsulinDose, InsulinKind, Meal, OralMedication};
use crate::parameters::ParameterView;
use crate::GlucoseError;

/// Bound on the learnable duration exponent
pub const MAX_DURATION_EXPONENT: f64 = 1.0;

/// Secretion response to absorbed carbohydrate, suppressed at night.
///
/// `Σ carbs · k · (1 − e^(−k·Δt)) · (1 − σ(δ_u)·bN)`
pub fn endogenous<S: Scalar>(
    t: f64,
    meals: &[Meal],
    rates: &[Option<S>],
    params: &ParameterView<S>,
    night: bool,
) -> S {
    let suppression = if night {
        S::constant(1.0) - params.night_suppression()
    } else {
        S::constant(1.0)
    };
    meals
        .iter()
        .zip(rates)
        .filter_map(|(meal, k)| {
            let k = (*k)?;
            let elapsed = meal.elapsed(t);
            if elapsed <= 0.0 {
                return None;
            }
            Some(k * absorbed_fraction(k, elapsed) * meal.carbs() * suppression)
        })
        .sum()
}

/// Kinetic kernel of one formulation, zero outside `[0, window]` hours
pub fn insulin_kernel(kind: InsulinKind, elapsed_hours: f64, units: f64) -> f64 {
    let dt = elapsed_hours;
    if !(0.0..=kind.window()).contains(&dt) {
        return 0.0;
    }
    match kind {
        InsulinKind::Rapid => units * dt * (-2.0 * dt).exp(),
        InsulinKind::Short => units * (dt / 2.0) * (-0.5 * dt).exp(),
        InsulinKind::Intermediate => {
            let r = (dt / 4.0).powi(2);
            units * r / (1.0 + r) * (-dt / 12.0).exp()
        }
        InsulinKind::Long => units / 24.0,
    }
}

/// Effect of one administered dose at time `t`.
///
/// Non-positive doses contribute zero. A dose without its own formulation
/// uses `default_kind`.
pub fn dose_effect(
    dose: &InsulinDose,
    default_kind: InsulinKind,
    t: f64,
    unit: TimeUnit,
) -> Result<f64, GlucoseError> {
    if !dose.units.is_finite() {
        return Err(GlucoseError::invalid("insulin units", dose.units, "must be finite"));
    }
    if !dose.time.is_finite() {
        return Err(GlucoseError::invalid("insulin time", dose.time, "must be finite"));
    }
    if dose.units <= 0.0 {
        return Ok(0.0);
    }
    let kind = dose.kind.unwrap_or(default_kind);
    Ok(insulin_kernel(kind, unit.to_hours(t - dose.time), dose.units))
}

/// Sum of administered insulin effects, zero unless insulin is enabled, a
/// default formulation is known and at least one dose was given
pub fn exogenous(
    t: f64,
    unit: TimeUnit,
    enabled: bool,
    default_kind: Option<InsulinKind>,
    doses: &[InsulinDose],
) -> f64 {
    let Some(default_kind) = default_kind.filter(|_| enabled && !doses.is_empty()) else {
        return 0.0;
    };
    doses
        .iter()
        .map(|dose| {
            dose_effect(dose, default_kind, t, unit).unwrap_or_else(|e| {
                tracing::warn!("Skipping insulin dose at t = {}: {}", dose.time, e);
                0.0
            })
        })
        .sum()
}

/// Duration of effect in hours, `prior · e^(clamp(θ, −1, 1))`
pub fn medication_duration<S: Scalar>(prior: f64, theta: S) -> S {
    theta
        .clamp(-MAX_DURATION_EXPONENT, MAX_DURATION_EXPONENT)
        .exp()
        * prior
}

/// Gaussian decay of one oral medication, `dose · e^(−((t − t_k)/w)²)` with
/// `w = duration/3`.
///
/// An identifier without a registered exponent uses the class prior.
pub fn oral_effect<S: Scalar>(
    medication: &OralMedication,
    t: f64,
    unit: TimeUnit,
    params: &ParameterView<S>,
) -> Result<S, GlucoseError> {
    let Some(med_id) = medication.med_id.as_deref() else {
        return Err(GlucoseError::MissingMedicationId {
            time: medication.time,
        });
    };
    if !medication.dose.is_finite() || !medication.time.is_finite() {
        return Err(GlucoseError::invalid(
            "medication dose",
            medication.dose,
            "dose and time must be finite",
        ));
    }
    if medication.dose <= 0.0 {
        return Ok(S::constant(0.0));
    }
    let prior = medication
        .med_class
        .prior_duration()
        .ok_or_else(|| GlucoseError::UnknownMedicationClass {
            med_id: med_id.to_string(),
        })?;
    let theta = params
        .medication_theta(med_id)
        .unwrap_or_else(|| S::constant(0.0));
    let width = medication_duration(prior, theta) / 3.0;
    let z = width.recip() * unit.to_hours(t - medication.time);
    Ok((-z.square()).exp() * medication.dose)
}

/// Sum of oral medication effects; failing events are logged and skipped
pub fn oral<S: Scalar>(
    t: f64,
    unit: TimeUnit,
    medications: &[OralMedication],
    params: &ParameterView<S>,
) -> S {
    medications
        .iter()
        .filter_map(|m| match oral_effect(m, t, unit, params) {
            Ok(effect) => Some(effect),
            Err(e) => {
                tracing::warn!("Skipping medication event: {}", e);
                None
            }
        })
        .sum()
}
