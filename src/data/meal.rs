use serde::{Deserialize, Serialize};

use crate::GlucoseError;

/// A single carbohydrate intake.
///
/// Meal times are offsets in the time unit of the scenario the meal belongs
/// to. A meal only affects glucose at times at or after its meal time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    carbs: f64,
    #[serde(alias = "time")]
    t_meal: f64,
    #[serde(default)]
    is_liquid: bool,
    #[serde(default)]
    fiber_ratio: f64,
    #[serde(default)]
    fatprotein: f64,
    /// Per-meal override of the learned fiber sensitivity
    #[serde(default, alias = "alpha", skip_serializing_if = "Option::is_none")]
    fiber_sensitivity: Option<f64>,
}

impl Meal {
    /// Create a solid meal with no fiber and no fat/protein
    ///
    /// # Errors
    ///
    /// Carbohydrates must be positive and the meal time finite
    pub fn new(carbs: f64, t_meal: f64) -> Result<Self, GlucoseError> {
        let meal = Meal {
            carbs,
            t_meal,
            is_liquid: false,
            fiber_ratio: 0.0,
            fatprotein: 0.0,
            fiber_sensitivity: None,
        };
        meal.validate()?;
        Ok(meal)
    }

    pub fn with_fiber_ratio(mut self, fiber_ratio: f64) -> Result<Self, GlucoseError> {
        self.fiber_ratio = fiber_ratio;
        self.validate()?;
        Ok(self)
    }

    pub fn with_fatprotein(mut self, fatprotein: f64) -> Result<Self, GlucoseError> {
        self.fatprotein = fatprotein;
        self.validate()?;
        Ok(self)
    }

    pub fn with_fiber_sensitivity(mut self, alpha: f64) -> Result<Self, GlucoseError> {
        self.fiber_sensitivity = Some(alpha);
        self.validate()?;
        Ok(self)
    }

    pub fn liquid(mut self, is_liquid: bool) -> Self {
        self.is_liquid = is_liquid;
        self
    }

    /// Check every field against its domain.
    ///
    /// Constructors call this; meals that arrive through deserialization are
    /// checked at the boundary or, at the latest, when their absorption rate
    /// is computed.
    pub fn validate(&self) -> Result<(), GlucoseError> {
        if !self.carbs.is_finite() || self.carbs <= 0.0 {
            return Err(GlucoseError::invalid("carbs", self.carbs, "must be positive"));
        }
        if !self.t_meal.is_finite() {
            return Err(GlucoseError::invalid("meal time", self.t_meal, "must be finite"));
        }
        unit_interval("fiber_ratio", self.fiber_ratio)?;
        unit_interval("fatprotein", self.fatprotein)?;
        if let Some(alpha) = self.fiber_sensitivity {
            if !alpha.is_finite() || alpha < 0.0 {
                return Err(GlucoseError::invalid(
                    "fiber sensitivity",
                    alpha,
                    "must be non-negative",
                ));
            }
        }
        Ok(())
    }

    pub fn carbs(&self) -> f64 {
        self.carbs
    }

    pub fn time(&self) -> f64 {
        self.t_meal
    }

    pub fn is_liquid(&self) -> bool {
        self.is_liquid
    }

    pub fn fiber_ratio(&self) -> f64 {
        self.fiber_ratio
    }

    pub fn fatprotein(&self) -> f64 {
        self.fatprotein
    }

    pub fn fiber_sensitivity(&self) -> Option<f64> {
        self.fiber_sensitivity
    }

    /// Time elapsed since the meal, zero before it
    pub fn elapsed(&self, t: f64) -> f64 {
        (t - self.t_meal).max(0.0)
    }

    /// Whether the meal has started by time `t`
    pub fn has_started(&self, t: f64) -> bool {
        t >= self.t_meal
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), GlucoseError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(GlucoseError::invalid(field, value, "must be within [0, 1]"))
    }
}
