use serde::{Deserialize, Serialize};

use super::{InsulinDose, InsulinKind, Meal, OralMedication};
use crate::parameters::ParameterSet;
use crate::simulator::{simulate, Scenario, SimulationOptions, TimeUnit};
use crate::GlucoseError;

/// Number of points on the default service grid
pub const SERVICE_GRID_POINTS: usize = 96;
/// Spacing of the default service grid, in hours
pub const SERVICE_GRID_STEP: f64 = 0.25;

fn default_baseline() -> f64 {
    100.0
}

/// Body of a simulation request. Meal and medication times are in hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    #[serde(default, alias = "userID", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub meals: Vec<Meal>,
    #[serde(rename = "G_b", default = "default_baseline")]
    pub baseline: f64,
    #[serde(default)]
    pub insulin: bool,
    #[serde(default, rename = "insulin_type", skip_serializing_if = "Option::is_none")]
    pub insulin_type: Option<InsulinKind>,
    #[serde(default)]
    pub insulin_medications: Vec<InsulinDose>,
    #[serde(default)]
    pub other_medications: Vec<OralMedication>,
}

/// Simulated trajectory with summary statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResponse {
    pub glucose_trajectory: Vec<f64>,
    pub time_points: Vec<f64>,
    pub peak_glucose: f64,
    pub average_glucose: f64,
}

/// `0, 0.25, .., 23.75` hours
pub fn service_time_points() -> Vec<f64> {
    (0..SERVICE_GRID_POINTS)
        .map(|i| i as f64 * SERVICE_GRID_STEP)
        .collect()
}

impl SimulationRequest {
    /// Parse and validate a JSON body
    pub fn from_json(body: &str) -> Result<Self, GlucoseError> {
        let request: SimulationRequest =
            serde_json::from_str(body).map_err(|e| GlucoseError::InvalidRequest(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Reject requests that cannot produce a meaningful simulation
    pub fn validate(&self) -> Result<(), GlucoseError> {
        if self.meals.is_empty() {
            return Err(GlucoseError::InvalidRequest("No meals provided".to_string()));
        }
        if !self.baseline.is_finite() || self.baseline <= 0.0 {
            return Err(GlucoseError::InvalidRequest(format!(
                "G_b must be a positive number, got {}",
                self.baseline
            )));
        }
        for (i, meal) in self.meals.iter().enumerate() {
            meal.validate()
                .map_err(|e| GlucoseError::InvalidRequest(format!("meal {i}: {e}")))?;
        }
        Ok(())
    }

    pub fn to_scenario(&self) -> Scenario {
        Scenario::new(self.baseline, service_time_points())
            .with_time_unit(TimeUnit::Hours)
            .with_meals(self.meals.clone())
            .with_insulin(
                self.insulin,
                self.insulin_type,
                self.insulin_medications.clone(),
            )
            .with_oral_medications(self.other_medications.clone())
    }

    /// Validate, then run a deterministic simulation with `params`
    pub fn simulate(&self, params: &ParameterSet) -> Result<SimulationResponse, GlucoseError> {
        self.validate()?;
        let scenario = self.to_scenario();
        let trajectory = simulate(&scenario, &params.view(), &SimulationOptions::default())?;
        tracing::debug!(
            user = self.user_id.as_deref().unwrap_or("anonymous"),
            meals = self.meals.len(),
            "simulated service request"
        );
        Ok(SimulationResponse {
            peak_glucose: trajectory.peak(),
            average_glucose: trajectory.mean(),
            glucose_trajectory: trajectory.into_values(),
            time_points: scenario.times().to_vec(),
        })
    }
}
