//! Time-stepped glucose simulation.
//!
//! A [`Scenario`] bundles everything that happens during one simulated
//! period. [`simulate`] rolls the [`dynamics::step`] update across the
//! scenario's time grid. It is generic over [`Scalar`], so the same rollout
//! yields plain numbers with a `ParameterView<f64>` and a fully
//! differentiable trajectory with a view lifted onto a [`crate::ad::Tape`].

pub mod absorption;
pub mod activity;
pub mod dynamics;
pub mod insulin;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::ad::Scalar;
use crate::data::{ActivityEvent, InsulinDose, InsulinKind, Meal, OralMedication, RegimenFactors};
use crate::parameters::ParameterView;
use crate::GlucoseError;

use activity::NightPenaltyWindow;
use dynamics::StepInputs;

/// Unit of the time grid and of every event time in a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Minutes,
    Hours,
}

impl TimeUnit {
    pub fn to_hours(&self, t: f64) -> f64 {
        match self {
            TimeUnit::Minutes => t / 60.0,
            TimeUnit::Hours => t,
        }
    }
}

/// Everything that happens during one simulated period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    initial_glucose: f64,
    times: Vec<f64>,
    #[serde(default)]
    time_unit: TimeUnit,
    /// Clock hour at `t = 0`
    #[serde(default)]
    start_hour: f64,
    #[serde(default)]
    meals: Vec<Meal>,
    #[serde(default)]
    insulin: bool,
    #[serde(default)]
    insulin_kind: Option<InsulinKind>,
    #[serde(default)]
    insulin_doses: Vec<InsulinDose>,
    #[serde(default)]
    oral_medications: Vec<OralMedication>,
    #[serde(default)]
    activities: Vec<ActivityEvent>,
    #[serde(default)]
    regimen: RegimenFactors,
    #[serde(default)]
    heart_signals: Option<Vec<[f64; 4]>>,
}

impl Scenario {
    pub fn new(initial_glucose: f64, times: Vec<f64>) -> Self {
        Scenario {
            initial_glucose,
            times,
            time_unit: TimeUnit::default(),
            start_hour: 0.0,
            meals: Vec::new(),
            insulin: false,
            insulin_kind: None,
            insulin_doses: Vec::new(),
            oral_medications: Vec::new(),
            activities: Vec::new(),
            regimen: RegimenFactors::default(),
            heart_signals: None,
        }
    }

    /// Grid `start, start + step, ..` with every point `≤ end`
    pub fn uniform_grid(start: f64, end: f64, step: f64) -> Vec<f64> {
        if step.is_nan() || step <= 0.0 || end < start {
            return Vec::new();
        }
        let n = ((end - start) / step + 1e-9).floor() as usize + 1;
        (0..n).map(|i| start + i as f64 * step).collect()
    }

    pub fn with_time_unit(mut self, unit: TimeUnit) -> Self {
        self.time_unit = unit;
        self
    }

    pub fn with_start_hour(mut self, hour: f64) -> Self {
        self.start_hour = hour;
        self
    }

    pub fn with_meal(mut self, meal: Meal) -> Self {
        self.meals.push(meal);
        self
    }

    pub fn with_meals(mut self, meals: Vec<Meal>) -> Self {
        self.meals.extend(meals);
        self
    }

    /// Configure administered insulin. Doses only take effect when `enabled`
    /// is set and a default formulation is known.
    pub fn with_insulin(
        mut self,
        enabled: bool,
        default_kind: Option<InsulinKind>,
        doses: Vec<InsulinDose>,
    ) -> Self {
        self.insulin = enabled;
        self.insulin_kind = default_kind;
        self.insulin_doses = doses;
        self
    }

    pub fn with_oral_medication(mut self, medication: OralMedication) -> Self {
        self.oral_medications.push(medication);
        self
    }

    pub fn with_oral_medications(mut self, medications: Vec<OralMedication>) -> Self {
        self.oral_medications.extend(medications);
        self
    }

    pub fn with_activity(mut self, activity: ActivityEvent) -> Self {
        self.activities.push(activity);
        self
    }

    pub fn with_regimen(mut self, regimen: RegimenFactors) -> Self {
        self.regimen = regimen;
        self
    }

    /// One row of heart features per grid point
    pub fn with_heart_signals(mut self, signals: Vec<[f64; 4]>) -> Self {
        self.heart_signals = Some(signals);
        self
    }

    pub fn initial_glucose(&self) -> f64 {
        self.initial_glucose
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn time_unit(&self) -> TimeUnit {
        self.time_unit
    }

    pub fn start_hour(&self) -> f64 {
        self.start_hour
    }

    pub fn meals(&self) -> &[Meal] {
        &self.meals
    }

    pub fn oral_medications(&self) -> &[OralMedication] {
        &self.oral_medications
    }

    pub fn activities(&self) -> &[ActivityEvent] {
        &self.activities
    }

    pub fn regimen(&self) -> RegimenFactors {
        self.regimen
    }

    /// Local clock hour at scenario time `t`
    pub fn clock_hour(&self, t: f64) -> f64 {
        activity::clock_hour(self.start_hour + self.time_unit.to_hours(t))
    }

    /// Check the grid, the initial state and the auxiliary signals
    pub fn validate(&self) -> Result<(), GlucoseError> {
        if self.times.is_empty() {
            return Err(GlucoseError::InvalidTimeGrid("grid is empty".to_string()));
        }
        if let Some(t) = self.times.iter().find(|t| !t.is_finite()) {
            return Err(GlucoseError::InvalidTimeGrid(format!("non-finite time {t}")));
        }
        if let Some(i) = self.times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(GlucoseError::InvalidTimeGrid(format!(
                "grid is not strictly increasing at index {}",
                i + 1
            )));
        }
        if !self.initial_glucose.is_finite() {
            return Err(GlucoseError::invalid(
                "initial glucose",
                self.initial_glucose,
                "must be finite",
            ));
        }
        if !self.start_hour.is_finite() {
            return Err(GlucoseError::invalid("start hour", self.start_hour, "must be finite"));
        }
        if let Some(signals) = &self.heart_signals {
            if signals.len() != self.times.len() {
                return Err(GlucoseError::LengthMismatch {
                    what: "heart signals".to_string(),
                    expected: self.times.len(),
                    got: signals.len(),
                });
            }
        }
        Ok(())
    }
}

/// Options controlling a rollout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationOptions {
    /// Seed for the process noise; `None` gives a deterministic rollout
    #[serde(default)]
    pub noise_seed: Option<u64>,
    #[serde(default)]
    pub night_penalty_window: NightPenaltyWindow,
    /// Keep per-step diagnostic features in the trajectory
    #[serde(default)]
    pub record_features: bool,
}

impl SimulationOptions {
    pub fn with_noise(mut self, seed: u64) -> Self {
        self.noise_seed = Some(seed);
        self
    }

    pub fn with_features(mut self) -> Self {
        self.record_features = true;
        self
    }
}

/// Diagnostic values computed at one grid point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFeatures {
    pub time: f64,
    pub carb_effect: f64,
    pub insulin_effect: f64,
    pub activity_effect: f64,
    pub circadian: (f64, f64),
    pub night: bool,
    pub night_meal_penalty: f64,
    pub liquid: bool,
}

/// Simulated glucose, one value per grid point
#[derive(Debug, Clone)]
pub struct Trajectory<S> {
    times: Vec<f64>,
    values: Vec<S>,
    features: Option<Vec<StepFeatures>>,
}

impl<S: Scalar> Trajectory<S> {
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn values(&self) -> &[S] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Per-step features for steps `0..n-1`, when requested
    pub fn features(&self) -> Option<&[StepFeatures]> {
        self.features.as_deref()
    }

    /// Primal values
    pub fn to_f64(&self) -> Vec<f64> {
        self.values.iter().map(|v| v.value()).collect()
    }

    pub fn peak(&self) -> f64 {
        self.values.iter().map(|v| v.value()).fold(f64::MIN, f64::max)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return f64::NAN;
        }
        self.values.iter().map(|v| v.value()).sum::<f64>() / self.values.len() as f64
    }
}

impl Trajectory<f64> {
    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

/// Simulate `scenario` with the given parameters.
///
/// Noise is drawn only when `options.noise_seed` is set.
pub fn simulate<S: Scalar>(
    scenario: &Scenario,
    params: &ParameterView<S>,
    options: &SimulationOptions,
) -> Result<Trajectory<S>, GlucoseError> {
    match options.noise_seed {
        Some(seed) => {
            let mut rng = StdRng::seed_from_u64(seed);
            rollout(scenario, params, options, Some(&mut rng))
        }
        None => rollout(scenario, params, options, None),
    }
}

/// Stochastic rollout drawing its noise from `rng`
pub fn simulate_with_rng<S: Scalar>(
    scenario: &Scenario,
    params: &ParameterView<S>,
    options: &SimulationOptions,
    rng: &mut StdRng,
) -> Result<Trajectory<S>, GlucoseError> {
    rollout(scenario, params, options, Some(rng))
}

fn rollout<S: Scalar>(
    scenario: &Scenario,
    params: &ParameterView<S>,
    options: &SimulationOptions,
    mut rng: Option<&mut StdRng>,
) -> Result<Trajectory<S>, GlucoseError> {
    scenario.validate()?;
    let n = scenario.times.len();
    let unit = scenario.time_unit;
    let rates = absorption::absorption_rates(&scenario.meals, params);

    let mut values = Vec::with_capacity(n);
    values.push(S::constant(scenario.initial_glucose));
    let mut features = options
        .record_features
        .then(|| Vec::with_capacity(n.saturating_sub(1)));

    for i in 0..n - 1 {
        let t = scenario.times[i];
        let hour = scenario.clock_hour(t);
        let night = activity::is_night(hour);

        let carb = absorption::carb_effect(t, &scenario.meals, &rates);
        let insulin = insulin::endogenous(t, &scenario.meals, &rates, params, night)
            + insulin::exogenous(
                t,
                unit,
                scenario.insulin,
                scenario.insulin_kind,
                &scenario.insulin_doses,
            )
            + insulin::oral(t, unit, &scenario.oral_medications, params);
        let activity_effect =
            activity::activity_effect(activity::active_events(&scenario.activities, t));
        let liquid = scenario
            .meals
            .iter()
            .any(|m| m.is_liquid() && m.has_started(t));

        let inputs = StepInputs {
            carb,
            insulin,
            activity: activity_effect,
            night,
            liquid,
            heart: scenario.heart_signals.as_ref().map(|h| h[i]),
        };
        let z = rng.as_deref_mut().map(|r| r.sample::<f64, _>(StandardNormal));
        let next = dynamics::step(values[i], &inputs, params, scenario.regimen, z);

        if !next.is_finite() {
            return Err(GlucoseError::NonFinite {
                step: i,
                time: t,
                value: next.value(),
            });
        }
        if let Some(features) = features.as_mut() {
            features.push(StepFeatures {
                time: t,
                carb_effect: carb.value(),
                insulin_effect: insulin.value(),
                activity_effect,
                circadian: activity::circadian_encoding(hour),
                night,
                night_meal_penalty: activity::night_penalty_at(
                    t,
                    night,
                    &scenario.meals,
                    &options.night_penalty_window,
                ),
                liquid,
            });
        }
        values.push(next);
    }

    Ok(Trajectory {
        times: scenario.times.clone(),
        values,
        features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::ParameterSet;

    fn scenario() -> Scenario {
        Scenario::new(100.0, Scenario::uniform_grid(0.0, 240.0, 1.0))
            .with_meal(Meal::new(50.0, 60.0).unwrap())
    }

    #[test]
    fn test_uniform_grid() {
        let grid = Scenario::uniform_grid(0.0, 240.0, 1.0);
        assert_eq!(grid.len(), 241);
        assert_eq!(grid[240], 240.0);
        assert_eq!(Scenario::uniform_grid(0.0, 1.0, 0.25).len(), 5);
        assert!(Scenario::uniform_grid(0.0, 1.0, 0.0).is_empty());
    }

    #[test]
    fn test_invalid_grids_are_rejected() {
        let view = ParameterSet::default().view();
        let opts = SimulationOptions::default();
        for grid in [vec![], vec![0.0, 1.0, 1.0], vec![0.0, f64::NAN], vec![2.0, 1.0]] {
            let result = simulate(&Scenario::new(100.0, grid), &view, &opts);
            assert!(matches!(result, Err(GlucoseError::InvalidTimeGrid(_))));
        }
    }

    #[test]
    fn test_single_point_grid_returns_initial_value() {
        let view = ParameterSet::default().view();
        let traj = simulate(&Scenario::new(88.0, vec![5.0]), &view, &SimulationOptions::default())
            .unwrap();
        assert_eq!(traj.to_f64(), vec![88.0]);
    }

    #[test]
    fn test_deterministic_rollouts_repeat() {
        let view = ParameterSet::default().view();
        let opts = SimulationOptions::default();
        let a = simulate(&scenario(), &view, &opts).unwrap();
        let b = simulate(&scenario(), &view, &opts).unwrap();
        assert_eq!(a.to_f64(), b.to_f64());
    }

    #[test]
    fn test_noise_is_seeded() {
        let view = ParameterSet::default().view();
        let a = simulate(&scenario(), &view, &SimulationOptions::default().with_noise(7)).unwrap();
        let b = simulate(&scenario(), &view, &SimulationOptions::default().with_noise(7)).unwrap();
        let quiet = simulate(&scenario(), &view, &SimulationOptions::default()).unwrap();
        assert_eq!(a.to_f64(), b.to_f64());
        assert_ne!(a.to_f64(), quiet.to_f64());
        assert_eq!(a.values()[0], 100.0);
    }

    #[test]
    fn test_heart_signal_length_is_checked() {
        let view = ParameterSet::default().view();
        let s = Scenario::new(100.0, vec![0.0, 1.0, 2.0]).with_heart_signals(vec![[0.0; 4]; 2]);
        assert!(matches!(
            simulate(&s, &view, &SimulationOptions::default()),
            Err(GlucoseError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_blow_up_is_reported_with_step() {
        let mut set = ParameterSet::default();
        set.raw_mut().beta1 = f64::MAX;
        let view = set.view();
        let err = simulate(&scenario(), &view, &SimulationOptions::default()).unwrap_err();
        match err {
            GlucoseError::NonFinite { step, time, .. } => {
                assert_eq!(step, 61);
                assert_eq!(time, 61.0);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_features_follow_the_clock() {
        let view = ParameterSet::default().view();
        let s = Scenario::new(100.0, Scenario::uniform_grid(0.0, 180.0, 30.0))
            .with_start_hour(21.0)
            .with_meal(Meal::new(30.0, 0.0).unwrap().liquid(true));
        let traj = simulate(&s, &view, &SimulationOptions::default().with_features()).unwrap();
        let features = traj.features().unwrap();
        assert_eq!(features.len(), 6);
        assert!(!features[1].night);
        assert!(features[2].night);
        assert_eq!(features[2].night_meal_penalty, 1.0);
        assert_eq!(features[5].night_meal_penalty, 0.0);
        assert!(features.iter().all(|f| f.liquid));
    }
}
