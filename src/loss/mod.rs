//! Multi-term loss comparing simulated and observed glucose.
//!
//! ```text
//! total = λ_f·L_fingerstick + λ_w·L_window + λ_phys·L_phys + λ_med·L_med + L_param_reg
//! ```
//!
//! The total is returned on the same [`Scalar`] the trajectory was computed
//! with, so it can be differentiated. Every sub-loss is also reported as a
//! plain number in [`LossTerms`].

pub mod matrix;

use serde::{Deserialize, Serialize};

use crate::ad::Scalar;
use crate::parameters::ParameterView;
use crate::simulator::{simulate, Scenario, SimulationOptions};
use crate::GlucoseError;

pub use matrix::{loss_matrix, LossMatrixOptions};

/// Weights and settings of the loss
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlucoseLoss {
    pub lambda_fingerstick: f64,
    pub lambda_window: f64,
    pub lambda_phys: f64,
    pub lambda_med: f64,
    /// Dead band of the window loss
    pub tolerance: f64,
    pub hr_weight: f64,
    pub hrv_weight: f64,
    /// Coefficient of the squared-β penalty
    pub param_reg: f64,
}

impl Default for GlucoseLoss {
    fn default() -> Self {
        GlucoseLoss {
            lambda_fingerstick: 1.0,
            lambda_window: 0.5,
            lambda_phys: 0.1,
            lambda_med: 0.05,
            tolerance: 10.0,
            hr_weight: 0.5,
            hrv_weight: 0.5,
            param_reg: 0.001,
        }
    }
}

/// Predicted and observed auxiliary heart series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhysiologicalSignals {
    pub heart_rate: Option<(Vec<f64>, Vec<f64>)>,
    pub hrv: Option<(Vec<f64>, Vec<f64>)>,
}

/// Unweighted sub-losses of one evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossTerms {
    pub fingerstick: f64,
    pub window: f64,
    pub phys: f64,
    pub med: f64,
    /// Already scaled by its coefficient
    pub param_reg: f64,
    pub total: f64,
}

/// Differentiable total together with its parts
#[derive(Debug, Clone, Copy)]
pub struct LossOutput<S> {
    pub total: S,
    pub terms: LossTerms,
}

impl GlucoseLoss {
    /// Evaluate the loss of one predicted trajectory.
    ///
    /// # Errors
    ///
    /// The series must be non-empty and of equal length.
    pub fn evaluate<S: Scalar>(
        &self,
        predicted: &[S],
        observed: &[f64],
        baseline: f64,
        params: &ParameterView<S>,
        signals: Option<&PhysiologicalSignals>,
    ) -> Result<LossOutput<S>, GlucoseError> {
        check_aligned("observed glucose", predicted.len(), observed.len())?;

        let fingerstick = fingerstick_loss(predicted, observed, baseline);
        let window = window_loss(predicted, observed, self.tolerance);
        let phys = match signals {
            Some(signals) => self.phys_loss(signals)?,
            None => 0.0,
        };
        let med: S = params.medication_thetas().map(|(_, theta)| theta.square()).sum();
        let param_reg = params.beta.iter().map(|b| b.square()).sum::<S>() * self.param_reg;

        let total = fingerstick * self.lambda_fingerstick
            + window * self.lambda_window
            + S::constant(phys * self.lambda_phys)
            + med * self.lambda_med
            + param_reg;

        Ok(LossOutput {
            total,
            terms: LossTerms {
                fingerstick: fingerstick.value(),
                window: window.value(),
                phys,
                med: med.value(),
                param_reg: param_reg.value(),
                total: total.value(),
            },
        })
    }

    /// Simulate `scenario` and score the trajectory against `observed`
    pub fn evaluate_scenario<S: Scalar>(
        &self,
        scenario: &Scenario,
        observed: &[f64],
        baseline: f64,
        params: &ParameterView<S>,
        options: &SimulationOptions,
    ) -> Result<LossOutput<S>, GlucoseError> {
        let trajectory = simulate(scenario, params, options)?;
        self.evaluate(trajectory.values(), observed, baseline, params, None)
    }

    /// Weighted heart-rate and HRV error; a series only counts when both its
    /// predicted and observed halves are present
    pub fn phys_loss(&self, signals: &PhysiologicalSignals) -> Result<f64, GlucoseError> {
        let mut loss = 0.0;
        if let Some((pred, obs)) = &signals.heart_rate {
            loss += self.hr_weight * mse("heart rate", pred, obs)?;
        }
        if let Some((pred, obs)) = &signals.hrv {
            loss += self.hrv_weight * mse("hrv", pred, obs)?;
        }
        Ok(loss)
    }
}

fn check_aligned(what: &str, expected: usize, got: usize) -> Result<(), GlucoseError> {
    if expected == 0 {
        return Err(GlucoseError::EmptyDataset(format!("{what} series is empty")));
    }
    if expected != got {
        return Err(GlucoseError::LengthMismatch {
            what: what.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

fn mse(what: &str, predicted: &[f64], observed: &[f64]) -> Result<f64, GlucoseError> {
    check_aligned(what, predicted.len(), observed.len())?;
    let sum: f64 = predicted
        .iter()
        .zip(observed)
        .map(|(p, o)| (p - o).powi(2))
        .sum();
    Ok(sum / predicted.len() as f64)
}

/// Mean squared error of the excursions from `baseline`
pub fn fingerstick_loss<S: Scalar>(predicted: &[S], observed: &[f64], baseline: f64) -> S {
    let n = predicted.len() as f64;
    predicted
        .iter()
        .zip(observed)
        .map(|(&p, &o)| ((p - baseline) - (o - baseline)).square())
        .sum::<S>()
        / n
}

/// Mean of `max(0, |p − o| − tolerance)²`
pub fn window_loss<S: Scalar>(predicted: &[S], observed: &[f64], tolerance: f64) -> S {
    let n = predicted.len() as f64;
    predicted
        .iter()
        .zip(observed)
        .map(|(&p, &o)| ((p - o).abs() - tolerance).relu().square())
        .sum::<S>()
        / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ad::Tape;
    use crate::parameters::ParameterSet;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_loss_dead_band() {
        let observed = [100.0, 120.0, 140.0];
        let inside = [105.0, 110.0, 150.0];
        assert_eq!(window_loss(&inside, &observed, 10.0), 0.0);

        let outside = [105.0, 110.0, 150.5];
        let loss = window_loss(&outside, &observed, 10.0);
        assert!(loss > 0.0);
        assert_relative_eq!(loss, 0.25 / 3.0);
    }

    #[test]
    fn test_fingerstick_loss_compares_excursions() {
        let loss = fingerstick_loss(&[110.0, 130.0], &[100.0, 140.0], 90.0);
        assert_relative_eq!(loss, (100.0 + 100.0) / 2.0);
    }

    #[test]
    fn test_total_combines_weighted_terms() {
        let mut set = ParameterSet::default();
        set.set_medication_theta("glipizide", 0.5);
        let view = set.view();
        let loss = GlucoseLoss::default();
        let out = loss
            .evaluate(&[100.0, 130.0], &[100.0, 100.0], 100.0, &view, None)
            .unwrap();

        assert_relative_eq!(out.terms.fingerstick, 450.0);
        assert_relative_eq!(out.terms.window, 200.0);
        assert_eq!(out.terms.phys, 0.0);
        assert_relative_eq!(out.terms.med, 0.25);
        assert_relative_eq!(out.terms.param_reg, 0.001 * 5.0 * 1.0e-4, epsilon = 1e-15);
        let expected = 450.0 + 0.5 * 200.0 + 0.05 * 0.25 + out.terms.param_reg;
        assert_relative_eq!(out.total, expected, epsilon = 1e-9);
        assert_relative_eq!(out.terms.total, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_phys_terms_need_both_series() {
        let loss = GlucoseLoss::default();
        let signals = PhysiologicalSignals {
            heart_rate: Some((vec![70.0, 80.0], vec![72.0, 80.0])),
            hrv: None,
        };
        assert_relative_eq!(loss.phys_loss(&signals).unwrap(), 0.5 * 2.0);
        assert_eq!(loss.phys_loss(&PhysiologicalSignals::default()).unwrap(), 0.0);

        let mismatched = PhysiologicalSignals {
            heart_rate: None,
            hrv: Some((vec![1.0], vec![1.0, 2.0])),
        };
        assert!(loss.phys_loss(&mismatched).is_err());
    }

    #[test]
    fn test_misaligned_or_empty_series_are_errors() {
        let view = ParameterSet::default().view();
        let loss = GlucoseLoss::default();
        assert!(matches!(
            loss.evaluate(&[1.0, 2.0], &[1.0], 0.0, &view, None),
            Err(GlucoseError::LengthMismatch { .. })
        ));
        assert!(matches!(
            loss.evaluate::<f64>(&[], &[], 0.0, &view, None),
            Err(GlucoseError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_gradient_of_regularisers() {
        let mut set = ParameterSet::default();
        set.set_medication_theta("sita", 0.3);
        let tape = Tape::new();
        let (view, vars) = set.view_on(&tape);
        let predicted = vec![crate::ad::Var::constant(100.0)];
        let out = GlucoseLoss::default()
            .evaluate(&predicted, &[100.0], 100.0, &view, None)
            .unwrap();
        let grad = tape.gradient(out.total, &vars);
        // d/dβ1 of 0.001·β1², d/dθ of 0.05·θ²
        assert_relative_eq!(grad[0], 0.002 * 0.01, epsilon = 1e-15);
        assert_relative_eq!(grad[18], 0.1 * 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let loss: GlucoseLoss = serde_json::from_str(r#"{"tolerance": 5.0}"#).unwrap();
        assert_eq!(loss.tolerance, 5.0);
        assert_eq!(loss.lambda_window, 0.5);
    }
}
