//! Derivative-free polishing of a trained parameter set.

use argmin::{
    core::{CostFunction, Error, Executor},
    solver::neldermead::NelderMead,
};
use serde::{Deserialize, Serialize};

use super::{build_examples, mean_loss, Example};
use crate::data::{MedicationPeriodTable, Record};
use crate::loss::GlucoseLoss;
use crate::parameters::ParameterSet;
use crate::GlucoseError;

/// Result of a Nelder–Mead refinement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineOutcome {
    pub parameters: ParameterSet,
    pub initial_loss: f64,
    pub final_loss: f64,
    pub iterations: u64,
}

/// Mean training loss as a function of the non-frozen values only
struct RefineCost<'a> {
    base: &'a ParameterSet,
    free: &'a [usize],
    examples: &'a [Example<'a>],
    loss: &'a GlucoseLoss,
}

impl RefineCost<'_> {
    fn candidate(&self, free_values: &[f64]) -> Option<ParameterSet> {
        let mut values = self.base.to_vec();
        for (&i, &v) in self.free.iter().zip(free_values) {
            values[i] = v;
        }
        let mut parameters = self.base.clone();
        parameters.set_from_slice(&values).ok()?;
        Some(parameters)
    }
}

impl CostFunction for RefineCost<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, free_values: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self
            .candidate(free_values)
            .and_then(|p| mean_loss(self.examples, &p, self.loss))
            .unwrap_or(f64::INFINITY))
    }
}

/// Run at most `max_iters` Nelder–Mead iterations over the values not flagged
/// in `frozen`, minimising the mean loss over `records`.
///
/// The returned parameters never score worse than `parameters` did.
pub fn refine(
    parameters: &ParameterSet,
    records: &[Record],
    periods: &MedicationPeriodTable,
    loss: &GlucoseLoss,
    frozen: &[bool],
    max_iters: u64,
) -> Result<RefineOutcome, GlucoseError> {
    let examples = build_examples(records, periods);
    let initial_loss = mean_loss(&examples, parameters, loss).ok_or_else(|| {
        GlucoseError::EmptyDataset("no record could be evaluated for refinement".to_string())
    })?;
    let unchanged = RefineOutcome {
        parameters: parameters.clone(),
        initial_loss,
        final_loss: initial_loss,
        iterations: 0,
    };

    let free: Vec<usize> = (0..parameters.len())
        .filter(|&i| !frozen.get(i).copied().unwrap_or(false))
        .collect();
    if free.is_empty() || max_iters == 0 {
        return Ok(unchanged);
    }

    let values = parameters.to_vec();
    let start: Vec<f64> = free.iter().map(|&i| values[i]).collect();
    let problem = RefineCost {
        base: parameters,
        free: &free,
        examples: &examples,
        loss,
    };

    let solver: NelderMead<Vec<f64>, f64> = NelderMead::new(create_initial_simplex(&start))
        .with_sd_tolerance(1e-2)
        .map_err(optimizer_error)?;
    let res = Executor::new(problem, solver)
        .configure(|state| state.max_iters(max_iters))
        .run()
        .map_err(optimizer_error)?;

    let iterations = res.state.iter;
    let problem = RefineCost {
        base: parameters,
        free: &free,
        examples: &examples,
        loss,
    };
    let refined = res
        .state
        .best_param
        .as_deref()
        .and_then(|best| problem.candidate(best))
        .and_then(|p| mean_loss(&examples, &p, loss).map(|l| (p, l)));

    match refined {
        Some((parameters, final_loss)) if final_loss < initial_loss => {
            tracing::info!(initial_loss, final_loss, iterations, "Refinement improved the fit");
            Ok(RefineOutcome {
                parameters,
                initial_loss,
                final_loss,
                iterations,
            })
        }
        _ => {
            tracing::info!(initial_loss, iterations, "Refinement found no improvement");
            Ok(RefineOutcome {
                iterations,
                ..unchanged
            })
        }
    }
}

fn optimizer_error(e: Error) -> GlucoseError {
    GlucoseError::Optimizer(e.to_string())
}

/// Start point plus one vertex per dimension, each nudged by a small relative
/// step (or a fixed one for zero components).
fn create_initial_simplex(start: &[f64]) -> Vec<Vec<f64>> {
    let mut vertices = Vec::with_capacity(start.len() + 1);
    vertices.push(start.to_vec());
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += if start[i] == 0.0 { 0.00025 } else { 0.008 * start[i] };
        vertices.push(vertex);
    }
    vertices
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_initial_simplex_shape() {
        let simplex = create_initial_simplex(&[1.0, 0.0, -2.0]);
        assert_eq!(simplex.len(), 4);
        assert_eq!(simplex[0], vec![1.0, 0.0, -2.0]);
        assert_relative_eq!(simplex[1][0], 1.008);
        assert_eq!(simplex[2][1], 0.00025);
        assert_relative_eq!(simplex[3][2], -2.016);
        assert_eq!(simplex[3][0], 1.0);
    }

    #[test]
    fn test_no_records_is_an_error() {
        let result = refine(
            &ParameterSet::default(),
            &[],
            &MedicationPeriodTable::default(),
            &GlucoseLoss::default(),
            &[],
            10,
        );
        assert!(matches!(result, Err(GlucoseError::EmptyDataset(_))));
    }
}
