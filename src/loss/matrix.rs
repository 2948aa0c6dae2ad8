//! Batch loss evaluation.
//!
//! Every (record, parameter set) pair is an independent no-gradient rollout,
//! so the matrix is filled in parallel.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Axis};
use rayon::prelude::*;

use super::GlucoseLoss;
use crate::data::{MedicationPeriodTable, Record};
use crate::parameters::{ParameterSet, ParameterView};
use crate::simulator::{Scenario, SimulationOptions};
use crate::GlucoseError;

/// Options for loss matrix computation
#[derive(Debug, Clone, Default)]
pub struct LossMatrixOptions {
    /// Show a progress bar during computation
    pub show_progress: bool,
    pub simulation: SimulationOptions,
}

impl LossMatrixOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self) -> Self {
        self.show_progress = true;
        self
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    pub fn with_simulation(mut self, simulation: SimulationOptions) -> Self {
        self.simulation = simulation;
        self
    }
}

/// Total loss of every record under every candidate parameter set.
///
/// Returns an array of shape `(records.len(), parameter_sets.len())`.
///
/// ```ignore
/// let losses = loss_matrix(
///     splits.val.records(),
///     &candidates,
///     &MedicationPeriodTable::default(),
///     &GlucoseLoss::default(),
///     LossMatrixOptions::new().with_progress(),
/// )?;
/// let best = losses.sum_axis(Axis(0));
/// ```
pub fn loss_matrix(
    records: &[Record],
    parameter_sets: &[ParameterSet],
    periods: &MedicationPeriodTable,
    loss: &GlucoseLoss,
    options: LossMatrixOptions,
) -> Result<Array2<f64>, GlucoseError> {
    let scenarios: Vec<Scenario> = records
        .iter()
        .map(|r| r.to_scenario(periods))
        .collect::<Result<_, _>>()?;
    let views: Vec<ParameterView<f64>> = parameter_sets.iter().map(ParameterSet::view).collect();

    let mut matrix = Array2::<f64>::zeros((records.len(), views.len()));

    let progress = options.show_progress.then(|| {
        let bar = ProgressBar::new((records.len() * views.len()) as u64);
        if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}]") {
            bar.set_style(style);
        }
        bar
    });

    let result: Result<(), GlucoseError> = matrix
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .try_for_each(|(i, mut row)| {
            let record = &records[i];
            let scenario = &scenarios[i];
            row.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .try_for_each(|(j, mut element)| {
                    let out = loss.evaluate_scenario(
                        scenario,
                        record.observed(),
                        record.baseline(),
                        &views[j],
                        &options.simulation,
                    )?;
                    element.fill(out.terms.total);
                    if let Some(bar) = &progress {
                        bar.inc(1);
                    }
                    Ok(())
                })
        });

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    result?;
    Ok(matrix)
}
