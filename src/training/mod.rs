//! Gradient-based fitting of a [`ParameterSet`] to recorded meals.
//!
//! Each epoch walks the training records in a seeded random order. For every
//! record the parameters are lifted onto a fresh [`Tape`], the scenario is
//! simulated, the loss is back-propagated and a single [`Adam`] step is
//! applied. Validation runs on plain `f64` values and drives early stopping
//! and best-checkpoint selection.

pub mod checkpoint;
pub mod optimizer;
pub mod refine;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::ad::Tape;
use crate::data::{Dataset, MedicationPeriodTable, Record, Splits};
use crate::loss::GlucoseLoss;
use crate::parameters::ParameterSet;
use crate::simulator::{Scenario, SimulationOptions};
use crate::GlucoseError;

pub use checkpoint::Checkpoint;
pub use optimizer::{Adam, LearningRateSchedule};
pub use refine::{refine, RefineOutcome};

/// Settings of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Prefix of every file written by the run
    pub model_name: String,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub schedule: LearningRateSchedule,
    pub patience: usize,
    pub validate_every: usize,
    pub seed: u64,
    /// Parameter names excluded from updates
    pub frozen: Vec<String>,
    /// Sample process noise during training rollouts
    pub noise: bool,
    pub shuffle: bool,
    pub checkpoint_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    /// Continue from the best checkpoint in `checkpoint_dir`
    pub resume: bool,
    /// Nelder–Mead iterations after training; 0 disables refinement
    pub refine_iterations: u64,
    pub show_progress: bool,
    pub loss: GlucoseLoss,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            model_name: "glucose_model".to_string(),
            epochs: 100,
            learning_rate: 0.01,
            weight_decay: 1e-5,
            schedule: LearningRateSchedule::default(),
            patience: 10,
            validate_every: 1,
            seed: 42,
            frozen: vec!["rho".to_string(), "log_sigma".to_string()],
            noise: false,
            shuffle: true,
            checkpoint_dir: None,
            log_dir: None,
            resume: false,
            refine_iterations: 0,
            show_progress: false,
            loss: GlucoseLoss::default(),
        }
    }
}

impl TrainingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GlucoseError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_schedule(mut self, schedule: LearningRateSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_frozen(mut self, frozen: Vec<String>) -> Self {
        self.frozen = frozen;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_refinement(mut self, iterations: u64) -> Self {
        self.refine_iterations = iterations;
        self
    }

    pub fn with_loss(mut self, loss: GlucoseLoss) -> Self {
        self.loss = loss;
        self
    }

    fn best_checkpoint_path(&self) -> Option<PathBuf> {
        self.checkpoint_dir
            .as_ref()
            .map(|dir| Checkpoint::best_path(dir, &self.model_name))
    }
}

/// One row of the training history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    pub learning_rate: f64,
}

/// Outcome of [`Trainer::train`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Best parameters found (after refinement, when enabled)
    pub parameters: ParameterSet,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub history: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    pub best_val_loss: Option<f64>,
    pub test_loss: Option<f64>,
    pub refinement: Option<RefineOutcome>,
}

impl TrainingReport {
    pub fn train_losses(&self) -> Vec<f64> {
        self.history.iter().map(|h| h.train_loss).collect()
    }

    pub fn val_losses(&self) -> Vec<f64> {
        self.history.iter().filter_map(|h| h.val_loss).collect()
    }
}

/// A record together with the scenario built from it
pub(crate) struct Example<'a> {
    record: &'a Record,
    scenario: Scenario,
}

/// Build the scenario of every record, dropping (and logging) the ones that
/// cannot be simulated
pub(crate) fn build_examples<'a>(records: &'a [Record], periods: &MedicationPeriodTable) -> Vec<Example<'a>> {
    records
        .iter()
        .enumerate()
        .filter_map(|(i, record)| match record.to_scenario(periods) {
            Ok(scenario) => Some(Example { record, scenario }),
            Err(e) => {
                tracing::warn!(record = i, error = %e, "Skipping record");
                None
            }
        })
        .collect()
}

/// Deterministic mean loss over the examples that evaluate successfully;
/// `None` when none do
pub(crate) fn mean_loss(examples: &[Example<'_>], parameters: &ParameterSet, loss: &GlucoseLoss) -> Option<f64> {
    let view = parameters.view();
    let options = SimulationOptions::default();
    let (sum, count) = examples
        .iter()
        .filter_map(|ex| {
            match loss.evaluate_scenario(&ex.scenario, ex.record.observed(), ex.record.baseline(), &view, &options) {
                Ok(out) if out.terms.total.is_finite() => Some(out.terms.total),
                Ok(out) => {
                    tracing::debug!(loss = out.terms.total, "Discarding non-finite loss");
                    None
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Evaluation failed");
                    None
                }
            }
        })
        .fold((0.0, 0usize), |(sum, count), l| (sum + l, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Give every medication referenced by any split a duration exponent
fn register_medications(
    parameters: &mut ParameterSet,
    splits: &Splits,
    periods: &MedicationPeriodTable,
) {
    for record in splits
        .train
        .records()
        .iter()
        .chain(splits.val.records())
        .chain(splits.test.records())
    {
        for id in record.medication_ids(periods) {
            parameters.register_medication(id);
        }
    }
}

/// Loss and gradient of one example with respect to every flattened value
fn gradient_step(
    example: &Example<'_>,
    parameters: &ParameterSet,
    loss: &GlucoseLoss,
    options: &SimulationOptions,
) -> Result<(f64, DVector<f64>), GlucoseError> {
    let tape = Tape::new();
    let (view, vars) = parameters.view_on(&tape);
    let out = loss.evaluate_scenario(
        &example.scenario,
        example.record.observed(),
        example.record.baseline(),
        &view,
        options,
    )?;
    if !out.terms.total.is_finite() {
        return Err(GlucoseError::invalid("loss", out.terms.total, "must be finite"));
    }
    let grad = tape.gradient(out.total, &vars);
    if let Some(i) = grad.iter().position(|g| !g.is_finite()) {
        return Err(GlucoseError::invalid(
            format!("gradient of {}", parameters.names()[i]),
            grad[i],
            "must be finite",
        ));
    }
    Ok((out.terms.total, DVector::from_vec(grad)))
}

/// Drives training of one parameter set
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
    periods: MedicationPeriodTable,
    parameters: ParameterSet,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Self {
        Trainer {
            config,
            periods: MedicationPeriodTable::default(),
            parameters: ParameterSet::default(),
        }
    }

    pub fn with_periods(mut self, periods: MedicationPeriodTable) -> Self {
        self.periods = periods;
        self
    }

    /// Start from `parameters` instead of the defaults
    pub fn with_parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Current parameters; the best ones once [`Trainer::train`] has returned
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Fit the parameters to `splits.train`, validating on `splits.val` and
    /// scoring the result on `splits.test`.
    ///
    /// Records that cannot be simulated are logged and skipped. An epoch in
    /// which every training record fails is an error.
    pub fn train(&mut self, splits: &Splits) -> Result<TrainingReport, GlucoseError> {
        let config = self.config.clone();
        register_medications(&mut self.parameters, splits, &self.periods);

        let train = build_examples(splits.train.records(), &self.periods);
        if train.is_empty() {
            return Err(GlucoseError::EmptyDataset(
                "no training record can be simulated".to_string(),
            ));
        }
        let val = build_examples(splits.val.records(), &self.periods);
        let best_path = config.best_checkpoint_path();

        let mut optimizer = Adam::new(self.parameters.len(), config.weight_decay);
        let mut start_epoch = 0;
        let mut best_val_loss: Option<f64> = None;
        let mut train_losses = Vec::new();
        let mut val_losses = Vec::new();
        if config.resume {
            if let Some(path) = &best_path {
                match Checkpoint::load(path) {
                    Ok(checkpoint) => {
                        tracing::info!(epoch = checkpoint.epoch, "Resuming from {}", path.display());
                        self.parameters = checkpoint.parameters;
                        register_medications(&mut self.parameters, splits, &self.periods);
                        optimizer = if checkpoint.optimizer.len() == self.parameters.len() {
                            checkpoint.optimizer
                        } else {
                            tracing::warn!("Optimizer state does not match the parameters, starting afresh");
                            Adam::new(self.parameters.len(), config.weight_decay)
                        };
                        start_epoch = checkpoint.epoch + 1;
                        best_val_loss = checkpoint.best_val_loss;
                        train_losses = checkpoint.train_losses;
                        val_losses = checkpoint.val_losses;
                    }
                    Err(GlucoseError::CheckpointNotFound(p)) => {
                        tracing::warn!("No checkpoint at {}, starting from scratch", p.display());
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let frozen = self.parameters.frozen_mask(&config.frozen);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut best_parameters = self.parameters.clone();
        let mut best_epoch = None;
        let mut stale = 0usize;
        let mut stopped_early = false;
        let mut history = Vec::new();

        let progress = config.show_progress.then(|| {
            let bar = ProgressBar::new(config.epochs.saturating_sub(start_epoch) as u64);
            if let Ok(style) = ProgressStyle::with_template("{bar:40} {pos}/{len} epochs {msg}") {
                bar.set_style(style);
            }
            bar
        });

        tracing::info!(
            train = train.len(),
            val = val.len(),
            params = self.parameters.len(),
            "Starting training of {}",
            config.model_name
        );

        for epoch in start_epoch..config.epochs {
            let lr = config
                .schedule
                .learning_rate(config.learning_rate, epoch, config.epochs);
            if config.shuffle {
                order.shuffle(&mut rng);
            }

            let mut sum = 0.0;
            let mut count = 0usize;
            for &i in &order {
                let options = if config.noise {
                    SimulationOptions::default().with_noise(rng.random())
                } else {
                    SimulationOptions::default()
                };
                let (value, grad) = match gradient_step(&train[i], &self.parameters, &config.loss, &options) {
                    Ok(step) => step,
                    Err(e) => {
                        tracing::warn!(epoch, record = i, error = %e, "Skipping training record");
                        continue;
                    }
                };
                let mut flat = DVector::from_vec(self.parameters.to_vec());
                optimizer.step(&mut flat, &grad, lr, &frozen);
                if let Err(e) = self.parameters.set_from_slice(flat.as_slice()) {
                    tracing::warn!(epoch, record = i, error = %e, "Rejected parameter update");
                    continue;
                }
                sum += value;
                count += 1;
            }
            if count == 0 {
                return Err(GlucoseError::EmptyDataset(format!(
                    "every training record failed in epoch {epoch}"
                )));
            }
            let train_loss = sum / count as f64;
            train_losses.push(train_loss);

            let mut val_loss = None;
            if !val.is_empty() && epoch % config.validate_every.max(1) == 0 {
                let loss = mean_loss(&val, &self.parameters, &config.loss).ok_or_else(|| {
                    GlucoseError::EmptyDataset(format!("every validation record failed in epoch {epoch}"))
                })?;
                val_loss = Some(loss);
                val_losses.push(loss);

                let improved = match best_val_loss {
                    Some(best) => loss < best,
                    None => true,
                };
                if improved {
                    best_val_loss = Some(loss);
                    best_parameters = self.parameters.clone();
                    best_epoch = Some(epoch);
                    stale = 0;
                    if let Some(path) = &best_path {
                        Checkpoint {
                            epoch,
                            parameters: self.parameters.clone(),
                            optimizer: optimizer.clone(),
                            train_losses: train_losses.clone(),
                            val_losses: val_losses.clone(),
                            best_val_loss,
                        }
                        .save(path)?;
                    }
                } else {
                    stale += 1;
                }
            }

            tracing::info!(epoch, train_loss, ?val_loss, lr, "Epoch finished");
            history.push(EpochRecord {
                epoch,
                train_loss,
                val_loss,
                learning_rate: lr,
            });
            if let Some(bar) = &progress {
                bar.set_message(format!("train {train_loss:.3}"));
                bar.inc(1);
            }

            if stale >= config.patience.max(1) {
                tracing::info!(epoch, ?best_epoch, "Early stopping");
                stopped_early = true;
                break;
            }
        }
        if let Some(bar) = progress {
            bar.finish_and_clear();
        }

        if best_epoch.is_none() && best_val_loss.is_none() {
            // Nothing was validated; keep the final parameters
            best_parameters = self.parameters.clone();
        } else if let Some(path) = &best_path {
            match Checkpoint::load(path) {
                Ok(checkpoint) => {
                    best_parameters = checkpoint.parameters;
                    register_medications(&mut best_parameters, splits, &self.periods);
                }
                Err(GlucoseError::CheckpointNotFound(p)) => {
                    tracing::warn!("Best checkpoint {} is missing, using in-memory best", p.display());
                }
                Err(e) => return Err(e),
            }
        }

        let mut refinement = None;
        if config.refine_iterations > 0 {
            match refine(
                &best_parameters,
                splits.train.records(),
                &self.periods,
                &config.loss,
                &frozen,
                config.refine_iterations,
            ) {
                Ok(outcome) => {
                    best_parameters = outcome.parameters.clone();
                    refinement = Some(outcome);
                }
                Err(e) => tracing::warn!(error = %e, "Refinement skipped"),
            }
        }

        let test_loss = if splits.test.is_empty() {
            None
        } else {
            let test = build_examples(splits.test.records(), &self.periods);
            let loss = mean_loss(&test, &best_parameters, &config.loss);
            if loss.is_none() {
                tracing::warn!("No test record could be evaluated");
            }
            loss
        };

        self.parameters = best_parameters;
        let report = TrainingReport {
            parameters: self.parameters.clone(),
            epochs_run: history.len(),
            stopped_early,
            history,
            best_epoch,
            best_val_loss,
            test_loss,
            refinement,
        };
        tracing::info!(?best_val_loss, ?test_loss, "Training finished");

        if let Some(dir) = &config.log_dir {
            write_logs(dir, &config, &report)?;
        }
        Ok(report)
    }

    /// Mean deterministic loss of the current parameters on `dataset`
    pub fn evaluate(&self, dataset: &Dataset) -> Result<f64, GlucoseError> {
        evaluate_parameters(&self.parameters, dataset, &self.periods, &self.config.loss)
    }
}

/// Load a checkpoint and score its parameters on `dataset`.
///
/// Unlike training, a missing checkpoint is an error here.
pub fn evaluate_checkpoint(
    path: impl AsRef<Path>,
    dataset: &Dataset,
    periods: &MedicationPeriodTable,
    loss: &GlucoseLoss,
) -> Result<f64, GlucoseError> {
    let checkpoint = Checkpoint::load(path)?;
    evaluate_parameters(&checkpoint.parameters, dataset, periods, loss)
}

fn evaluate_parameters(
    parameters: &ParameterSet,
    dataset: &Dataset,
    periods: &MedicationPeriodTable,
    loss: &GlucoseLoss,
) -> Result<f64, GlucoseError> {
    let examples = build_examples(dataset.records(), periods);
    mean_loss(&examples, parameters, loss)
        .ok_or_else(|| GlucoseError::EmptyDataset("no record could be evaluated".to_string()))
}

#[derive(Serialize)]
struct Summary<'a> {
    model_name: &'a str,
    finished_at: DateTime<Utc>,
    config: &'a TrainingConfig,
    report: &'a TrainingReport,
}

/// Write `<model>_summary.json` and `<model>_history.csv` into `dir`
fn write_logs(dir: &Path, config: &TrainingConfig, report: &TrainingReport) -> Result<(), GlucoseError> {
    std::fs::create_dir_all(dir)?;

    let summary = Summary {
        model_name: &config.model_name,
        finished_at: Utc::now(),
        config,
        report,
    };
    let file = File::create(dir.join(format!("{}_summary.json", config.model_name)))?;
    serde_json::to_writer_pretty(file, &summary)?;

    let mut writer = csv::Writer::from_path(dir.join(format!("{}_history.csv", config.model_name)))?;
    for row in &report.history {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{GlucoseSequence, MealFeatures};

    fn record(carbs: f64, peak: f64) -> Record {
        let times: Vec<f64> = (0..=12).map(|i| i as f64 * 10.0).collect();
        let values = times
            .iter()
            .map(|t| 100.0 + peak * (t / 60.0).min(1.0))
            .collect();
        Record {
            meal: MealFeatures {
                carbs,
                hour: 13.0,
                fiber_ratio: 0.1,
                is_liquid: false,
                fatprotein: 0.2,
                activity_level: 0.0,
                medication_period: None,
                date: None,
                insulin: false,
                insulin_type: None,
                insulin_medications: Vec::new(),
                other_medications: Vec::new(),
            },
            sequence: GlucoseSequence {
                glucose_times: times,
                glucose_values: values,
                baseline_glucose: 100.0,
                heart_signals: None,
            },
        }
    }

    #[test]
    fn test_config_defaults() {
        let config: TrainingConfig = serde_json::from_str(r#"{"epochs": 5}"#).unwrap();
        assert_eq!(config.epochs, 5);
        assert_eq!(config.learning_rate, 0.01);
        assert_eq!(config.patience, 10);
        assert_eq!(config.seed, 42);
        assert_eq!(config.frozen, vec!["rho".to_string(), "log_sigma".to_string()]);
        assert_eq!(config.schedule, LearningRateSchedule::Cosine { min_lr: 0.0 });
    }

    #[test]
    fn test_training_reduces_loss_and_respects_frozen() {
        let splits = Splits {
            train: Dataset::new(vec![record(50.0, 50.0)]),
            val: Dataset::new(vec![record(50.0, 50.0)]),
            test: Dataset::default(),
        };
        let config = TrainingConfig::new()
            .with_epochs(3)
            .with_learning_rate(1e-4)
            .with_schedule(LearningRateSchedule::Constant);
        let initial = ParameterSet::default();
        let mut trainer = Trainer::new(config);
        let before = trainer.evaluate(&splits.train).unwrap();
        let report = trainer.train(&splits).unwrap();
        let after = trainer.evaluate(&splits.train).unwrap();

        assert!(after < before, "loss went from {before} to {after}");
        assert_eq!(report.parameters.raw().rho, initial.raw().rho);
        assert_eq!(report.parameters.raw().log_sigma, initial.raw().log_sigma);
        assert!(report.best_val_loss.is_some());
        assert_eq!(report.test_loss, None);
    }

    #[test]
    fn test_resume_registers_medications_from_every_split() {
        let dir = std::env::temp_dir().join(format!("glucofit-resume-ids-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        let mut dosed = record(50.0, 50.0);
        dosed.meal.medication_period = Some("metformin_500".to_string());
        let plain = Splits {
            train: Dataset::new(vec![record(50.0, 50.0)]),
            val: Dataset::new(vec![record(50.0, 50.0)]),
            test: Dataset::default(),
        };
        let config = TrainingConfig::new()
            .with_epochs(2)
            .with_learning_rate(1e-4)
            .with_checkpoint_dir(&dir);
        Trainer::new(config.clone()).train(&plain).unwrap();

        let mut resumed = config.with_epochs(4);
        resumed.resume = true;
        let splits = Splits {
            test: Dataset::new(vec![dosed]),
            ..plain
        };
        let mut trainer = Trainer::new(resumed);
        let report = trainer.train(&splits).unwrap();

        assert_eq!(report.parameters.medication_theta("metformin_500"), Some(0.0));
        assert_eq!(trainer.parameters().medication_theta("metformin_500"), Some(0.0));
        assert!(report.test_loss.is_some());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_empty_training_set_is_an_error() {
        let mut trainer = Trainer::new(TrainingConfig::new().with_epochs(1));
        assert!(matches!(
            trainer.train(&Splits::default()),
            Err(GlucoseError::EmptyDataset(_))
        ));
    }
}
