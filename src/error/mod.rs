use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlucoseError {
    /// A single input value is outside its valid domain
    #[error("Invalid {field}: {value} ({reason})")]
    InvalidInput {
        field: String,
        value: String,
        reason: String,
    },

    /// A simulation request was rejected before any simulation work started
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The time grid is empty, non-finite or not strictly increasing
    #[error("Invalid time grid: {0}")]
    InvalidTimeGrid(String),

    /// Two series that must be aligned have different lengths
    #[error("Length mismatch for {what}: expected {expected}, got {got}")]
    LengthMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    /// The glucose state became NaN or infinite during a rollout
    #[error("Non-finite glucose {value} at step {step} (t = {time})")]
    NonFinite { step: usize, time: f64, value: f64 },

    /// An oral medication referenced a class without a prior duration
    #[error("Unknown medication class for '{med_id}'")]
    UnknownMedicationClass { med_id: String },

    /// An oral medication event has no identifier
    #[error("Medication event at t = {time} has no identifier")]
    MissingMedicationId { time: f64 },

    /// A checkpoint required for evaluation does not exist
    #[error("Checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// There is nothing to train or evaluate on
    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    /// The derivative-free refinement failed
    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GlucoseError {
    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        GlucoseError::InvalidInput {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
