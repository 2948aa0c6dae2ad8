//! Simulation and fitting of personalised blood-glucose responses.
//!
//! A discrete-time model combines carbohydrate absorption, endogenous and
//! exogenous insulin, oral glucose-lowering medication, physical activity and
//! circadian effects into one glucose trajectory. All model code is generic
//! over [`ad::Scalar`], so the same rollout runs on plain `f64` values or on a
//! reverse-mode [`ad::Tape`] for gradient-based training.
//!
//! ```ignore
//! use glucofit::prelude::*;
//!
//! let scenario = Scenario::new(100.0, Scenario::uniform_grid(0.0, 240.0, 1.0))
//!     .with_meal(Meal::new(50.0, 60.0)?);
//! let trajectory = simulate(&scenario, &ParameterSet::default().view(), &SimulationOptions::default())?;
//! ```

extern crate self as glucofit;

pub mod ad;
pub mod data;
pub mod error;
pub mod loss;
pub mod parameters;
pub mod simulator;
pub mod training;

pub use error::GlucoseError;

// Re-export derive macros
pub use glucofit_macros::Params;

/// Trait for flat, named parameter structs.
///
/// Implement this trait (or use `#[derive(Params)]`) to convert between a
/// struct and the flat vector an optimizer works on.
pub trait Params: Sized {
    /// Returns the names of all parameter fields
    fn field_names() -> &'static [&'static str];

    /// Returns the number of parameters
    fn num_params() -> usize;

    /// Create from a slice of values (in field order)
    fn from_slice(values: &[f64]) -> Self;

    /// Convert to a vector of values (in field order)
    fn to_vec(&self) -> Vec<f64>;
}

pub mod prelude {
    pub mod data {
        pub use crate::data::{
            Dataset, GlucoseSequence, MealFeatures, MedicationPeriod, MedicationPeriodTable,
            PeriodDose, Record, Splits,
        };
    }
    pub mod training {
        pub use crate::training::{
            evaluate_checkpoint, refine, Checkpoint, TrainingConfig, TrainingReport, Trainer,
        };
    }

    pub use crate::ad::{Scalar, Tape, Var};
    pub use crate::data::{
        ActivityEvent, InsulinDose, InsulinKind, Meal, MedClass, OralMedication, RegimenFactors,
        SimulationRequest, SimulationResponse,
    };
    pub use crate::loss::{loss_matrix, GlucoseLoss, LossMatrixOptions, LossTerms};
    pub use crate::parameters::{ParameterSet, ParameterView, RawParameters};
    pub use crate::simulator::{simulate, Scenario, SimulationOptions, TimeUnit, Trajectory};
    pub use crate::{GlucoseError, Params};
}
