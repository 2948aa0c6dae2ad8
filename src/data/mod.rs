//! Inputs to the glucose model and the records it is fitted to.
//!
//! - [`Meal`], [`InsulinDose`], [`OralMedication`] and [`ActivityEvent`] describe
//!   what happened during a simulated period
//! - [`MedicationPeriodTable`] maps calendar dates to medication regimens
//! - [`Dataset`] and [`Record`] hold the processed meal/glucose examples used
//!   for training
//! - [`SimulationRequest`] and [`SimulationResponse`] form the JSON boundary of
//!   the simulation service

pub mod meal;
pub mod medication;
pub mod period;
pub mod record;
pub mod service;

pub use meal::Meal;
pub use medication::{ActivityEvent, InsulinDose, InsulinKind, MedClass, OralMedication};
pub use period::{
    MedicationPeriod, MedicationPeriodTable, PeriodDose, Regimen, RegimenFactors, UNKNOWN_REGIMEN,
};
pub use record::{Dataset, GlucoseSequence, MealFeatures, Record, Splits};
pub use service::{SimulationRequest, SimulationResponse};
