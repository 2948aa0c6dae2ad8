use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::NaiveDate;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Deserializer, Serialize};

use super::{
    ActivityEvent, InsulinDose, InsulinKind, Meal, MedicationPeriod, MedicationPeriodTable,
    OralMedication, Regimen,
};
use crate::simulator::{Scenario, TimeUnit};
use crate::GlucoseError;

/// Meal-level features of one training example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealFeatures {
    pub carbs: f64,
    /// Clock hour of the meal, fractional
    pub hour: f64,
    #[serde(default)]
    pub fiber_ratio: f64,
    #[serde(default)]
    pub is_liquid: bool,
    #[serde(default)]
    pub fatprotein: f64,
    #[serde(default)]
    pub activity_level: f64,
    #[serde(default)]
    pub medication_period: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub insulin: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin_type: Option<InsulinKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub insulin_medications: Vec<InsulinDose>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_medications: Vec<OralMedication>,
}

/// Observed post-meal glucose readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseSequence {
    /// Minutes after the meal
    pub glucose_times: Vec<f64>,
    pub glucose_values: Vec<f64>,
    pub baseline_glucose: f64,
    /// Optional auxiliary heart features, one row per reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_signals: Option<Vec<[f64; 4]>>,
}

/// Accepts both `YYYY-MM-DD` and ISO date-times such as `2025-06-12T00:00:00`
fn lenient_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    let Some(text) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let day = text.get(..10).unwrap_or(&text);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// One training example: a meal and the glucose readings that followed it
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub meal: MealFeatures,
    pub sequence: GlucoseSequence,
}

impl Record {
    /// Observed readings, aligned with the scenario's time grid
    pub fn observed(&self) -> &[f64] {
        &self.sequence.glucose_values
    }

    pub fn baseline(&self) -> f64 {
        self.sequence.baseline_glucose
    }

    /// Period in effect for this meal, by name first and then by date
    pub fn period<'a>(&self, periods: &'a MedicationPeriodTable) -> Option<&'a MedicationPeriod> {
        match (&self.meal.medication_period, self.meal.date) {
            (Some(name), _) => periods.period_named(name),
            (None, Some(date)) => periods.period_for(date),
            (None, None) => None,
        }
    }

    /// Build the simulation scenario for this example.
    ///
    /// The grid is the reading times in minutes, the meal is placed at `t = 0`
    /// and the clock starts at the meal hour. The regimen is looked up by
    /// period name first, then by date. A period with a daily dose adds it as
    /// an oral medication named after the period.
    pub fn to_scenario(&self, periods: &MedicationPeriodTable) -> Result<Scenario, GlucoseError> {
        let features = &self.meal;
        let seq = &self.sequence;
        if seq.glucose_times.len() != seq.glucose_values.len() {
            return Err(GlucoseError::LengthMismatch {
                what: "glucose readings".to_string(),
                expected: seq.glucose_times.len(),
                got: seq.glucose_values.len(),
            });
        }

        let meal = Meal::new(features.carbs, 0.0)?
            .with_fiber_ratio(features.fiber_ratio)?
            .with_fatprotein(features.fatprotein)?
            .liquid(features.is_liquid);

        let period = self.period(periods);
        let regimen = match (period, &features.medication_period) {
            (Some(period), _) => period.regimen(),
            (None, Some(name)) => periods.regimen_by_name(name),
            (None, None) => Regimen::unknown(),
        };

        let mut scenario = Scenario::new(seq.baseline_glucose, seq.glucose_times.clone())
            .with_time_unit(TimeUnit::Minutes)
            .with_start_hour(features.hour)
            .with_meal(meal)
            .with_regimen(regimen.factors)
            .with_insulin(
                features.insulin,
                features.insulin_type,
                features.insulin_medications.clone(),
            )
            .with_oral_medications(features.other_medications.clone());

        if let Some(medication) = period.and_then(|p| p.medication_event(features.hour)) {
            scenario = scenario.with_oral_medication(medication);
        }
        if features.activity_level != 0.0 {
            scenario = scenario.with_activity(ActivityEvent::new(0.0, features.activity_level));
        }
        if let Some(signals) = &seq.heart_signals {
            scenario = scenario.with_heart_signals(signals.clone());
        }
        Ok(scenario)
    }

    /// Identifiers of every oral medication this example references,
    /// including the dose of its medication period
    pub fn medication_ids<'a>(
        &'a self,
        periods: &'a MedicationPeriodTable,
    ) -> impl Iterator<Item = &'a str> {
        let period = self
            .period(periods)
            .filter(|p| p.dose.is_some())
            .map(|p| p.name.as_str());
        self.meal
            .other_medications
            .iter()
            .filter_map(|m| m.med_id.as_deref())
            .chain(period)
    }
}

/// On-disk layout of a [`Dataset`]
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetFile {
    pub meal_features: Vec<MealFeatures>,
    pub glucose_sequences: Vec<GlucoseSequence>,
}

/// An ordered collection of [`Record`]s, stored on disk as parallel
/// `meal_features` / `glucose_sequences` arrays
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DatasetFile", into = "DatasetFile")]
pub struct Dataset {
    records: Vec<Record>,
}

impl TryFrom<DatasetFile> for Dataset {
    type Error = GlucoseError;

    fn try_from(file: DatasetFile) -> Result<Self, Self::Error> {
        if file.meal_features.len() != file.glucose_sequences.len() {
            return Err(GlucoseError::LengthMismatch {
                what: "glucose_sequences".to_string(),
                expected: file.meal_features.len(),
                got: file.glucose_sequences.len(),
            });
        }
        let records = file
            .meal_features
            .into_iter()
            .zip(file.glucose_sequences)
            .map(|(meal, sequence)| Record { meal, sequence })
            .collect();
        Ok(Dataset { records })
    }
}

impl From<Dataset> for DatasetFile {
    fn from(dataset: Dataset) -> Self {
        let (meal_features, glucose_sequences) = dataset
            .records
            .into_iter()
            .map(|r| (r.meal, r.sequence))
            .unzip();
        DatasetFile {
            meal_features,
            glucose_sequences,
        }
    }
}

impl Dataset {
    pub fn new(records: Vec<Record>) -> Self {
        Dataset { records }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GlucoseError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GlucoseError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Shuffle with a fixed seed and cut into train, validation and test sets.
    ///
    /// The test set receives whatever the first two fractions leave over.
    pub fn split(self, train_fraction: f64, val_fraction: f64, seed: u64) -> Result<Splits, GlucoseError> {
        if !(0.0..=1.0).contains(&train_fraction)
            || !(0.0..=1.0).contains(&val_fraction)
            || train_fraction + val_fraction > 1.0
        {
            return Err(GlucoseError::invalid(
                "split fractions",
                format!("{train_fraction} / {val_fraction}"),
                "must be non-negative and sum to at most 1",
            ));
        }
        let n = self.records.len();
        let mut records = self.records;
        let mut rng = StdRng::seed_from_u64(seed);
        records.shuffle(&mut rng);

        let train_end = (n as f64 * train_fraction) as usize;
        let val_end = train_end + (n as f64 * val_fraction) as usize;
        let test = records.split_off(val_end);
        let val = records.split_off(train_end);
        Ok(Splits {
            train: Dataset::new(records),
            val: Dataset::new(val),
            test: Dataset::new(test),
        })
    }
}

/// Train, validation and test datasets
#[derive(Debug, Clone, Default)]
pub struct Splits {
    pub train: Dataset,
    pub val: Dataset,
    pub test: Dataset,
}

impl Splits {
    /// Read `train.json`, `val.json` and `test.json` from a directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, GlucoseError> {
        let dir = dir.as_ref();
        Ok(Splits {
            train: Dataset::load(dir.join("train.json"))?,
            val: Dataset::load(dir.join("val.json"))?,
            test: Dataset::load(dir.join("test.json"))?,
        })
    }

    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), GlucoseError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        self.train.save(dir.join("train.json"))?;
        self.val.save(dir.join("val.json"))?;
        self.test.save(dir.join("test.json"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::RegimenFactors;

    const SAMPLE: &str = r#"{
        "meal_features": [
            {"carbs": 45.0, "hour": 12.5, "fiber_ratio": 0.15, "is_liquid": false,
             "fatprotein": 0.2, "activity_level": 0.0, "medication_period": "metformin_500",
             "date": "2025-09-20T00:00:00"},
            {"carbs": 20.0, "hour": 23.0, "fiber_ratio": 0.15, "is_liquid": true,
             "fatprotein": 0.2, "activity_level": 1.5, "date": "2025-06-13"}
        ],
        "glucose_sequences": [
            {"glucose_times": [0.0, 60.0, 120.0], "glucose_values": [98.0, 150.0, 120.0], "baseline_glucose": 95.0},
            {"glucose_times": [0.0, 90.0], "glucose_values": [110.0, 130.0], "baseline_glucose": 108.0}
        ]
    }"#;

    fn sample() -> Dataset {
        serde_json::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_dataset_parses_parallel_arrays() {
        let dataset = sample();
        assert_eq!(dataset.len(), 2);
        let first = &dataset.records()[0];
        assert_eq!(first.meal.date, NaiveDate::from_ymd_opt(2025, 9, 20));
        assert_eq!(first.observed(), &[98.0, 150.0, 120.0]);
    }

    #[test]
    fn test_mismatched_arrays_are_rejected() {
        let json = r#"{"meal_features": [], "glucose_sequences": [
            {"glucose_times": [0.0], "glucose_values": [1.0], "baseline_glucose": 1.0}
        ]}"#;
        assert!(serde_json::from_str::<Dataset>(json).is_err());
    }

    #[test]
    fn test_record_to_scenario() {
        let dataset = sample();
        let table = MedicationPeriodTable::default();

        let first = dataset.records()[0].to_scenario(&table).unwrap();
        assert_eq!(first.times(), &[0.0, 60.0, 120.0]);
        assert_eq!(first.initial_glucose(), 95.0);
        assert_eq!(first.regimen(), RegimenFactors::default());
        assert!(first.activities().is_empty());
        assert_eq!(first.oral_medications().len(), 1);
        assert_eq!(first.oral_medications()[0].time, (8.0 - 12.5) * 60.0);

        // Regimen from the date when no period name is present
        let second = dataset.records()[1].to_scenario(&table).unwrap();
        assert_eq!(second.regimen(), RegimenFactors::default());
        assert_eq!(second.activities().len(), 1);
        assert_eq!(second.start_hour(), 23.0);
        // 2025-06-13 falls in the baseline period, which has no dose
        assert!(second.oral_medications().is_empty());
    }

    #[test]
    fn test_medication_ids_include_period_dose() {
        let dataset = sample();
        let table = MedicationPeriodTable::default();
        let ids: Vec<&str> = dataset.records()[0].medication_ids(&table).collect();
        assert_eq!(ids, vec!["metformin_500"]);
        assert_eq!(dataset.records()[1].medication_ids(&table).count(), 0);
    }

    #[test]
    fn test_split_is_seeded_and_complete() {
        let records: Vec<Record> = (0..20)
            .map(|i| Record {
                meal: sample().records()[0].meal.clone(),
                sequence: GlucoseSequence {
                    glucose_times: vec![0.0],
                    glucose_values: vec![i as f64],
                    baseline_glucose: 100.0,
                    heart_signals: None,
                },
            })
            .collect();
        let a = Dataset::new(records.clone()).split(0.7, 0.15, 42).unwrap();
        let b = Dataset::new(records).split(0.7, 0.15, 42).unwrap();
        assert_eq!(a.train.len(), 14);
        assert_eq!(a.val.len(), 3);
        assert_eq!(a.test.len(), 3);
        assert_eq!(a.train, b.train);
    }

    #[test]
    fn test_dataset_serializes_back_to_parallel_arrays() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["meal_features"].as_array().unwrap().len(), 2);
        assert_eq!(json["glucose_sequences"][1]["baseline_glucose"], 108.0);
    }
}
