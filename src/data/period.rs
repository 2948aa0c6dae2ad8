use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{MedClass, OralMedication};
use crate::GlucoseError;

/// Name of the regimen used when no period matches
pub const UNKNOWN_REGIMEN: &str = "unknown";

/// Multiplicative adjustments a regimen applies to the aggregate
/// carbohydrate and insulin effects
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimenFactors {
    pub carb: f64,
    pub insulin: f64,
}

impl Default for RegimenFactors {
    fn default() -> Self {
        RegimenFactors {
            carb: 1.0,
            insulin: 1.0,
        }
    }
}

impl RegimenFactors {
    pub fn new(carb: f64, insulin: f64) -> Self {
        RegimenFactors { carb, insulin }
    }
}

/// A named regimen together with its factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Regimen {
    pub name: String,
    pub factors: RegimenFactors,
}

impl Regimen {
    pub fn unknown() -> Self {
        Regimen {
            name: UNKNOWN_REGIMEN.to_string(),
            factors: RegimenFactors::default(),
        }
    }
}

/// Daily oral dose taken throughout a period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodDose {
    pub dose: f64,
    /// Clock hour of administration
    #[serde(alias = "t_k")]
    pub hour: f64,
    pub med_class: MedClass,
}

/// A calendar interval, inclusive at both ends, during which one regimen applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MedicationPeriod {
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(default)]
    pub factors: RegimenFactors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<PeriodDose>,
}

impl MedicationPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// The period's dose as a medication event identified by the period name.
    ///
    /// `meal_hour` is the clock hour at scenario time zero; the event time is
    /// expressed in minutes relative to it.
    pub fn medication_event(&self, meal_hour: f64) -> Option<OralMedication> {
        self.dose.map(|dose| {
            OralMedication::new(
                self.name.clone(),
                dose.dose,
                (dose.hour - meal_hour) * 60.0,
                dose.med_class,
            )
        })
    }

    pub fn regimen(&self) -> Regimen {
        Regimen {
            name: self.name.clone(),
            factors: self.factors,
        }
    }
}

/// Ordered, non-overlapping medication periods.
///
/// Lookups return the first period containing the date and fall back to the
/// [`UNKNOWN_REGIMEN`] with neutral factors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MedicationPeriodTable {
    periods: Vec<MedicationPeriod>,
}

impl<'de> Deserialize<'de> for MedicationPeriodTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            periods: Vec<MedicationPeriod>,
        }
        let raw = Raw::deserialize(deserializer)?;
        MedicationPeriodTable::new(raw.periods).map_err(serde::de::Error::custom)
    }
}

impl MedicationPeriodTable {
    /// # Errors
    ///
    /// Fails if a period ends before it starts or two periods overlap
    pub fn new(periods: Vec<MedicationPeriod>) -> Result<Self, GlucoseError> {
        for period in &periods {
            if period.end < period.start {
                return Err(GlucoseError::invalid(
                    "medication period",
                    &period.name,
                    "ends before it starts",
                ));
            }
        }
        for (i, a) in periods.iter().enumerate() {
            for b in &periods[i + 1..] {
                if a.start <= b.end && b.start <= a.end {
                    return Err(GlucoseError::invalid(
                        "medication period",
                        format!("{} / {}", a.name, b.name),
                        "periods overlap",
                    ));
                }
            }
        }
        Ok(MedicationPeriodTable { periods })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, GlucoseError> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn periods(&self) -> &[MedicationPeriod] {
        &self.periods
    }

    pub fn period_for(&self, date: NaiveDate) -> Option<&MedicationPeriod> {
        self.periods.iter().find(|p| p.contains(date))
    }

    pub fn regimen_for_date(&self, date: NaiveDate) -> Regimen {
        self.period_for(date)
            .map(MedicationPeriod::regimen)
            .unwrap_or_else(Regimen::unknown)
    }

    pub fn period_named(&self, name: &str) -> Option<&MedicationPeriod> {
        self.periods.iter().find(|p| p.name == name)
    }

    /// Regimen by period name, unknown names get neutral factors
    pub fn regimen_by_name(&self, name: &str) -> Regimen {
        self.period_named(name)
            .map(MedicationPeriod::regimen)
            .unwrap_or_else(|| Regimen {
                name: name.to_string(),
                factors: RegimenFactors::default(),
            })
    }
}

/// Regimens of the recorded treatment history.
///
/// Every regimen keeps neutral factors; the drugs act through their
/// once-daily morning dose instead.
impl Default for MedicationPeriodTable {
    fn default() -> Self {
        let period = |name: &str, start, end, dose: Option<(f64, MedClass)>| MedicationPeriod {
            name: name.to_string(),
            start: date(start),
            end: date(end),
            factors: RegimenFactors::default(),
            dose: dose.map(|(dose, med_class)| PeriodDose {
                dose,
                hour: 8.0,
                med_class,
            }),
        };
        MedicationPeriodTable {
            periods: vec![
                period("baseline", (2025, 6, 12), (2025, 6, 26), None),
                period(
                    "pioglitazone_45",
                    (2025, 6, 27),
                    (2025, 9, 16),
                    Some((45.0, MedClass::Thiazolidinedione)),
                ),
                period(
                    "metformin_500",
                    (2025, 9, 17),
                    (2025, 10, 23),
                    Some((500.0, MedClass::Biguanide)),
                ),
                period(
                    "metformin_500_er",
                    (2025, 10, 24),
                    (2026, 1, 18),
                    Some((500.0, MedClass::Biguanide)),
                ),
            ],
        }
    }
}

fn date((y, m, d): (i32, u32, u32)) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
}
