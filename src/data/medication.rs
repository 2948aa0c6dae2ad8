use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Insulin formulation class.
///
/// Each class has its own kinetic kernel and a validity window, in hours,
/// outside of which its effect is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsulinKind {
    Rapid,
    Short,
    Intermediate,
    /// Long-acting or basal insulin
    Long,
}

impl InsulinKind {
    /// Match a free-text formulation by keyword, case-insensitively.
    ///
    /// Returns `None` when no keyword is present.
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("rapid") {
            Some(InsulinKind::Rapid)
        } else if label.contains("short") {
            Some(InsulinKind::Short)
        } else if label.contains("intermediate") {
            Some(InsulinKind::Intermediate)
        } else if label.contains("basal") || label.contains("long") {
            Some(InsulinKind::Long)
        } else {
            None
        }
    }

    /// Like [`InsulinKind::parse`], but unrecognized labels fall back to
    /// rapid-acting kinetics with a warning.
    pub fn from_label(label: &str) -> Self {
        InsulinKind::parse(label).unwrap_or_else(|| {
            tracing::warn!(
                "Unrecognized insulin formulation '{}', using rapid-acting kinetics",
                label
            );
            InsulinKind::Rapid
        })
    }

    /// Length of the validity window, in hours after administration
    pub fn window(&self) -> f64 {
        match self {
            InsulinKind::Rapid => 5.0,
            InsulinKind::Short => 8.0,
            InsulinKind::Intermediate => 12.0,
            InsulinKind::Long => 24.0,
        }
    }
}

impl fmt::Display for InsulinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InsulinKind::Rapid => "rapid",
            InsulinKind::Short => "short",
            InsulinKind::Intermediate => "intermediate",
            InsulinKind::Long => "long",
        };
        write!(f, "{name}")
    }
}

impl<'de> Deserialize<'de> for InsulinKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(InsulinKind::from_label(&label))
    }
}

/// An administered insulin dose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsulinDose {
    pub units: f64,
    pub time: f64,
    /// Overrides the scenario's default formulation
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<InsulinKind>,
}

impl InsulinDose {
    pub fn new(units: f64, time: f64) -> Self {
        InsulinDose {
            units,
            time,
            kind: None,
        }
    }

    pub fn with_kind(mut self, kind: InsulinKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Pharmacologic class of an oral (or non-insulin) medication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedClass {
    Biguanide,
    Sulfonylurea,
    BasalInsulin,
    BolusInsulin,
    Glp1Daily,
    Glp1Weekly,
    Sglt2,
    #[serde(alias = "tzd")]
    Thiazolidinedione,
    #[default]
    #[serde(other)]
    Unknown,
}

impl MedClass {
    /// Prior duration of effect in hours, `None` for [`MedClass::Unknown`]
    pub fn prior_duration(&self) -> Option<f64> {
        match self {
            MedClass::Biguanide => Some(12.0),
            MedClass::Sulfonylurea => Some(18.0),
            MedClass::BasalInsulin => Some(24.0),
            MedClass::BolusInsulin => Some(5.0),
            MedClass::Glp1Daily => Some(24.0),
            MedClass::Glp1Weekly => Some(144.0),
            MedClass::Sglt2 => Some(24.0),
            MedClass::Thiazolidinedione => Some(24.0),
            MedClass::Unknown => None,
        }
    }
}

/// A non-insulin medication dose with a learnable duration of effect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OralMedication {
    #[serde(default)]
    pub med_id: Option<String>,
    pub dose: f64,
    #[serde(alias = "t_k")]
    pub time: f64,
    #[serde(default)]
    pub med_class: MedClass,
}

impl OralMedication {
    pub fn new(med_id: impl Into<String>, dose: f64, time: f64, med_class: MedClass) -> Self {
        OralMedication {
            med_id: Some(med_id.into()),
            dose,
            time,
            med_class,
        }
    }
}

/// A period of physical activity.
///
/// Without a duration the event stays active from its start onwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    pub intensity: f64,
}

impl ActivityEvent {
    pub fn new(time: f64, intensity: f64) -> Self {
        ActivityEvent {
            time,
            duration: None,
            intensity,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn is_active(&self, t: f64) -> bool {
        t >= self.time && self.duration.map_or(true, |d| t < self.time + d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insulin_keyword_parsing() {
        assert_eq!(InsulinKind::parse("Rapid-acting analog"), Some(InsulinKind::Rapid));
        assert_eq!(InsulinKind::parse("SHORT"), Some(InsulinKind::Short));
        assert_eq!(InsulinKind::parse("NPH intermediate"), Some(InsulinKind::Intermediate));
        assert_eq!(InsulinKind::parse("basal"), Some(InsulinKind::Long));
        assert_eq!(InsulinKind::parse("long acting"), Some(InsulinKind::Long));
        assert_eq!(InsulinKind::parse("mystery"), None);
    }

    #[test]
    fn test_unrecognized_insulin_falls_back_to_rapid() {
        let dose: InsulinDose = serde_json::from_str(r#"{"units": 4, "time": 1, "type": "??"}"#).unwrap();
        assert_eq!(dose.kind, Some(InsulinKind::Rapid));
    }

    #[test]
    fn test_med_class_deserialization() {
        let med: OralMedication = serde_json::from_str(
            r#"{"med_id": "metformin_500", "dose": 500, "t_k": 2, "med_class": "biguanide"}"#,
        )
        .unwrap();
        assert_eq!(med.med_class, MedClass::Biguanide);
        assert_eq!(med.time, 2.0);

        let unknown: MedClass = serde_json::from_str(r#""homeopathic""#).unwrap();
        assert_eq!(unknown, MedClass::Unknown);
        assert_eq!(unknown.prior_duration(), None);

        let weekly: MedClass = serde_json::from_str(r#""glp1_weekly""#).unwrap();
        assert_eq!(weekly.prior_duration(), Some(144.0));

        let tzd: MedClass = serde_json::from_str(r#""tzd""#).unwrap();
        assert_eq!(tzd, MedClass::Thiazolidinedione);
    }

    #[test]
    fn test_activity_window() {
        let open = ActivityEvent::new(10.0, 1.0);
        assert!(!open.is_active(9.0));
        assert!(open.is_active(1.0e6));

        let bounded = ActivityEvent::new(10.0, 1.0).with_duration(30.0);
        assert!(bounded.is_active(10.0));
        assert!(bounded.is_active(39.9));
        assert!(!bounded.is_active(40.0));
    }
}
