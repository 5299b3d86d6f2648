//! Health observation records, raw and validated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::compute_bmi;
use crate::CardioError;

/// Subject id used when a record arrives without one.
pub const ANONYMOUS_SUBJECT: &str = "anonymous";

/// Biological-sex code as used by the training dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Sex {
    Female = 1,
    Male = 2,
}

impl Sex {
    /// Returns the numeric code the model was fitted with.
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Sex {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Female),
            2 => Ok(Self::Male),
            other => Err(format!("sex code {} out of range [1, 2]", other)),
        }
    }
}

impl From<Sex> for i64 {
    fn from(sex: Sex) -> Self {
        sex.code()
    }
}

/// Ordinal level used for cholesterol and glucose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum Level {
    Normal = 1,
    AboveNormal = 2,
    WellAboveNormal = 3,
}

impl Level {
    /// Returns the numeric code the model was fitted with.
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for Level {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Normal),
            2 => Ok(Self::AboveNormal),
            3 => Ok(Self::WellAboveNormal),
            other => Err(format!("level {} out of range [1, 3]", other)),
        }
    }
}

impl From<Level> for i64 {
    fn from(level: Level) -> Self {
        level.code()
    }
}

/// Optional rules layered on top of the range checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationRules {
    /// Reject records where systolic pressure does not exceed diastolic.
    pub enforce_pressure_order: bool,
}

/// A raw health record as received from a caller or read back from storage.
///
/// Every measurement is optional so that incomplete records can be reported
/// field by field instead of failing at deserialization. Field names follow
/// the training dataset (`gender`, `gluc`, `smoke`, `alco`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationInput {
    /// Store id. Only set for records read from storage, never from the wire.
    #[serde(skip)]
    pub id: Option<i64>,
    #[serde(default)]
    pub subject_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub age: Option<f64>,
    #[serde(default)]
    pub gender: Option<i64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub bmi: Option<f64>,
    #[serde(default)]
    pub ap_hi: Option<f64>,
    #[serde(default)]
    pub ap_lo: Option<f64>,
    #[serde(default)]
    pub cholesterol: Option<i64>,
    #[serde(default)]
    pub gluc: Option<i64>,
    #[serde(default)]
    pub smoke: Option<i64>,
    #[serde(default)]
    pub alco: Option<i64>,
    #[serde(default)]
    pub active: Option<i64>,
}

/// One subject's validated measurements at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthObservation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub age: f64,
    #[serde(rename = "gender")]
    pub sex: Sex,
    pub height: f64,
    pub weight: f64,
    pub bmi: f64,
    pub ap_hi: f64,
    pub ap_lo: f64,
    pub cholesterol: Level,
    #[serde(rename = "gluc")]
    pub glucose: Level,
    #[serde(rename = "smoke")]
    pub smoker: bool,
    #[serde(rename = "alco")]
    pub alcohol: bool,
    pub active: bool,
}

impl ObservationInput {
    /// Validates every field and produces a strongly typed observation.
    ///
    /// All problems are collected and reported together. A missing BMI is
    /// computed from height and weight; a supplied BMI is kept as is.
    pub fn validate(&self, rules: &ValidationRules) -> Result<HealthObservation, CardioError> {
        let mut errors = Vec::new();

        let age = non_negative(&mut errors, "age", self.age);
        let sex = code::<Sex>(&mut errors, "gender", self.gender);
        let height = positive(&mut errors, "height", self.height);
        let weight = positive(&mut errors, "weight", self.weight);
        let bmi = match self.bmi {
            Some(_) => positive(&mut errors, "bmi", self.bmi),
            None => match height.zip(weight) {
                Some((h, w)) => positive(&mut errors, "bmi", Some(compute_bmi(h, w))),
                None => None,
            },
        };
        let ap_hi = finite(&mut errors, "ap_hi", self.ap_hi);
        let ap_lo = finite(&mut errors, "ap_lo", self.ap_lo);
        let cholesterol = code::<Level>(&mut errors, "cholesterol", self.cholesterol);
        let glucose = code::<Level>(&mut errors, "gluc", self.gluc);
        let smoker = flag(&mut errors, "smoke", self.smoke);
        let alcohol = flag(&mut errors, "alco", self.alco);
        let active = flag(&mut errors, "active", self.active);

        let (
            Some(age),
            Some(sex),
            Some(height),
            Some(weight),
            Some(bmi),
            Some(ap_hi),
            Some(ap_lo),
            Some(cholesterol),
            Some(glucose),
            Some(smoker),
            Some(alcohol),
            Some(active),
        ) = (
            age, sex, height, weight, bmi, ap_hi, ap_lo, cholesterol, glucose, smoker, alcohol,
            active,
        )
        else {
            return Err(CardioError::Validation(errors));
        };

        if rules.enforce_pressure_order && ap_hi <= ap_lo {
            return Err(CardioError::invalid(format!(
                "ap_hi {} must exceed ap_lo {}",
                ap_hi, ap_lo
            )));
        }

        let subject_id = self
            .subject_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(ANONYMOUS_SUBJECT)
            .to_string();

        Ok(HealthObservation {
            id: self.id,
            subject_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            age,
            sex,
            height,
            weight,
            bmi,
            ap_hi,
            ap_lo,
            cholesterol,
            glucose,
            smoker,
            alcohol,
            active,
        })
    }
}

fn finite(errors: &mut Vec<String>, name: &str, value: Option<f64>) -> Option<f64> {
    match value {
        None => {
            errors.push(format!("{} is required", name));
            None
        }
        Some(v) if !v.is_finite() => {
            errors.push(format!("{} must be a finite number", name));
            None
        }
        Some(v) => Some(v),
    }
}

fn positive(errors: &mut Vec<String>, name: &str, value: Option<f64>) -> Option<f64> {
    let v = finite(errors, name, value)?;
    if v <= 0.0 {
        errors.push(format!("{} {} must be positive", name, v));
        return None;
    }
    Some(v)
}

fn non_negative(errors: &mut Vec<String>, name: &str, value: Option<f64>) -> Option<f64> {
    let v = finite(errors, name, value)?;
    if v < 0.0 {
        errors.push(format!("{} {} must not be negative", name, v));
        return None;
    }
    Some(v)
}

fn code<T>(errors: &mut Vec<String>, name: &str, value: Option<i64>) -> Option<T>
where
    T: TryFrom<i64, Error = String>,
{
    let Some(raw) = value else {
        errors.push(format!("{} is required", name));
        return None;
    };
    T::try_from(raw)
        .map_err(|e| errors.push(format!("{}: {}", name, e)))
        .ok()
}

fn flag(errors: &mut Vec<String>, name: &str, value: Option<i64>) -> Option<bool> {
    match value {
        None => {
            errors.push(format!("{} is required", name));
            None
        }
        Some(0) => Some(false),
        Some(1) => Some(true),
        Some(other) => {
            errors.push(format!("{} {} must be 0 or 1", name, other));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_input() -> ObservationInput {
        ObservationInput {
            subject_id: Some("user1".into()),
            age: Some(55.0),
            gender: Some(2),
            height: Some(170.0),
            weight: Some(70.0),
            bmi: None,
            ap_hi: Some(140.0),
            ap_lo: Some(90.0),
            cholesterol: Some(2),
            gluc: Some(1),
            smoke: Some(1),
            alco: Some(0),
            active: Some(1),
            ..Default::default()
        }
    }

    fn messages(err: CardioError) -> Vec<String> {
        match err {
            CardioError::Validation(messages) => messages,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_input_produces_typed_observation() {
        let obs = complete_input().validate(&ValidationRules::default()).unwrap();
        assert_eq!(obs.subject_id, "user1");
        assert_eq!(obs.sex, Sex::Male);
        assert_eq!(obs.cholesterol, Level::AboveNormal);
        assert_eq!(obs.glucose, Level::Normal);
        assert!(obs.smoker);
        assert!(!obs.alcohol);
        assert!(obs.active);
    }

    #[test]
    fn test_overflowing_computed_bmi_rejected() {
        let input = ObservationInput {
            height: Some(1e-200),
            weight: Some(1e200),
            ..complete_input()
        };
        let msgs = messages(input.validate(&ValidationRules::default()).unwrap_err());
        assert_eq!(msgs, vec!["bmi must be a finite number".to_string()]);
    }

    #[test]
    fn test_bmi_computed_when_absent() {
        let obs = complete_input().validate(&ValidationRules::default()).unwrap();
        assert!((obs.bmi - 24.22).abs() < 0.01, "bmi was {}", obs.bmi);
    }

    #[test]
    fn test_supplied_bmi_is_not_overridden() {
        let input = ObservationInput { bmi: Some(31.5), ..complete_input() };
        let obs = input.validate(&ValidationRules::default()).unwrap();
        assert_eq!(obs.bmi, 31.5);
    }

    #[test]
    fn test_out_of_range_codes_rejected() {
        let input = ObservationInput {
            cholesterol: Some(5),
            gender: Some(3),
            smoke: Some(2),
            ..complete_input()
        };
        let errors = messages(input.validate(&ValidationRules::default()).unwrap_err());
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.starts_with("cholesterol")));
        assert!(errors.iter().any(|e| e.starts_with("gender")));
        assert!(errors.iter().any(|e| e.starts_with("smoke")));
    }

    #[test]
    fn test_missing_fields_reported_individually() {
        let input = ObservationInput { age: None, ap_lo: None, ..complete_input() };
        let errors = messages(input.validate(&ValidationRules::default()).unwrap_err());
        assert_eq!(errors, vec!["age is required", "ap_lo is required"]);
    }

    #[test]
    fn test_missing_height_does_not_double_report_bmi() {
        let input = ObservationInput { height: None, ..complete_input() };
        let errors = messages(input.validate(&ValidationRules::default()).unwrap_err());
        assert_eq!(errors, vec!["height is required"]);
    }

    #[test]
    fn test_non_positive_body_measurements_rejected() {
        let input = ObservationInput { weight: Some(0.0), ..complete_input() };
        let errors = messages(input.validate(&ValidationRules::default()).unwrap_err());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("weight"));
    }

    #[test]
    fn test_pressure_order_only_checked_when_enabled() {
        let input = ObservationInput { ap_hi: Some(80.0), ap_lo: Some(90.0), ..complete_input() };
        assert!(input.validate(&ValidationRules::default()).is_ok());

        let strict = ValidationRules { enforce_pressure_order: true };
        let errors = messages(input.validate(&strict).unwrap_err());
        assert!(errors[0].contains("ap_hi"));
    }

    #[test]
    fn test_blank_subject_becomes_anonymous() {
        let input = ObservationInput { subject_id: Some("  ".into()), ..complete_input() };
        let obs = input.validate(&ValidationRules::default()).unwrap();
        assert_eq!(obs.subject_id, ANONYMOUS_SUBJECT);
    }

    #[test]
    fn test_wire_names_deserialize() {
        let json = r#"{
            "subject_id": "user2", "age": 61, "gender": 1, "height": 158.5,
            "weight": 80.1, "bmi": 31.9, "ap_hi": 150, "ap_lo": 95,
            "cholesterol": 3, "gluc": 2, "smoke": 0, "alco": 0, "active": 0,
            "id": 99
        }"#;
        let input: ObservationInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.id, None);
        assert_eq!(input.gluc, Some(2));

        let obs = input.validate(&ValidationRules::default()).unwrap();
        assert_eq!(obs.glucose, Level::AboveNormal);
        assert_eq!(obs.sex, Sex::Female);
    }
}
