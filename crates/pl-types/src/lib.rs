#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Industry tag carried by a job specification.
///
/// Known tags select a specialized validator; anything else is kept verbatim
/// in `Other` and evaluated by the generic algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Industry {
    Powder,
    Autoclave,
    Sterile,
    Concrete,
    Other(String),
}

impl Industry {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Powder => "powder",
            Self::Autoclave => "autoclave",
            Self::Sterile => "sterile",
            Self::Concrete => "concrete",
            Self::Other(tag) => tag.as_str(),
        }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

impl From<String> for Industry {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "powder" | "powder_coat" | "powder-coat" => Self::Powder,
            "autoclave" => Self::Autoclave,
            "sterile" | "sterilization" => Self::Sterile,
            "concrete" => Self::Concrete,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for Industry {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<Industry> for String {
    fn from(value: Industry) -> Self {
        match value {
            Industry::Other(tag) => tag,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for Industry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSpec {
    #[serde(rename = "target_temp_C")]
    pub target_temp_c: f64,
    pub hold_time_s: f64,
    #[serde(rename = "sensor_uncertainty_C")]
    pub sensor_uncertainty_c: f64,
    #[serde(rename = "temp_band_C", default, skip_serializing_if = "Option::is_none")]
    pub temp_band_c: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequirements {
    pub max_sample_period_s: f64,
    pub allowed_gaps_s: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    MinOfSet,
    MeanOfSet,
    MajorityOverThreshold,
}

impl SelectionMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MinOfSet => "min_of_set",
            Self::MeanOfSet => "mean_of_set",
            Self::MajorityOverThreshold => "majority_over_threshold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSelection {
    pub mode: SelectionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_at_least: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sensors: Option<usize>,
}

impl SensorSelection {
    /// Number of sensors that must be present before fusion is attempted.
    #[must_use]
    pub fn min_sensor_count(&self) -> usize {
        self.min_sensors.or(self.require_at_least).unwrap_or(1)
    }
}

impl Default for SensorSelection {
    fn default() -> Self {
        Self {
            mode: SelectionMode::MinOfSet,
            sensors: None,
            require_at_least: None,
            min_sensors: None,
        }
    }
}

fn default_continuous() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldLogic {
    #[serde(default = "default_continuous")]
    pub continuous: bool,
    #[serde(default)]
    pub max_total_dips_s: f64,
}

impl Default for HoldLogic {
    fn default() -> Self {
        Self {
            continuous: true,
            max_total_dips_s: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Preconditions {
    #[serde(
        rename = "max_ramp_rate_C_per_min",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_ramp_rate_c_per_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time_to_threshold_s: Option<f64>,
}

impl Preconditions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_ramp_rate_c_per_min.is_none() && self.max_time_to_threshold_s.is_none()
    }
}

/// Declarative process contract a dataset is judged against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    pub industry: Industry,
    pub job_id: String,
    pub spec: ProcessSpec,
    pub data_requirements: DataRequirements,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_selection: Option<SensorSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<HoldLogic>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preconditions: Option<Preconditions>,
}

impl Specification {
    /// `target + uncertainty`, the value a reading must reach to count as held.
    #[must_use]
    pub fn conservative_threshold_c(&self) -> f64 {
        self.spec.target_temp_c + self.spec.sensor_uncertainty_c
    }

    #[must_use]
    pub fn selection(&self) -> SensorSelection {
        self.sensor_selection.clone().unwrap_or_default()
    }

    #[must_use]
    pub fn hold_logic(&self) -> HoldLogic {
        self.logic.clone().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.job_id.trim().is_empty() {
            return Err(SpecError::EmptyJobId);
        }

        finite("spec.target_temp_C", self.spec.target_temp_c)?;
        non_negative("spec.hold_time_s", self.spec.hold_time_s)?;
        non_negative("spec.sensor_uncertainty_C", self.spec.sensor_uncertainty_c)?;
        if let Some(band) = self.spec.temp_band_c {
            non_negative("spec.temp_band_C", band)?;
        }
        if self.spec.hold_time_s == 0.0 {
            return Err(SpecError::ZeroHoldTime);
        }

        non_negative(
            "data_requirements.max_sample_period_s",
            self.data_requirements.max_sample_period_s,
        )?;
        if self.data_requirements.max_sample_period_s == 0.0 {
            return Err(SpecError::ZeroSamplePeriod);
        }
        non_negative(
            "data_requirements.allowed_gaps_s",
            self.data_requirements.allowed_gaps_s,
        )?;

        if let Some(selection) = &self.sensor_selection {
            if selection.sensors.as_ref().is_some_and(Vec::is_empty) {
                return Err(SpecError::EmptySensorList);
            }
            if selection.require_at_least == Some(0) || selection.min_sensors == Some(0) {
                return Err(SpecError::ZeroSensorCount);
            }
        }

        if let Some(logic) = &self.logic {
            non_negative("logic.max_total_dips_s", logic.max_total_dips_s)?;
        }

        if let Some(pre) = &self.preconditions {
            if let Some(rate) = pre.max_ramp_rate_c_per_min {
                non_negative("preconditions.max_ramp_rate_C_per_min", rate)?;
            }
            if let Some(limit) = pre.max_time_to_threshold_s {
                non_negative("preconditions.max_time_to_threshold_s", limit)?;
            }
        }

        Ok(())
    }
}

fn finite(field: &'static str, value: f64) -> Result<(), SpecError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(SpecError::NonFinite { field })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), SpecError> {
    finite(field, value)?;
    if value < 0.0 {
        return Err(SpecError::Negative { field, value });
    }
    Ok(())
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecError {
    #[error("job_id must not be empty")]
    EmptyJobId,
    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: &'static str, value: f64 },
    #[error("spec.hold_time_s must be greater than zero")]
    ZeroHoldTime,
    #[error("data_requirements.max_sample_period_s must be greater than zero")]
    ZeroSamplePeriod,
    #[error("sensor_selection.sensors must not be an empty list")]
    EmptySensorList,
    #[error("sensor counts in sensor_selection must be at least 1")]
    ZeroSensorCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Pass,
    Fail,
    Error,
    Indeterminate,
}

impl DecisionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Error => "ERROR",
            Self::Indeterminate => "INDETERMINATE",
        }
    }

    /// PASS and FAIL are verdicts about the process; the others are not.
    #[must_use]
    pub fn is_definitive(self) -> bool {
        matches!(self, Self::Pass | Self::Fail)
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Flag(bool),
    Count(u64),
    Number(f64),
    Text(String),
}

impl From<bool> for MetricValue {
    fn from(value: bool) -> Self {
        Self::Flag(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        Self::Count(value)
    }
}

impl From<usize> for MetricValue {
    fn from(value: usize) -> Self {
        Self::Count(value as u64)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The single verdict produced for a job. It is what gets sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub job_id: String,
    pub industry: Industry,
    pub status: DecisionStatus,
    pub pass: bool,
    pub validator: String,
    pub used_fallback: bool,
    pub target_temp_c: f64,
    pub conservative_threshold_c: f64,
    pub required_hold_time_s: f64,
    pub actual_hold_time_s: f64,
    pub min_temp_c: Option<f64>,
    pub max_temp_c: Option<f64>,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: BTreeMap<String, MetricValue>,
}

impl DecisionResult {
    /// A result with no computed signal, used for ERROR and INDETERMINATE outcomes.
    #[must_use]
    pub fn unresolved(
        spec: &Specification,
        status: DecisionStatus,
        validator: impl Into<String>,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            job_id: spec.job_id.clone(),
            industry: spec.industry.clone(),
            status,
            pass: false,
            validator: validator.into(),
            used_fallback: false,
            target_temp_c: spec.spec.target_temp_c,
            conservative_threshold_c: spec.conservative_threshold_c(),
            required_hold_time_s: spec.spec.hold_time_s,
            actual_hold_time_s: 0.0,
            min_temp_c: None,
            max_temp_c: None,
            reasons,
            warnings: Vec::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn insert_metric(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.metrics.insert(name.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DecisionResult, DecisionStatus, Industry, MetricValue, SelectionMode, SpecError,
        Specification,
    };

    fn powder_json() -> &'static str {
        r#"{
            "industry": "powder",
            "job_id": "batch-17",
            "spec": {"target_temp_C": 180.0, "hold_time_s": 600, "sensor_uncertainty_C": 2.0},
            "data_requirements": {"max_sample_period_s": 30.0, "allowed_gaps_s": 60.0},
            "sensor_selection": {"mode": "majority_over_threshold", "require_at_least": 2},
            "logic": {"continuous": false, "max_total_dips_s": 45},
            "preconditions": {"max_ramp_rate_C_per_min": 15.0}
        }"#
    }

    #[test]
    fn specification_parses_documented_shape() {
        let spec: Specification = serde_json::from_str(powder_json()).expect("spec parses");
        assert_eq!(spec.industry, Industry::Powder);
        let selection = spec.selection();
        assert_eq!(selection.mode, SelectionMode::MajorityOverThreshold);
        assert_eq!(selection.min_sensor_count(), 2);
        assert!(!spec.hold_logic().continuous);
        assert_eq!(
            spec.preconditions
                .as_ref()
                .and_then(|p| p.max_ramp_rate_c_per_min),
            Some(15.0)
        );
        spec.validate().expect("spec is valid");
    }

    #[test]
    fn conservative_threshold_adds_uncertainty() {
        let spec: Specification = serde_json::from_str(powder_json()).expect("spec parses");
        assert_eq!(spec.conservative_threshold_c(), 182.0);
    }

    #[test]
    fn unknown_industry_is_preserved_verbatim() {
        let industry = Industry::from("Pharma-Cold");
        assert_eq!(industry, Industry::Other("Pharma-Cold".to_owned()));
        assert!(!industry.is_known());
        assert_eq!(String::from(industry), "Pharma-Cold");
        assert_eq!(Industry::from(" Autoclave "), Industry::Autoclave);
    }

    #[test]
    fn validate_rejects_zero_hold_time() {
        let mut spec: Specification = serde_json::from_str(powder_json()).expect("spec parses");
        spec.spec.hold_time_s = 0.0;
        assert_eq!(spec.validate(), Err(SpecError::ZeroHoldTime));
    }

    #[test]
    fn validate_rejects_non_positive_sample_period() {
        let mut spec: Specification = serde_json::from_str(powder_json()).expect("spec parses");
        spec.data_requirements.max_sample_period_s = 0.0;
        assert_eq!(spec.validate(), Err(SpecError::ZeroSamplePeriod));

        spec.data_requirements.max_sample_period_s = -30.0;
        assert!(matches!(
            spec.validate(),
            Err(SpecError::Negative {
                field: "data_requirements.max_sample_period_s",
                ..
            })
        ));

        spec.data_requirements.max_sample_period_s = 0.5;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_sensor_list() {
        let mut spec: Specification = serde_json::from_str(powder_json()).expect("spec parses");
        if let Some(selection) = spec.sensor_selection.as_mut() {
            selection.sensors = Some(Vec::new());
        }
        assert_eq!(spec.validate(), Err(SpecError::EmptySensorList));
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&DecisionStatus::Indeterminate).expect("serialize");
        assert_eq!(json, "\"INDETERMINATE\"");
        assert!(!DecisionStatus::Indeterminate.is_definitive());
        assert!(DecisionStatus::Fail.is_definitive());
    }

    #[test]
    fn unresolved_result_carries_spec_thresholds() {
        let spec: Specification = serde_json::from_str(powder_json()).expect("spec parses");
        let mut result = DecisionResult::unresolved(
            &spec,
            DecisionStatus::Error,
            "powder",
            vec!["missing temperature".to_owned()],
        );
        result.insert_metric("sample_count", 0_usize);
        assert!(!result.pass);
        assert_eq!(result.conservative_threshold_c, 182.0);
        assert_eq!(result.metrics["sample_count"], MetricValue::Count(0));
    }
}
