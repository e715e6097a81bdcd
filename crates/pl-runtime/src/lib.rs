#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use pl_types::Industry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    /// Parser anomalies escalate the job to INDETERMINATE.
    Strict,
    /// Parser anomalies are recorded and the job proceeds.
    Lenient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    EncodingFallback,
    DelimiterFallback,
    DecimalComma,
    HeaderCollision,
    TimestampColumnInferred,
    RaggedRows,
    RowsDropped,
    NonMonotonicOrder,
    DuplicateRemoved,
    GapDetected,
    UnitConverted,
    Resampled,
}

impl IssueKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EncodingFallback => "encoding_fallback",
            Self::DelimiterFallback => "delimiter_fallback",
            Self::DecimalComma => "decimal_comma",
            Self::HeaderCollision => "header_collision",
            Self::TimestampColumnInferred => "timestamp_column_inferred",
            Self::RaggedRows => "ragged_rows",
            Self::RowsDropped => "rows_dropped",
            Self::NonMonotonicOrder => "non_monotonic_order",
            Self::DuplicateRemoved => "duplicate_removed",
            Self::GapDetected => "gap_detected",
            Self::UnitConverted => "unit_converted",
            Self::Resampled => "resampled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub severity: Severity,
    pub kind: IssueKind,
    pub subject: String,
    pub detail: String,
}

impl ParseWarning {
    #[must_use]
    pub fn new(
        severity: Severity,
        kind: IssueKind,
        subject: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            kind,
            subject: subject.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity.as_str(),
            self.kind.as_str(),
            self.subject,
            self.detail
        )
    }
}

/// Ordered record of every recoverable anomaly seen while loading and
/// normalizing one input.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningLedger {
    records: Vec<ParseWarning>,
}

impl WarningLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: ParseWarning) {
        self.records.push(record);
    }

    pub fn extend(&mut self, other: Self) {
        self.records.extend(other.records);
    }

    #[must_use]
    pub fn records(&self) -> &[ParseWarning] {
        &self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.records.iter().map(|record| record.severity).max()
    }

    #[must_use]
    pub fn contains(&self, kind: IssueKind) -> bool {
        self.records.iter().any(|record| record.kind == kind)
    }

    #[must_use]
    pub fn at_least(&self, severity: Severity) -> Vec<&ParseWarning> {
        self.records
            .iter()
            .filter(|record| record.severity >= severity)
            .collect()
    }

    #[must_use]
    pub fn render(&self) -> Vec<String> {
        self.records.iter().map(ToString::to_string).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Any pair of samples within the duplicate tolerance is a quality error.
    Reject,
    /// Keep the first sample of each duplicate cluster and warn.
    DedupeKeepFirst,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustryPolicy {
    pub duplicate_policy: DuplicatePolicy,
    #[serde(default)]
    pub safety_critical: bool,
    /// Lower bound applied to the job's `allowed_gaps_s`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_allowed_gap_s: Option<f64>,
}

impl IndustryPolicy {
    #[must_use]
    pub fn builtin(industry: &Industry) -> Self {
        match industry {
            Industry::Powder => Self {
                duplicate_policy: DuplicatePolicy::Reject,
                safety_critical: false,
                min_allowed_gap_s: None,
            },
            Industry::Autoclave | Industry::Sterile => Self {
                duplicate_policy: DuplicatePolicy::DedupeKeepFirst,
                safety_critical: true,
                min_allowed_gap_s: None,
            },
            Industry::Concrete => Self {
                duplicate_policy: DuplicatePolicy::DedupeKeepFirst,
                safety_critical: false,
                min_allowed_gap_s: Some(3_600.0),
            },
            Industry::Other(_) => Self {
                duplicate_policy: DuplicatePolicy::DedupeKeepFirst,
                safety_critical: false,
                min_allowed_gap_s: None,
            },
        }
    }

    /// Gap tolerance after applying the industry relaxation.
    #[must_use]
    pub fn effective_allowed_gap_s(&self, requested: f64) -> f64 {
        self.min_allowed_gap_s
            .map_or(requested, |floor| requested.max(floor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Escalate,
}

fn default_mode() -> RuntimeMode {
    RuntimeMode::Lenient
}

fn default_hysteresis_c() -> f64 {
    2.0
}

fn default_resample_step_s() -> f64 {
    30.0
}

fn default_duplicate_tolerance_s() -> f64 {
    0.1
}

fn default_min_points_margin() -> usize {
    3
}

/// One immutable configuration value threaded through every pipeline call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_mode")]
    pub mode: RuntimeMode,
    #[serde(default = "default_hysteresis_c")]
    pub hysteresis_c: f64,
    #[serde(default = "default_resample_step_s")]
    pub resample_step_s: f64,
    #[serde(default = "default_duplicate_tolerance_s")]
    pub duplicate_tolerance_s: f64,
    #[serde(default = "default_min_points_margin")]
    pub min_points_margin: usize,
    /// Overrides of the built-in industry table, keyed by lower-case tag.
    #[serde(default)]
    pub industries: BTreeMap<String, IndustryPolicy>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::lenient()
    }
}

impl PipelineConfig {
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            mode: RuntimeMode::Lenient,
            hysteresis_c: default_hysteresis_c(),
            resample_step_s: default_resample_step_s(),
            duplicate_tolerance_s: default_duplicate_tolerance_s(),
            min_points_margin: default_min_points_margin(),
            industries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            ..Self::lenient()
        }
    }

    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("hysteresis_c", self.hysteresis_c, true)?;
        positive("resample_step_s", self.resample_step_s, false)?;
        positive("duplicate_tolerance_s", self.duplicate_tolerance_s, true)?;
        for (tag, policy) in &self.industries {
            if let Some(gap) = policy.min_allowed_gap_s
                && (!gap.is_finite() || gap < 0.0)
            {
                return Err(ConfigError::Invalid {
                    field: format!("industries.{tag}.min_allowed_gap_s"),
                    reason: "must be a finite non-negative number".to_owned(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn policy_for(&self, industry: &Industry) -> IndustryPolicy {
        self.industries
            .get(&industry.as_str().to_ascii_lowercase())
            .cloned()
            .unwrap_or_else(|| IndustryPolicy::builtin(industry))
    }

    /// Strict mode escalates any anomaly of severity `warning` or above.
    #[must_use]
    pub fn decide_parser_anomalies(&self, ledger: &WarningLedger) -> DecisionAction {
        match self.mode {
            RuntimeMode::Strict if !ledger.at_least(Severity::Warning).is_empty() => {
                DecisionAction::Escalate
            }
            _ => DecisionAction::Allow,
        }
    }
}

fn positive(field: &str, value: f64, allow_zero: bool) -> Result<(), ConfigError> {
    let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field: field.to_owned(),
            reason: format!("must be a finite positive number (got {value})"),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid configuration value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use pl_types::Industry;

    use super::{
        ConfigError, DecisionAction, DuplicatePolicy, IssueKind, ParseWarning, PipelineConfig,
        RuntimeMode, Severity, WarningLedger,
    };

    fn encoding_warning() -> ParseWarning {
        ParseWarning::new(
            Severity::Warning,
            IssueKind::EncodingFallback,
            "input",
            "decoded as latin-1",
        )
    }

    #[test]
    fn strict_mode_escalates_warnings() {
        let mut ledger = WarningLedger::new();
        ledger.push(encoding_warning());

        assert_eq!(
            PipelineConfig::strict().decide_parser_anomalies(&ledger),
            DecisionAction::Escalate
        );
        assert_eq!(
            PipelineConfig::lenient().decide_parser_anomalies(&ledger),
            DecisionAction::Allow
        );
    }

    #[test]
    fn strict_mode_ignores_informational_records() {
        let mut ledger = WarningLedger::new();
        ledger.push(ParseWarning::new(
            Severity::Info,
            IssueKind::UnitConverted,
            "temperature",
            "converted from fahrenheit",
        ));
        assert_eq!(
            PipelineConfig::strict().decide_parser_anomalies(&ledger),
            DecisionAction::Allow
        );
    }

    #[test]
    fn builtin_policies_mark_safety_critical_industries() {
        let config = PipelineConfig::default();
        assert!(config.policy_for(&Industry::Autoclave).safety_critical);
        assert!(!config.policy_for(&Industry::Powder).safety_critical);
        assert_eq!(
            config.policy_for(&Industry::Powder).duplicate_policy,
            DuplicatePolicy::Reject
        );
        let concrete = config.policy_for(&Industry::Concrete);
        assert_eq!(concrete.effective_allowed_gap_s(120.0), 3_600.0);
    }

    #[test]
    fn json_config_overrides_industry_table() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "mode": "strict",
                "hysteresis_c": 1.5,
                "industries": {
                    "powder": {"duplicate_policy": "dedupe_keep_first"}
                }
            }"#,
        )
        .expect("config parses");
        assert_eq!(config.mode, RuntimeMode::Strict);
        assert_eq!(config.resample_step_s, 30.0);
        assert_eq!(
            config.policy_for(&Industry::Powder).duplicate_policy,
            DuplicatePolicy::DedupeKeepFirst
        );
    }

    #[test]
    fn yaml_config_is_validated() {
        let err = PipelineConfig::from_yaml_str("resample_step_s: 0\n").expect_err("must fail");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn issue_labels_match_their_serialized_names() {
        let kinds = [
            IssueKind::EncodingFallback,
            IssueKind::DelimiterFallback,
            IssueKind::DecimalComma,
            IssueKind::HeaderCollision,
            IssueKind::TimestampColumnInferred,
            IssueKind::RaggedRows,
            IssueKind::RowsDropped,
            IssueKind::NonMonotonicOrder,
            IssueKind::DuplicateRemoved,
            IssueKind::GapDetected,
            IssueKind::UnitConverted,
            IssueKind::Resampled,
        ];
        for kind in kinds {
            let wire = serde_json::to_string(&kind).expect("serialize");
            assert_eq!(wire, format!("\"{}\"", kind.as_str()));
        }
        assert!(serde_json::from_str::<IssueKind>("\"validator_fallback\"").is_err());
    }

    #[test]
    fn ledger_renders_severity_tagged_lines() {
        let mut ledger = WarningLedger::new();
        ledger.push(encoding_warning());
        assert_eq!(ledger.max_severity(), Some(Severity::Warning));
        assert!(ledger.contains(IssueKind::EncodingFallback));
        assert_eq!(
            ledger.render(),
            vec!["[warning] encoding_fallback (input): decoded as latin-1".to_owned()]
        );
    }
}
