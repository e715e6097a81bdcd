#![forbid(unsafe_code)]

//! Scenario conformance harness.
//!
//! A fixture bundles a raw log (as lines), a job specification, the runtime
//! mode and the expected verdict. The harness runs each fixture through
//! [`proofline::run_job`], compares the outcome with the expectation and
//! re-verifies any evidence bundle that was produced.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use proofline::{
    ArtifactRef, DecisionResult, DecisionStatus, JobOutcome, LoadOptions, PipelineConfig,
    RuntimeMode, Specification, run_job, verify,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const HOLD_TOLERANCE_S: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub repo_root: PathBuf,
    pub fixture_root: PathBuf,
    /// Also require every fixture to reproduce the same verdict and root
    /// hash on a second run.
    pub strict_mode: bool,
}

impl HarnessConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            repo_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../.."),
            fixture_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures"),
            strict_mode: true,
        }
    }

    #[must_use]
    pub fn with_fixture_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.fixture_root = root.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub suite: &'static str,
    pub fixture_count: usize,
    pub strict_mode: bool,
}

#[must_use]
pub fn run_smoke(config: &HarnessConfig) -> HarnessReport {
    let fixture_count = list_fixture_files(&config.fixture_root)
        .map(|files| files.len())
        .unwrap_or(0);

    HarnessReport {
        suite: "smoke",
        fixture_count,
        strict_mode: config.strict_mode,
    }
}

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error("fixture format error: {0}")]
    FixtureFormat(String),
}

fn default_mode() -> RuntimeMode {
    RuntimeMode::Lenient
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureLoad {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedOutcome {
    pub status: DecisionStatus,
    /// Each entry must be a substring of some reason.
    #[serde(default)]
    pub reasons_contain: Vec<String>,
    #[serde(default)]
    pub warnings_contain: Vec<String>,
    #[serde(default)]
    pub actual_hold_time_s: Option<f64>,
    #[serde(default)]
    pub used_fallback: Option<bool>,
    #[serde(default)]
    pub validator: Option<String>,
    /// Whether an evidence bundle must (or must not) be produced.
    #[serde(default)]
    pub sealed: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFixture {
    pub case_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_mode")]
    pub mode: RuntimeMode,
    #[serde(default)]
    pub load: FixtureLoad,
    pub csv_lines: Vec<String>,
    pub spec: Specification,
    pub expected: ExpectedOutcome,
}

impl ScenarioFixture {
    #[must_use]
    pub fn input_bytes(&self) -> Vec<u8> {
        let mut body = self.csv_lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        body.into_bytes()
    }

    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        match self.mode {
            RuntimeMode::Strict => PipelineConfig::strict(),
            RuntimeMode::Lenient => PipelineConfig::lenient(),
        }
    }

    pub fn load_options(&self) -> Result<LoadOptions, HarnessError> {
        let delimiter = match self.load.delimiter {
            Some(delimiter) => Some(u8::try_from(delimiter).map_err(|_| {
                HarnessError::FixtureFormat(format!(
                    "{}: delimiter {delimiter:?} is not a single byte",
                    self.case_id
                ))
            })?),
            None => None,
        };
        Ok(LoadOptions {
            encoding_hint: self.load.encoding_hint.clone(),
            delimiter,
            ..LoadOptions::default()
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub mode: RuntimeMode,
    pub status: CaseStatus,
    pub verdict: DecisionStatus,
    pub mismatches: Vec<String>,
    pub root_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub suite: String,
    pub fixture_count: usize,
    pub passed: usize,
    pub failed: usize,
    pub results: Vec<CaseResult>,
}

impl SuiteReport {
    #[must_use]
    pub fn is_green(&self) -> bool {
        self.failed == 0 && self.fixture_count > 0
    }

    /// One line per failing case, for assertion messages and CLI output.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|result| result.status == CaseStatus::Fail)
            .map(|result| format!("{}: {}", result.case_id, result.mismatches.join("; ")))
            .collect()
    }
}

fn compare_decision(decision: &DecisionResult, expected: &ExpectedOutcome) -> Vec<String> {
    let mut mismatches = Vec::new();
    if decision.status != expected.status {
        mismatches.push(format!(
            "status: expected {}, got {} ({})",
            expected.status,
            decision.status,
            decision.reasons.join(" | ")
        ));
    }
    for needle in &expected.reasons_contain {
        if !decision.reasons.iter().any(|reason| reason.contains(needle)) {
            mismatches.push(format!("no reason contains {needle:?}"));
        }
    }
    for needle in &expected.warnings_contain {
        if !decision.warnings.iter().any(|warning| warning.contains(needle)) {
            mismatches.push(format!("no warning contains {needle:?}"));
        }
    }
    if let Some(hold) = expected.actual_hold_time_s
        && (decision.actual_hold_time_s - hold).abs() > HOLD_TOLERANCE_S
    {
        mismatches.push(format!(
            "actual_hold_time_s: expected {hold}, got {}",
            decision.actual_hold_time_s
        ));
    }
    if let Some(fallback) = expected.used_fallback
        && decision.used_fallback != fallback
    {
        mismatches.push(format!(
            "used_fallback: expected {fallback}, got {}",
            decision.used_fallback
        ));
    }
    if let Some(validator) = &expected.validator
        && &decision.validator != validator
    {
        mismatches.push(format!(
            "validator: expected {validator}, got {}",
            decision.validator
        ));
    }
    mismatches
}

fn check_evidence(outcome: &JobOutcome, expected: &ExpectedOutcome) -> Vec<String> {
    let mut mismatches = Vec::new();
    if let Some(sealed) = expected.sealed
        && outcome.bundle.is_some() != sealed
    {
        mismatches.push(format!(
            "sealed: expected {sealed}, got {}",
            outcome.bundle.is_some()
        ));
    }
    if let (Some(bundle), Some(dataset)) = (&outcome.bundle, &outcome.dataset)
        && !verify(bundle, &outcome.decision, dataset).is_verified()
    {
        mismatches.push("evidence bundle does not verify against its inputs".to_owned());
    }
    mismatches
}

pub fn run_fixture(
    config: &HarnessConfig,
    fixture: &ScenarioFixture,
) -> Result<CaseResult, HarnessError> {
    let bytes = fixture.input_bytes();
    let pipeline = fixture.pipeline_config();
    let options = fixture.load_options()?;
    let outcome = run_job(&bytes, &fixture.spec, &pipeline, &options);

    let mut mismatches = compare_decision(&outcome.decision, &fixture.expected);
    mismatches.extend(check_evidence(&outcome, &fixture.expected));

    if config.strict_mode {
        let rerun = run_job(&bytes, &fixture.spec, &pipeline, &options);
        if rerun.decision != outcome.decision {
            mismatches.push("verdict differs between identical runs".to_owned());
        }
        let hash = |o: &JobOutcome| o.bundle.as_ref().map(|b| b.root_hash.clone());
        if hash(&rerun) != hash(&outcome) {
            mismatches.push("root hash differs between identical runs".to_owned());
        }
    }

    Ok(CaseResult {
        case_id: fixture.case_id.clone(),
        mode: fixture.mode,
        status: if mismatches.is_empty() {
            CaseStatus::Pass
        } else {
            CaseStatus::Fail
        },
        verdict: outcome.decision.status,
        mismatches,
        root_hash: outcome.bundle.map(|bundle| bundle.root_hash),
    })
}

pub fn run_fixture_suite(config: &HarnessConfig) -> Result<SuiteReport, HarnessError> {
    let fixtures = load_fixtures(&config.fixture_root)?;
    let mut results = Vec::with_capacity(fixtures.len());
    for fixture in &fixtures {
        results.push(run_fixture(config, fixture)?);
    }

    let failed = results
        .iter()
        .filter(|result| result.status == CaseStatus::Fail)
        .count();
    let passed = results.len().saturating_sub(failed);

    Ok(SuiteReport {
        suite: "scenarios".to_owned(),
        fixture_count: results.len(),
        passed,
        failed,
        results,
    })
}

/// Write the report as YAML and return a digest reference to it, suitable
/// for binding into an evidence bundle.
pub fn write_report(path: &Path, report: &SuiteReport) -> Result<ArtifactRef, HarnessError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_yaml::to_string(report)?;
    fs::write(path, &body)?;
    let name = path
        .file_name()
        .map_or_else(|| "report.yaml".to_owned(), |n| n.to_string_lossy().into_owned());
    Ok(ArtifactRef::from_bytes(name, body.as_bytes()))
}

pub fn load_fixtures(root: &Path) -> Result<Vec<ScenarioFixture>, HarnessError> {
    let mut fixtures = Vec::new();
    let mut seen = BTreeSet::new();
    for path in list_fixture_files(root)? {
        let fixture = load_fixture(&path)?;
        if !seen.insert(fixture.case_id.clone()) {
            return Err(HarnessError::FixtureFormat(format!(
                "duplicate case_id {} in {}",
                fixture.case_id,
                path.display()
            )));
        }
        fixtures.push(fixture);
    }
    fixtures.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    Ok(fixtures)
}

pub fn load_fixture(path: &Path) -> Result<ScenarioFixture, HarnessError> {
    let body = fs::read_to_string(path)?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => Ok(serde_yaml::from_str(&body)?),
        _ => Ok(serde_json::from_str(&body)?),
    }
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .is_some_and(|ext| ext == "json" || ext == "yaml" || ext == "yml")
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use proofline::{DecisionStatus, RuntimeMode};

    use super::{CaseStatus, HarnessConfig, ScenarioFixture, run_fixture};

    fn fixture(expected_status: &str) -> ScenarioFixture {
        serde_json::from_str(&format!(
            r#"{{
                "case_id": "inline",
                "csv_lines": [
                    "time,temp",
                    "2024-03-01T08:00:00Z,190",
                    "2024-03-01T08:00:30Z,190",
                    "2024-03-01T08:01:00Z,190",
                    "2024-03-01T08:01:30Z,190",
                    "2024-03-01T08:02:00Z,190"
                ],
                "spec": {{
                    "industry": "powder",
                    "job_id": "inline",
                    "spec": {{"target_temp_C": 180.0, "hold_time_s": 60, "sensor_uncertainty_C": 2.0}},
                    "data_requirements": {{"max_sample_period_s": 30.0, "allowed_gaps_s": 60.0}}
                }},
                "expected": {{"status": "{expected_status}", "actual_hold_time_s": 120.0, "sealed": true}}
            }}"#
        ))
        .expect("fixture parses")
    }

    #[test]
    fn matching_expectation_passes() {
        let fixture = fixture("PASS");
        assert_eq!(fixture.mode, RuntimeMode::Lenient);
        let result = run_fixture(&HarnessConfig::default_paths(), &fixture).expect("runs");
        assert_eq!(result.status, CaseStatus::Pass, "{:?}", result.mismatches);
        assert_eq!(result.verdict, DecisionStatus::Pass);
        assert!(result.root_hash.is_some());
    }

    #[test]
    fn wrong_expectation_is_reported() {
        let result =
            run_fixture(&HarnessConfig::default_paths(), &fixture("FAIL")).expect("runs");
        assert_eq!(result.status, CaseStatus::Fail);
        assert_eq!(result.mismatches.len(), 1);
        assert!(result.mismatches[0].starts_with("status: expected FAIL, got PASS"));
    }
}
