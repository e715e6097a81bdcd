#![forbid(unsafe_code)]

//! Sensor-log verdicts with tamper-evident evidence.
//!
//! The pipeline runs strictly forward: raw bytes are loaded
//! ([`load`]), normalized onto a validated UTC time index ([`normalize`]),
//! judged against a [`Specification`] ([`Engine::decide`]) and sealed
//! ([`seal`]). Every stage is a pure function of its inputs plus one
//! [`PipelineConfig`] value, so independent jobs can run in parallel without
//! coordination.
//!
//! [`run_job`] chains the stages and turns every terminal failure into a
//! classified [`DecisionResult`] carrying its reasons.

pub use pl_columnar::Column;
pub use pl_decision::{
    DecisionFailure, Engine, IndustryValidator, Registry, Resolution, Validator, decide,
};
pub use pl_evidence::{
    ArtifactRef, DatasetSummary, EVIDENCE_VERSION, EvidenceBundle, EvidenceError, VerifyOutcome,
    seal, seal_with_artifacts, verify, verify_bundle,
};
pub use pl_frame::{NormalizedDataset, TimeIndex};
pub use pl_io::{LoadError, LoadOptions, Metadata, RawRecord, load, load_str};
pub use pl_quality::{NormalizeOptions, QualityError, QualityReport, normalize};
pub use pl_runtime::{
    ConfigError, DecisionAction, DuplicatePolicy, IndustryPolicy, ParseWarning, PipelineConfig,
    RuntimeMode, Severity, WarningLedger,
};
pub use pl_types::{
    DataRequirements, DecisionResult, DecisionStatus, HoldLogic, Industry, MetricValue,
    Preconditions, ProcessSpec, SelectionMode, SensorSelection, SpecError, Specification,
};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Decision(#[from] DecisionFailure),
}

impl From<QualityError> for PipelineError {
    fn from(value: QualityError) -> Self {
        Self::Decision(DecisionFailure::Quality(value))
    }
}

impl PipelineError {
    /// Terminal result for a failed job. Unreadable input and invalid
    /// configuration are always ERROR; decision failures follow the
    /// industry's safety classification.
    #[must_use]
    pub fn into_result(self, spec: &Specification, config: &PipelineConfig) -> DecisionResult {
        match self {
            Self::Config(err) => DecisionResult::unresolved(
                spec,
                DecisionStatus::Error,
                pl_decision::UNRESOLVED_VALIDATOR,
                vec![format!("Invalid pipeline configuration: {err}")],
            ),
            Self::Load(err) => DecisionResult::unresolved(
                spec,
                DecisionStatus::Error,
                pl_decision::UNRESOLVED_VALIDATOR,
                vec![format!("Input could not be loaded: {err}")],
            ),
            Self::Decision(failure) => {
                let safety_critical = config.policy_for(&spec.industry).safety_critical;
                failure.into_result(spec, safety_critical)
            }
        }
    }
}

/// Everything one job produced. Stages that did not run leave their slot
/// empty; `decision` is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub decision: DecisionResult,
    pub metadata: Option<Metadata>,
    pub quality: Option<QualityReport>,
    pub dataset: Option<NormalizedDataset>,
    /// Present whenever a dataset was produced, binding the verdict to it.
    pub bundle: Option<EvidenceBundle>,
}

#[derive(Default)]
struct Stages {
    metadata: Option<Metadata>,
    quality: Option<QualityReport>,
    dataset: Option<NormalizedDataset>,
}

fn anomaly_ledger(stages: &Stages) -> WarningLedger {
    let mut ledger = WarningLedger::new();
    if let Some(metadata) = &stages.metadata {
        ledger.extend(metadata.warnings.clone());
    }
    if let Some(quality) = &stages.quality {
        ledger.extend(quality.warnings.clone());
    }
    ledger
}

fn escalated(spec: &Specification, validator: &str, ledger: &WarningLedger) -> DecisionResult {
    let mut reasons = vec![
        "Strict mode: input anomalies prevent a determination".to_owned(),
    ];
    reasons.extend(
        ledger
            .at_least(Severity::Warning)
            .into_iter()
            .map(ToString::to_string),
    );
    DecisionResult::unresolved(spec, DecisionStatus::Indeterminate, validator, reasons)
}

fn run_stages(
    bytes: &[u8],
    spec: &Specification,
    engine: &Engine,
    options: &LoadOptions,
    stages: &mut Stages,
) -> Result<DecisionResult, PipelineError> {
    let config = engine.config();
    config.validate()?;
    spec.validate().map_err(DecisionFailure::from)?;

    let (record, metadata) = load(bytes, options)?;
    #[cfg(feature = "tracing")]
    tracing::debug!(
        job_id = %spec.job_id,
        rows = record.len(),
        encoding = %metadata.encoding,
        delimiter = %metadata.delimiter,
        "input loaded"
    );
    let normalize_options = NormalizeOptions::for_spec(spec, config).with_metadata(&metadata);
    stages.metadata = Some(metadata);

    let (dataset, report) = normalize(&record, &normalize_options)?;
    stages.quality = Some(report);
    stages.dataset = Some(dataset);

    let ledger = anomaly_ledger(stages);
    let Some(dataset) = stages.dataset.as_ref() else {
        return Err(DecisionFailure::internal("pipeline", "normalized dataset missing").into());
    };
    let validator = engine.registry().resolve(&spec.industry).validator;

    if config.decide_parser_anomalies(&ledger) == DecisionAction::Escalate {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            job_id = %spec.job_id,
            anomalies = ledger.at_least(Severity::Warning).len(),
            "strict mode escalated input anomalies"
        );
        return Ok(escalated(spec, validator.name(), &ledger));
    }

    let mut decision = engine.decide(dataset, spec)?;
    decision.warnings.extend(
        ledger
            .at_least(Severity::Warning)
            .into_iter()
            .map(ToString::to_string),
    );
    Ok(decision)
}

/// Load, normalize, decide and seal one job.
///
/// Never fails: unreadable input, quality violations and decision failures
/// become ERROR or INDETERMINATE results with reasons.
#[must_use]
pub fn run_job(
    bytes: &[u8],
    spec: &Specification,
    config: &PipelineConfig,
    options: &LoadOptions,
) -> JobOutcome {
    run_job_with(&Engine::new(config.clone()), bytes, spec, options)
}

/// [`run_job`] with a caller-supplied engine, e.g. one with extra registry
/// aliases.
#[must_use]
pub fn run_job_with(
    engine: &Engine,
    bytes: &[u8],
    spec: &Specification,
    options: &LoadOptions,
) -> JobOutcome {
    let mut stages = Stages::default();
    let decision = match run_stages(bytes, spec, engine, options, &mut stages) {
        Ok(decision) => decision,
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(job_id = %spec.job_id, error = %err, "job ended without a verdict");
            let reached_decision = matches!(err, PipelineError::Decision(_));
            let mut decision = err.into_result(spec, engine.config());
            if reached_decision {
                decision.validator = engine
                    .registry()
                    .resolve(&spec.industry)
                    .validator
                    .name()
                    .to_owned();
            }
            decision
        }
    };

    let bundle = stages
        .dataset
        .as_ref()
        .map(|dataset| seal(&decision, dataset));
    #[cfg(feature = "tracing")]
    tracing::info!(
        job_id = %spec.job_id,
        status = %decision.status,
        validator = %decision.validator,
        used_fallback = decision.used_fallback,
        sealed = bundle.is_some(),
        "job decided"
    );

    JobOutcome {
        decision,
        metadata: stages.metadata,
        quality: stages.quality,
        dataset: stages.dataset,
        bundle,
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DecisionStatus, LoadOptions, PipelineConfig, PipelineError, QualityError, Specification,
        run_job,
    };

    fn spec(industry: &str) -> Specification {
        serde_json::from_str(&format!(
            r#"{{
                "industry": "{industry}",
                "job_id": "unit-1",
                "spec": {{"target_temp_C": 180.0, "hold_time_s": 60, "sensor_uncertainty_C": 2.0}},
                "data_requirements": {{"max_sample_period_s": 30.0, "allowed_gaps_s": 60.0}}
            }}"#
        ))
        .expect("spec parses")
    }

    #[test]
    fn empty_input_is_an_error_without_evidence() {
        let outcome = run_job(
            b"",
            &spec("powder"),
            &PipelineConfig::default(),
            &LoadOptions::default(),
        );
        assert_eq!(outcome.decision.status, DecisionStatus::Error);
        assert_eq!(outcome.decision.reasons, vec!["Input could not be loaded: input is empty"]);
        assert!(outcome.bundle.is_none());
        assert!(outcome.metadata.is_none());
    }

    #[test]
    fn quality_errors_follow_industry_classification() {
        let err = PipelineError::from(QualityError::NoValidRows);
        let config = PipelineConfig::default();
        assert_eq!(
            err.into_result(&spec("sterile"), &config).status,
            DecisionStatus::Indeterminate
        );
        let err = PipelineError::from(QualityError::NoValidRows);
        assert_eq!(
            err.into_result(&spec("powder"), &config).status,
            DecisionStatus::Error
        );
    }

    #[test]
    fn invalid_configuration_is_reported() {
        let config = PipelineConfig {
            resample_step_s: 0.0,
            ..PipelineConfig::default()
        };
        let outcome = run_job(
            b"time,temp\n0,1\n",
            &spec("powder"),
            &config,
            &LoadOptions::default(),
        );
        assert_eq!(outcome.decision.status, DecisionStatus::Error);
        assert!(outcome.decision.reasons[0].starts_with("Invalid pipeline configuration"));
    }
}
