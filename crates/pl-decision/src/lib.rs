#![forbid(unsafe_code)]

//! Decision engine: turns a [`NormalizedDataset`] and a [`Specification`]
//! into a [`DecisionResult`].
//!
//! The industry tag picks a validator from a closed [`Registry`]. Unknown tags
//! and unexpected validator failures fall back to the generic algorithm,
//! and the fallback is always visible in `used_fallback` and `warnings`.
//! Recognized domain failures are never absorbed by the fallback.

use std::fmt;

use pl_frame::NormalizedDataset;
use pl_quality::QualityError;
use pl_runtime::PipelineConfig;
use pl_types::{DecisionResult, DecisionStatus, SpecError, Specification};
use thiserror::Error;

pub mod evaluation;
pub mod fusion;
pub mod hold;
pub mod preconditions;
pub mod validators;

pub use evaluation::{EvaluationContext, Evaluated, evaluate_hold, min_points_required};
pub use fusion::{FusedSignal, SelectedSensors, fuse, select_sensors};
pub use hold::{HoldOutcome, Run};
pub use validators::{IndustryValidator, Registry, Resolution, Validator};

/// Validator name recorded on results that never reached a validator.
pub const UNRESOLVED_VALIDATOR: &str = "none";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecisionFailure {
    #[error("required signal missing: {} (available: {})", missing.join(", "), available.join(", "))]
    RequiredSignalMissing {
        missing: Vec<String>,
        available: Vec<String>,
    },
    #[error(transparent)]
    Quality(#[from] QualityError),
    #[error(transparent)]
    Spec(#[from] SpecError),
    #[error("decision failed during {stage}: {detail}")]
    Internal { stage: &'static str, detail: String },
}

impl DecisionFailure {
    pub fn internal(stage: &'static str, detail: impl fmt::Display) -> Self {
        Self::Internal {
            stage,
            detail: detail.to_string(),
        }
    }

    /// Domain failures propagate unchanged; only `Internal` is eligible for
    /// the generic fallback.
    #[must_use]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }

    /// Classify into a terminal result. Missing signals and data-quality
    /// failures are INDETERMINATE for safety-critical industries and ERROR
    /// otherwise; invalid specifications and internal failures are ERROR.
    #[must_use]
    pub fn into_result(self, spec: &Specification, safety_critical: bool) -> DecisionResult {
        let undecided = if safety_critical {
            DecisionStatus::Indeterminate
        } else {
            DecisionStatus::Error
        };
        let (status, reason) = match &self {
            Self::RequiredSignalMissing { missing, available } => (
                undecided,
                format!(
                    "Required signal missing: {} (available: {})",
                    missing.join(", "),
                    if available.is_empty() {
                        "none".to_owned()
                    } else {
                        available.join(", ")
                    }
                ),
            ),
            Self::Quality(err) => (undecided, format!("Data quality check failed: {err}")),
            Self::Spec(err) => (DecisionStatus::Error, format!("Invalid specification: {err}")),
            Self::Internal { stage, detail } => (
                DecisionStatus::Error,
                format!("Decision failed during {stage}: {detail}"),
            ),
        };
        DecisionResult::unresolved(spec, status, UNRESOLVED_VALIDATOR, vec![reason])
    }
}

/// Validator dispatch plus the immutable configuration it runs under.
#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    config: PipelineConfig,
    registry: Registry,
}

impl Engine {
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: Registry::builtin(),
        }
    }

    #[must_use]
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn decide(
        &self,
        dataset: &NormalizedDataset,
        spec: &Specification,
    ) -> Result<DecisionResult, DecisionFailure> {
        spec.validate()?;
        let policy = self.config.policy_for(&spec.industry);
        let ctx = EvaluationContext {
            dataset,
            spec,
            config: &self.config,
            policy: &policy,
        };
        let resolution = self.registry.resolve(&spec.industry);

        let mut result = match resolution.validator.evaluate(&ctx) {
            Ok(result) => result,
            Err(failure) if failure.is_recognized() => return Err(failure),
            Err(failure) if resolution.validator == Validator::Generic => return Err(failure),
            Err(failure) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    job_id = %spec.job_id,
                    validator = resolution.validator.name(),
                    error = %failure,
                    "validator failed unexpectedly, falling back to generic algorithm"
                );
                let mut result = Validator::Generic.evaluate(&ctx)?;
                result.used_fallback = true;
                result.warnings.insert(
                    0,
                    format!(
                        "{} validator failed unexpectedly ({failure}); generic algorithm used",
                        resolution.validator.name()
                    ),
                );
                result
            }
        };

        if resolution.used_fallback {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                job_id = %spec.job_id,
                industry = %spec.industry,
                "no validator registered for industry, using generic algorithm"
            );
            result.used_fallback = true;
            result.warnings.insert(
                0,
                format!(
                    "No specialized validator for industry '{}'; generic algorithm used",
                    spec.industry
                ),
            );
        }

        Ok(result)
    }

    /// Like [`Engine::decide`] but never fails: failures are classified into
    /// an ERROR or INDETERMINATE result carrying the reason.
    #[must_use]
    pub fn evaluate(&self, dataset: &NormalizedDataset, spec: &Specification) -> DecisionResult {
        match self.decide(dataset, spec) {
            Ok(result) => result,
            Err(failure) => {
                let safety_critical = self.config.policy_for(&spec.industry).safety_critical;
                let mut result = failure.into_result(spec, safety_critical);
                result.validator = self.registry.resolve(&spec.industry).validator.name().to_owned();
                result
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

/// One-shot [`Engine::decide`] with the built-in registry.
pub fn decide(
    dataset: &NormalizedDataset,
    spec: &Specification,
    config: &PipelineConfig,
) -> Result<DecisionResult, DecisionFailure> {
    Engine::new(config.clone()).decide(dataset, spec)
}
