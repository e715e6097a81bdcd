#![forbid(unsafe_code)]

//! Tamper-evident sealing of a verdict together with the dataset it was
//! computed from.
//!
//! The canonical encoding is a line-oriented byte sequence with a fixed field
//! order. Floats are written as the hex of their IEEE-754 bits (NaN
//! canonicalized), so the encoding is exact and independent of locale and
//! platform formatting. Any single-bit change in the verdict or the dataset
//! changes the root hash.

use std::collections::BTreeMap;
use std::fmt;

use pl_columnar::Column;
use pl_frame::NormalizedDataset;
use pl_types::{DecisionResult, MetricValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const EVIDENCE_VERSION: &str = "proofline-evidence/1";
const HASH_PREFIX: &str = "sha256:";
const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("unsupported evidence version '{found}' (expected '{EVIDENCE_VERSION}')")]
    UnsupportedVersion { found: String },
    #[error("malformed digest '{value}': expected {HASH_PREFIX} followed by 64 hex digits")]
    MalformedDigest { value: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

fn prefixed_hex(digest: &[u8]) -> String {
    let mut out = String::with_capacity(HASH_PREFIX.len() + digest.len() * 2);
    out.push_str(HASH_PREFIX);
    for byte in digest {
        out.push(char::from(HEX_DIGITS[usize::from(byte >> 4)]));
        out.push(char::from(HEX_DIGITS[usize::from(byte & 0x0f)]));
    }
    out
}

fn hash_bytes(bytes: &[u8]) -> String {
    prefixed_hex(Sha256::digest(bytes).as_slice())
}

fn is_digest(value: &str) -> bool {
    value.strip_prefix(HASH_PREFIX).is_some_and(|hex| {
        hex.len() == 64 && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

fn float_bits(value: f64) -> u64 {
    if value.is_nan() {
        CANONICAL_NAN_BITS
    } else {
        value.to_bits()
    }
}

/// Reference to a rendered artifact (report, plot) by digest, never by
/// content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub sha256: String,
}

impl ArtifactRef {
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            name: name.into(),
            sha256: hash_bytes(bytes),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDigest {
    pub valid: usize,
    pub sha256: String,
}

impl ColumnDigest {
    #[must_use]
    pub fn of(column: &Column) -> Self {
        let mut hasher = Sha256::new();
        for value in column.values() {
            hasher.update(float_bits(*value).to_be_bytes());
        }
        Self {
            valid: column.valid_count(),
            sha256: prefixed_hex(hasher.finalize().as_slice()),
        }
    }
}

/// Deterministic content summary of a [`NormalizedDataset`]: row count, time
/// bounds, and one digest per column plus one for the time index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub rows: usize,
    pub first_ms: Option<i64>,
    pub last_ms: Option<i64>,
    pub timestamps_sha256: String,
    pub columns: BTreeMap<String, ColumnDigest>,
}

impl DatasetSummary {
    #[must_use]
    pub fn of(dataset: &NormalizedDataset) -> Self {
        let millis = dataset.index().millis();
        let mut hasher = Sha256::new();
        for ms in millis {
            hasher.update(ms.to_be_bytes());
        }
        Self {
            rows: dataset.len(),
            first_ms: millis.first().copied(),
            last_ms: millis.last().copied(),
            timestamps_sha256: prefixed_hex(hasher.finalize().as_slice()),
            columns: dataset
                .columns()
                .iter()
                .map(|(name, column)| (name.clone(), ColumnDigest::of(column)))
                .collect(),
        }
    }
}

/// The canonical encoding of one sealed verdict. Strings are JSON-quoted so
/// embedded newlines and tabs cannot forge a field boundary.
struct Canonical<'a> {
    version: &'a str,
    decision: &'a DecisionResult,
    summary: &'a DatasetSummary,
    artifacts: &'a [ArtifactRef],
}

fn line(f: &mut fmt::Formatter<'_>, key: &str, value: impl fmt::Display) -> fmt::Result {
    writeln!(f, "{key}\t{value}")
}

fn text(f: &mut fmt::Formatter<'_>, key: &str, value: &str) -> fmt::Result {
    line(f, key, serde_json::Value::String(value.to_owned()))
}

fn float(f: &mut fmt::Formatter<'_>, key: &str, value: f64) -> fmt::Result {
    line(f, key, format_args!("f64:{:016x}", float_bits(value)))
}

fn opt_float(f: &mut fmt::Formatter<'_>, key: &str, value: Option<f64>) -> fmt::Result {
    match value {
        Some(value) => float(f, key, value),
        None => line(f, key, "none"),
    }
}

fn opt_int(f: &mut fmt::Formatter<'_>, key: &str, value: Option<i64>) -> fmt::Result {
    match value {
        Some(value) => line(f, key, value),
        None => line(f, key, "none"),
    }
}

fn list(f: &mut fmt::Formatter<'_>, key: &str, items: &[String]) -> fmt::Result {
    line(f, key, items.len())?;
    for (pos, item) in items.iter().enumerate() {
        text(f, &format!("{key}.{pos}"), item)?;
    }
    Ok(())
}

impl Canonical<'_> {
    fn decision(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let decision = self.decision;
        text(f, "decision.job_id", &decision.job_id)?;
        text(f, "decision.industry", decision.industry.as_str())?;
        line(f, "decision.status", decision.status.as_str())?;
        line(f, "decision.pass", decision.pass)?;
        text(f, "decision.validator", &decision.validator)?;
        line(f, "decision.used_fallback", decision.used_fallback)?;
        float(f, "decision.target_temp_c", decision.target_temp_c)?;
        float(
            f,
            "decision.conservative_threshold_c",
            decision.conservative_threshold_c,
        )?;
        float(f, "decision.required_hold_time_s", decision.required_hold_time_s)?;
        float(f, "decision.actual_hold_time_s", decision.actual_hold_time_s)?;
        opt_float(f, "decision.min_temp_c", decision.min_temp_c)?;
        opt_float(f, "decision.max_temp_c", decision.max_temp_c)?;
        list(f, "decision.reasons", &decision.reasons)?;
        list(f, "decision.warnings", &decision.warnings)?;
        line(f, "decision.metrics", decision.metrics.len())?;
        for (name, value) in &decision.metrics {
            let key = format!("decision.metrics.{name}");
            match value {
                MetricValue::Flag(flag) => line(f, &key, format_args!("bool:{flag}"))?,
                MetricValue::Count(count) => line(f, &key, format_args!("u64:{count}"))?,
                MetricValue::Number(number) => float(f, &key, *number)?,
                MetricValue::Text(value) => text(f, &key, value)?,
            }
        }
        Ok(())
    }

    fn dataset(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let summary = self.summary;
        line(f, "dataset.rows", summary.rows)?;
        opt_int(f, "dataset.first_ms", summary.first_ms)?;
        opt_int(f, "dataset.last_ms", summary.last_ms)?;
        line(f, "dataset.timestamps", &summary.timestamps_sha256)?;
        line(f, "dataset.columns", summary.columns.len())?;
        for (name, digest) in &summary.columns {
            text(f, "dataset.column", name)?;
            line(f, "dataset.column.valid", digest.valid)?;
            line(f, "dataset.column.sha256", &digest.sha256)?;
        }
        Ok(())
    }

    fn artifacts(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        line(f, "artifacts", self.artifacts.len())?;
        for artifact in self.artifacts {
            text(f, "artifact.name", &artifact.name)?;
            line(f, "artifact.sha256", &artifact.sha256)?;
        }
        Ok(())
    }
}

impl fmt::Display for Canonical<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        text(f, "version", self.version)?;
        self.decision(f)?;
        self.dataset(f)?;
        self.artifacts(f)
    }
}

/// The exact bytes the root hash is computed over.
#[must_use]
pub fn canonical_bytes(
    version: &str,
    decision: &DecisionResult,
    summary: &DatasetSummary,
    artifacts: &[ArtifactRef],
) -> Vec<u8> {
    Canonical {
        version,
        decision,
        summary,
        artifacts,
    }
    .to_string()
    .into_bytes()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub version: String,
    pub job_id: String,
    pub root_hash: String,
    pub decision: DecisionResult,
    pub dataset_summary: DatasetSummary,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
}

impl EvidenceBundle {
    pub fn to_json(&self) -> Result<String, EvidenceError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a stored bundle, rejecting unknown versions and malformed
    /// digests. Integrity is not checked here; see [`verify_bundle`].
    pub fn from_json(input: &str) -> Result<Self, EvidenceError> {
        let bundle: Self = serde_json::from_str(input)?;
        if bundle.version != EVIDENCE_VERSION {
            return Err(EvidenceError::UnsupportedVersion {
                found: bundle.version,
            });
        }
        let digests = std::iter::once(&bundle.root_hash)
            .chain(std::iter::once(&bundle.dataset_summary.timestamps_sha256))
            .chain(bundle.dataset_summary.columns.values().map(|c| &c.sha256))
            .chain(bundle.artifacts.iter().map(|a| &a.sha256));
        for digest in digests {
            if !is_digest(digest) {
                return Err(EvidenceError::MalformedDigest {
                    value: digest.clone(),
                });
            }
        }
        Ok(bundle)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Tampered { stored: String, recomputed: String },
}

impl VerifyOutcome {
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

fn compare(stored: &str, recomputed: String) -> VerifyOutcome {
    if stored == recomputed {
        VerifyOutcome::Verified
    } else {
        VerifyOutcome::Tampered {
            stored: stored.to_owned(),
            recomputed,
        }
    }
}

#[must_use]
pub fn root_hash(
    decision: &DecisionResult,
    summary: &DatasetSummary,
    artifacts: &[ArtifactRef],
) -> String {
    hash_bytes(&canonical_bytes(
        EVIDENCE_VERSION,
        decision,
        summary,
        artifacts,
    ))
}

#[must_use]
pub fn seal(decision: &DecisionResult, dataset: &NormalizedDataset) -> EvidenceBundle {
    seal_with_artifacts(decision, dataset, Vec::new())
}

#[must_use]
pub fn seal_with_artifacts(
    decision: &DecisionResult,
    dataset: &NormalizedDataset,
    artifacts: Vec<ArtifactRef>,
) -> EvidenceBundle {
    let dataset_summary = DatasetSummary::of(dataset);
    EvidenceBundle {
        version: EVIDENCE_VERSION.to_owned(),
        job_id: decision.job_id.clone(),
        root_hash: root_hash(decision, &dataset_summary, &artifacts),
        decision: decision.clone(),
        dataset_summary,
        artifacts,
    }
}

/// Recompute the root hash from the verdict and dataset the caller holds.
/// Nothing stored in the bundle other than `root_hash` and the artifact
/// references is trusted.
#[must_use]
pub fn verify(
    bundle: &EvidenceBundle,
    decision: &DecisionResult,
    dataset: &NormalizedDataset,
) -> VerifyOutcome {
    let summary = DatasetSummary::of(dataset);
    let recomputed = hash_bytes(&canonical_bytes(
        &bundle.version,
        decision,
        &summary,
        &bundle.artifacts,
    ));
    compare(&bundle.root_hash, recomputed)
}

/// Self-consistency of a stored bundle without access to the dataset.
#[must_use]
pub fn verify_bundle(bundle: &EvidenceBundle) -> VerifyOutcome {
    let recomputed = hash_bytes(&canonical_bytes(
        &bundle.version,
        &bundle.decision,
        &bundle.dataset_summary,
        &bundle.artifacts,
    ));
    compare(&bundle.root_hash, recomputed)
}
