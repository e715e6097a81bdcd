#![forbid(unsafe_code)]

//! Normalization of a loaded [`RawRecord`] into a [`NormalizedDataset`].
//!
//! Order of operations matters: timestamps are parsed and sorted, then
//! duplicates, sample period and gaps are validated on the acquired series,
//! and only then is the series resampled. Validation never sees
//! interpolated rows.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat};
use chrono_tz::Tz;
use pl_columnar::Column;
use pl_frame::{FrameError, NormalizedDataset, ResampleSummary, TimeIndex, argsort};
use pl_io::{Metadata, RawRecord, TIMESTAMP, TemperatureUnit, TimestampHint};
use pl_runtime::{DuplicatePolicy, IssueKind, ParseWarning, PipelineConfig, Severity, WarningLedger};
use pl_types::Specification;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod timestamps;
pub mod units;

pub use timestamps::{ParsedTimestamps, StrategyFailure, TimestampStrategy, parse_column};
pub use units::{ConversionReason, UnitConversion, detect_fahrenheit};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QualityError {
    #[error("no timestamp column found (available columns: {})", available.join(", "))]
    MissingTimestampColumn { available: Vec<String> },
    #[error("unknown source timezone {name:?}")]
    UnknownTimezone { name: String },
    #[error("could not parse timestamps with any strategy (tried {}); rejected value {example:?}", attempted.join(", "))]
    UnparseableTimestamps {
        attempted: Vec<String>,
        example: String,
    },
    #[error("no rows with a usable timestamp")]
    NoValidRows,
    #[error("{count} duplicate timestamps within {tolerance_s}s (first at {first_at})")]
    DuplicateTimestamps {
        count: usize,
        first_at: String,
        tolerance_s: f64,
    },
    #[error("median sample period {median_s:.1}s exceeds max_sample_period_s {limit_s:.1}s")]
    SamplePeriodExceeded { median_s: f64, limit_s: f64 },
    #[error("data gap of {gap_s:.1}s at {at} exceeds allowed_gaps_s {limit_s:.1}s")]
    GapExceeded { gap_s: f64, limit_s: f64, at: String },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeOptions {
    pub duplicate_policy: DuplicatePolicy,
    pub duplicate_tolerance_s: f64,
    pub max_sample_period_s: Option<f64>,
    pub allowed_gaps_s: Option<f64>,
    /// `None` leaves the acquired cadence untouched.
    pub resample_step_s: Option<f64>,
    /// IANA name applied to naive timestamps; UTC when absent.
    pub source_timezone: Option<String>,
    pub timestamp_hint: TimestampHint,
    /// Units declared by source headers, keyed by canonical column name.
    pub declared_units: BTreeMap<String, TemperatureUnit>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            duplicate_policy: DuplicatePolicy::DedupeKeepFirst,
            duplicate_tolerance_s: 0.1,
            max_sample_period_s: None,
            allowed_gaps_s: None,
            resample_step_s: None,
            source_timezone: None,
            timestamp_hint: TimestampHint::Text,
            declared_units: BTreeMap::new(),
        }
    }
}

impl NormalizeOptions {
    /// Limits from the job's data requirements, relaxed by the industry
    /// policy, plus the configured cadence and duplicate tolerance.
    #[must_use]
    pub fn for_spec(spec: &Specification, config: &PipelineConfig) -> Self {
        let policy = config.policy_for(&spec.industry);
        Self {
            duplicate_policy: policy.duplicate_policy,
            duplicate_tolerance_s: config.duplicate_tolerance_s,
            max_sample_period_s: Some(spec.data_requirements.max_sample_period_s),
            allowed_gaps_s: Some(
                policy.effective_allowed_gap_s(spec.data_requirements.allowed_gaps_s),
            ),
            resample_step_s: Some(config.resample_step_s),
            ..Self::default()
        }
    }

    /// Adopt what the loader learned: timestamp hint, declared units and a
    /// `# timezone:` comment unless a zone was already set explicitly.
    #[must_use]
    pub fn with_metadata(mut self, metadata: &Metadata) -> Self {
        self.timestamp_hint = metadata.timestamp_hint;
        for column in &metadata.column_mapping.columns {
            if let Some(unit) = column.unit {
                self.declared_units.insert(column.canonical.clone(), unit);
            }
        }
        if self.source_timezone.is_none() {
            self.source_timezone = metadata
                .comment("timezone")
                .or_else(|| metadata.comment("tz"))
                .map(ToOwned::to_owned);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GapRecord {
    /// Epoch milliseconds of the sample that ends the gap.
    pub at_ms: i64,
    pub gap_s: f64,
}

/// What normalization did to the input, for traceability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub timestamp_strategy: TimestampStrategy,
    pub rows_in: usize,
    pub rows_validated: usize,
    pub rows_without_timestamp: usize,
    pub duplicates_removed: usize,
    pub reordered: bool,
    pub median_period_s: Option<f64>,
    pub max_gap_s: Option<f64>,
    pub gaps: Vec<GapRecord>,
    pub conversions: Vec<UnitConversion>,
    pub dropped_columns: Vec<String>,
    pub resample: Option<ResampleSummary>,
    pub warnings: WarningLedger,
}

pub fn normalize(
    record: &RawRecord,
    options: &NormalizeOptions,
) -> Result<(NormalizedDataset, QualityReport), QualityError> {
    let mut warnings = WarningLedger::new();

    let ts_idx = record
        .column_index(TIMESTAMP)
        .ok_or_else(|| QualityError::MissingTimestampColumn {
            available: record.headers().to_vec(),
        })?;
    let zone = options
        .source_timezone
        .as_deref()
        .map(|name| {
            name.trim()
                .parse::<Tz>()
                .map_err(|_| QualityError::UnknownTimezone {
                    name: name.to_owned(),
                })
        })
        .transpose()?;

    let raw_timestamps = record
        .rows()
        .iter()
        .map(|row| row.get(ts_idx).map_or("", String::as_str))
        .collect::<Vec<_>>();
    let parsed = parse_column(&raw_timestamps, options.timestamp_hint, zone).map_err(|failure| {
        QualityError::UnparseableTimestamps {
            attempted: failure
                .attempted
                .iter()
                .map(|strategy| strategy.as_str().to_owned())
                .collect(),
            example: failure.example,
        }
    })?;

    let kept = parsed
        .millis
        .iter()
        .enumerate()
        .filter_map(|(row, ms)| ms.map(|ms| (row, ms)))
        .collect::<Vec<_>>();
    if kept.is_empty() {
        return Err(QualityError::NoValidRows);
    }
    let rows_without_timestamp = record.len() - kept.len();
    if rows_without_timestamp > 0 {
        warnings.push(ParseWarning::new(
            Severity::Warning,
            IssueKind::RowsDropped,
            TIMESTAMP,
            format!("{rows_without_timestamp} rows had an empty timestamp and were dropped"),
        ));
    }

    let (mut columns, dropped_columns) = numeric_columns(record, ts_idx, &kept, &mut warnings);
    let conversions = convert_units(&mut columns, &options.declared_units, &mut warnings);

    let acquired = kept.iter().map(|(_, ms)| *ms).collect::<Vec<_>>();
    let reordered = acquired.windows(2).any(|pair| pair[1] < pair[0]);
    if reordered {
        warnings.push(ParseWarning::new(
            Severity::Info,
            IssueKind::NonMonotonicOrder,
            TIMESTAMP,
            "rows were not in chronological order and were sorted",
        ));
    }
    let order = argsort(&acquired);
    let sorted = order.iter().map(|pos| acquired[*pos]).collect::<Vec<_>>();

    let (keep, duplicates) = dedupe_positions(&sorted, options.duplicate_tolerance_s);
    if let Some(first) = duplicates.first() {
        match options.duplicate_policy {
            DuplicatePolicy::Reject => {
                return Err(QualityError::DuplicateTimestamps {
                    count: duplicates.len(),
                    first_at: instant(*first),
                    tolerance_s: options.duplicate_tolerance_s,
                });
            }
            DuplicatePolicy::DedupeKeepFirst => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    count = duplicates.len(),
                    tolerance_s = options.duplicate_tolerance_s,
                    "removing duplicate timestamps"
                );
                warnings.push(ParseWarning::new(
                    Severity::Warning,
                    IssueKind::DuplicateRemoved,
                    TIMESTAMP,
                    format!(
                        "removed {} samples within {}s of the previous one (first at {})",
                        duplicates.len(),
                        options.duplicate_tolerance_s,
                        instant(*first)
                    ),
                ));
            }
        }
    }

    let positions = keep.iter().map(|pos| order[*pos]).collect::<Vec<_>>();
    let millis = keep.iter().map(|pos| sorted[*pos]).collect::<Vec<_>>();
    let columns = columns
        .into_iter()
        .map(|(name, column)| (name, column.reindex_by_positions(&positions)))
        .collect::<BTreeMap<_, _>>();
    let index = TimeIndex::new(millis);

    let median_period_s = index.median_delta_s();
    let max_gap_s = index.max_delta_s();
    if let (Some(limit_s), Some(median_s)) = (options.max_sample_period_s, median_period_s)
        && median_s > limit_s
    {
        return Err(QualityError::SamplePeriodExceeded { median_s, limit_s });
    }

    let gaps = match options.max_sample_period_s {
        Some(period) => index
            .deltas_s()
            .into_iter()
            .enumerate()
            .filter(|(_, delta)| *delta > period)
            .map(|(pos, gap_s)| GapRecord {
                at_ms: index.millis()[pos + 1],
                gap_s,
            })
            .collect::<Vec<_>>(),
        None => Vec::new(),
    };
    if let Some(widest) = gaps.iter().max_by(|a, b| a.gap_s.total_cmp(&b.gap_s)) {
        if let Some(limit_s) = options.allowed_gaps_s
            && widest.gap_s > limit_s
        {
            return Err(QualityError::GapExceeded {
                gap_s: widest.gap_s,
                limit_s,
                at: instant(widest.at_ms),
            });
        }
        warnings.push(ParseWarning::new(
            Severity::Info,
            IssueKind::GapDetected,
            TIMESTAMP,
            format!(
                "{} intervals exceed the sample period; widest {:.1}s at {}",
                gaps.len(),
                widest.gap_s,
                instant(widest.at_ms)
            ),
        ));
    } else if let (Some(limit_s), Some(gap_s)) = (options.allowed_gaps_s, max_gap_s)
        && gap_s > limit_s
    {
        let at = index
            .deltas_s()
            .iter()
            .position(|delta| *delta == gap_s)
            .map_or_else(String::new, |pos| instant(index.millis()[pos + 1]));
        return Err(QualityError::GapExceeded { gap_s, limit_s, at });
    }

    let rows_validated = index.len();
    let dataset = NormalizedDataset::new(index, columns)?;

    let (dataset, resample) = match options.resample_step_s {
        Some(step_s) => {
            let (resampled, summary) = dataset.resample(step_s)?;
            if !summary.preserved {
                warnings.push(ParseWarning::new(
                    Severity::Info,
                    IssueKind::Resampled,
                    TIMESTAMP,
                    format!(
                        "resampled from {} to {} rows at {step_s}s",
                        summary.rows_before, summary.rows_after
                    ),
                ));
            }
            (resampled, Some(summary))
        }
        None => (dataset, None),
    };

    let report = QualityReport {
        timestamp_strategy: parsed.strategy,
        rows_in: record.len(),
        rows_validated,
        rows_without_timestamp,
        duplicates_removed: duplicates.len(),
        reordered,
        median_period_s,
        max_gap_s,
        gaps,
        conversions,
        dropped_columns,
        resample,
        warnings,
    };
    Ok((dataset, report))
}

/// A column survives when at least half of its non-empty cells are numbers.
/// Text cells in a surviving column become missing samples.
fn numeric_columns(
    record: &RawRecord,
    ts_idx: usize,
    kept: &[(usize, i64)],
    warnings: &mut WarningLedger,
) -> (BTreeMap<String, Column>, Vec<String>) {
    let mut columns = BTreeMap::new();
    let mut dropped = Vec::new();

    for (col_idx, name) in record.headers().iter().enumerate() {
        if col_idx == ts_idx {
            continue;
        }
        if columns.contains_key(name) {
            dropped.push(name.clone());
            continue;
        }
        let cells = kept
            .iter()
            .map(|(row, _)| {
                record.rows()[*row]
                    .get(col_idx)
                    .map_or("", |cell| cell.trim())
            })
            .collect::<Vec<_>>();
        let present = cells.iter().filter(|cell| !cell.is_empty()).count();
        let values = cells
            .iter()
            .map(|cell| cell.parse::<f64>().ok().filter(|value| value.is_finite()))
            .collect::<Vec<_>>();
        let numeric = values.iter().filter(|value| value.is_some()).count();

        if numeric == 0 || numeric * 2 < present {
            dropped.push(name.clone());
            continue;
        }
        if numeric < present {
            warnings.push(ParseWarning::new(
                Severity::Info,
                IssueKind::RowsDropped,
                name.clone(),
                format!("{} non-numeric cells treated as missing", present - numeric),
            ));
        }
        columns.insert(name.clone(), Column::from_options(values));
    }

    (columns, dropped)
}

fn convert_units(
    columns: &mut BTreeMap<String, Column>,
    declared: &BTreeMap<String, TemperatureUnit>,
    warnings: &mut WarningLedger,
) -> Vec<UnitConversion> {
    let mut conversions = Vec::new();
    let names = columns.keys().cloned().collect::<Vec<_>>();

    for name in names {
        let Some(column) = columns.get(&name) else {
            continue;
        };
        let Some(reason) = detect_fahrenheit(&name, declared.get(&name).copied(), column) else {
            continue;
        };
        let converted = column.fahrenheit_to_celsius();
        let renamed = units::strip_fahrenheit_token(&name);
        let target = if renamed != name && columns.contains_key(&renamed) {
            name.clone()
        } else {
            renamed
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(column = %name, target = %target, reason = reason.as_str(), "converting fahrenheit to celsius");

        columns.remove(&name);
        columns.insert(target.clone(), converted);
        warnings.push(ParseWarning::new(
            Severity::Info,
            IssueKind::UnitConverted,
            name.clone(),
            format!(
                "converted from Fahrenheit to Celsius ({}) as {target}",
                reason.as_str()
            ),
        ));
        conversions.push(UnitConversion {
            from: name,
            to: target,
            reason,
        });
    }

    conversions
}

/// Positions to keep in a sorted series, and the timestamps of samples that
/// fell within `tolerance_s` of the last kept one.
fn dedupe_positions(sorted: &[i64], tolerance_s: f64) -> (Vec<usize>, Vec<i64>) {
    let tolerance_ms = (tolerance_s * 1000.0).round() as i64;
    let mut keep = Vec::with_capacity(sorted.len());
    let mut duplicates = Vec::new();
    let mut last_kept: Option<i64> = None;

    for (pos, ms) in sorted.iter().enumerate() {
        match last_kept {
            Some(prev) if ms - prev <= tolerance_ms => duplicates.push(*ms),
            _ => {
                keep.push(pos);
                last_kept = Some(*ms);
            }
        }
    }

    (keep, duplicates)
}

fn instant(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms).map_or_else(
        || ms.to_string(),
        |at| at.to_rfc3339_opts(SecondsFormat::Millis, true),
    )
}

#[cfg(test)]
mod tests {
    use pl_io::{LoadOptions, load_str};
    use pl_runtime::{DuplicatePolicy, IssueKind, PipelineConfig};
    use pl_types::Specification;

    use super::{ConversionReason, NormalizeOptions, QualityError, TimestampStrategy, normalize};

    fn csv(rows: &[(i64, f64)]) -> String {
        let mut out = String::from("time,temp\n");
        for (offset_s, value) in rows {
            out.push_str(&format!("{},{value}\n", 1_704_067_200 + offset_s));
        }
        out
    }

    fn limits(period: f64, gap: f64) -> NormalizeOptions {
        NormalizeOptions {
            max_sample_period_s: Some(period),
            allowed_gaps_s: Some(gap),
            timestamp_hint: pl_io::TimestampHint::UnixSeconds,
            ..NormalizeOptions::default()
        }
    }

    fn run(
        input: &str,
        options: NormalizeOptions,
    ) -> Result<(pl_frame::NormalizedDataset, super::QualityReport), QualityError> {
        let (record, metadata) = load_str(input, &LoadOptions::default()).expect("loads");
        normalize(&record, &options.with_metadata(&metadata))
    }

    #[test]
    fn epoch_seconds_become_a_utc_index() {
        let (dataset, report) =
            run(&csv(&[(0, 20.0), (30, 21.0), (60, 22.0)]), limits(30.0, 60.0)).expect("ok");
        assert_eq!(report.timestamp_strategy, TimestampStrategy::UnixSeconds);
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.index().millis()[0], 1_704_067_200_000);
        assert_eq!(
            dataset.column("temperature").expect("column").values(),
            &[20.0, 21.0, 22.0]
        );
    }

    #[test]
    fn fahrenheit_header_is_converted_exactly() {
        let input = "Time,Temp (°F)\n2024-01-01T00:00:00Z,356\n2024-01-01T00:00:30Z,356\n";
        let (dataset, report) = run(input, NormalizeOptions::default()).expect("ok");
        let value = dataset.column("temperature").expect("column").values()[0];
        assert!((value - 180.0).abs() <= 0.1);
        assert_eq!(report.conversions[0].reason, ConversionReason::DeclaredUnit);
        assert!(report.warnings.contains(IssueKind::UnitConverted));
    }

    #[test]
    fn gap_at_the_limit_passes_and_beyond_fails() {
        let at_limit = csv(&[(0, 20.0), (30, 20.0), (60, 20.0), (120, 20.0), (150, 20.0)]);
        let (_, report) = run(&at_limit, limits(30.0, 60.0)).expect("gap == limit passes");
        assert_eq!(report.gaps.len(), 1);
        assert!(report.warnings.contains(IssueKind::GapDetected));

        let beyond = csv(&[(0, 20.0), (30, 20.0), (60, 20.0), (121, 20.0), (151, 20.0)]);
        let err = run(&beyond, limits(30.0, 60.0)).expect_err("gap > limit fails");
        assert!(matches!(err, QualityError::GapExceeded { gap_s, .. } if gap_s == 61.0));
    }

    #[test]
    fn sparse_sampling_is_rejected() {
        let sparse = csv(&[(0, 20.0), (90, 20.0), (180, 20.0)]);
        let err = run(&sparse, limits(30.0, 600.0)).expect_err("period exceeded");
        assert!(matches!(err, QualityError::SamplePeriodExceeded { .. }));
    }

    #[test]
    fn duplicate_policy_is_industry_parameterized() {
        let input = "time,temp\n2024-01-01T00:00:00Z,20\n2024-01-01T00:00:00.050Z,21\n2024-01-01T00:00:30Z,22\n";

        let strict = NormalizeOptions {
            duplicate_policy: DuplicatePolicy::Reject,
            ..NormalizeOptions::default()
        };
        let err = run(input, strict).expect_err("duplicates rejected");
        assert!(matches!(err, QualityError::DuplicateTimestamps { count: 1, .. }));

        let (dataset, report) = run(input, NormalizeOptions::default()).expect("deduplicated");
        assert_eq!(dataset.len(), 2);
        assert_eq!(report.duplicates_removed, 1);
        assert_eq!(dataset.column("temperature").expect("column").values(), &[20.0, 22.0]);
        assert!(report.warnings.contains(IssueKind::DuplicateRemoved));
    }

    #[test]
    fn shuffled_rows_are_sorted() {
        let ordered = csv(&[(0, 20.0), (30, 21.0), (60, 22.0)]);
        let shuffled = csv(&[(60, 22.0), (0, 20.0), (30, 21.0)]);
        let (a, _) = run(&ordered, limits(30.0, 60.0)).expect("ok");
        let (b, report) = run(&shuffled, limits(30.0, 60.0)).expect("ok");
        assert_eq!(a, b);
        assert!(report.reordered);
    }

    #[test]
    fn metadata_timezone_applies_to_naive_timestamps() {
        let input = "# timezone: Europe/Berlin\ntime,temp\n2024-01-01 01:00:00,20\n2024-01-01 01:00:30,21\n";
        let (dataset, _) = run(input, NormalizeOptions::default()).expect("ok");
        assert_eq!(dataset.index().millis()[0], 1_704_067_200_000);
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        let options = NormalizeOptions {
            source_timezone: Some("Mars/Olympus".to_owned()),
            ..NormalizeOptions::default()
        };
        let err = run(&csv(&[(0, 1.0)]), options).expect_err("bad zone");
        assert!(matches!(err, QualityError::UnknownTimezone { .. }));
    }

    #[test]
    fn missing_timestamp_column_lists_available_columns() {
        let (record, _) =
            load_str("temp,pressure\n20,1\n21,1\n", &LoadOptions::default()).expect("loads");
        let err = normalize(&record, &NormalizeOptions::default()).expect_err("no timestamp");
        assert_eq!(
            err,
            QualityError::MissingTimestampColumn {
                available: vec!["temperature".to_owned(), "pressure".to_owned()]
            }
        );
    }

    #[test]
    fn coarse_series_is_resampled_after_validation() {
        let coarse = csv(&[(0, 20.0), (60, 22.0), (120, 24.0)]);
        let options = NormalizeOptions {
            resample_step_s: Some(30.0),
            ..limits(60.0, 60.0)
        };
        let (dataset, report) = run(&coarse, options).expect("ok");
        assert_eq!(report.rows_validated, 3);
        let summary = report.resample.expect("resample summary");
        assert!(!summary.preserved);
        assert_eq!(dataset.len(), 5);
    }

    #[test]
    fn text_columns_are_dropped() {
        let input = "time,temp,operator\n1704067200,20,ana\n1704067230,21,ben\n";
        let (dataset, report) = run(input, limits(30.0, 60.0)).expect("ok");
        assert_eq!(report.dropped_columns, vec!["operator".to_owned()]);
        assert!(dataset.column("operator").is_none());
    }

    #[test]
    fn options_follow_industry_policy() {
        let spec: Specification = serde_json::from_str(
            r#"{"industry":"concrete","job_id":"pour-4",
                "spec":{"target_temp_C":10,"hold_time_s":86400,"sensor_uncertainty_C":0.5},
                "data_requirements":{"max_sample_period_s":900,"allowed_gaps_s":1800}}"#,
        )
        .expect("spec parses");
        let options = NormalizeOptions::for_spec(&spec, &PipelineConfig::default());
        assert_eq!(options.allowed_gaps_s, Some(3_600.0));
        assert_eq!(options.duplicate_policy, DuplicatePolicy::DedupeKeepFirst);
        assert_eq!(options.resample_step_s, Some(30.0));
    }
}
