#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use pl_columnar::{Column, median};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resampling keeps the original cadence when the median interval is within
/// this fraction of the target step.
pub const CADENCE_TOLERANCE: f64 = 0.15;

/// Empty buckets are forward-filled for at most this many steps before
/// time-weighted interpolation takes over.
pub const FORWARD_FILL_LIMIT: usize = 2;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column {name} length ({column_len})")]
    LengthMismatch {
        name: String,
        index_len: usize,
        column_len: usize,
    },
    #[error("timestamps must be strictly increasing (violation at position {position})")]
    NotStrictlyIncreasing { position: usize },
    #[error("resample step must be a positive number of seconds (got {step_s})")]
    InvalidStep { step_s: f64 },
}

/// Sample timestamps as UTC epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeIndex {
    millis: Vec<i64>,
}

impl TimeIndex {
    #[must_use]
    pub fn new(millis: Vec<i64>) -> Self {
        Self { millis }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.millis.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.millis.is_empty()
    }

    #[must_use]
    pub fn millis(&self) -> &[i64] {
        &self.millis
    }

    #[must_use]
    pub fn datetime(&self, idx: usize) -> Option<DateTime<Utc>> {
        self.millis
            .get(idx)
            .and_then(|ms| DateTime::<Utc>::from_timestamp_millis(*ms))
    }

    /// First position whose successor is not strictly later, if any.
    #[must_use]
    pub fn first_non_increasing(&self) -> Option<usize> {
        self.millis
            .windows(2)
            .position(|pair| pair[1] <= pair[0])
            .map(|pos| pos + 1)
    }

    /// Seconds between position `from` and position `to`.
    #[must_use]
    pub fn elapsed_s(&self, from: usize, to: usize) -> f64 {
        match (self.millis.get(from), self.millis.get(to)) {
            (Some(a), Some(b)) => (b - a) as f64 / 1000.0,
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn span_s(&self) -> f64 {
        if self.millis.is_empty() {
            0.0
        } else {
            self.elapsed_s(0, self.millis.len() - 1)
        }
    }

    #[must_use]
    pub fn deltas_s(&self) -> Vec<f64> {
        self.millis
            .windows(2)
            .map(|pair| (pair[1] - pair[0]) as f64 / 1000.0)
            .collect()
    }

    #[must_use]
    pub fn median_delta_s(&self) -> Option<f64> {
        median(self.deltas_s())
    }

    #[must_use]
    pub fn max_delta_s(&self) -> Option<f64> {
        self.deltas_s().into_iter().reduce(f64::max)
    }
}

/// Stable ascending order of `millis`; equal timestamps keep their input order.
#[must_use]
pub fn argsort(millis: &[i64]) -> Vec<usize> {
    let mut positions = (0..millis.len()).collect::<Vec<_>>();
    positions.sort_by_key(|pos| millis[*pos]);
    positions
}

/// `true` when `name` is `family` itself or `family_<n>`.
#[must_use]
pub fn is_family_member(name: &str, family: &str) -> bool {
    match name.strip_prefix(family) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResampleSummary {
    pub preserved: bool,
    pub median_period_s: Option<f64>,
    pub step_s: f64,
    pub rows_before: usize,
    pub rows_after: usize,
}

/// UTC-timestamped, strictly increasing series of sensor readings keyed by
/// canonical column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDataset {
    index: TimeIndex,
    columns: BTreeMap<String, Column>,
}

impl NormalizedDataset {
    pub fn new(index: TimeIndex, columns: BTreeMap<String, Column>) -> Result<Self, FrameError> {
        for (name, column) in &columns {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    name: name.clone(),
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
        }
        if let Some(position) = index.first_non_increasing() {
            return Err(FrameError::NotStrictlyIncreasing { position });
        }

        Ok(Self { index, columns })
    }

    #[must_use]
    pub fn index(&self) -> &TimeIndex {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<String, Column> {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Columns belonging to a signal family (`temperature`, `pressure`, ...),
    /// in name order.
    #[must_use]
    pub fn family(&self, family: &str) -> Vec<(&str, &Column)> {
        self.columns
            .iter()
            .filter(|(name, _)| is_family_member(name, family))
            .map(|(name, column)| (name.as_str(), column))
            .collect()
    }

    #[must_use]
    pub fn has_family(&self, family: &str) -> bool {
        self.columns
            .iter()
            .any(|(name, column)| is_family_member(name, family) && column.valid_count() > 0)
    }

    /// Resample onto a fixed `step_s` grid unless the existing cadence is
    /// already at least as fine, or within [`CADENCE_TOLERANCE`] of it.
    pub fn resample(&self, step_s: f64) -> Result<(Self, ResampleSummary), FrameError> {
        if !step_s.is_finite() || step_s <= 0.0 {
            return Err(FrameError::InvalidStep { step_s });
        }

        let median_period_s = self.index.median_delta_s();
        let keep = match median_period_s {
            None => true,
            Some(period) => {
                period <= step_s || (period - step_s).abs() <= CADENCE_TOLERANCE * step_s
            }
        };

        if keep {
            #[cfg(feature = "tracing")]
            tracing::debug!(?median_period_s, step_s, "keeping original cadence");
            return Ok((
                self.clone(),
                ResampleSummary {
                    preserved: true,
                    median_period_s,
                    step_s,
                    rows_before: self.len(),
                    rows_after: self.len(),
                },
            ));
        }

        let step_ms = (step_s * 1000.0).round() as i64;
        if step_ms <= 0 {
            return Err(FrameError::InvalidStep { step_s });
        }

        let millis = self.index.millis();
        let (Some(first), Some(last)) = (millis.first(), millis.last()) else {
            return Err(FrameError::InvalidStep { step_s });
        };
        let origin = first.div_euclid(step_ms) * step_ms;
        let buckets = ((last - origin) / step_ms) as usize + 1;
        let slots = millis
            .iter()
            .map(|ms| ((ms - origin) / step_ms) as usize)
            .collect::<Vec<_>>();
        let grid = (0..buckets)
            .map(|k| origin + k as i64 * step_ms)
            .collect::<Vec<_>>();

        let mut columns = BTreeMap::new();
        for (name, column) in &self.columns {
            let mut sums = vec![0.0; buckets];
            let mut counts = vec![0_usize; buckets];
            for (slot, value) in slots.iter().zip(column.values()) {
                if !value.is_nan() {
                    sums[*slot] += value;
                    counts[*slot] += 1;
                }
            }
            let mut values = sums
                .into_iter()
                .zip(counts)
                .map(|(sum, count)| if count == 0 { f64::NAN } else { sum / count as f64 })
                .collect::<Vec<_>>();
            forward_fill(&mut values, FORWARD_FILL_LIMIT);
            interpolate_time(&grid, &mut values);
            columns.insert(name.clone(), Column::new(values));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            ?median_period_s,
            step_s,
            rows_before = self.len(),
            rows_after = buckets,
            "resampled to fixed cadence"
        );

        let out = Self::new(TimeIndex::new(grid), columns)?;
        Ok((
            out,
            ResampleSummary {
                preserved: false,
                median_period_s,
                step_s,
                rows_before: self.len(),
                rows_after: buckets,
            },
        ))
    }
}

fn forward_fill(values: &mut [f64], limit: usize) {
    let mut last = None;
    let mut run = 0;
    for value in values.iter_mut() {
        if value.is_nan() {
            run += 1;
            if let Some(fill) = last
                && run <= limit
            {
                *value = fill;
            }
        } else {
            last = Some(*value);
            run = 0;
        }
    }
}

/// Linear interpolation in time between the nearest valid neighbours.
/// Leading and trailing gaps stay missing.
fn interpolate_time(grid: &[i64], values: &mut [f64]) {
    let mut prev: Option<usize> = None;
    let mut idx = 0;
    while idx < values.len() {
        if !values[idx].is_nan() {
            prev = Some(idx);
            idx += 1;
            continue;
        }
        let next = (idx..values.len()).find(|pos| !values[*pos].is_nan());
        match (prev, next) {
            (Some(left), Some(right)) => {
                let (t0, t1) = (grid[left] as f64, grid[right] as f64);
                let (v0, v1) = (values[left], values[right]);
                for pos in idx..right {
                    let weight = (grid[pos] as f64 - t0) / (t1 - t0);
                    values[pos] = v0 + (v1 - v0) * weight;
                }
                idx = right;
            }
            (_, Some(right)) => idx = right,
            (_, None) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pl_columnar::Column;

    use super::{FrameError, NormalizedDataset, TimeIndex, argsort, is_family_member};

    fn dataset(millis: Vec<i64>, values: Vec<f64>) -> NormalizedDataset {
        let mut columns = BTreeMap::new();
        columns.insert("temperature".to_owned(), Column::new(values));
        NormalizedDataset::new(TimeIndex::new(millis), columns).expect("dataset")
    }

    #[test]
    fn dataset_rejects_non_increasing_index() {
        let mut columns = BTreeMap::new();
        columns.insert("temperature".to_owned(), Column::new(vec![1.0, 2.0, 3.0]));
        let err = NormalizedDataset::new(TimeIndex::new(vec![0, 1000, 1000]), columns)
            .expect_err("must fail");
        assert_eq!(err, FrameError::NotStrictlyIncreasing { position: 2 });
    }

    #[test]
    fn family_membership_requires_numeric_suffix() {
        assert!(is_family_member("temperature", "temperature"));
        assert!(is_family_member("temperature_12", "temperature"));
        assert!(!is_family_member("temperature_f", "temperature"));
        assert!(!is_family_member("temperature_", "temperature"));
        assert!(!is_family_member("pressure", "temperature"));
    }

    #[test]
    fn argsort_is_stable_for_equal_timestamps() {
        assert_eq!(argsort(&[30, 10, 30, 20]), vec![1, 3, 0, 2]);
    }

    #[test]
    fn fine_cadence_is_preserved() {
        let ds = dataset(vec![0, 10_000, 20_000, 30_000], vec![1.0, 2.0, 3.0, 4.0]);
        let (out, summary) = ds.resample(30.0).expect("resample");
        assert!(summary.preserved);
        assert_eq!(out, ds);
    }

    #[test]
    fn cadence_within_tolerance_is_preserved() {
        let ds = dataset(vec![0, 34_000, 68_000], vec![1.0, 2.0, 3.0]);
        let (_, summary) = ds.resample(30.0).expect("resample");
        assert!(summary.preserved);
    }

    #[test]
    fn sparse_series_is_filled_then_interpolated() {
        // 60 s cadence onto a 10 s grid: two forward-filled steps, then
        // interpolation from the last filled bucket to the next reading.
        let ds = dataset(vec![0, 60_000], vec![100.0, 160.0]);
        let (out, summary) = ds.resample(10.0).expect("resample");
        assert!(!summary.preserved);
        assert_eq!(out.len(), 7);
        let values = out.column("temperature").expect("column").values().to_vec();
        assert_eq!(&values[..3], &[100.0, 100.0, 100.0]);
        assert!((values[3] - 115.0).abs() < 1e-9);
        assert!((values[5] - 145.0).abs() < 1e-9);
        assert_eq!(values[6], 160.0);
        assert_eq!(out.index().millis()[1], 10_000);
    }

    #[test]
    fn resample_rejects_non_positive_step() {
        let ds = dataset(vec![0, 60_000], vec![1.0, 2.0]);
        assert!(matches!(
            ds.resample(0.0),
            Err(FrameError::InvalidStep { .. })
        ));
    }
}
