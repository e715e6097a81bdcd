#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[f64]) -> Self {
        let bits = values.iter().map(|value| !value.is_nan()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }
}

/// A numeric sensor column. Missing samples are stored as NaN and tracked by
/// the validity mask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    values: Vec<f64>,
    validity: ValidityMask,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("fusion requires at least one column")]
    EmptySet,
}

impl Column {
    /// Infinite readings are treated as missing.
    #[must_use]
    pub fn new(values: Vec<f64>) -> Self {
        let values = values
            .into_iter()
            .map(|value| if value.is_finite() { value } else { f64::NAN })
            .collect::<Vec<_>>();
        let validity = ValidityMask::from_values(&values);
        Self { values, validity }
    }

    #[must_use]
    pub fn from_options(values: Vec<Option<f64>>) -> Self {
        Self::new(
            values
                .into_iter()
                .map(|value| value.unwrap_or(f64::NAN))
                .collect(),
        )
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).copied().filter(|value| !value.is_nan())
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.validity.valid_count()
    }

    fn valid_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied().filter(|value| !value.is_nan())
    }

    #[must_use]
    pub fn min(&self) -> Option<f64> {
        self.valid_values().reduce(f64::min)
    }

    #[must_use]
    pub fn max(&self) -> Option<f64> {
        self.valid_values().reduce(f64::max)
    }

    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        let count = self.valid_count();
        if count == 0 {
            return None;
        }
        Some(self.valid_values().sum::<f64>() / count as f64)
    }

    #[must_use]
    pub fn median(&self) -> Option<f64> {
        median(self.valid_values().collect())
    }

    #[must_use]
    pub fn map(&self, op: impl Fn(f64) -> f64) -> Self {
        Self::new(
            self.values
                .iter()
                .map(|value| if value.is_nan() { f64::NAN } else { op(*value) })
                .collect(),
        )
    }

    /// Exact conversion, `(f - 32) * 5 / 9`.
    #[must_use]
    pub fn fahrenheit_to_celsius(&self) -> Self {
        self.map(fahrenheit_to_celsius)
    }

    #[must_use]
    pub fn reindex_by_positions(&self, positions: &[usize]) -> Self {
        Self::new(
            positions
                .iter()
                .map(|idx| self.values.get(*idx).copied().unwrap_or(f64::NAN))
                .collect(),
        )
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| (left.is_nan() && right.is_nan()) || left == right)
    }
}

#[must_use]
pub fn fahrenheit_to_celsius(value: f64) -> f64 {
    (value - 32.0) * 5.0 / 9.0
}

/// Median of a sample; `None` when empty. NaN entries must be filtered first.
#[must_use]
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn check_lengths(columns: &[&Column]) -> Result<usize, ColumnError> {
    let first = columns.first().ok_or(ColumnError::EmptySet)?;
    for column in &columns[1..] {
        if column.len() != first.len() {
            return Err(ColumnError::LengthMismatch {
                left: first.len(),
                right: column.len(),
            });
        }
    }
    Ok(first.len())
}

fn fold_rows(columns: &[&Column], op: impl Fn(&[f64]) -> f64) -> Result<Column, ColumnError> {
    let len = check_lengths(columns)?;
    let mut row = Vec::with_capacity(columns.len());
    let mut out = Vec::with_capacity(len);
    for idx in 0..len {
        row.clear();
        row.extend(
            columns
                .iter()
                .map(|column| column.values[idx])
                .filter(|value| !value.is_nan()),
        );
        out.push(if row.is_empty() { f64::NAN } else { op(&row) });
    }
    Ok(Column::new(out))
}

/// Per-sample minimum across the set, ignoring missing readings.
pub fn row_min(columns: &[&Column]) -> Result<Column, ColumnError> {
    fold_rows(columns, |row| row.iter().copied().fold(f64::INFINITY, f64::min))
}

/// Per-sample arithmetic mean across the set, ignoring missing readings.
pub fn row_mean(columns: &[&Column]) -> Result<Column, ColumnError> {
    fold_rows(columns, |row| row.iter().sum::<f64>() / row.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowVote {
    pub at_or_above: usize,
    pub reporting: usize,
}

/// Per-sample count of sensors reading at or above `threshold`.
pub fn row_votes(columns: &[&Column], threshold: f64) -> Result<Vec<RowVote>, ColumnError> {
    let len = check_lengths(columns)?;
    Ok((0..len)
        .map(|idx| {
            let mut vote = RowVote {
                at_or_above: 0,
                reporting: 0,
            };
            for column in columns {
                let value = column.values[idx];
                if value.is_nan() {
                    continue;
                }
                vote.reporting += 1;
                if value >= threshold {
                    vote.at_or_above += 1;
                }
            }
            vote
        })
        .collect())
}
