use pl_columnar::{Column, ColumnError, row_mean, row_min, row_votes};
use pl_frame::NormalizedDataset;
use pl_io::{TEMPERATURE, canonicalize};
use pl_types::{SelectionMode, SensorSelection};

use crate::DecisionFailure;

/// The per-sample signal hold-time logic runs on.
#[derive(Debug, Clone, PartialEq)]
pub enum FusedSignal {
    Numeric(Column),
    /// Majority voting yields a threshold decision per sample. `mean` is kept
    /// for min/max and ramp-rate reporting.
    Qualifying { mask: Vec<bool>, mean: Column },
}

impl FusedSignal {
    /// Numeric view: the fused column, or the per-sample mean in voting mode.
    #[must_use]
    pub fn numeric(&self) -> &Column {
        match self {
            Self::Numeric(column) => column,
            Self::Qualifying { mean, .. } => mean,
        }
    }

    #[must_use]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Qualifying { .. })
    }

    /// Samples that meet `threshold`. Missing samples never do.
    #[must_use]
    pub fn at_or_above(&self, threshold: f64) -> Vec<bool> {
        match self {
            Self::Numeric(column) => column
                .values()
                .iter()
                .map(|value| *value >= threshold)
                .collect(),
            Self::Qualifying { mask, .. } => mask.clone(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.numeric().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedSensors<'a> {
    pub names: Vec<String>,
    pub columns: Vec<&'a Column>,
    /// Explicitly requested sensors that were not present.
    pub missing: Vec<String>,
}

fn lookup<'a>(dataset: &'a NormalizedDataset, requested: &str) -> Option<(String, &'a Column)> {
    let hit = move |name: &str| {
        dataset
            .column(name)
            .filter(|column| column.valid_count() > 0)
            .map(|column| (name.to_owned(), column))
    };
    hit(requested).or_else(|| canonicalize(requested).0.and_then(|name| hit(&name)))
}

/// Resolve the sensor set named by `selection`. Without an explicit list
/// every temperature column with data is used. Fewer sensors than the
/// selection's minimum is a missing-signal failure naming what was present.
pub fn select_sensors<'a>(
    dataset: &'a NormalizedDataset,
    selection: &SensorSelection,
) -> Result<SelectedSensors<'a>, DecisionFailure> {
    let mut names = Vec::new();
    let mut columns = Vec::new();
    let mut missing = Vec::new();

    match &selection.sensors {
        Some(requested) => {
            for sensor in requested {
                match lookup(dataset, sensor) {
                    Some((name, column)) if !names.contains(&name) => {
                        names.push(name);
                        columns.push(column);
                    }
                    Some(_) => {}
                    None => missing.push(sensor.clone()),
                }
            }
        }
        None => {
            for (name, column) in dataset.family(TEMPERATURE) {
                if column.valid_count() > 0 {
                    names.push(name.to_owned());
                    columns.push(column);
                }
            }
        }
    }

    let required = selection.min_sensor_count();
    if columns.len() < required {
        if missing.is_empty() {
            missing.push(if required > 1 {
                format!("{TEMPERATURE} ({required} sensors required, {} present)", columns.len())
            } else {
                TEMPERATURE.to_owned()
            });
        }
        return Err(DecisionFailure::RequiredSignalMissing {
            missing,
            available: dataset.column_names(),
        });
    }

    Ok(SelectedSensors {
        names,
        columns,
        missing,
    })
}

pub fn fuse(
    sensors: &SelectedSensors<'_>,
    selection: &SensorSelection,
    threshold: f64,
) -> Result<FusedSignal, ColumnError> {
    match selection.mode {
        SelectionMode::MinOfSet => row_min(&sensors.columns).map(FusedSignal::Numeric),
        SelectionMode::MeanOfSet => row_mean(&sensors.columns).map(FusedSignal::Numeric),
        SelectionMode::MajorityOverThreshold => {
            let set_size = sensors.columns.len();
            let mask = row_votes(&sensors.columns, threshold)?
                .into_iter()
                .map(|vote| match selection.require_at_least {
                    Some(required) => vote.at_or_above >= required,
                    None => vote.at_or_above * 2 > set_size,
                })
                .collect();
            let mean = row_mean(&sensors.columns)?;
            Ok(FusedSignal::Qualifying { mask, mean })
        }
    }
}
