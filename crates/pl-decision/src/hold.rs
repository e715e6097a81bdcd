//! Hold-time state machines. All durations are wall-clock seconds taken from
//! the time index, so irregular cadences are measured correctly.

use pl_frame::TimeIndex;
use serde::{Deserialize, Serialize};

/// Positions `[start, end]` of a held interval, both inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HoldOutcome {
    pub achieved_s: f64,
    /// Longest run for continuous holds.
    pub longest_run: Option<Run>,
    /// Time spent below threshold after it was first reached.
    pub dip_s: f64,
    /// Cumulative holds only: the dip budget ran out and later time was not
    /// counted.
    pub truncated: bool,
}

fn longest(index: &TimeIndex, runs: impl IntoIterator<Item = Run>) -> HoldOutcome {
    let mut best: Option<(f64, Run)> = None;
    for run in runs {
        let duration = index.elapsed_s(run.start, run.end);
        if best.is_none_or(|(top, _)| duration > top) {
            best = Some((duration, run));
        }
    }
    HoldOutcome {
        achieved_s: best.map_or(0.0, |(duration, _)| duration),
        longest_run: best.map(|(_, run)| run),
        dip_s: 0.0,
        truncated: false,
    }
}

/// Continuous hold on a numeric signal with hysteresis.
///
/// A run starts at the first sample at or above `threshold` and continues
/// while samples stay at or above `threshold - hysteresis`. A missing sample
/// ends the run.
#[must_use]
pub fn continuous_with_hysteresis(
    index: &TimeIndex,
    values: &[f64],
    threshold: f64,
    hysteresis: f64,
) -> HoldOutcome {
    let release = threshold - hysteresis;
    let mut runs = Vec::new();
    let mut current: Option<Run> = None;

    for (pos, value) in values.iter().enumerate() {
        let held = match current {
            None => *value >= threshold,
            Some(_) => *value >= release,
        };
        current = match (held, current) {
            (true, None) => Some(Run {
                start: pos,
                end: pos,
            }),
            (true, Some(run)) => Some(Run { end: pos, ..run }),
            (false, Some(run)) => {
                runs.push(run);
                None
            }
            (false, None) => None,
        };
    }
    runs.extend(current);

    longest(index, runs)
}

/// Continuous hold on an already-decided per-sample mask.
#[must_use]
pub fn continuous_on_mask(index: &TimeIndex, mask: &[bool]) -> HoldOutcome {
    let mut runs = Vec::new();
    let mut start = None;
    for (pos, qualifying) in mask.iter().enumerate() {
        match (qualifying, start) {
            (true, None) => start = Some(pos),
            (false, Some(first)) => {
                runs.push(Run {
                    start: first,
                    end: pos - 1,
                });
                start = None;
            }
            _ => {}
        }
    }
    if let Some(first) = start {
        runs.push(Run {
            start: first,
            end: mask.len() - 1,
        });
    }

    longest(index, runs)
}

/// Cumulative hold with a dip budget.
///
/// Each interval between consecutive samples is classified by its left
/// sample. Dips count only once the threshold has first been reached. When
/// total dip time fits the budget every above-threshold interval counts;
/// otherwise intervals are consumed in order and accumulation stops at the
/// dip that exhausts the budget.
#[must_use]
pub fn cumulative(index: &TimeIndex, mask: &[bool], max_total_dips_s: f64) -> HoldOutcome {
    let millis = index.millis();
    let intervals = mask
        .iter()
        .zip(millis.windows(2))
        .map(|(above, pair)| (*above, (pair[1] - pair[0]) as f64 / 1000.0))
        .collect::<Vec<_>>();

    let mut reached = false;
    let mut above_s = 0.0;
    let mut dip_s = 0.0;
    for (above, duration) in &intervals {
        if *above {
            reached = true;
            above_s += duration;
        } else if reached {
            dip_s += duration;
        }
    }

    if dip_s <= max_total_dips_s {
        return HoldOutcome {
            achieved_s: above_s,
            longest_run: None,
            dip_s,
            truncated: false,
        };
    }

    let mut budget = max_total_dips_s;
    let mut counted = 0.0;
    let mut reached = false;
    for (above, duration) in &intervals {
        if *above {
            reached = true;
            counted += duration;
        } else if reached {
            budget -= duration;
            if budget < 0.0 {
                break;
            }
        }
    }

    HoldOutcome {
        achieved_s: counted,
        longest_run: None,
        dip_s,
        truncated: true,
    }
}

/// Seconds spent strictly above `limit`, intervals classified by their left
/// sample.
#[must_use]
pub fn time_above(index: &TimeIndex, values: &[f64], limit: f64) -> f64 {
    values
        .iter()
        .zip(index.millis().windows(2))
        .filter(|(value, _)| **value > limit)
        .map(|(_, pair)| (pair[1] - pair[0]) as f64 / 1000.0)
        .sum()
}

#[cfg(test)]
mod tests {
    use pl_frame::TimeIndex;

    use super::{Run, continuous_on_mask, continuous_with_hysteresis, cumulative, time_above};

    fn every_30s(n: usize) -> TimeIndex {
        TimeIndex::new((0..n as i64).map(|k| k * 30_000).collect())
    }

    #[test]
    fn hysteresis_bridges_small_dips() {
        let index = every_30s(6);
        let values = [181.0, 182.5, 180.5, 183.0, 182.0, 179.0];
        let outcome = continuous_with_hysteresis(&index, &values, 182.0, 2.0);
        assert_eq!(outcome.longest_run, Some(Run { start: 1, end: 4 }));
        assert_eq!(outcome.achieved_s, 90.0);
    }

    #[test]
    fn no_hysteresis_splits_the_run() {
        let index = every_30s(6);
        let values = [181.0, 182.5, 180.5, 183.0, 182.0, 179.0];
        let outcome = continuous_with_hysteresis(&index, &values, 182.0, 0.0);
        assert_eq!(outcome.longest_run, Some(Run { start: 3, end: 4 }));
        assert_eq!(outcome.achieved_s, 30.0);
    }

    #[test]
    fn below_band_before_crossing_does_not_count() {
        let index = every_30s(4);
        let values = [180.5, 181.0, 181.9, 182.0];
        let outcome = continuous_with_hysteresis(&index, &values, 182.0, 2.0);
        assert_eq!(outcome.longest_run, Some(Run { start: 3, end: 3 }));
        assert_eq!(outcome.achieved_s, 0.0);
    }

    #[test]
    fn missing_samples_break_a_run() {
        let index = every_30s(4);
        let values = [183.0, f64::NAN, 183.0, 183.0];
        let outcome = continuous_with_hysteresis(&index, &values, 182.0, 2.0);
        assert_eq!(outcome.achieved_s, 30.0);
    }

    #[test]
    fn mask_runs_are_measured_inclusively() {
        let index = every_30s(7);
        let mask = [false, true, true, true, false, true, true];
        let outcome = continuous_on_mask(&index, &mask);
        assert_eq!(outcome.longest_run, Some(Run { start: 1, end: 3 }));
        assert_eq!(outcome.achieved_s, 60.0);
    }

    #[test]
    fn cumulative_within_budget_counts_everything() {
        let index = every_30s(6);
        let mask = [false, true, false, true, true, false];
        let outcome = cumulative(&index, &mask, 30.0);
        assert!(!outcome.truncated);
        assert_eq!(outcome.dip_s, 30.0);
        assert_eq!(outcome.achieved_s, 90.0);
    }

    #[test]
    fn cumulative_over_budget_truncates() {
        let index = every_30s(8);
        let mask = [true, false, false, true, false, true, true, true];
        // Dips: 30 + 30 + 30 = 90s against a 45s budget.
        let outcome = cumulative(&index, &mask, 45.0);
        assert!(outcome.truncated);
        assert_eq!(outcome.dip_s, 90.0);
        assert_eq!(outcome.achieved_s, 30.0);
    }

    #[test]
    fn band_time_uses_left_samples() {
        let index = every_30s(4);
        assert_eq!(time_above(&index, &[190.0, 195.0, 185.0, 199.0], 189.0), 60.0);
    }
}
