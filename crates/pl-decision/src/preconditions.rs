use pl_frame::TimeIndex;
use pl_types::Preconditions;

/// Largest heating rate in °C/min, by centered finite differences over
/// time (one-sided at the ends). Positions whose stencil touches a missing
/// sample are skipped.
#[must_use]
pub fn max_ramp_rate_c_per_min(index: &TimeIndex, values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let millis = index.millis();
    (0..n)
        .filter_map(|pos| {
            let (lo, hi) = match pos {
                0 => (0, 1),
                p if p == n - 1 => (n - 2, n - 1),
                p => (p - 1, p + 1),
            };
            let dt_min = (millis[hi] - millis[lo]) as f64 / 60_000.0;
            let dv = values[hi] - values[lo];
            (dt_min > 0.0 && dv.is_finite()).then(|| dv / dt_min)
        })
        .reduce(f64::max)
}

/// Seconds from the first sample to the first qualifying one.
#[must_use]
pub fn time_to_threshold_s(index: &TimeIndex, qualifying: &[bool]) -> Option<f64> {
    qualifying
        .iter()
        .position(|hit| *hit)
        .map(|pos| index.elapsed_s(0, pos))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreconditionReport {
    pub ramp_rate_max_c_per_min: Option<f64>,
    pub time_to_threshold_s: Option<f64>,
    /// One entry per violated precondition.
    pub violations: Vec<String>,
}

impl PreconditionReport {
    #[must_use]
    pub fn ok(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Measure both quantities and check the configured limits. Limits that are
/// not configured are never violated.
#[must_use]
pub fn evaluate(
    index: &TimeIndex,
    values: &[f64],
    qualifying: &[bool],
    limits: Option<&Preconditions>,
) -> PreconditionReport {
    let ramp_rate_max_c_per_min = max_ramp_rate_c_per_min(index, values);
    let time_to_threshold_s = time_to_threshold_s(index, qualifying);
    let mut violations = Vec::new();

    if let Some(limits) = limits {
        if let Some(limit) = limits.max_ramp_rate_c_per_min
            && let Some(rate) = ramp_rate_max_c_per_min
            && rate > limit
        {
            violations.push(format!(
                "Ramp rate {rate:.2} °C/min exceeds maximum {limit:.2} °C/min"
            ));
        }
        if let Some(limit) = limits.max_time_to_threshold_s {
            match time_to_threshold_s {
                Some(elapsed) if elapsed > limit => violations.push(format!(
                    "Time to threshold {elapsed:.1}s exceeds maximum {limit:.1}s"
                )),
                Some(_) => {}
                None => violations.push(format!(
                    "Threshold never reached; maximum time to threshold is {limit:.1}s"
                )),
            }
        }
    }

    PreconditionReport {
        ramp_rate_max_c_per_min,
        time_to_threshold_s,
        violations,
    }
}

#[cfg(test)]
mod tests {
    use pl_frame::TimeIndex;
    use pl_types::Preconditions;

    use super::{evaluate, max_ramp_rate_c_per_min, time_to_threshold_s};

    fn every_30s(n: usize) -> TimeIndex {
        TimeIndex::new((0..n as i64).map(|k| k * 30_000).collect())
    }

    #[test]
    fn ramp_rate_uses_centered_differences() {
        let index = every_30s(4);
        // 5 °C per 30 s, then a 10 °C jump.
        let values = [100.0, 105.0, 110.0, 120.0];
        let rate = max_ramp_rate_c_per_min(&index, &values).expect("rate");
        assert!((rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn time_to_threshold_counts_from_series_start() {
        let index = every_30s(5);
        assert_eq!(
            time_to_threshold_s(&index, &[false, false, false, true, true]),
            Some(90.0)
        );
        assert_eq!(time_to_threshold_s(&index, &[false; 5]), None);
    }

    #[test]
    fn violations_are_reported_per_limit() {
        let index = every_30s(4);
        let values = [100.0, 105.0, 110.0, 120.0];
        let limits = Preconditions {
            max_ramp_rate_c_per_min: Some(15.0),
            max_time_to_threshold_s: Some(60.0),
        };
        let report = evaluate(&index, &values, &[false, false, false, true], Some(&limits));
        assert!(!report.ok());
        assert_eq!(report.violations.len(), 2);
        assert!(report.violations[0].starts_with("Ramp rate 20.00"));
        assert!(report.violations[1].contains("90.0s exceeds maximum 60.0s"));
    }

    #[test]
    fn unconfigured_limits_never_fail() {
        let index = every_30s(3);
        let report = evaluate(&index, &[1.0, 50.0, 99.0], &[false; 3], None);
        assert!(report.ok());
        assert!(report.ramp_rate_max_c_per_min.is_some());
    }
}
