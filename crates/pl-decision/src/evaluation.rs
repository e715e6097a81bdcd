use pl_frame::NormalizedDataset;
use pl_runtime::{IndustryPolicy, PipelineConfig};
use pl_types::{DecisionResult, DecisionStatus, Specification};

use crate::DecisionFailure;
use crate::fusion::{FusedSignal, fuse, select_sensors};
use crate::hold::{
    HoldOutcome, continuous_on_mask, continuous_with_hysteresis, cumulative, time_above,
};
use crate::preconditions;

/// Everything a validator reads. Built once per job.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub dataset: &'a NormalizedDataset,
    pub spec: &'a Specification,
    pub config: &'a PipelineConfig,
    pub policy: &'a IndustryPolicy,
}

/// Result of the threshold/hold/precondition algorithm plus the fused signal
/// it ran on, so industry validators can derive extra metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluated {
    pub result: DecisionResult,
    pub signal: FusedSignal,
}

/// Minimum sample count for a hold of `hold_time_s` at `period_s` cadence.
#[must_use]
pub fn min_points_required(hold_time_s: f64, period_s: f64, margin: usize) -> Option<usize> {
    (period_s > 0.0).then(|| (hold_time_s / period_s).floor() as usize + margin)
}

/// The common algorithm every validator builds on: fuse the selected
/// sensors, measure the hold against the conservative threshold, then check
/// preconditions. PASS requires both the hold and every precondition.
pub fn evaluate_hold(
    ctx: &EvaluationContext<'_>,
    validator: &str,
) -> Result<Evaluated, DecisionFailure> {
    let spec = ctx.spec;
    let index = ctx.dataset.index();
    let threshold = spec.conservative_threshold_c();
    let required_s = spec.spec.hold_time_s;
    let selection = spec.selection();

    let sensors = select_sensors(ctx.dataset, &selection)?;
    let signal = fuse(&sensors, &selection, threshold)
        .map_err(|err| DecisionFailure::internal("sensor fusion", err))?;
    let values = signal.numeric().values();

    let mut result =
        DecisionResult::unresolved(spec, DecisionStatus::Fail, validator, Vec::new());
    result.min_temp_c = signal.numeric().min();
    result.max_temp_c = signal.numeric().max();
    result.insert_metric("sample_count", index.len());
    result.insert_metric("sensors_used", sensors.names.len());
    result.insert_metric("sensors", sensors.names.join(","));
    result.insert_metric("selection_mode", selection.mode.as_str());
    if let Some(period) = index.median_delta_s() {
        result.insert_metric("median_period_s", period);
    }
    for absent in &sensors.missing {
        result.warnings.push(format!(
            "Requested sensor {absent} not found; evaluated with {} sensors",
            sensors.names.len()
        ));
    }

    if let Some(min_points) = min_points_required(
        required_s,
        spec.data_requirements.max_sample_period_s,
        ctx.config.min_points_margin,
    ) && index.len() < min_points
    {
        result.status = if ctx.policy.safety_critical {
            DecisionStatus::Indeterminate
        } else {
            DecisionStatus::Fail
        };
        result.reasons.push(format!(
            "Insufficient data points: {} < {min_points} required for a {required_s:.1}s hold",
            index.len()
        ));
        result.insert_metric("min_points_required", min_points);
        return Ok(Evaluated { result, signal });
    }

    let qualifying = signal.at_or_above(threshold);
    let logic = spec.hold_logic();
    let hold: HoldOutcome = if logic.continuous {
        match &signal {
            FusedSignal::Numeric(column) => continuous_with_hysteresis(
                index,
                column.values(),
                threshold,
                ctx.config.hysteresis_c,
            ),
            FusedSignal::Qualifying { mask, .. } => continuous_on_mask(index, mask),
        }
    } else {
        cumulative(index, &qualifying, logic.max_total_dips_s)
    };
    if !hold.achieved_s.is_finite() {
        return Err(DecisionFailure::internal(
            "hold time",
            format!("non-finite hold duration {}", hold.achieved_s),
        ));
    }

    result.actual_hold_time_s = hold.achieved_s;
    let kind = if logic.continuous {
        "continuous"
    } else {
        "cumulative"
    };
    result.insert_metric("hold_mode", kind);
    if let Some(run) = hold.longest_run {
        result.insert_metric("hold_start_s", index.elapsed_s(0, run.start));
    }
    if !logic.continuous {
        result.insert_metric("dip_time_s", hold.dip_s);
        if hold.truncated {
            result.warnings.push(format!(
                "Dip time {:.1}s exceeded the {:.1}s budget; hold time counted only until the budget ran out",
                hold.dip_s, logic.max_total_dips_s
            ));
        }
    }

    let hold_met = hold.achieved_s >= required_s;
    if hold_met {
        result.reasons.push(format!(
            "{} hold time requirement met: {:.1}s >= {required_s:.1}s",
            capitalized(kind),
            hold.achieved_s
        ));
    } else {
        result.reasons.push(format!(
            "Insufficient {kind} hold time: {:.1}s < {required_s:.1}s required",
            hold.achieved_s
        ));
    }

    let checked = preconditions::evaluate(index, values, &qualifying, spec.preconditions.as_ref());
    if let Some(rate) = checked.ramp_rate_max_c_per_min {
        result.insert_metric("ramp_rate_max_c_per_min", rate);
    }
    if let Some(elapsed) = checked.time_to_threshold_s {
        result.insert_metric("time_to_threshold_s", elapsed);
    }
    let preconditions_ok = checked.ok();
    result.reasons.extend(checked.violations);

    if let Some(band) = spec.spec.temp_band_c {
        let ceiling = spec.spec.target_temp_c + band;
        let above = time_above(index, values, ceiling);
        result.insert_metric("time_above_band_s", above);
        if above > 0.0 {
            result.warnings.push(format!(
                "Temperature exceeded the target band ({ceiling:.1} °C) for {above:.1}s"
            ));
        }
    }

    let pass = hold_met && preconditions_ok;
    result.pass = pass;
    result.status = if pass {
        DecisionStatus::Pass
    } else {
        DecisionStatus::Fail
    };

    Ok(Evaluated { result, signal })
}

fn capitalized(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
