use std::collections::BTreeMap;

use pl_frame::TimeIndex;
use pl_io::{HUMIDITY, PRESSURE};
use pl_types::{DecisionResult, Industry};
use serde::{Deserialize, Serialize};

use crate::DecisionFailure;
use crate::evaluation::{EvaluationContext, Evaluated, evaluate_hold};

/// Reference temperature and z-value for F0 lethality.
pub const F0_REFERENCE_C: f64 = 121.1;
pub const F0_Z_VALUE_C: f64 = 10.0;
/// Nurse-Saul datum temperature.
pub const MATURITY_DATUM_C: f64 = -10.0;

/// The capability every industry validator provides.
pub trait IndustryValidator {
    fn name(&self) -> &'static str;

    /// Signal families that must be present besides temperature.
    fn required_signals(&self) -> &'static [&'static str] {
        &[]
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<DecisionResult, DecisionFailure>;
}

fn require_signals(
    ctx: &EvaluationContext<'_>,
    families: &[&str],
) -> Result<(), DecisionFailure> {
    let missing = families
        .iter()
        .filter(|family| !ctx.dataset.has_family(family))
        .map(|family| (*family).to_owned())
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DecisionFailure::RequiredSignalMissing {
            missing,
            available: ctx.dataset.column_names(),
        })
    }
}

/// Smallest valid reading across every column of a family.
fn family_min(ctx: &EvaluationContext<'_>, family: &str) -> Option<f64> {
    ctx.dataset
        .family(family)
        .into_iter()
        .filter_map(|(_, column)| column.min())
        .reduce(f64::min)
}

/// Sum of `weight(left sample) * Δt` over consecutive intervals, skipping
/// intervals whose left sample is missing.
fn integrate(index: &TimeIndex, values: &[f64], weight: impl Fn(f64) -> f64) -> f64 {
    values
        .iter()
        .zip(index.millis().windows(2))
        .filter(|(value, _)| !value.is_nan())
        .map(|(value, pair)| weight(*value) * (pair[1] - pair[0]) as f64 / 1000.0)
        .sum()
}

/// F0 in minutes: `Σ 10^((T - 121.1) / z) · Δt / 60`.
#[must_use]
pub fn f0_minutes(index: &TimeIndex, values: &[f64]) -> f64 {
    integrate(index, values, |t| {
        10_f64.powf((t - F0_REFERENCE_C) / F0_Z_VALUE_C)
    }) / 60.0
}

/// Nurse-Saul maturity in °C·h; readings below the datum contribute nothing.
#[must_use]
pub fn maturity_c_h(index: &TimeIndex, values: &[f64]) -> f64 {
    integrate(index, values, |t| (t - MATURITY_DATUM_C).max(0.0)) / 3600.0
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericValidator;

impl IndustryValidator for GenericValidator {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<DecisionResult, DecisionFailure> {
        evaluate_hold(ctx, self.name()).map(|evaluated| evaluated.result)
    }
}

/// Powder-coat cure. Duplicate timestamps are rejected upstream by the
/// industry policy; the hold algorithm is the common one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowderValidator;

impl IndustryValidator for PowderValidator {
    fn name(&self) -> &'static str {
        "powder"
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<DecisionResult, DecisionFailure> {
        let Evaluated { mut result, signal } = evaluate_hold(ctx, self.name())?;
        if let (Some(min), Some(max)) = (signal.numeric().min(), signal.numeric().max()) {
            result.insert_metric("temperature_span_c", max - min);
        }
        Ok(result)
    }
}

/// Steam sterilization in an autoclave. Needs chamber pressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoclaveValidator;

impl IndustryValidator for AutoclaveValidator {
    fn name(&self) -> &'static str {
        "autoclave"
    }

    fn required_signals(&self) -> &'static [&'static str] {
        &[PRESSURE]
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<DecisionResult, DecisionFailure> {
        require_signals(ctx, self.required_signals())?;
        let Evaluated { mut result, signal } = evaluate_hold(ctx, self.name())?;

        let f0 = f0_minutes(ctx.dataset.index(), signal.numeric().values());
        if !f0.is_finite() {
            return Err(DecisionFailure::internal(
                "lethality",
                format!("F0 accumulation overflowed ({f0})"),
            ));
        }
        result.insert_metric("f0_min", f0);
        if let Some(pressure) = family_min(ctx, PRESSURE) {
            result.insert_metric("pressure_min", pressure);
        }
        Ok(result)
    }
}

/// Sterile processing with humidity control.
#[derive(Debug, Clone, Copy, Default)]
pub struct SterileValidator;

impl IndustryValidator for SterileValidator {
    fn name(&self) -> &'static str {
        "sterile"
    }

    fn required_signals(&self) -> &'static [&'static str] {
        &[HUMIDITY]
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<DecisionResult, DecisionFailure> {
        require_signals(ctx, self.required_signals())?;
        let mut result = evaluate_hold(ctx, self.name())?.result;
        if let Some(humidity) = family_min(ctx, HUMIDITY) {
            result.insert_metric("humidity_min_pct", humidity);
        }
        Ok(result)
    }
}

/// Concrete cure monitoring over long, sparsely sampled pours.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcreteValidator;

impl IndustryValidator for ConcreteValidator {
    fn name(&self) -> &'static str {
        "concrete"
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<DecisionResult, DecisionFailure> {
        let Evaluated { mut result, signal } = evaluate_hold(ctx, self.name())?;
        result.insert_metric(
            "maturity_c_h",
            maturity_c_h(ctx.dataset.index(), signal.numeric().values()),
        );
        Ok(result)
    }
}

/// Closed set of validators the registry can hand out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    Generic,
    Powder,
    Autoclave,
    Sterile,
    Concrete,
}

impl Validator {
    fn as_dyn(self) -> &'static dyn IndustryValidator {
        match self {
            Self::Generic => &GenericValidator,
            Self::Powder => &PowderValidator,
            Self::Autoclave => &AutoclaveValidator,
            Self::Sterile => &SterileValidator,
            Self::Concrete => &ConcreteValidator,
        }
    }
}

impl IndustryValidator for Validator {
    fn name(&self) -> &'static str {
        self.as_dyn().name()
    }

    fn required_signals(&self) -> &'static [&'static str] {
        self.as_dyn().required_signals()
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<DecisionResult, DecisionFailure> {
        self.as_dyn().evaluate(ctx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub validator: Validator,
    /// No validator is registered for the tag; the generic one was chosen.
    pub used_fallback: bool,
}

/// Industry tag → validator. Unknown tags resolve to [`Validator::Generic`]
/// with `used_fallback` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registry {
    entries: BTreeMap<String, Validator>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    #[must_use]
    pub fn builtin() -> Self {
        let entries = [
            (Industry::Powder, Validator::Powder),
            (Industry::Autoclave, Validator::Autoclave),
            (Industry::Sterile, Validator::Sterile),
            (Industry::Concrete, Validator::Concrete),
        ]
        .into_iter()
        .map(|(industry, validator)| (industry.as_str().to_owned(), validator))
        .collect();
        Self { entries }
    }

    /// Route an additional tag (case-insensitive) to an existing validator.
    #[must_use]
    pub fn with_alias(mut self, tag: &str, validator: Validator) -> Self {
        self.entries
            .insert(tag.trim().to_ascii_lowercase(), validator);
        self
    }

    #[must_use]
    pub fn resolve(&self, industry: &Industry) -> Resolution {
        match self
            .entries
            .get(&industry.as_str().trim().to_ascii_lowercase())
        {
            Some(validator) => Resolution {
                validator: *validator,
                used_fallback: false,
            },
            None => Resolution {
                validator: Validator::Generic,
                used_fallback: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use pl_frame::TimeIndex;
    use pl_types::Industry;

    use super::{IndustryValidator, Registry, Validator, f0_minutes, maturity_c_h};

    #[test]
    fn known_tags_resolve_without_fallback() {
        let registry = Registry::builtin();
        let resolved = registry.resolve(&Industry::Autoclave);
        assert_eq!(resolved.validator, Validator::Autoclave);
        assert!(!resolved.used_fallback);
        assert_eq!(resolved.validator.required_signals(), &["pressure"]);
    }

    #[test]
    fn unknown_tags_fall_back_to_generic() {
        let registry = Registry::builtin();
        let resolved = registry.resolve(&Industry::from("food_safety"));
        assert_eq!(resolved.validator, Validator::Generic);
        assert!(resolved.used_fallback);

        let aliased = registry.with_alias("Food_Safety", Validator::Sterile);
        let resolved = aliased.resolve(&Industry::from("food_safety"));
        assert_eq!(resolved.validator, Validator::Sterile);
        assert!(!resolved.used_fallback);
    }

    #[test]
    fn f0_of_one_minute_at_reference_is_one() {
        let index = TimeIndex::new(vec![0, 60_000]);
        let f0 = f0_minutes(&index, &[121.1, 121.1]);
        assert!((f0 - 1.0).abs() < 1e-12);
        let hotter = f0_minutes(&index, &[131.1, 131.1]);
        assert!((hotter - 10.0).abs() < 1e-9);
    }

    #[test]
    fn maturity_accumulates_above_datum() {
        let index = TimeIndex::new(vec![0, 3_600_000, 7_200_000]);
        // 20 °C for one hour, then -15 °C (below datum) for one hour.
        let maturity = maturity_c_h(&index, &[20.0, -15.0, 5.0]);
        assert!((maturity - 30.0).abs() < 1e-9);
    }
}
