use std::sync::LazyLock;

use pl_columnar::Column;
use pl_frame::is_family_member;
use pl_io::{HUMIDITY, PRESSURE, TEMPERATURE, TemperatureUnit};
use regex::Regex;
use serde::{Deserialize, Serialize};

static FAHRENHEIT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:[_\s-](?:f|degf|deg_f|fahrenheit)$|°f|fahrenheit)")
        .expect("static regex compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionReason {
    /// The source header carried a Fahrenheit unit marker.
    DeclaredUnit,
    /// The column name itself ends in a Fahrenheit token.
    NameToken,
    /// Value distribution is implausible for Celsius.
    Distribution,
}

impl ConversionReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeclaredUnit => "declared_unit",
            Self::NameToken => "name_token",
            Self::Distribution => "distribution",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub from: String,
    pub to: String,
    pub reason: ConversionReason,
}

#[must_use]
pub fn has_fahrenheit_token(name: &str) -> bool {
    FAHRENHEIT_NAME.is_match(name)
}

/// `oven_temp_f` → `oven_temp`. Names without a token are returned as-is.
#[must_use]
pub fn strip_fahrenheit_token(name: &str) -> String {
    let stripped = FAHRENHEIT_NAME.replace_all(name, "");
    let trimmed = stripped.trim_end_matches(['_', '-', ' ']).trim();
    if trimmed.is_empty() {
        name.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// `mean > 80 && max > 200`, or `min > 32 && mean > 100 && max > 300`.
#[must_use]
pub fn distribution_suggests_fahrenheit(column: &Column) -> bool {
    let (Some(min), Some(max), Some(mean)) = (column.min(), column.max(), column.mean()) else {
        return false;
    };
    (mean > 80.0 && max > 200.0) || (min > 32.0 && mean > 100.0 && max > 300.0)
}

/// Decide whether `name` holds Fahrenheit readings. A header that declares
/// Celsius is never converted; pressure and humidity never are either.
#[must_use]
pub fn detect_fahrenheit(
    name: &str,
    declared: Option<TemperatureUnit>,
    column: &Column,
) -> Option<ConversionReason> {
    if is_family_member(name, PRESSURE) || is_family_member(name, HUMIDITY) {
        return None;
    }
    match declared {
        Some(TemperatureUnit::Celsius) => None,
        Some(TemperatureUnit::Fahrenheit) => Some(ConversionReason::DeclaredUnit),
        None if has_fahrenheit_token(name) => Some(ConversionReason::NameToken),
        None if is_family_member(name, TEMPERATURE) && distribution_suggests_fahrenheit(column) => {
            Some(ConversionReason::Distribution)
        }
        None => None,
    }
}
