use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use unicode_casefold::UnicodeCaseFold;

pub const TIMESTAMP: &str = "timestamp";
pub const TEMPERATURE: &str = "temperature";
pub const PRESSURE: &str = "pressure";
pub const HUMIDITY: &str = "humidity";

const TIMESTAMP_SYNONYMS: &[&str] = &[
    "timestamp",
    "timestamputc",
    "time",
    "timeutc",
    "datetime",
    "datetimeutc",
    "dateandtime",
    "date",
    "ts",
    "logtime",
    "sampletime",
    "recordtime",
    "unixtime",
    "epoch",
    "zeit",
    "zeitstempel",
    "datum",
    "fecha",
    "fechahora",
    "horodatage",
];

const TEMPERATURE_SYNONYMS: &[&str] = &[
    "temperature",
    "temp",
    "t",
    "tc",
    "thermocouple",
    "probe",
    "sensor",
    "pmt",
    "parttemp",
    "producttemp",
    "metaltemp",
    "temperatur",
    "temperatura",
    "température",
];

const PRESSURE_SYNONYMS: &[&str] = &[
    "pressure",
    "press",
    "p",
    "chamberpressure",
    "druck",
    "presion",
    "presión",
    "pression",
];

const HUMIDITY_SYNONYMS: &[&str] = &[
    "humidity",
    "hum",
    "rh",
    "relhumidity",
    "relativehumidity",
    "feuchte",
    "luftfeuchte",
    "humedad",
    "humidité",
];

static UNIT_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\(\[\{][^\)\]\}]*[\)\]\}]").expect("static regex compiles"));
static TRAILING_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\D+?)(\d+)$").expect("static regex compiles"));
static FAHRENHEIT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[°º˚]\s*f\b|\bdeg\s*f\b|\bdegf\b|fahrenheit|[\(\[]\s*f\s*[\)\]]|[_\s]f$)")
        .expect("static regex compiles")
});
static CELSIUS_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[°º˚]\s*c\b|\bdeg\s*c\b|\bdegc\b|celsius|[\(\[]\s*c\s*[\)\]]|[_\s]c$)")
        .expect("static regex compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedColumn {
    pub original: String,
    pub canonical: String,
    /// Unit declared in the header, if any.
    pub unit: Option<TemperatureUnit>,
    /// `false` for columns that matched no synonym and passed through.
    pub recognized: bool,
}

/// Original header → canonical name, in file column order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub columns: Vec<MappedColumn>,
}

impl ColumnMapping {
    #[must_use]
    pub fn canonical_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.canonical.clone())
            .collect()
    }

    #[must_use]
    pub fn position(&self, canonical: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.canonical == canonical)
    }

    #[must_use]
    pub fn unit_of(&self, canonical: &str) -> Option<TemperatureUnit> {
        self.columns
            .iter()
            .find(|column| column.canonical == canonical)
            .and_then(|column| column.unit)
    }
}

/// Case-folded header with unit markers noted and stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderKey {
    pub key: String,
    pub unit: Option<TemperatureUnit>,
}

#[must_use]
pub fn header_key(header: &str) -> HeaderKey {
    let folded = header.trim().chars().case_fold().collect::<String>();

    let unit = if FAHRENHEIT_TOKEN.is_match(&folded) {
        Some(TemperatureUnit::Fahrenheit)
    } else if CELSIUS_TOKEN.is_match(&folded) {
        Some(TemperatureUnit::Celsius)
    } else {
        None
    };

    let without_groups = UNIT_GROUP.replace_all(&folded, " ");
    let stripped = match unit {
        Some(TemperatureUnit::Fahrenheit) => FAHRENHEIT_TOKEN.replace_all(&without_groups, " "),
        Some(TemperatureUnit::Celsius) => CELSIUS_TOKEN.replace_all(&without_groups, " "),
        None => without_groups.clone(),
    };

    let key = stripped
        .chars()
        .filter(|ch| ch.is_alphanumeric())
        .collect::<String>();

    HeaderKey { key, unit }
}

fn family_of(base: &str) -> Option<&'static str> {
    if TIMESTAMP_SYNONYMS.contains(&base) {
        Some(TIMESTAMP)
    } else if TEMPERATURE_SYNONYMS.contains(&base) {
        Some(TEMPERATURE)
    } else if PRESSURE_SYNONYMS.contains(&base) {
        Some(PRESSURE)
    } else if HUMIDITY_SYNONYMS.contains(&base) {
        Some(HUMIDITY)
    } else {
        None
    }
}

/// Canonical name for one header, ignoring collisions.
#[must_use]
pub fn canonicalize(header: &str) -> (Option<String>, Option<TemperatureUnit>) {
    let HeaderKey { key, unit } = header_key(header);

    if let Some(family) = family_of(&key) {
        return (Some(family.to_owned()), unit);
    }

    if let Some(caps) = TRAILING_INDEX.captures(&key) {
        let base = caps.get(1).map_or("", |m| m.as_str());
        let index = caps.get(2).map_or("", |m| m.as_str());
        if let Some(family) = family_of(base)
            && family != TIMESTAMP
        {
            let index = index.trim_start_matches('0');
            if !index.is_empty() {
                return (Some(format!("{family}_{index}")), unit);
            }
        }
    }

    (None, unit)
}

/// A header whose canonical name was already claimed by an earlier column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub claimed: String,
    pub renamed: String,
}

/// `temperature_1` → `temperature`; names without an index are returned as is.
fn family_base(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((base, index)) if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => name,
    }
}

/// Build the mapping for a full header row. The first column claiming a
/// canonical name keeps it; later claimants get the next free index in the
/// same family (`temperature_2`, `temperature_3`, ...) and are reported in the
/// second return value.
#[must_use]
pub fn map_headers(headers: &[String]) -> (ColumnMapping, Vec<Collision>) {
    let mut taken = BTreeSet::new();
    let mut collisions = Vec::new();
    let mut columns = Vec::with_capacity(headers.len());

    for header in headers {
        let original = header.trim().to_owned();
        let (canonical, unit) = canonicalize(&original);
        let mapped = match canonical {
            Some(name) => {
                let assigned = if taken.contains(&name) {
                    let base = family_base(&name);
                    let renamed = (2_usize..)
                        .map(|n| format!("{base}_{n}"))
                        .find(|candidate| !taken.contains(candidate))
                        .unwrap_or_else(|| original.clone());
                    collisions.push(Collision {
                        claimed: name,
                        renamed: renamed.clone(),
                    });
                    renamed
                } else {
                    name
                };
                taken.insert(assigned.clone());
                MappedColumn {
                    original,
                    canonical: assigned,
                    unit,
                    recognized: true,
                }
            }
            None => MappedColumn {
                canonical: original.clone(),
                original,
                unit,
                recognized: false,
            },
        };
        columns.push(mapped);
    }

    (ColumnMapping { columns }, collisions)
}
