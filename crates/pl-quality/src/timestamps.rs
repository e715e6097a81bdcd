use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use pl_io::{TimestampHint, UNIX_SECONDS_RANGE};
use serde::{Deserialize, Serialize};

/// Serial day number of 1970-01-01 in the 1900 date system.
pub const SERIAL_EPOCH_OFFSET_DAYS: f64 = 25_569.0;
/// Parsed instants outside these years are rejected.
pub const YEAR_RANGE: (i32, i32) = (1970, 2100);

const MILLIS_PER_DAY: f64 = 86_400_000.0;
const UNIX_MILLIS_FLOOR: f64 = 1.0e11;

const OFFSET_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"];
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampStrategy {
    UnixSeconds,
    UnixMillis,
    Iso8601,
    SpreadsheetSerial,
}

impl TimestampStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnixSeconds => "unix_seconds",
            Self::UnixMillis => "unix_millis",
            Self::Iso8601 => "iso8601",
            Self::SpreadsheetSerial => "spreadsheet_serial",
        }
    }

    /// Attempt order. A loader that already recognized serial dates gets that
    /// strategy first, since small day counts also read as early epoch seconds.
    #[must_use]
    pub fn order(hint: TimestampHint) -> Vec<Self> {
        let default = [
            Self::UnixSeconds,
            Self::UnixMillis,
            Self::Iso8601,
            Self::SpreadsheetSerial,
        ];
        if hint == TimestampHint::SpreadsheetSerial {
            std::iter::once(Self::SpreadsheetSerial)
                .chain(default.into_iter().filter(|s| *s != Self::SpreadsheetSerial))
                .collect()
        } else {
            default.to_vec()
        }
    }

    fn parse_one(self, raw: &str, zone: Option<Tz>) -> Option<i64> {
        let millis = match self {
            Self::UnixSeconds => {
                let value = raw.parse::<f64>().ok()?;
                let (lo, hi) = UNIX_SECONDS_RANGE;
                if !(lo..=hi).contains(&value) {
                    return None;
                }
                (value * 1000.0).round() as i64
            }
            Self::UnixMillis => {
                let value = raw.parse::<f64>().ok()?;
                if !value.is_finite() || value < UNIX_MILLIS_FLOOR {
                    return None;
                }
                value.round() as i64
            }
            Self::Iso8601 => parse_iso(raw, zone)?,
            Self::SpreadsheetSerial => {
                let value = raw.parse::<f64>().ok()?;
                if !value.is_finite() {
                    return None;
                }
                ((value - SERIAL_EPOCH_OFFSET_DAYS) * MILLIS_PER_DAY).round() as i64
            }
        };
        let year = DateTime::<Utc>::from_timestamp_millis(millis)?.year();
        (YEAR_RANGE.0..=YEAR_RANGE.1)
            .contains(&year)
            .then_some(millis)
    }
}

fn parse_iso(raw: &str, zone: Option<Tz>) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp_millis());
    }
    for format in OFFSET_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(raw, format) {
            return Some(parsed.timestamp_millis());
        }
    }

    // A bare `Z` after a space-separated timestamp pins it to UTC.
    let (body, zone) = match raw.strip_suffix(['Z', 'z']) {
        Some(body) => (body.trim_end(), None),
        None => (raw, zone),
    };

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(body, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(body, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })?;

    match zone {
        // Ambiguous wall-clock times (DST fall-back) resolve to the earlier
        // instant; non-existent ones (spring-forward) fail.
        Some(zone) => zone
            .from_local_datetime(&naive)
            .earliest()
            .map(|local| local.timestamp_millis()),
        None => Some(naive.and_utc().timestamp_millis()),
    }
}

/// A timestamp column parsed with the first strategy that accepted every
/// non-empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTimestamps {
    pub strategy: TimestampStrategy,
    /// `None` where the source cell was empty.
    pub millis: Vec<Option<i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    pub attempted: Vec<TimestampStrategy>,
    /// First value rejected by the last strategy tried.
    pub example: String,
}

pub fn parse_column(
    values: &[&str],
    hint: TimestampHint,
    zone: Option<Tz>,
) -> Result<ParsedTimestamps, StrategyFailure> {
    let attempted = TimestampStrategy::order(hint);
    let mut example = String::new();

    for strategy in &attempted {
        let mut millis = Vec::with_capacity(values.len());
        let mut rejected = None;
        for value in values {
            let raw = value.trim();
            if raw.is_empty() {
                millis.push(None);
                continue;
            }
            match strategy.parse_one(raw, zone) {
                Some(ms) => millis.push(Some(ms)),
                None => {
                    rejected = Some(raw);
                    break;
                }
            }
        }
        match rejected {
            None if millis.iter().any(Option::is_some) => {
                return Ok(ParsedTimestamps {
                    strategy: *strategy,
                    millis,
                });
            }
            None => {}
            Some(raw) => raw.clone_into(&mut example),
        }
    }

    Err(StrategyFailure { attempted, example })
}
