#![forbid(unsafe_code)]

//! Locale-aware loading of vendor sensor logs.
//!
//! `load` turns raw bytes into a [`RawRecord`] of canonical columns plus the
//! [`Metadata`] describing how the bytes were interpreted. Structural
//! failures are [`LoadError`]s; recoverable anomalies land in
//! `Metadata::warnings` and are escalated by the caller's runtime policy.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use csv::{ReaderBuilder, Trim};
use pl_runtime::{IssueKind, ParseWarning, Severity, WarningLedger};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod columns;
pub mod decimal;
pub mod delimiter;
pub mod encoding;

pub use columns::{
    Collision, ColumnMapping, HUMIDITY, MappedColumn, PRESSURE, TEMPERATURE, TIMESTAMP, TemperatureUnit,
    canonicalize, map_headers,
};
pub use decimal::DecimalConvention;
pub use delimiter::{DelimiterChoice, DelimiterSource, detect_delimiter};
pub use encoding::{Decoded, canonical_encoding_name, decode};

static METADATA_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^#\s*([^:]+?)\s*:\s*(.*?)\s*$").expect("static regex compiles")
});

/// Spreadsheet serial dates for roughly 1968..2173.
pub const SERIAL_DATE_RANGE: (f64, f64) = (25_000.0, 100_000.0);
/// Plausible epoch seconds (1973..2100).
pub const UNIX_SECONDS_RANGE: (f64, f64) = (1.0e8, 4_102_444_800.0);
/// Plausible epoch milliseconds (1973..2100).
pub const UNIX_MILLIS_RANGE: (f64, f64) = (1.0e11, 4_102_444_800_000.0);

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("input is empty")]
    Empty,
    #[error("input does not look like text (found {nul_count} NUL characters)")]
    Binary { nul_count: usize },
    #[error("input has no header row")]
    MissingHeaders,
    #[error("input has a header row but no data rows")]
    NoDataRows,
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Encoding to try after BOM detection; overrides statistical detection.
    pub encoding_hint: Option<String>,
    /// Skip delimiter sniffing.
    pub delimiter: Option<u8>,
    /// Bytes fed to statistical encoding detection.
    pub sample_bytes: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            encoding_hint: None,
            delimiter: None,
            sample_bytes: 64 * 1024,
        }
    }
}

/// What the candidate timestamp column looks like before any parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampHint {
    Text,
    UnixSeconds,
    UnixMillis,
    SpreadsheetSerial,
    /// Numeric but matching no epoch convention (elapsed seconds, counters).
    Numeric,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// `# key: value` comment lines seen before the header, keys lower-cased.
    pub comments: BTreeMap<String, String>,
    pub encoding: String,
    pub delimiter: char,
    pub decimal: DecimalConvention,
    pub column_mapping: ColumnMapping,
    pub timestamp_hint: TimestampHint,
    pub warnings: WarningLedger,
}

impl Metadata {
    #[must_use]
    pub fn comment(&self, key: &str) -> Option<&str> {
        self.comments.get(key).map(String::as_str)
    }
}

/// Rows under canonical column names, exactly as read (after decimal
/// normalization). Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawRecord {
    #[must_use]
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { headers, rows }
    }

    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == name)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(idx).map_or("", String::as_str))
                .collect(),
        )
    }
}

pub fn load(bytes: &[u8], options: &LoadOptions) -> Result<(RawRecord, Metadata), LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty);
    }

    let mut warnings = WarningLedger::new();
    let hint = options
        .encoding_hint
        .clone()
        .or_else(|| encoding_comment(bytes));
    let decoded = decode(bytes, hint.as_deref(), options.sample_bytes);
    if decoded.fallback {
        #[cfg(feature = "tracing")]
        tracing::warn!(encoding = %decoded.encoding, "input not decodable, using byte-preserving fallback");
        warnings.push(ParseWarning::new(
            Severity::Warning,
            IssueKind::EncodingFallback,
            "input",
            format!(
                "bytes could not be decoded; mapped byte-for-byte as {}",
                decoded.encoding
            ),
        ));
    }

    let nul_count = decoded.text.chars().filter(|ch| *ch == '\0').count();
    if nul_count > 0 {
        return Err(LoadError::Binary { nul_count });
    }

    load_text(&decoded.text, decoded.encoding, options, warnings)
}

/// Value of an `# encoding:` line among the leading comments. Comment lines
/// are read as ASCII, before the body is decoded.
fn encoding_comment(bytes: &[u8]) -> Option<String> {
    let body = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    for line in body.split(|byte| *byte == b'\n') {
        let line = String::from_utf8_lossy(line);
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !trimmed.starts_with('#') {
            return None;
        }
        if let Some(caps) = METADATA_LINE.captures(trimmed)
            && caps[1].eq_ignore_ascii_case("encoding")
            && !caps[2].is_empty()
        {
            #[cfg(feature = "tracing")]
            tracing::debug!(label = &caps[2], "using encoding named in comment");
            return Some(caps[2].to_owned());
        }
    }
    None
}

/// Load already-decoded text.
pub fn load_str(text: &str, options: &LoadOptions) -> Result<(RawRecord, Metadata), LoadError> {
    if text.is_empty() {
        return Err(LoadError::Empty);
    }
    load_text(text, "UTF-8".to_owned(), options, WarningLedger::new())
}

fn load_text(
    text: &str,
    encoding: String,
    options: &LoadOptions,
    mut warnings: WarningLedger,
) -> Result<(RawRecord, Metadata), LoadError> {
    let mut comments = BTreeMap::new();
    let mut data_lines = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            if data_lines.is_empty()
                && let Some(caps) = METADATA_LINE.captures(trimmed)
            {
                comments.insert(caps[1].to_lowercase(), caps[2].to_owned());
            }
            continue;
        }
        data_lines.push(line.trim_end_matches('\r'));
    }

    let Some(header_line) = data_lines.first().copied() else {
        return Err(LoadError::MissingHeaders);
    };
    if data_lines.len() < 2 {
        return Err(LoadError::NoDataRows);
    }

    let choice = match options.delimiter {
        Some(delimiter) => DelimiterChoice {
            delimiter,
            source: DelimiterSource::Explicit,
        },
        None => detect_delimiter(&data_lines),
    };
    match choice.source {
        DelimiterSource::Scored => warnings.push(ParseWarning::new(
            Severity::Warning,
            IssueKind::DelimiterFallback,
            "input",
            format!(
                "no delimiter was consistent across lines; chose {:?} by score",
                char::from(choice.delimiter)
            ),
        )),
        DelimiterSource::Default => {
            #[cfg(feature = "tracing")]
            tracing::warn!("no delimiter detected, defaulting to comma");
            warnings.push(ParseWarning::new(
                Severity::Warning,
                IssueKind::DelimiterFallback,
                "input",
                "no candidate delimiter found; defaulted to comma",
            ));
        }
        DelimiterSource::Structural | DelimiterSource::Explicit => {}
    }

    let body = data_lines.join("\n");
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(choice.delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader
        .headers()?
        .iter()
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if headers.iter().all(String::is_empty) {
        return Err(LoadError::MissingHeaders);
    }

    let mut rows = Vec::new();
    let mut ragged = 0_usize;
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() != headers.len() {
            ragged += 1;
        }
        let mut row = record.iter().map(ToOwned::to_owned).collect::<Vec<_>>();
        row.resize(headers.len(), String::new());
        rows.push(row);
    }
    if rows.is_empty() {
        return Err(LoadError::NoDataRows);
    }
    if ragged > 0 {
        warnings.push(ParseWarning::new(
            Severity::Warning,
            IssueKind::RaggedRows,
            "input",
            format!("{ragged} rows had a field count different from the header and were padded or truncated"),
        ));
    }

    let decimal = decimal::detect_convention(
        rows.iter().take(50).flat_map(|row| row.iter().map(String::as_str)),
        choice.delimiter,
        header_line,
    );
    if decimal == DecimalConvention::Comma {
        warnings.push(ParseWarning::new(
            Severity::Info,
            IssueKind::DecimalComma,
            "input",
            "numbers use a decimal comma and were rewritten",
        ));
    }
    for row in &mut rows {
        for field in row.iter_mut() {
            let normalized = decimal::normalize_numeric(field, decimal);
            if normalized != field.as_str() {
                *field = normalized.into_owned();
            }
        }
    }

    let (mut column_mapping, collisions) = map_headers(&headers);
    for Collision { claimed, renamed } in collisions {
        warnings.push(ParseWarning::new(
            Severity::Warning,
            IssueKind::HeaderCollision,
            claimed.clone(),
            format!("more than one column maps to {claimed}; a later one was renamed {renamed}"),
        ));
    }

    if column_mapping.position(TIMESTAMP).is_none()
        && let Some(first) = column_mapping.columns.first_mut()
        && !first.recognized
    {
        warnings.push(ParseWarning::new(
            Severity::Info,
            IssueKind::TimestampColumnInferred,
            first.original.clone(),
            "no timestamp header recognized; using the first column",
        ));
        first.canonical = TIMESTAMP.to_owned();
        first.recognized = true;
    }

    let record = RawRecord::new(column_mapping.canonical_names(), rows);
    let timestamp_hint = record
        .column(TIMESTAMP)
        .map_or(TimestampHint::Missing, |values| timestamp_hint(&values));

    let metadata = Metadata {
        comments,
        encoding,
        delimiter: char::from(choice.delimiter),
        decimal,
        column_mapping,
        timestamp_hint,
        warnings,
    };

    Ok((record, metadata))
}

/// Classify a candidate timestamp column from its raw values.
#[must_use]
pub fn timestamp_hint(values: &[&str]) -> TimestampHint {
    let present = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>();
    if present.is_empty() {
        return TimestampHint::Missing;
    }

    let Some(numbers) = present
        .iter()
        .map(|value| value.parse::<f64>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>()
    else {
        return TimestampHint::Text;
    };

    let within = |(lo, hi): (f64, f64)| numbers.iter().all(|v| *v >= lo && *v <= hi);

    if within(SERIAL_DATE_RANGE) && plausible_serial_steps(&numbers) {
        TimestampHint::SpreadsheetSerial
    } else if within(UNIX_MILLIS_RANGE) {
        TimestampHint::UnixMillis
    } else if within(UNIX_SECONDS_RANGE) {
        TimestampHint::UnixSeconds
    } else {
        TimestampHint::Numeric
    }
}

/// Successive differences of a day-count column must look like sub-day or
/// daily sampling: finite, at most about a day, and not all zero.
fn plausible_serial_steps(values: &[f64]) -> bool {
    if values.len() < 2 {
        return true;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let steps = sorted
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect::<Vec<_>>();
    let any_progress = steps.iter().any(|step| *step > 0.0);
    let bounded = steps.iter().all(|step| *step <= 1.0 + 1e-9);
    any_progress && bounded
}

#[cfg(test)]
mod tests {
    use pl_runtime::{DecisionAction, IssueKind, PipelineConfig, Severity};

    use super::{
        DecimalConvention, LoadError, LoadOptions, TemperatureUnit, TimestampHint, load, load_str,
        timestamp_hint,
    };

    #[test]
    fn comma_file_with_metadata_is_loaded() {
        let input = "# Oven: Line 3\n# timezone: Europe/Berlin\nTime,Temp (°F),Operator\n2024-01-01T00:00:00Z,356.0,ana\n2024-01-01T00:00:30Z,357.5,ana\n";
        let (record, metadata) = load(input.as_bytes(), &LoadOptions::default()).expect("load");

        assert_eq!(record.headers(), &["timestamp", "temperature", "Operator"]);
        assert_eq!(record.len(), 2);
        assert_eq!(metadata.comment("oven"), Some("Line 3"));
        assert_eq!(metadata.comment("timezone"), Some("Europe/Berlin"));
        assert_eq!(metadata.delimiter, ',');
        assert_eq!(metadata.decimal, DecimalConvention::Dot);
        assert_eq!(
            metadata.column_mapping.unit_of("temperature"),
            Some(TemperatureUnit::Fahrenheit)
        );
        assert_eq!(metadata.timestamp_hint, TimestampHint::Text);
        assert!(metadata.warnings.is_empty());
    }

    #[test]
    fn european_file_is_normalized() {
        let input = "Zeit;T1;T2\n01.02.2024 10:00:00;1.180,5;181,25\n01.02.2024 10:00:30;1.181,0;182,00\n";
        let (record, metadata) = load_str(input, &LoadOptions::default()).expect("load");

        assert_eq!(metadata.delimiter, ';');
        assert_eq!(metadata.decimal, DecimalConvention::Comma);
        assert_eq!(
            record.headers(),
            &["timestamp", "temperature_1", "temperature_2"]
        );
        assert_eq!(
            record.column("temperature_2").expect("column"),
            vec!["181.25", "182.00"]
        );
        assert_eq!(
            record.column("temperature_1").expect("column"),
            vec!["1180.5", "1181.0"]
        );
        assert!(metadata.warnings.contains(IssueKind::DecimalComma));
        assert_eq!(
            record.column("timestamp").expect("column")[0],
            "01.02.2024 10:00:00"
        );
    }

    #[test]
    fn latin1_bytes_are_decoded() {
        let input = b"Zeit;Temperatur \xB0C\n2024-01-01 00:00:00;21,5\n2024-01-01 00:01:00;22,5\n";
        let (record, metadata) = load(input, &LoadOptions::default()).expect("load");
        assert_eq!(record.headers()[1], "temperature");
        assert_eq!(
            metadata.column_mapping.unit_of("temperature"),
            Some(TemperatureUnit::Celsius)
        );
        assert_ne!(metadata.encoding, "UTF-8");
    }

    #[test]
    fn encoding_comment_drives_decoding() {
        let input = b"# encoding: cp1252\n# oven: 4\nZeit;Temperatur \xB0C\n2024-01-01 00:00:00;21,5\n2024-01-01 00:01:00;22,5\n";
        let (record, metadata) = load(input, &LoadOptions::default()).expect("load");
        assert_eq!(metadata.encoding, "windows-1252");
        assert_eq!(metadata.comment("encoding"), Some("cp1252"));
        assert_eq!(record.headers()[1], "temperature");
        assert_eq!(metadata.column_mapping.columns[1].original, "Temperatur °C");
        assert!(!metadata.warnings.contains(IssueKind::EncodingFallback));
    }

    #[test]
    fn explicit_hint_beats_encoding_comment() {
        let input = b"# encoding: windows-1251\ntime,\xD2\xE5\xEC\xEF\n2024-01-01T00:00:00Z,20\n2024-01-01T00:00:30Z,21\n";
        let (record, metadata) = load(input, &LoadOptions::default()).expect("load");
        assert_eq!(metadata.encoding, "windows-1251");
        assert_eq!(record.headers()[1], "Темп");

        let options = LoadOptions {
            encoding_hint: Some("latin1".to_owned()),
            ..LoadOptions::default()
        };
        let (record, metadata) = load(input, &options).expect("load");
        assert_eq!(metadata.encoding, "windows-1252");
        assert_eq!(record.headers()[1], "Òåìï");
    }

    #[test]
    fn ragged_rows_warn_and_escalate_in_strict_mode() {
        let input = "time,temp\n2024-01-01T00:00:00Z,20\n2024-01-01T00:00:30Z,21,spare\n2024-01-01T00:01:00Z,22\n";
        let (record, metadata) = load_str(input, &LoadOptions::default()).expect("load");
        assert_eq!(metadata.delimiter, ',');
        assert_eq!(record.rows()[1], vec!["2024-01-01T00:00:30Z", "21"]);

        let flagged = metadata
            .warnings
            .at_least(Severity::Warning)
            .iter()
            .map(|record| record.kind)
            .collect::<Vec<_>>();
        assert_eq!(
            flagged,
            vec![IssueKind::DelimiterFallback, IssueKind::RaggedRows]
        );
        assert_eq!(
            PipelineConfig::strict().decide_parser_anomalies(&metadata.warnings),
            DecisionAction::Escalate
        );
    }

    #[test]
    fn structural_failures_are_errors() {
        assert!(matches!(
            load(b"", &LoadOptions::default()),
            Err(LoadError::Empty)
        ));
        assert!(matches!(
            load_str("# only: metadata\n\n", &LoadOptions::default()),
            Err(LoadError::MissingHeaders)
        ));
        assert!(matches!(
            load_str("time,temp\n", &LoadOptions::default()),
            Err(LoadError::NoDataRows)
        ));
    }

    #[test]
    fn missing_delimiter_is_a_warning() {
        let (_, metadata) =
            load_str("temperature\n180\n181\n", &LoadOptions::default()).expect("load");
        assert!(metadata.warnings.contains(IssueKind::DelimiterFallback));
    }

    #[test]
    fn serial_dates_are_recognized() {
        assert_eq!(
            timestamp_hint(&["45292.0", "45292.000347", "45292.000694"]),
            TimestampHint::SpreadsheetSerial
        );
        assert_eq!(
            timestamp_hint(&["1704067200", "1704067230"]),
            TimestampHint::UnixSeconds
        );
        assert_eq!(
            timestamp_hint(&["1704067200000", "1704067230000"]),
            TimestampHint::UnixMillis
        );
        assert_eq!(timestamp_hint(&["0", "30", "60"]), TimestampHint::Numeric);
        assert_eq!(
            timestamp_hint(&["2024-01-01T00:00:00Z"]),
            TimestampHint::Text
        );
    }

    #[test]
    fn serial_range_with_implausible_steps_is_not_a_date() {
        assert_eq!(
            timestamp_hint(&["30000", "60000", "90000"]),
            TimestampHint::Numeric
        );
    }

    #[test]
    fn comment_lines_after_header_are_skipped() {
        let input = "time,temp\n# pause\n2024-01-01T00:00:00Z,20\n";
        let (record, metadata) = load_str(input, &LoadOptions::default()).expect("load");
        assert_eq!(record.len(), 1);
        assert!(metadata.comments.is_empty());
    }
}
