use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static EUROPEAN_GROUPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?\d{1,3}(?:\.\d{3})+(?:,\d+)?$").expect("static regex compiles")
});
static COMMA_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d*,\d+$").expect("static regex compiles"));
static DOT_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d*\.\d+(?:[eE][+-]?\d+)?$").expect("static regex compiles"));
static ANGLO_GROUPED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?\d{1,3}(?:,\d{3})+(?:\.\d+)?$").expect("static regex compiles")
});
static PLAIN_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(?:\d+(?:[.,]\d*)?|[.,]\d+)(?:[eE][+-]?\d+)?$")
        .expect("static regex compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimalConvention {
    /// `1,234.56`
    Dot,
    /// `1.234,56`
    Comma,
}

#[must_use]
pub fn looks_numeric(token: &str) -> bool {
    PLAIN_NUMBER.is_match(token.trim())
}

/// A header that splits into more than three comma-separated fields, most of
/// them non-numeric, is using the comma as a field separator.
#[must_use]
pub fn comma_is_field_separator(header: &str) -> bool {
    let fields = header.split(',').map(str::trim).collect::<Vec<_>>();
    if fields.len() <= 3 {
        return false;
    }
    let non_numeric = fields.iter().filter(|field| !looks_numeric(field)).count();
    non_numeric * 2 > fields.len()
}

/// Votes across already-split fields. `1.234` on its own is ambiguous and
/// does not vote.
#[must_use]
pub fn detect_convention<'a>(
    fields: impl IntoIterator<Item = &'a str>,
    delimiter: u8,
    header: &str,
) -> DecimalConvention {
    let mut comma_votes = 0_usize;
    let mut dot_votes = 0_usize;
    for field in fields {
        let field = field.trim();
        if EUROPEAN_GROUPED.is_match(field) {
            if field.contains(',') {
                comma_votes += 1;
            }
        } else if COMMA_DECIMAL.is_match(field) {
            comma_votes += 1;
        } else if DOT_DECIMAL.is_match(field) || ANGLO_GROUPED.is_match(field) {
            dot_votes += 1;
        }
    }

    if comma_votes > dot_votes && !(delimiter != b',' && comma_is_field_separator(header)) {
        DecimalConvention::Comma
    } else {
        DecimalConvention::Dot
    }
}

/// Rewrites a numeric token into Rust's `f64` syntax. Anything that does not
/// look like a number is returned untouched.
#[must_use]
pub fn normalize_numeric(token: &str, convention: DecimalConvention) -> Cow<'_, str> {
    let trimmed = token.trim();
    match convention {
        DecimalConvention::Comma => {
            if EUROPEAN_GROUPED.is_match(trimmed) {
                Cow::Owned(trimmed.replace('.', "").replace(',', "."))
            } else if COMMA_DECIMAL.is_match(trimmed) {
                Cow::Owned(trimmed.replace(',', "."))
            } else {
                Cow::Borrowed(token)
            }
        }
        DecimalConvention::Dot => {
            if ANGLO_GROUPED.is_match(trimmed) {
                Cow::Owned(trimmed.replace(',', ""))
            } else {
                Cow::Borrowed(token)
            }
        }
    }
}
