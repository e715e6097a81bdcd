/// Candidate delimiters in preference order.
pub const CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Number of leading data lines inspected.
pub const SNIFF_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimiterSource {
    /// Every sampled line had the same non-zero count.
    Structural,
    /// No candidate was consistent; chosen by score.
    Scored,
    /// Nothing matched; comma assumed.
    Default,
    /// Supplied by the caller.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterChoice {
    pub delimiter: u8,
    pub source: DelimiterSource,
}

/// Occurrences of `delimiter` outside double-quoted sections.
#[must_use]
pub fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut quoted = false;
    let mut count = 0;
    for byte in line.bytes() {
        if byte == b'"' {
            quoted = !quoted;
        } else if byte == delimiter && !quoted {
            count += 1;
        }
    }
    count
}

/// Pick the delimiter for `lines`, which must already exclude comments and
/// blank lines.
#[must_use]
pub fn detect_delimiter(lines: &[&str]) -> DelimiterChoice {
    let sample = &lines[..lines.len().min(SNIFF_LINES)];
    if sample.is_empty() {
        return DelimiterChoice {
            delimiter: b',',
            source: DelimiterSource::Default,
        };
    }

    let counts = CANDIDATES
        .iter()
        .map(|candidate| {
            sample
                .iter()
                .map(|line| count_unquoted(line, *candidate))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();

    for (candidate, per_line) in CANDIDATES.iter().zip(&counts) {
        let first = per_line[0];
        if first > 0 && per_line.iter().all(|count| *count == first) {
            return DelimiterChoice {
                delimiter: *candidate,
                source: DelimiterSource::Structural,
            };
        }
    }

    let mut best: Option<(u8, f64)> = None;
    for (candidate, per_line) in CANDIDATES.iter().zip(&counts) {
        let score = score(per_line);
        if score > 0.0 && best.is_none_or(|(_, top)| score > top) {
            best = Some((*candidate, score));
        }
    }

    match best {
        Some((delimiter, _)) => DelimiterChoice {
            delimiter,
            source: DelimiterSource::Scored,
        },
        None => DelimiterChoice {
            delimiter: b',',
            source: DelimiterSource::Default,
        },
    }
}

/// Mean occurrence count times a consistency bonus that decays with the
/// variance across lines.
fn score(per_line: &[usize]) -> f64 {
    let n = per_line.len() as f64;
    let mean = per_line.iter().sum::<usize>() as f64 / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = per_line
        .iter()
        .map(|count| (*count as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    mean * (1.0 / (1.0 + variance))
}

#[cfg(test)]
mod tests {
    use super::{DelimiterSource, count_unquoted, detect_delimiter};

    #[test]
    fn semicolon_wins_over_decimal_commas() {
        let lines = ["Zeit;T1;T2", "2024-01-01 00:00:00;180,5;181,0"];
        let choice = detect_delimiter(&lines);
        assert_eq!(choice.delimiter, b';');
        assert_eq!(choice.source, DelimiterSource::Structural);
    }

    #[test]
    fn comma_files_are_structural() {
        let lines = ["time,temp", "2024-01-01T00:00:00Z,180.5"];
        assert_eq!(detect_delimiter(&lines).delimiter, b',');
    }

    #[test]
    fn tab_and_pipe_are_detected() {
        assert_eq!(detect_delimiter(&["a\tb", "1\t2"]).delimiter, b'\t');
        assert_eq!(detect_delimiter(&["a|b|c", "1|2|3"]).delimiter, b'|');
    }

    #[test]
    fn ragged_lines_fall_back_to_score() {
        let lines = ["a|b|c", "1|2|3|4", "1|2"];
        let choice = detect_delimiter(&lines);
        assert_eq!(choice.delimiter, b'|');
        assert_eq!(choice.source, DelimiterSource::Scored);
    }

    #[test]
    fn single_column_defaults_to_comma() {
        let choice = detect_delimiter(&["temperature", "180"]);
        assert_eq!(choice.delimiter, b',');
        assert_eq!(choice.source, DelimiterSource::Default);
    }

    #[test]
    fn quoted_delimiters_are_ignored() {
        assert_eq!(count_unquoted("\"a,b\",c", b','), 1);
    }
}
