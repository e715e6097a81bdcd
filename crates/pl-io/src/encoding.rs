use std::borrow::Cow;
use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE};
use regex::Regex;

/// Name recorded when bytes could not be decoded and were mapped one byte to
/// one code point.
pub const BYTE_PRESERVING_FALLBACK: &str = "iso-8859-1";

static WINDOWS_CODEPAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:cp|win|windows|ms)[-_ ]?(12[0-9]{2})$").expect("static regex compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub encoding: String,
    pub bom: bool,
    pub fallback: bool,
}

/// Maps vendor spellings (`cp1252`, `Win-1250`, `latin1`, `utf8`) to the
/// canonical WHATWG label.
#[must_use]
pub fn canonical_encoding_name(label: &str) -> String {
    let lowered = label.trim().to_ascii_lowercase();
    if let Some(caps) = WINDOWS_CODEPAGE.captures(&lowered) {
        return format!("windows-{}", &caps[1]);
    }
    match lowered.as_str() {
        "utf8" | "utf-8" | "utf_8" => "utf-8".to_owned(),
        "latin1" | "latin-1" | "l1" | "iso8859-1" | "iso-8859-1" | "iso_8859_1" | "ansi"
        | "ascii" | "us-ascii" => "windows-1252".to_owned(),
        "latin2" | "latin-2" | "iso8859-2" | "iso-8859-2" => "iso-8859-2".to_owned(),
        "utf16" | "utf-16" | "utf16le" | "utf-16le" => "utf-16le".to_owned(),
        "utf16be" | "utf-16be" => "utf-16be".to_owned(),
        "sjis" | "shift-jis" | "shift_jis" => "shift_jis".to_owned(),
        _ => lowered,
    }
}

/// Decode raw bytes: BOM first, then an explicit hint, then UTF-8, then
/// statistical detection over the first `sample_window` bytes. Undecodable
/// input is mapped byte-for-byte and flagged as a fallback.
#[must_use]
pub fn decode(bytes: &[u8], hint: Option<&str>, sample_window: usize) -> Decoded {
    if let Some(decoded) = decode_with_bom(bytes) {
        return decoded;
    }

    if let Some(label) = hint
        && let Some(encoding) = Encoding::for_label(canonical_encoding_name(label).as_bytes())
    {
        return decode_as(encoding, bytes);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Decoded {
            text: text.to_owned(),
            encoding: "UTF-8".to_owned(),
            bom: false,
            fallback: false,
        };
    }

    if let Some(encoding) = sniff_utf16(bytes) {
        return decode_as(encoding, bytes);
    }

    let window = &bytes[..bytes.len().min(sample_window)];
    let mut detector = EncodingDetector::new();
    detector.feed(window, window.len() == bytes.len());
    let guessed = detector.guess(None, true);
    decode_as(guessed, bytes)
}

fn decode_as(encoding: &'static Encoding, bytes: &[u8]) -> Decoded {
    match encoding.decode_without_bom_handling_and_without_replacement(bytes) {
        Some(text) => Decoded {
            text: text.into_owned(),
            encoding: encoding.name().to_owned(),
            bom: false,
            fallback: false,
        },
        None => byte_preserving(bytes),
    }
}

fn byte_preserving(bytes: &[u8]) -> Decoded {
    Decoded {
        text: bytes.iter().map(|byte| char::from(*byte)).collect(),
        encoding: BYTE_PRESERVING_FALLBACK.to_owned(),
        bom: false,
        fallback: true,
    }
}

fn decode_with_bom(bytes: &[u8]) -> Option<Decoded> {
    let (label, body, decoded): (&str, &[u8], Option<Cow<'_, str>>) = match bytes {
        [0xFF, 0xFE, 0x00, 0x00, rest @ ..] => ("UTF-32LE", rest, decode_utf32(rest, false)),
        [0x00, 0x00, 0xFE, 0xFF, rest @ ..] => ("UTF-32BE", rest, decode_utf32(rest, true)),
        [0xEF, 0xBB, 0xBF, rest @ ..] => (
            "UTF-8",
            rest,
            std::str::from_utf8(rest).ok().map(Cow::Borrowed),
        ),
        [0xFF, 0xFE, rest @ ..] => (
            "UTF-16LE",
            rest,
            UTF_16LE.decode_without_bom_handling_and_without_replacement(rest),
        ),
        [0xFE, 0xFF, rest @ ..] => (
            "UTF-16BE",
            rest,
            UTF_16BE.decode_without_bom_handling_and_without_replacement(rest),
        ),
        _ => return None,
    };

    Some(match decoded {
        Some(text) => Decoded {
            text: text.into_owned(),
            encoding: label.to_owned(),
            bom: true,
            fallback: false,
        },
        None => Decoded {
            bom: true,
            ..byte_preserving(body)
        },
    })
}

fn decode_utf32(bytes: &[u8], big_endian: bool) -> Option<Cow<'static, str>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let raw = [chunk[0], chunk[1], chunk[2], chunk[3]];
            let code = if big_endian {
                u32::from_be_bytes(raw)
            } else {
                u32::from_le_bytes(raw)
            };
            char::from_u32(code)
        })
        .collect::<Option<String>>()
        .map(Cow::Owned)
}

/// BOM-less UTF-16 from ASCII-heavy logs shows up as zero bytes on every other
/// position.
fn sniff_utf16(bytes: &[u8]) -> Option<&'static Encoding> {
    let sample = &bytes[..bytes.len().min(4096)];
    if sample.len() < 4 {
        return None;
    }
    let pairs = sample.len() / 2;
    let even_zero = sample.iter().step_by(2).filter(|b| **b == 0).count();
    let odd_zero = sample.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
    if odd_zero * 10 >= pairs * 4 && even_zero * 10 < pairs {
        Some(UTF_16LE)
    } else if even_zero * 10 >= pairs * 4 && odd_zero * 10 < pairs {
        Some(UTF_16BE)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{BYTE_PRESERVING_FALLBACK, canonical_encoding_name, decode};

    #[test]
    fn aliases_map_to_canonical_labels() {
        assert_eq!(canonical_encoding_name("CP1252"), "windows-1252");
        assert_eq!(canonical_encoding_name("Win-1250"), "windows-1250");
        assert_eq!(canonical_encoding_name("latin1"), "windows-1252");
        assert_eq!(canonical_encoding_name("UTF8"), "utf-8");
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let decoded = decode(b"\xEF\xBB\xBFtime,temp\n", None, 1024);
        assert!(decoded.bom);
        assert_eq!(decoded.encoding, "UTF-8");
        assert_eq!(decoded.text, "time,temp\n");
    }

    #[test]
    fn utf16le_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "t;T\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let decoded = decode(&bytes, None, 1024);
        assert_eq!(decoded.encoding, "UTF-16LE");
        assert_eq!(decoded.text, "t;T\n");
    }

    #[test]
    fn utf32le_bom_is_decoded() {
        let mut bytes = vec![0xFF, 0xFE, 0x00, 0x00];
        for ch in "a°".chars() {
            bytes.extend_from_slice(&(ch as u32).to_le_bytes());
        }
        let decoded = decode(&bytes, None, 1024);
        assert_eq!(decoded.encoding, "UTF-32LE");
        assert_eq!(decoded.text, "a°");
    }

    #[test]
    fn windows_1252_degree_sign_is_detected() {
        let bytes = b"Zeit;Temperatur \xB0C\n2024-01-01 00:00:00;21,5\n";
        let decoded = decode(bytes, None, 1024);
        assert!(!decoded.fallback);
        assert!(decoded.text.contains("Temperatur °C"), "{}", decoded.text);
    }

    #[test]
    fn hint_is_honoured() {
        let decoded = decode(b"Temp \xB0F\n", Some("cp1252"), 1024);
        assert_eq!(decoded.encoding, "windows-1252");
        assert_eq!(decoded.text, "Temp °F\n");
    }

    #[test]
    fn broken_utf8_after_bom_falls_back_byte_preserving() {
        let decoded = decode(b"\xEF\xBB\xBFtemp\xFF\n", None, 1024);
        assert!(decoded.fallback);
        assert_eq!(decoded.encoding, BYTE_PRESERVING_FALLBACK);
        assert_eq!(decoded.text.chars().count(), 6);
    }
}
