//! Fuzz harness for the locale-aware loader.
//!
//! Arbitrary bytes go through encoding detection, delimiter sniffing and
//! header mapping. The loader must return `Ok` or `Err`, never panic, and
//! every loaded row must have one cell per header.

#![no_main]
use libfuzzer_sys::fuzz_target;
use proofline::{LoadOptions, load};

fuzz_target!(|data: &[u8]| {
    let options = LoadOptions::default();
    if let Ok((record, metadata)) = load(data, &options) {
        assert_eq!(record.headers().len(), metadata.column_mapping.columns.len());
        for row in record.rows() {
            assert_eq!(row.len(), record.headers().len());
        }
    }

    // Forced delimiter and encoding take the non-sniffing paths.
    let forced = LoadOptions {
        delimiter: Some(b';'),
        encoding_hint: Some("windows-1252".to_owned()),
        ..LoadOptions::default()
    };
    let _ = load(data, &forced);
});
