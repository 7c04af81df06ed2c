//! Fuzz test for destination parsing and resolution
//!
//! Checks that arbitrary input never panics and that a parsed destination
//! prints back to a string that parses to the same value.
//!
//! Run with: cargo +nightly fuzz run destination_fuzz -- -max_total_time=60

#![no_main]

use conduit_core::Destination;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(parsed) = Destination::parse(input) {
            assert!(!parsed.scheme().is_empty(), "parsed scheme must be non-empty");
            let reparsed = Destination::parse(&parsed.to_string())
                .expect("display output must parse");
            assert_eq!(parsed, reparsed);
        }

        let default = Destination::parse("hdfs://nn:8020").expect("static default");
        if let Ok(resolved) = Destination::resolve(input, Some(&default)) {
            if !input.contains("://") {
                assert_eq!(resolved.scheme(), default.scheme());
                assert_eq!(resolved.authority(), default.authority());
            }
            let reparsed = Destination::parse(&resolved.to_string())
                .expect("resolved display output must parse");
            assert_eq!(resolved, reparsed);
        }
    }
});
