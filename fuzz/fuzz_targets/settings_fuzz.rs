//! Fuzz test for cache settings loading
//!
//! Settings that load successfully must also validate and survive a
//! property-style update without panicking.
//!
//! Run with: cargo +nightly fuzz run settings_fuzz -- -max_total_time=60

#![no_main]

use conduit_core::{CacheSettings, CacheSettingsSource};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(mut settings) = CacheSettings::from_toml_str(input) {
            assert!(settings.validate().is_ok());
            let schemes: Vec<String> = settings.schemes.keys().cloned().collect();
            for scheme in schemes {
                let _ = settings.is_cache_disabled(&scheme);
                let _ = settings.set_property(&format!("fs.{}.impl.disable.cache", scheme), "true");
                assert!(settings.is_cache_disabled(&scheme));
            }
        }

        let mut settings = CacheSettings::new();
        if let Some((key, value)) = input.split_once('=') {
            let _ = settings.set_property(key, value);
        }
    }
});
