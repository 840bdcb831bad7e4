#![no_main]

use libfuzzer_sys::fuzz_target;
use systest_core::config::SystestConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        if let Ok(config) = SystestConfig::parse(content) {
            let _ = config.validate();
        }
    }
});
