#![no_main]

use libfuzzer_sys::fuzz_target;
use systest_parser::SuiteParser;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        let parser = SuiteParser::new().with_known_kinds(["process", "http", "docker"]);
        let _ = parser.parse("fuzz/suite.yaml", content);
    }
});
