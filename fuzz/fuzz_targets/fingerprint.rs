#![no_main]

use libfuzzer_sys::fuzz_target;
use nplusone::fingerprint::{fingerprint, mysql, Dialect};

fuzz_target!(|data: &[u8]| {
    if let Ok(sql) = std::str::from_utf8(data) {
        // Text rules must never panic, including on their own output
        let once = mysql::fingerprint(sql);
        let _ = mysql::fingerprint(&once);

        // Parser-backed path may reject input but must not panic
        let _ = fingerprint(sql, Dialect::Postgres);
    }
});
