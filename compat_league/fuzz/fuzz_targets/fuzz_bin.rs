#![no_main]

use compat_league::bin;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(doc) = bin::parse_bin(data) {
        let _ = doc.to_bytes();
    }
});
