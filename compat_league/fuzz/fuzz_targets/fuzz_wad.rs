#![no_main]

use std::io::Cursor;

use compat_league::wad;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut cursor = Cursor::new(data);
    if let Ok(toc) = wad::read_toc(&mut cursor) {
        for chunk in toc.chunks().iter().take(64) {
            let _ = toc.read_chunk(&mut cursor, chunk);
        }
    }
});
