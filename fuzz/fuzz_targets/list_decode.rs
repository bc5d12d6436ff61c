//! Fuzz target for list response decoding

#![no_main]

use ferry_core::ListResponse;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(list) = ListResponse::decode(data) {
        // Anything accepted must encode again
        let _ = list.encode();
    }
});
