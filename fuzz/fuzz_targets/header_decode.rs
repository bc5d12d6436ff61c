//! Fuzz target for header frame decoding
//!
//! Tests that the header decoder handles arbitrary input without panicking.

#![no_main]

use ferry_core::HeaderFrame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Never panics, only Ok or Err
    let _ = HeaderFrame::decode(data);
});
