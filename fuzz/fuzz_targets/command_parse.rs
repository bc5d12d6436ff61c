//! Fuzz target for command parsing

#![no_main]

use ferry_core::Command;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(Command::Get(name)) = Command::parse(data) {
        assert!(!name.is_empty());
    }
});
