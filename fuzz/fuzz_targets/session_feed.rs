//! Fuzz target for the client transfer session
//!
//! Feeds arbitrary server output, split at arbitrary points, into a session
//! waiting for a list or a file.

#![no_main]

use arbitrary::Arbitrary;
use ferry_core::{SessionEvent, TransferSession};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    download: bool,
    chunks: Vec<Vec<u8>>,
}

fuzz_target!(|input: Input| {
    let mut session = TransferSession::with_max_list_size(64 * 1024);
    let started = if input.download {
        session.begin_download("fuzz.bin")
    } else {
        session.begin_list_request()
    };
    if started.is_err() {
        return;
    }

    let mut body = 0u64;
    for chunk in &input.chunks {
        for event in session.feed(chunk) {
            if let SessionEvent::Body(bytes) = event {
                body += bytes.len() as u64;
            }
        }
    }

    // Never more body than announced
    if let Some(download) = session.download() {
        assert!(download.bytes_received <= download.expected_size);
        assert_eq!(download.bytes_received, body);
    }
});
