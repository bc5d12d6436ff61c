//! Test fixtures

mod loopback;

pub use loopback::{EVENT_TIMEOUT, LoopbackFixture, next_client_event, next_server_event};
