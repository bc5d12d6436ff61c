//! Transfer bookkeeping.
//!
//! Progress arithmetic shared by both directions, rate/ETA tracking for
//! user-facing status, and the server's per-connection upload state.

pub mod progress;
pub mod upload;

pub use progress::{TransferProgress, percent};
pub use upload::ActiveUpload;
