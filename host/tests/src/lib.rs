//! Host integration test framework
//!
//! [`RecordingEnvironment`] is a GAP environment that records everything the GAP controller does
//! and [`PairingHarness`] connects two Security Managers back to back.

mod gap;
mod pairing;

pub use gap::{Record, RecordingEnvironment};
pub use pairing::{Device, LoopbackController, PairingHarness, Request};

/// Initialize logging for a test
///
/// Only the first call within a test binary has any effect.
pub fn init_logging() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
}
