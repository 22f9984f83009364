#![allow(dead_code)]

pub mod mock_socket;
pub mod session_harness;

pub use session_harness::{block, HarnessOptions, PeerFramer, SessionHarness};

/// Route session logs to the test output. `RUST_LOG` overrides the level.
pub fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
