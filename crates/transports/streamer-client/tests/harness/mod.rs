//! Integration test harness
//!
//! Provides an in-process fake webrtc-streamer ([`FakeStreamer`]) bound to a
//! random loopback port, plus small helpers for waiting on asynchronous
//! effects.

#![allow(dead_code)]

pub mod streamer;

use std::time::Duration;
use webrtc_streamer_client::IceCandidate;

pub use streamer::{FakeStreamer, RecordedRequest};

/// Poll `condition` every 10ms until it holds or `timeout` passes
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Host candidate with a recognizable foundation
pub fn host_candidate(foundation: u32) -> IceCandidate {
    IceCandidate::local(
        format!(
            "candidate:{} 1 udp 2122260223 192.168.1.20 {} typ host",
            foundation,
            50000 + foundation
        ),
        Some("0".to_string()),
        Some(0),
    )
}

/// Candidate as the gateway would return it
pub fn remote_candidate(foundation: u32, address: &str) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:{} 1 udp 1686052607 {} 40000 typ srflx", foundation, address),
        Some("1".to_string()),
        Some(1),
    )
}

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
