//! Signaling against the webrtc-streamer gateway
//!
//! The gateway exposes a small REST API: one endpoint for its ICE servers,
//! one to post an offer and get the answer, two for trickle ICE in each
//! direction, and one to hang up.

pub mod client;
pub mod protocol;

pub use client::{Signaling, SignalingClient};
pub use protocol::{CallRequest, IceCandidate, IceServer, IceServerConfig, SdpType, SessionDescription};
