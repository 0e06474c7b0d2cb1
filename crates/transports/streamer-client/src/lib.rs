//! Stream negotiation client for webrtc-streamer gateways
//!
//! This crate negotiates live camera streams with a
//! [webrtc-streamer](https://github.com/mpromonet/webrtc-streamer) instance
//! over its REST signaling API.
//!
//! # Features
//!
//! - **Offer/answer over HTTP**: `/api/call` with per-session peer ids
//! - **Trickle ICE both ways**: local candidates are buffered until the
//!   gateway knows the session, remote candidates are polled
//! - **Codec preference**: the offer can be narrowed down to one codec
//! - **Single-session controller**: one session per controller, replaced
//!   atomically by the next `connect`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  SessionController                                   │
//! │  ├─ Signaling (SignalingClient, reqwest)             │
//! │  ├─ PeerConnectionFactory (webrtc crate)             │
//! │  ├─ IceCandidateBuffer                               │
//! │  ├─ SdpCodecFilter (filter_preferred_codec)          │
//! │  └─ MediaSink (remote tracks, visual indicator)      │
//! │     ↓                                                │
//! │  broadcast::Receiver<SessionEvent>                   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use webrtc_streamer_client::{ConnectParams, NullSink, SessionController, StreamerClientConfig};
//!
//! let config = StreamerClientConfig::new("http://127.0.0.1:8000");
//! let controller = SessionController::with_webrtc(config, Arc::new(NullSink))?;
//! let mut events = controller.subscribe();
//!
//! let peer_id = controller
//!     .connect(ConnectParams::new("rtsp://camera/101").with_preferred_codec("video/H264"))
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//!
//! controller.disconnect().await;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod sdp;
pub mod session;
pub mod signaling;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::{StreamSource, StreamerClientConfig, WebRtcSource};
pub use error::{Error, Result};
pub use media::{MediaSink, NullSink, VisualIndicator};
pub use peer::{
    IceConnectionState, OfferOptions, PeerConnection, PeerConnectionFactory, PeerEvent,
    RtcPeerConnection, RtcPeerConnectionFactory,
};
pub use sdp::{filter_preferred_codec, CodecPreference, MediaKind};
pub use session::{
    ConnectParams, IceCandidateBuffer, SessionController, SessionEvent, SessionSnapshot,
    SessionState,
};
pub use signaling::{IceCandidate, IceServerConfig, SessionDescription, Signaling, SignalingClient};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
