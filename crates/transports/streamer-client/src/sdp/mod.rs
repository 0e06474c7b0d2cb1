//! Session description rewriting
//!
//! Offers are produced by the peer connection with every codec it supports.
//! Gateways that transcode nothing (webrtc-streamer relaying an RTSP camera)
//! negotiate far more reliably when the offer only lists the codec the camera
//! actually emits, so the offer is narrowed before it is sent.

pub mod codec_filter;

pub use codec_filter::{filter_preferred_codec, CodecPreference, MediaKind};
