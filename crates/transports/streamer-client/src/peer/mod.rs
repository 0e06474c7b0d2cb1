//! Peer connection capability
//!
//! The session controller never touches a media stack directly. It drives a
//! [`PeerConnection`] created by a [`PeerConnectionFactory`], and everything
//! the connection reports back (connectivity changes, local candidates,
//! remote tracks) arrives on one [`PeerEvent`] channel per connection.
//!
//! [`rtc`] provides the implementation over the `webrtc` crate.

pub mod rtc;

use crate::signaling::{IceCandidate, IceServerConfig, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use rtc::{RtcPeerConnection, RtcPeerConnectionFactory};

/// ICE connectivity state reported by a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceConnectionState {
    /// Gathering has not produced a usable pair yet
    New,
    /// Candidate pairs are being checked
    Checking,
    /// A working pair was found
    Connected,
    /// Checking finished with a working pair
    Completed,
    /// Connectivity was lost, may recover on its own
    Disconnected,
    /// No working pair could be found
    Failed,
    /// The connection was shut down
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// What the offer should ask the remote side to send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    /// Receive audio even without a local audio track
    pub receive_audio: bool,
    /// Receive video even without a local video track
    pub receive_video: bool,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            receive_audio: true,
            receive_video: true,
        }
    }
}

/// Event emitted by a peer connection
#[derive(Debug, Clone)]
pub enum PeerEvent<R> {
    /// ICE connectivity changed
    ConnectionState(IceConnectionState),
    /// A local candidate was gathered
    LocalCandidate(IceCandidate),
    /// The remote side started sending a track
    Track(R),
}

/// Receiving half of a peer connection's event channel
pub type PeerEventReceiver<R> = mpsc::UnboundedReceiver<PeerEvent<R>>;

/// Operations the controller needs from a peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync + 'static {
    /// Local media handed to `add_track`
    type LocalTrack: Send + 'static;

    /// Remote media delivered through [`PeerEvent::Track`]
    type RemoteTrack: Send + 'static;

    /// Attach a local track so it is part of the next offer
    async fn add_track(&self, track: Self::LocalTrack) -> Result<()>;

    /// Open a data channel with the given label
    async fn create_data_channel(&self, label: &str) -> Result<()>;

    /// Create an offer (does not apply it)
    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription>;

    /// Apply the (possibly rewritten) local offer
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply the remote answer
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Add one remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Shut the connection down
    async fn close(&self) -> Result<()>;
}

/// Creates peer connections together with their event channel
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync + 'static {
    /// Connection type produced by this factory
    type Connection: PeerConnection;

    /// Create a connection configured with the given ICE servers
    async fn create(
        &self,
        ice_servers: &IceServerConfig,
    ) -> Result<(
        Arc<Self::Connection>,
        PeerEventReceiver<<Self::Connection as PeerConnection>::RemoteTrack>,
    )>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names_match_browser_names() {
        assert_eq!(IceConnectionState::Checking.to_string(), "checking");
        assert_eq!(IceConnectionState::Disconnected.to_string(), "disconnected");

        let json = serde_json::to_string(&IceConnectionState::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }

    #[test]
    fn test_default_offer_receives_everything() {
        let options = OfferOptions::default();
        assert!(options.receive_audio);
        assert!(options.receive_video);
    }
}
