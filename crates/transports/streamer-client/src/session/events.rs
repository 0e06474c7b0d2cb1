//! Events published by the session controller

use super::SessionState;
use crate::peer::IceConnectionState;
use serde::{Deserialize, Serialize};

/// Tagged event on the controller's broadcast channel
///
/// Every event names the session it belongs to, so a subscriber that outlives
/// several `connect` calls can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The session state changed
    StateChanged {
        /// Session identifier
        peer_id: String,
        /// New state
        state: SessionState,
    },

    /// Raw connectivity change reported by the peer connection
    IceState {
        /// Session identifier
        peer_id: String,
        /// Reported state
        state: IceConnectionState,
    },

    /// Remote media is attached and flowing; fires once per session
    Connected {
        /// Session identifier
        peer_id: String,
    },

    /// The session failed
    Error {
        /// Session identifier
        peer_id: String,
        /// Human readable reason
        reason: String,
    },
}

impl SessionEvent {
    /// Session this event belongs to
    pub fn peer_id(&self) -> &str {
        match self {
            SessionEvent::StateChanged { peer_id, .. }
            | SessionEvent::IceState { peer_id, .. }
            | SessionEvent::Connected { peer_id }
            | SessionEvent::Error { peer_id, .. } => peer_id,
        }
    }
}
