//! Externally observed session state

use crate::peer::IceConnectionState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of the controller's current session
///
/// `Idle` is reported whenever no session exists. `Closed` is only ever seen
/// in events: once a session is torn down the controller is `Idle` again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No session
    Idle,
    /// Offer/answer exchange and ICE checks in progress
    Negotiating,
    /// Media path established
    Connected,
    /// Connectivity lost, may recover without intervention
    Disconnected,
    /// Connectivity failed, no automatic retry
    Failed,
    /// Session torn down
    Closed,
}

impl SessionState {
    /// Session state driven by a connectivity change, if any
    ///
    /// `new` and `checking` leave the session state alone.
    pub fn from_ice(state: IceConnectionState) -> Option<Self> {
        match state {
            IceConnectionState::New | IceConnectionState::Checking => None,
            IceConnectionState::Connected | IceConnectionState::Completed => {
                Some(SessionState::Connected)
            }
            IceConnectionState::Disconnected => Some(SessionState::Disconnected),
            IceConnectionState::Failed | IceConnectionState::Closed => Some(SessionState::Failed),
        }
    }

    /// Whether remote candidate polling has nothing left to do
    pub fn ends_polling(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Failed | SessionState::Closed
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Failed => "failed",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
