//! Rendering side of a session
//!
//! A [`MediaSink`] receives the remote tracks once the session connects and a
//! [`VisualIndicator`] whenever the externally visible state changes. What
//! "rendering" means is up to the sink: a player widget, a recorder, or the
//! packet counter used by `stream-probe`.

use crate::session::SessionState;
use serde::{Deserialize, Serialize};

/// How prominently the stream should be shown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualIndicator {
    /// Media is flowing
    Live,
    /// Connectivity was lost and may come back
    Degraded,
    /// The session failed or was closed
    Faulted,
}

impl VisualIndicator {
    /// Indicator for a session state, `None` while nothing has been shown yet
    pub fn for_state(state: SessionState) -> Option<Self> {
        match state {
            SessionState::Idle | SessionState::Negotiating => None,
            SessionState::Connected => Some(VisualIndicator::Live),
            SessionState::Disconnected => Some(VisualIndicator::Degraded),
            SessionState::Failed | SessionState::Closed => Some(VisualIndicator::Faulted),
        }
    }

    /// Opacity a video element should use for this indicator
    pub fn opacity(&self) -> f32 {
        match self {
            VisualIndicator::Live => 1.0,
            VisualIndicator::Degraded => 0.4,
            VisualIndicator::Faulted => 0.6,
        }
    }
}

/// Consumer of remote media
///
/// Calls are made from the session's event task and must return quickly;
/// sinks that need to do I/O should spawn their own tasks.
pub trait MediaSink<R>: Send + Sync {
    /// Start rendering a remote track
    fn attach(&self, track: R);

    /// Stop rendering and drop every attached track
    fn detach(&self);

    /// Reflect the session state
    fn set_indicator(&self, indicator: VisualIndicator);
}

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl<R> MediaSink<R> for NullSink {
    fn attach(&self, _track: R) {}

    fn detach(&self) {}

    fn set_indicator(&self, _indicator: VisualIndicator) {}
}
