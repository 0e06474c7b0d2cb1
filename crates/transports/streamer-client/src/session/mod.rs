//! Stream sessions
//!
//! A [`SessionController`] owns at most one session at a time and drives it
//! through negotiation, trickle ICE and teardown. Everything observable about
//! the session is published as [`SessionEvent`]s.

pub mod candidate_buffer;
pub mod controller;
pub mod events;
pub mod state;

pub use candidate_buffer::IceCandidateBuffer;
pub use controller::{ConnectParams, SessionController, SessionSnapshot};
pub use events::SessionEvent;
pub use state::SessionState;
