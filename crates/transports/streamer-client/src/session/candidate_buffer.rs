//! Local candidate buffering until the gateway knows the session

use crate::signaling::IceCandidate;
use std::collections::VecDeque;

/// Holds local candidates until the remote description is applied
///
/// Before [`flush`](Self::flush) every candidate is queued. `flush` hands the
/// queue back in arrival order exactly once; from then on [`offer`](Self::offer)
/// returns each candidate straight back for immediate submission.
#[derive(Debug, Default)]
pub struct IceCandidateBuffer {
    pending: VecDeque<IceCandidate>,
    flushed: bool,
}

impl IceCandidateBuffer {
    /// Create an empty, unflushed buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a newly gathered candidate
    ///
    /// Returns the candidate if it should be submitted now, `None` if it was
    /// queued.
    pub fn offer(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        if self.flushed {
            Some(candidate)
        } else {
            self.pending.push_back(candidate);
            None
        }
    }

    /// Drain the queue; later calls return nothing
    pub fn flush(&mut self) -> Vec<IceCandidate> {
        self.flushed = true;
        self.pending.drain(..).collect()
    }

    /// Whether the buffer has been flushed
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }

    /// Number of queued candidates
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
