//! Error types for stream negotiation

/// Result type alias using the client Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or tearing down a stream session
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid client configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// ICE server configuration could not be obtained
    #[error("ICE server configuration unavailable: {0}")]
    Config(String),

    /// The gateway does not know the requested stream (`/api/call` returned 404)
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Offer/answer exchange rejected by the signaling service
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Network-level failure talking to the signaling service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation requires an active peer connection
    #[error("Invalid state: {0}")]
    State(String),

    /// The peer connection rejected an operation
    #[error("Peer connection error: {0}")]
    PeerConnection(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Config(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_) | Error::Config(_))
    }

    /// Check if the gateway reported the stream as unknown
    pub fn is_stream_not_found(&self) -> bool {
        matches!(self, Error::StreamNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::StreamNotFound("rtsp://cam/1".to_string());
        assert_eq!(err.to_string(), "Stream not found: rtsp://cam/1");

        let err = Error::Negotiation("call HTTP 500".to_string());
        assert_eq!(err.to_string(), "Negotiation failed: call HTTP 500");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::Transport("reset".to_string()).is_retryable());
        assert!(Error::Config("unreachable".to_string()).is_retryable());
        assert!(!Error::StreamNotFound("x".to_string()).is_retryable());
        assert!(!Error::Negotiation("x".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_config_error() {
        assert!(Error::InvalidConfig("x".to_string()).is_config_error());
        assert!(Error::Config("x".to_string()).is_config_error());
        assert!(!Error::State("x".to_string()).is_config_error());
    }

    #[test]
    fn test_stream_not_found_is_distinct() {
        assert!(Error::StreamNotFound("x".to_string()).is_stream_not_found());
        assert!(!Error::Transport("x".to_string()).is_stream_not_found());
        assert!(!Error::Negotiation("x".to_string()).is_stream_not_found());
    }

    #[test]
    fn test_state_error_is_terminal() {
        let err = Error::State("no active session".to_string());
        assert_eq!(err.to_string(), "Invalid state: no active session");
        assert!(!err.is_retryable());
        assert!(!err.is_stream_not_found());
    }
}
