//! Configuration types for the streamer client

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for a streamer client instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerClientConfig {
    /// Base URL of the webrtc-streamer service (http:// or https://)
    pub server_url: String,

    /// Per-request timeout in milliseconds (default: None, transport default)
    pub request_timeout_ms: Option<u64>,

    /// Delay between remote candidate polls in milliseconds (default: 1000)
    pub candidate_poll_interval_ms: u64,

    /// Maximum number of remote candidate polls per session (default: 30, 0 = unbounded)
    pub max_candidate_polls: u32,

    /// Label of the control data channel opened before the offer (default: "client")
    pub data_channel_label: Option<String>,

    /// Ask the gateway for audio even without a local audio track (default: true)
    pub receive_audio: bool,

    /// Ask the gateway for video even without a local video track (default: true)
    pub receive_video: bool,
}

impl Default for StreamerClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_ms: None,
            candidate_poll_interval_ms: 1000,
            max_candidate_polls: 30,
            data_channel_label: Some("client".to_string()),
            receive_audio: true,
            receive_video: true,
        }
    }
}

impl StreamerClientConfig {
    /// Create a configuration for the given server with default settings
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }

    /// Server URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// Request timeout, if one is configured
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Delay between remote candidate polls
    pub fn candidate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.candidate_poll_interval_ms)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `server_url` is not a valid http:// or https:// URL
    /// - `candidate_poll_interval_ms` is below 50
    /// - `data_channel_label` is set but empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        let parsed = url::Url::parse(self.base_url()).map_err(|e| {
            Error::InvalidConfig(format!("server_url is not a valid URL ({}): {}", self.server_url, e))
        })?;

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::InvalidConfig(format!(
                "server_url must start with http:// or https://, got {}",
                self.server_url
            )));
        }

        if self.candidate_poll_interval_ms < 50 {
            return Err(Error::InvalidConfig(format!(
                "candidate_poll_interval_ms must be at least 50, got {}",
                self.candidate_poll_interval_ms
            )));
        }

        if matches!(self.data_channel_label.as_deref(), Some("")) {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty (use null to disable)".to_string(),
            ));
        }

        Ok(())
    }
}

/// Where a camera channel's live stream comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StreamSource {
    /// Plain HLS playlist, no negotiation needed
    Hls {
        /// Playlist URL
        url: String,
    },
    /// Stream negotiated through a webrtc-streamer gateway
    Webrtc(WebRtcSource),
}

impl StreamSource {
    /// The WebRTC source, if this is one
    pub fn as_webrtc(&self) -> Option<&WebRtcSource> {
        match self {
            StreamSource::Webrtc(source) => Some(source),
            StreamSource::Hls { .. } => None,
        }
    }
}

/// A stream served through webrtc-streamer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcSource {
    /// Base URL of the webrtc-streamer service, e.g. `http://127.0.0.1:8000`
    pub server: String,

    /// Camera RTSP URL (or registered alias) passed to the gateway
    pub url: String,

    /// Optional audio URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,

    /// Optional gateway "options" query string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,

    /// Preferred codec such as `video/H264`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_codec: Option<String>,
}

impl WebRtcSource {
    /// Client configuration pointing at this source's gateway
    pub fn client_config(&self) -> StreamerClientConfig {
        StreamerClientConfig::new(self.server.clone())
    }
}
