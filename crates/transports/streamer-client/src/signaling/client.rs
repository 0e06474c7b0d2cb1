//! HTTP signaling client for the webrtc-streamer REST API

use super::protocol::*;
use crate::config::StreamerClientConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Signaling operations used by the session controller
///
/// Only `fetch_ice_servers` and `open_session` can fail. The trickle and
/// hangup calls are best-effort: implementations log their failures and
/// carry on.
#[async_trait]
pub trait Signaling: Send + Sync {
    /// ICE servers to configure peer connections with
    async fn fetch_ice_servers(&self) -> Result<IceServerConfig>;

    /// Post the local offer and return the gateway's answer
    async fn open_session(
        &self,
        request: &CallRequest,
        offer: &SessionDescription,
    ) -> Result<SessionDescription>;

    /// Hand one local candidate to the gateway
    async fn submit_local_candidate(&self, peer_id: &str, candidate: &IceCandidate);

    /// Remote candidates gathered by the gateway since the last poll
    async fn poll_remote_candidates(&self, peer_id: &str) -> Vec<IceCandidate>;

    /// Ask the gateway to drop the session
    async fn close_session(&self, peer_id: &str);
}

/// REST client for one webrtc-streamer instance
///
/// The ICE server list is fetched once and kept for the lifetime of the
/// client; create a new client to refresh it.
pub struct SignalingClient {
    /// Base URL without trailing slash
    base_url: String,

    /// Reqwest HTTP client
    client: reqwest::Client,

    /// ICE servers from the first successful fetch
    ice_servers: OnceCell<IceServerConfig>,
}

impl SignalingClient {
    /// Create a new signaling client
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate and
    /// `Transport` if the HTTP client cannot be built.
    pub fn new(config: &StreamerClientConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url().to_string(),
            client,
            ice_servers: OnceCell::new(),
        })
    }

    /// Base URL requests are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the ICE server list has already been fetched
    pub fn has_cached_ice_servers(&self) -> bool {
        self.ice_servers.initialized()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request_ice_servers(&self) -> Result<IceServerConfig> {
        let response = self
            .client
            .get(self.endpoint(ICE_SERVERS_PATH))
            .send()
            .await
            .map_err(|e| Error::Transport(format!("getIceServers request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("getIceServers HTTP {}", status.as_u16())));
        }

        let config: IceServerConfig = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Invalid getIceServers payload: {}", e)))?;

        info!(servers = config.ice_servers.len(), "Fetched ICE server configuration");

        Ok(config)
    }
}

#[async_trait]
impl Signaling for SignalingClient {
    async fn fetch_ice_servers(&self) -> Result<IceServerConfig> {
        self.ice_servers
            .get_or_try_init(|| self.request_ice_servers())
            .await
            .cloned()
    }

    async fn open_session(
        &self,
        request: &CallRequest,
        offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        debug!(peer_id = %request.peer_id, url = %request.media_url, "Posting offer");

        let response = self
            .client
            .post(self.endpoint(CALL_PATH))
            .query(&request.query())
            .json(offer)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("call request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::StreamNotFound(request.media_url.clone()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Negotiation(format!(
                "call HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let answer: SessionDescription = response
            .json()
            .await
            .map_err(|e| Error::Negotiation(format!("Invalid answer payload: {}", e)))?;

        if answer.sdp_type != SdpType::Answer {
            return Err(Error::Negotiation(format!(
                "Expected an answer, gateway returned {}",
                answer.sdp_type
            )));
        }

        Ok(answer)
    }

    async fn submit_local_candidate(&self, peer_id: &str, candidate: &IceCandidate) {
        let result = self
            .client
            .post(self.endpoint(ADD_ICE_CANDIDATE_PATH))
            .query(&[("peerid", peer_id)])
            .json(candidate)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(peer_id = %peer_id, candidate = %candidate.candidate, "Submitted local candidate");
            }
            Ok(response) => {
                warn!(peer_id = %peer_id, status = response.status().as_u16(), "addIceCandidate rejected");
            }
            Err(e) => {
                warn!(peer_id = %peer_id, "addIceCandidate failed: {}", e);
            }
        }
    }

    async fn poll_remote_candidates(&self, peer_id: &str) -> Vec<IceCandidate> {
        let response = match self
            .client
            .get(self.endpoint(GET_ICE_CANDIDATE_PATH))
            .query(&[("peerid", peer_id)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(peer_id = %peer_id, "getIceCandidate failed: {}", e);
                return Vec::new();
            }
        };

        if !response.status().is_success() {
            debug!(peer_id = %peer_id, status = response.status().as_u16(), "getIceCandidate returned no candidates");
            return Vec::new();
        }

        match response.json::<Option<Vec<IceCandidate>>>().await {
            Ok(candidates) => candidates.unwrap_or_default(),
            Err(e) => {
                warn!(peer_id = %peer_id, "Invalid getIceCandidate payload: {}", e);
                Vec::new()
            }
        }
    }

    async fn close_session(&self, peer_id: &str) {
        let result = self
            .client
            .get(self.endpoint(HANGUP_PATH))
            .query(&[("peerid", peer_id)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(peer_id = %peer_id, "Session hung up");
            }
            Ok(response) => {
                warn!(peer_id = %peer_id, status = response.status().as_u16(), "hangup failed");
            }
            Err(e) => {
                warn!(peer_id = %peer_id, "hangup error: {}", e);
            }
        }
    }
}
