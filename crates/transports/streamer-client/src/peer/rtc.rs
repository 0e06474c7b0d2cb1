//! Peer connection backed by the `webrtc` crate

use super::{
    IceConnectionState, OfferOptions, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventReceiver,
};
use crate::signaling::{IceCandidate, IceServerConfig, SdpType, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Local media accepted by [`RtcPeerConnection`]
pub type RtcLocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Creates [`RtcPeerConnection`]s with the default codec set and interceptors
#[derive(Debug, Clone, Copy, Default)]
pub struct RtcPeerConnectionFactory;

impl RtcPeerConnectionFactory {
    /// Create a new factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerConnectionFactory {
    type Connection = RtcPeerConnection;

    async fn create(
        &self,
        ice_servers: &IceServerConfig,
    ) -> Result<(Arc<RtcPeerConnection>, PeerEventReceiver<Arc<TrackRemote>>)> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnection(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                Error::PeerConnection(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: rtc_ice_servers(ice_servers),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnection(format!("Failed to create peer connection: {}", e))
        })?);

        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = uuid::Uuid::new_v4().to_string();

        let events = tx.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |state: RTCIceConnectionState| {
                if let Some(state) = map_ice_state(state) {
                    let _ = events.send(PeerEvent::ConnectionState(state));
                }
                Box::pin(async {})
            },
        ));

        let events = tx.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            // None marks the end of gathering
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = events.send(PeerEvent::LocalCandidate(IceCandidate::local(
                            init.candidate,
                            init.sdp_mid,
                            init.sdp_mline_index,
                        )));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {}", e),
                }
            }
            Box::pin(async {})
        }));

        let events = tx;
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            debug!(
                kind = %track.kind(),
                codec = %track.codec().capability.mime_type,
                ssrc = track.ssrc(),
                "Remote track received"
            );
            let _ = events.send(PeerEvent::Track(track));
            Box::pin(async {})
        }));

        info!(connection_id = %connection_id, "Created peer connection");

        Ok((
            Arc::new(RtcPeerConnection {
                connection_id,
                peer_connection,
                sending_kinds: Mutex::new(Vec::new()),
                receivers_added: AtomicBool::new(false),
            }),
            rx,
        ))
    }
}

/// `webrtc::RTCPeerConnection` wrapper implementing [`PeerConnection`]
pub struct RtcPeerConnection {
    /// Unique identifier for this connection instance
    connection_id: String,

    /// Actual WebRTC peer connection
    peer_connection: Arc<RTCPeerConnection>,

    /// Kinds covered by a local track
    sending_kinds: Mutex<Vec<RTPCodecType>>,

    /// Receive-only transceivers are added once, before the first offer
    receivers_added: AtomicBool,
}

impl RtcPeerConnection {
    /// Get the connection ID
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Underlying `webrtc` peer connection, e.g. for stats
    pub fn inner(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    async fn add_receivers(&self, options: &OfferOptions) -> Result<()> {
        let sending = self
            .sending_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let wanted = [
            (options.receive_audio, RTPCodecType::Audio),
            (options.receive_video, RTPCodecType::Video),
        ];

        for (receive, kind) in wanted {
            if !receive || sending.contains(&kind) {
                continue;
            }
            self.peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| {
                    Error::PeerConnection(format!("Failed to add {} transceiver: {}", kind, e))
                })?;
        }

        Ok(())
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    type LocalTrack = RtcLocalTrack;
    type RemoteTrack = Arc<TrackRemote>;

    async fn add_track(&self, track: RtcLocalTrack) -> Result<()> {
        let kind = track.kind();
        let sender = self
            .peer_connection
            .add_track(track)
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to add track: {}", e)))?;

        self.sending_kinds
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kind);

        // Interceptors only run while RTCP is being read
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<()> {
        self.peer_connection
            .create_data_channel(label, None)
            .await
            .map(|_| ())
            .map_err(|e| Error::PeerConnection(format!("Failed to create data channel: {}", e)))
    }

    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription> {
        if !self.receivers_added.swap(true, Ordering::SeqCst) {
            self.add_receivers(options).await?;
        }

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to create offer: {}", e)))?;

        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_local_description(to_rtc_description(description)?)
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to set local description: {}", e)))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(to_rtc_description(description)?)
            .await
            .map_err(|e| {
                Error::PeerConnection(format!("Failed to set remote description: {}", e))
            })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        info!(connection_id = %self.connection_id, "Closing peer connection");

        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::PeerConnection(format!("Failed to close connection: {}", e)))
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
    };
    parsed.map_err(|e| Error::PeerConnection(format!("Invalid {}: {}", description.sdp_type, e)))
}

fn rtc_ice_servers(config: &IceServerConfig) -> Vec<RTCIceServer> {
    config
        .ice_servers
        .iter()
        .map(|server| {
            #[allow(clippy::needless_update)]
            RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            }
        })
        .collect()
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<IceConnectionState> {
    match state {
        RTCIceConnectionState::New => Some(IceConnectionState::New),
        RTCIceConnectionState::Checking => Some(IceConnectionState::Checking),
        RTCIceConnectionState::Connected => Some(IceConnectionState::Connected),
        RTCIceConnectionState::Completed => Some(IceConnectionState::Completed),
        RTCIceConnectionState::Disconnected => Some(IceConnectionState::Disconnected),
        RTCIceConnectionState::Failed => Some(IceConnectionState::Failed),
        RTCIceConnectionState::Closed => Some(IceConnectionState::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::IceServer;

    #[test]
    fn test_ice_server_conversion() {
        let config = IceServerConfig {
            ice_servers: vec![
                IceServer {
                    urls: vec!["stun:stun.l.google.com:19302".to_string()],
                    username: None,
                    credential: None,
                },
                IceServer {
                    urls: vec!["turn:turn.example.com:3478".to_string()],
                    username: Some("nvr".to_string()),
                    credential: Some("secret".to_string()),
                },
            ],
        };

        let servers = rtc_ice_servers(&config);
        assert_eq!(servers.len(), 2);
        assert!(servers[0].username.is_empty());
        assert_eq!(servers[1].credential, "secret");
    }

    #[test]
    fn test_ice_state_mapping() {
        assert_eq!(
            map_ice_state(RTCIceConnectionState::Checking),
            Some(IceConnectionState::Checking)
        );
        assert_eq!(map_ice_state(RTCIceConnectionState::Unspecified), None);
    }

    #[tokio::test]
    async fn test_offer_contains_receive_only_media() {
        let factory = RtcPeerConnectionFactory::new();
        let (pc, _events) = factory.create(&IceServerConfig::default()).await.unwrap();

        pc.create_data_channel("client").await.unwrap();
        let offer = pc.create_offer(&OfferOptions::default()).await.unwrap();

        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("a=recvonly"));
        assert!(offer.sdp.contains("m=application"));

        pc.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_answer_is_rejected() {
        let factory = RtcPeerConnectionFactory::new();
        let (pc, _events) = factory.create(&IceServerConfig::default()).await.unwrap();

        let offer = pc.create_offer(&OfferOptions::default()).await.unwrap();
        pc.set_local_description(offer).await.unwrap();

        let result = pc
            .set_remote_description(SessionDescription::answer("not sdp"))
            .await;
        assert!(matches!(result, Err(Error::PeerConnection(_))));

        pc.close().await.unwrap();
    }
}
