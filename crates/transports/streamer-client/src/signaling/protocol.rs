//! webrtc-streamer REST protocol types

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::time::Instant;

/// `GET /api/getIceServers`
pub const ICE_SERVERS_PATH: &str = "/api/getIceServers";

/// `POST /api/call`
pub const CALL_PATH: &str = "/api/call";

/// `POST /api/addIceCandidate`
pub const ADD_ICE_CANDIDATE_PATH: &str = "/api/addIceCandidate";

/// `GET /api/getIceCandidate`
pub const GET_ICE_CANDIDATE_PATH: &str = "/api/getIceCandidate";

/// `GET /api/hangup`
pub const HANGUP_PATH: &str = "/api/hangup";

/// Type of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Local proposal
    Offer,
    /// Remote response to an offer
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// Session description exchanged with the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,

    /// SDP text
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Trickle ICE candidate
///
/// `captured_at` is set when a local candidate is generated and never
/// leaves the process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line (`candidate:...`)
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,

    /// Index of the media section the candidate belongs to
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,

    /// Local capture time, used for ordering only
    #[serde(skip)]
    pub captured_at: Option<Instant>,
}

impl IceCandidate {
    /// Create a candidate received from the gateway
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            captured_at: None,
        }
    }

    /// Create a locally generated candidate stamped with the capture time
    pub fn local(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self {
            captured_at: Some(Instant::now()),
            ..Self::new(candidate, sdp_mid, sdp_mline_index)
        }
    }
}

/// ICE servers advertised by the gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// STUN/TURN servers; missing from the payload means none
    #[serde(rename = "iceServers", default)]
    pub ice_servers: Vec<IceServer>,
}

/// One STUN or TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs; the payload may carry a single string or a list
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,

    /// TURN username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// TURN credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Target of an `/api/call` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    /// Client-generated peer identifier
    pub peer_id: String,

    /// Media (video) URL the gateway should relay
    pub media_url: String,

    /// Optional separate audio URL
    pub audio_url: Option<String>,

    /// Optional gateway options string
    pub options: Option<String>,
}

impl CallRequest {
    /// Query parameters in the order the gateway documents them
    pub fn query(&self) -> Vec<(&'static str, &str)> {
        let mut query = vec![("peerid", self.peer_id.as_str()), ("url", self.media_url.as_str())];
        if let Some(audio_url) = self.audio_url.as_deref() {
            query.push(("audiourl", audio_url));
        }
        if let Some(options) = self.options.as_deref() {
            query.push(("options", options));
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_description_wire_format() {
        let offer = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json, serde_json::json!({"type": "offer", "sdp": "v=0\r\n"}));

        let answer: SessionDescription =
            serde_json::from_str(r#"{"type":"answer","sdp":"v=0\r\n"}"#).unwrap();
        assert_eq!(answer.sdp_type, SdpType::Answer);
    }

    #[test]
    fn test_candidate_timestamp_is_never_transmitted() {
        let candidate = IceCandidate::local(
            "candidate:1 1 udp 2122260223 192.168.1.20 54321 typ host",
            Some("0".to_string()),
            Some(0),
        );
        assert!(candidate.captured_at.is_some());

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "candidate": "candidate:1 1 udp 2122260223 192.168.1.20 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0
            })
        );
    }

    #[test]
    fn test_candidate_list_with_missing_fields() {
        let json = r#"[
            {"candidate": "candidate:2 1 udp 1686052607 203.0.113.7 40000 typ srflx", "sdpMid": "video", "sdpMLineIndex": 1},
            {"candidate": "candidate:3 1 tcp 1518280447 10.0.0.9 9 typ host tcptype active"}
        ]"#;

        let candidates: Vec<IceCandidate> = serde_json::from_str(json).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].sdp_mline_index, Some(1));
        assert!(candidates[1].sdp_mid.is_none());
        assert!(candidates[1].captured_at.is_none());
    }

    #[test]
    fn test_ice_servers_accept_string_or_list_urls() {
        let json = r#"{"iceServers": [
            {"urls": "stun:stun.l.google.com:19302"},
            {"urls": ["turn:turn.example.com:3478"], "username": "u", "credential": "c"}
        ]}"#;

        let config: IceServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].urls, vec!["stun:stun.l.google.com:19302"]);
        assert_eq!(config.ice_servers[1].username.as_deref(), Some("u"));
    }

    #[test]
    fn test_ice_servers_missing_key_means_none() {
        let config: IceServerConfig = serde_json::from_str(r#"{"iceTransportPolicy": "all"}"#).unwrap();
        assert!(config.ice_servers.is_empty());
    }

    #[test]
    fn test_call_query_skips_absent_parameters() {
        let request = CallRequest {
            peer_id: "p1".to_string(),
            media_url: "rtsp://cam/101".to_string(),
            audio_url: None,
            options: Some("rtptransport=tcp".to_string()),
        };

        assert_eq!(
            request.query(),
            vec![("peerid", "p1"), ("url", "rtsp://cam/101"), ("options", "rtptransport=tcp")]
        );
    }
}
