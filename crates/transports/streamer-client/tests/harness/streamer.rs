//! Fake webrtc-streamer REST API
//!
//! Serves the five signaling endpoints with canned responses, records every
//! request, and lets a test override the status or raw body of any endpoint.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;
use webrtc_streamer_client::signaling::protocol::{
    ADD_ICE_CANDIDATE_PATH, CALL_PATH, GET_ICE_CANDIDATE_PATH, HANGUP_PATH, ICE_SERVERS_PATH,
};

/// Answer SDP returned by `/api/call`
pub const ANSWER_SDP: &str = "v=0\r\no=- 7 2 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

/// One request as seen by the fake
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method
    pub method: &'static str,
    /// Request path
    pub path: &'static str,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// JSON body, if one was sent and parsed
    pub body: Option<Value>,
}

#[derive(Default)]
struct FakeState {
    requests: Mutex<Vec<RecordedRequest>>,
    status_overrides: Mutex<HashMap<&'static str, StatusCode>>,
    body_overrides: Mutex<HashMap<&'static str, String>>,
    ice_servers: Mutex<Value>,
    remote_candidates: Mutex<Vec<Value>>,
}

impl FakeState {
    fn record(
        &self,
        method: &'static str,
        path: &'static str,
        query: HashMap<String, String>,
        body: &[u8],
    ) {
        let body = serde_json::from_slice(body).ok();
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path,
            query,
            body,
        });
    }

    /// Status or raw body configured for `path`, if any
    fn overridden(&self, path: &'static str) -> Option<Response> {
        if let Some(status) = self.status_overrides.lock().unwrap().get(path) {
            return Some((*status, "overridden").into_response());
        }
        self.body_overrides.lock().unwrap().get(path).map(|body| {
            ([(header::CONTENT_TYPE, "application/json")], body.clone()).into_response()
        })
    }
}

/// In-process webrtc-streamer stand-in
pub struct FakeStreamer {
    addr: SocketAddr,
    state: Arc<FakeState>,
    server_handle: JoinHandle<()>,
}

impl FakeStreamer {
    /// Start the fake on a random loopback port
    pub async fn start() -> Self {
        let state = Arc::new(FakeState::default());
        *state.ice_servers.lock().unwrap() =
            json!({"iceServers": [{"urls": ["stun:stun.l.google.com:19302"]}]});

        let router = Router::new()
            .route(ICE_SERVERS_PATH, get(ice_servers_handler))
            .route(CALL_PATH, post(call_handler))
            .route(ADD_ICE_CANDIDATE_PATH, post(add_candidate_handler))
            .route(GET_ICE_CANDIDATE_PATH, get(get_candidates_handler))
            .route(HANGUP_PATH, get(hangup_handler))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake streamer");
        let addr = listener.local_addr().expect("fake streamer address");
        info!("Fake streamer listening on {}", addr);

        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            state,
            server_handle,
        }
    }

    /// Base URL to configure clients with
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Requests received for one path
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.path == path)
            .collect()
    }

    /// Number of requests received for one path
    pub fn hits(&self, path: &str) -> usize {
        self.requests_to(path).len()
    }

    /// Answer `path` with a bare status
    pub fn set_status(&self, path: &'static str, status: StatusCode) {
        self.state
            .status_overrides
            .lock()
            .unwrap()
            .insert(path, status);
    }

    /// Answer `path` with 200 and a raw JSON body
    pub fn set_body(&self, path: &'static str, body: impl Into<String>) {
        self.state
            .body_overrides
            .lock()
            .unwrap()
            .insert(path, body.into());
    }

    /// Drop every override
    pub fn clear_overrides(&self) {
        self.state.status_overrides.lock().unwrap().clear();
        self.state.body_overrides.lock().unwrap().clear();
    }

    /// Replace the `/api/getIceServers` payload
    pub fn set_ice_servers(&self, payload: Value) {
        *self.state.ice_servers.lock().unwrap() = payload;
    }

    /// Queue candidates for the next `/api/getIceCandidate`
    pub fn push_remote_candidate(&self, candidate: Value) {
        self.state.remote_candidates.lock().unwrap().push(candidate);
    }
}

impl Drop for FakeStreamer {
    fn drop(&mut self) {
        self.server_handle.abort();
    }
}

async fn ice_servers_handler(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("GET", ICE_SERVERS_PATH, query, &[]);
    if let Some(response) = state.overridden(ICE_SERVERS_PATH) {
        return response;
    }
    Json(state.ice_servers.lock().unwrap().clone()).into_response()
}

async fn call_handler(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    state.record("POST", CALL_PATH, query, &body);
    if let Some(response) = state.overridden(CALL_PATH) {
        return response;
    }
    Json(json!({"type": "answer", "sdp": ANSWER_SDP})).into_response()
}

async fn add_candidate_handler(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    state.record("POST", ADD_ICE_CANDIDATE_PATH, query, &body);
    if let Some(response) = state.overridden(ADD_ICE_CANDIDATE_PATH) {
        return response;
    }
    Json(json!(true)).into_response()
}

async fn get_candidates_handler(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("GET", GET_ICE_CANDIDATE_PATH, query, &[]);
    if let Some(response) = state.overridden(GET_ICE_CANDIDATE_PATH) {
        return response;
    }
    let candidates: Vec<Value> = state.remote_candidates.lock().unwrap().drain(..).collect();
    Json(candidates).into_response()
}

async fn hangup_handler(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("GET", HANGUP_PATH, query, &[]);
    if let Some(response) = state.overridden(HANGUP_PATH) {
        return response;
    }
    StatusCode::OK.into_response()
}
