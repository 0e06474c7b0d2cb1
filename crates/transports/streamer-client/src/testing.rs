//! Test doubles for the session controller
//!
//! Enabled with the `test-util` feature. [`MockPeerFactory`] hands out
//! [`MockPeer`]s whose events are injected by the test, [`MockSignaling`]
//! stands in for the gateway and records every call in order, and
//! [`RecordingSink`] records what would have been rendered.

use crate::media::{MediaSink, VisualIndicator};
use crate::peer::{
    IceConnectionState, OfferOptions, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventReceiver,
};
use crate::signaling::{CallRequest, IceCandidate, IceServerConfig, SessionDescription, Signaling};
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Offer produced by [`MockPeer`] unless configured otherwise
pub const DEFAULT_OFFER_SDP: &str = "v=0\r\n\
o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111 0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=recvonly\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98\r\n\
a=mid:1\r\n\
a=rtpmap:96 H264/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=fmtp:96 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n\
a=rtpmap:97 VP8/90000\r\n\
a=rtcp-fb:97 nack\r\n\
a=rtpmap:98 VP9/90000\r\n\
a=recvonly\r\n";

/// How the mock peers created by one factory behave
#[derive(Debug, Clone)]
pub struct MockPeerBehavior {
    /// SDP returned by `create_offer`
    pub offer_sdp: String,
    /// Local candidates emitted when the local description is applied
    pub candidates_on_local_description: Vec<IceCandidate>,
    /// Make `set_remote_description` fail
    pub fail_remote_description: bool,
    /// Make `create_data_channel` fail
    pub fail_data_channel: bool,
    /// Reject remote candidates whose line contains this text
    pub reject_candidates_containing: Option<String>,
}

impl Default for MockPeerBehavior {
    fn default() -> Self {
        Self {
            offer_sdp: DEFAULT_OFFER_SDP.to_string(),
            candidates_on_local_description: Vec::new(),
            fail_remote_description: false,
            fail_data_channel: false,
            reject_candidates_containing: None,
        }
    }
}

/// Scripted peer connection
pub struct MockPeer {
    behavior: MockPeerBehavior,
    events: mpsc::UnboundedSender<PeerEvent<String>>,
    ice_servers: IceServerConfig,
    calls: Mutex<Vec<String>>,
    offer_options: Mutex<Option<OfferOptions>>,
    local_description: Mutex<Option<SessionDescription>>,
    remote_description: Mutex<Option<SessionDescription>>,
    remote_candidates: Mutex<Vec<IceCandidate>>,
    closed: AtomicBool,
}

impl MockPeer {
    fn record(&self, call: impl Into<String>) {
        lock(&self.calls).push(call.into());
    }

    /// Report a connectivity change
    pub fn emit_state(&self, state: IceConnectionState) {
        let _ = self.events.send(PeerEvent::ConnectionState(state));
    }

    /// Report a gathered local candidate
    pub fn emit_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
    }

    /// Report an incoming remote track
    pub fn emit_track(&self, track: impl Into<String>) {
        let _ = self.events.send(PeerEvent::Track(track.into()));
    }

    /// Calls made on this peer, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// ICE servers the peer was created with
    pub fn ice_servers(&self) -> &IceServerConfig {
        &self.ice_servers
    }

    /// Options passed to the last `create_offer`
    pub fn offer_options(&self) -> Option<OfferOptions> {
        *lock(&self.offer_options)
    }

    /// Applied local description
    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local_description).clone()
    }

    /// Applied remote description
    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote_description).clone()
    }

    /// Remote candidates accepted so far
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.remote_candidates).clone()
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    type LocalTrack = String;
    type RemoteTrack = String;

    async fn add_track(&self, track: String) -> Result<()> {
        self.record(format!("add_track:{}", track));
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<()> {
        self.record(format!("create_data_channel:{}", label));
        if self.behavior.fail_data_channel {
            return Err(Error::PeerConnection("data channels disabled".to_string()));
        }
        Ok(())
    }

    async fn create_offer(&self, options: &OfferOptions) -> Result<SessionDescription> {
        self.record("create_offer");
        *lock(&self.offer_options) = Some(*options);
        Ok(SessionDescription::offer(self.behavior.offer_sdp.clone()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        self.record("set_local_description");
        *lock(&self.local_description) = Some(description);
        for candidate in &self.behavior.candidates_on_local_description {
            self.emit_candidate(candidate.clone());
        }
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record("set_remote_description");
        if self.behavior.fail_remote_description {
            return Err(Error::PeerConnection("remote description rejected".to_string()));
        }
        *lock(&self.remote_description) = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.record("add_ice_candidate");
        if let Some(needle) = self.behavior.reject_candidates_containing.as_deref() {
            if candidate.candidate.contains(needle) {
                return Err(Error::PeerConnection(format!(
                    "candidate rejected: {}",
                    candidate.candidate
                )));
            }
        }
        lock(&self.remote_candidates).push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing [`MockPeer`]s
#[derive(Default)]
pub struct MockPeerFactory {
    behavior: Mutex<MockPeerBehavior>,
    peers: Mutex<Vec<Arc<MockPeer>>>,
    fail_create: AtomicBool,
}

impl MockPeerFactory {
    /// Factory with default behavior
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory whose peers behave as given
    pub fn with_behavior(behavior: MockPeerBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            ..Self::default()
        }
    }

    /// Change the behavior of peers created from now on
    pub fn set_behavior(&self, behavior: MockPeerBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Make `create` fail
    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Every peer created so far
    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        lock(&self.peers).clone()
    }

    /// Most recently created peer
    pub fn last_peer(&self) -> Option<Arc<MockPeer>> {
        lock(&self.peers).last().cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    type Connection = MockPeer;

    async fn create(
        &self,
        ice_servers: &IceServerConfig,
    ) -> Result<(Arc<MockPeer>, PeerEventReceiver<String>)> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::PeerConnection("peer creation disabled".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Arc::new(MockPeer {
            behavior: lock(&self.behavior).clone(),
            events: tx,
            ice_servers: ice_servers.clone(),
            calls: Mutex::new(Vec::new()),
            offer_options: Mutex::new(None),
            local_description: Mutex::new(None),
            remote_description: Mutex::new(None),
            remote_candidates: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        lock(&self.peers).push(Arc::clone(&peer));
        Ok((peer, rx))
    }
}

/// Scripted outcome of `open_session`
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Return an answer with this SDP
    Answer(String),
    /// Behave like a 404
    NotFound,
    /// Behave like any other non-2xx
    Rejected(u16),
    /// Behave like a network failure
    Unreachable,
}

/// In-memory gateway
///
/// Every call is appended to [`log`](Self::log): `getIceServers`, `call`,
/// `addIceCandidate:<candidate>`, `getIceCandidate`, `hangup:<peer_id>`.
pub struct MockSignaling {
    ice_servers: IceServerConfig,
    cached: Mutex<Option<IceServerConfig>>,
    fail_ice_servers: AtomicBool,
    call_outcome: Mutex<CallOutcome>,
    remote_candidates: Mutex<VecDeque<Vec<IceCandidate>>>,
    poll_delay: Mutex<Duration>,
    log: Mutex<Vec<String>>,
    ice_fetches: AtomicUsize,
    polls: AtomicUsize,
    calls: Mutex<Vec<(CallRequest, SessionDescription)>>,
    submitted: Mutex<Vec<(String, IceCandidate)>>,
    hangups: Mutex<Vec<String>>,
}

impl Default for MockSignaling {
    fn default() -> Self {
        Self {
            ice_servers: IceServerConfig::default(),
            cached: Mutex::new(None),
            fail_ice_servers: AtomicBool::new(false),
            call_outcome: Mutex::new(CallOutcome::Answer(
                "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n".to_string(),
            )),
            remote_candidates: Mutex::new(VecDeque::new()),
            poll_delay: Mutex::new(Duration::ZERO),
            log: Mutex::new(Vec::new()),
            ice_fetches: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            hangups: Mutex::new(Vec::new()),
        }
    }
}

impl MockSignaling {
    /// Gateway answering every call
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway advertising the given ICE servers
    pub fn with_ice_servers(ice_servers: IceServerConfig) -> Self {
        Self {
            ice_servers,
            ..Self::default()
        }
    }

    /// Make ICE server fetches fail
    pub fn fail_ice_servers(&self, fail: bool) {
        self.fail_ice_servers.store(fail, Ordering::SeqCst);
    }

    /// Script the outcome of the next `open_session` calls
    pub fn set_call_outcome(&self, outcome: CallOutcome) {
        *lock(&self.call_outcome) = outcome;
    }

    /// Queue the result of one future poll
    pub fn queue_remote_candidates(&self, candidates: Vec<IceCandidate>) {
        lock(&self.remote_candidates).push_back(candidates);
    }

    /// Hold every poll for this long before answering
    pub fn set_poll_delay(&self, delay: Duration) {
        *lock(&self.poll_delay) = delay;
    }

    /// Every call, in order
    pub fn log(&self) -> Vec<String> {
        lock(&self.log).clone()
    }

    /// Number of ICE server requests that reached the gateway
    pub fn ice_fetches(&self) -> usize {
        self.ice_fetches.load(Ordering::SeqCst)
    }

    /// Number of remote candidate polls
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// `open_session` requests with their offers
    pub fn calls(&self) -> Vec<(CallRequest, SessionDescription)> {
        lock(&self.calls).clone()
    }

    /// Submitted local candidates with their peer id
    pub fn submitted(&self) -> Vec<(String, IceCandidate)> {
        lock(&self.submitted).clone()
    }

    /// Peer ids that were hung up
    pub fn hangups(&self) -> Vec<String> {
        lock(&self.hangups).clone()
    }

    fn record(&self, entry: impl Into<String>) {
        lock(&self.log).push(entry.into());
    }
}

#[async_trait]
impl Signaling for MockSignaling {
    async fn fetch_ice_servers(&self) -> Result<IceServerConfig> {
        if let Some(cached) = lock(&self.cached).clone() {
            return Ok(cached);
        }

        self.record("getIceServers");
        self.ice_fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_ice_servers.load(Ordering::SeqCst) {
            return Err(Error::Transport("getIceServers HTTP 503".to_string()));
        }

        *lock(&self.cached) = Some(self.ice_servers.clone());
        Ok(self.ice_servers.clone())
    }

    async fn open_session(
        &self,
        request: &CallRequest,
        offer: &SessionDescription,
    ) -> Result<SessionDescription> {
        self.record("call");
        lock(&self.calls).push((request.clone(), offer.clone()));

        let outcome = lock(&self.call_outcome).clone();
        match outcome {
            CallOutcome::Answer(sdp) => Ok(SessionDescription::answer(sdp)),
            CallOutcome::NotFound => Err(Error::StreamNotFound(request.media_url.clone())),
            CallOutcome::Rejected(status) => {
                Err(Error::Negotiation(format!("call HTTP {}", status)))
            }
            CallOutcome::Unreachable => {
                Err(Error::Transport("call request failed: connection refused".to_string()))
            }
        }
    }

    async fn submit_local_candidate(&self, peer_id: &str, candidate: &IceCandidate) {
        self.record(format!("addIceCandidate:{}", candidate.candidate));
        lock(&self.submitted).push((peer_id.to_string(), candidate.clone()));
    }

    async fn poll_remote_candidates(&self, _peer_id: &str) -> Vec<IceCandidate> {
        self.record("getIceCandidate");
        self.polls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.poll_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.remote_candidates).pop_front().unwrap_or_default()
    }

    async fn close_session(&self, peer_id: &str) {
        self.record(format!("hangup:{}", peer_id));
        lock(&self.hangups).push(peer_id.to_string());
    }
}

/// Sink recording attached tracks and indicator changes
#[derive(Default)]
pub struct RecordingSink {
    attached: Mutex<Vec<String>>,
    indicators: Mutex<Vec<VisualIndicator>>,
    detaches: AtomicUsize,
}

impl RecordingSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks currently attached
    pub fn attached(&self) -> Vec<String> {
        lock(&self.attached).clone()
    }

    /// Indicators in the order they were set
    pub fn indicators(&self) -> Vec<VisualIndicator> {
        lock(&self.indicators).clone()
    }

    /// Number of `detach` calls
    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl MediaSink<String> for RecordingSink {
    fn attach(&self, track: String) {
        lock(&self.attached).push(track);
    }

    fn detach(&self) {
        lock(&self.attached).clear();
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }

    fn set_indicator(&self, indicator: VisualIndicator) {
        lock(&self.indicators).push(indicator);
    }
}
