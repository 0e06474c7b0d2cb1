//! Session controller
//!
//! `connect` runs the whole negotiation inline and only returns once the
//! answer is applied, so failures surface to the caller and leave nothing
//! behind. Everything after that (connectivity changes, local candidates,
//! remote tracks, remote candidate polling) runs on background tasks of the
//! session: one for peer events, one for scheduled polls and one per poll
//! requested by a `new` connectivity event. They check the session's
//! cancellation flag after every suspension point, so a torn down session
//! never applies a late result.
//!
//! "Connected" is announced once per session, when the session is connected
//! and the first remote track is attached, whichever happens last.

use super::{IceCandidateBuffer, SessionEvent, SessionState};
use crate::config::{StreamerClientConfig, WebRtcSource};
use crate::media::{MediaSink, VisualIndicator};
use crate::peer::{
    IceConnectionState, OfferOptions, PeerConnection, PeerConnectionFactory, PeerEvent,
    PeerEventReceiver, RtcPeerConnectionFactory,
};
use crate::sdp::{filter_preferred_codec, CodecPreference};
use crate::signaling::{CallRequest, IceCandidate, Signaling, SignalingClient, SessionDescription};
use crate::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

type LocalTrackOf<F> =
    <<F as PeerConnectionFactory>::Connection as PeerConnection>::LocalTrack;
type RemoteTrackOf<F> =
    <<F as PeerConnectionFactory>::Connection as PeerConnection>::RemoteTrack;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What to connect to
#[derive(Debug, Clone)]
pub struct ConnectParams<T> {
    /// Media URL the gateway should relay
    pub media_url: String,

    /// Optional separate audio URL
    pub audio_url: Option<String>,

    /// Optional gateway options string
    pub options: Option<String>,

    /// Codec to narrow the offer down to
    pub preferred_codec: Option<CodecPreference>,

    /// Local tracks attached before the offer is created
    pub local_tracks: Vec<T>,
}

impl<T> ConnectParams<T> {
    /// Parameters for a plain receive-only session
    pub fn new(media_url: impl Into<String>) -> Self {
        Self {
            media_url: media_url.into(),
            audio_url: None,
            options: None,
            preferred_codec: None,
            local_tracks: Vec::new(),
        }
    }

    /// Set the audio URL
    pub fn with_audio_url(mut self, audio_url: impl Into<String>) -> Self {
        self.audio_url = Some(audio_url.into());
        self
    }

    /// Set the gateway options string
    pub fn with_options(mut self, options: impl Into<String>) -> Self {
        self.options = Some(options.into());
        self
    }

    /// Set the codec preference from a `"<kind>/<codec>"` string
    ///
    /// An unusable preference string clears the preference.
    pub fn with_preferred_codec(mut self, preference: &str) -> Self {
        self.preferred_codec = CodecPreference::parse(preference);
        self
    }

    /// Add a local track
    pub fn with_local_track(mut self, track: T) -> Self {
        self.local_tracks.push(track);
        self
    }
}

impl<T> From<&WebRtcSource> for ConnectParams<T> {
    fn from(source: &WebRtcSource) -> Self {
        Self {
            media_url: source.url.clone(),
            audio_url: source.audio_url.clone(),
            options: source.options.clone(),
            preferred_codec: source.prefer_codec.as_deref().and_then(CodecPreference::parse),
            local_tracks: Vec::new(),
        }
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current session, if any
    pub peer_id: Option<String>,
    /// Current state
    pub state: SessionState,
    /// Time since the session first connected
    pub connected_for: Option<Duration>,
}

/// Mutable part of a session, never held across an await
struct SessionStatus<R> {
    state: SessionState,
    pending_tracks: Vec<R>,
    attached_tracks: usize,
    connected_at: Option<Instant>,
    connected_announced: bool,
}

impl<R> SessionStatus<R> {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            pending_tracks: Vec::new(),
            attached_tracks: 0,
            connected_at: None,
            connected_announced: false,
        }
    }

    /// Marks "connected" as announced once the session is connected and
    /// media is attached, whichever comes last
    fn take_connected_announcement(&mut self) -> bool {
        let ready = self.state == SessionState::Connected && self.attached_tracks > 0;
        if !ready || self.connected_announced {
            return false;
        }
        self.connected_announced = true;
        true
    }
}

/// Everything one session's tasks share
struct SessionContext<C: PeerConnection> {
    peer_id: String,
    peer: Arc<C>,
    signaling: Arc<dyn Signaling>,
    sink: Arc<dyn MediaSink<C::RemoteTrack>>,
    events: broadcast::Sender<SessionEvent>,
    status: Mutex<SessionStatus<C::RemoteTrack>>,
    // Held across submissions so flushed and live candidates never interleave
    candidates: tokio::sync::Mutex<IceCandidateBuffer>,
    answered: AtomicBool,
    cancelled: AtomicBool,
    polling_stopped: AtomicBool,
    poll_wakeup: Notify,
    // Polls requested by `new` events
    extra_polls: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: PeerConnection> SessionContext<C> {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stop_polling();
        for poll in lock(&self.extra_polls).drain(..) {
            poll.abort();
        }
    }

    fn stop_polling(&self) {
        self.polling_stopped.store(true, Ordering::SeqCst);
        self.poll_wakeup.notify_waiters();
    }

    fn polling_stopped(&self) -> bool {
        self.polling_stopped.load(Ordering::SeqCst) || self.is_cancelled()
    }

    fn is_answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    /// Remote candidates are dropped once the session is torn down or failed
    fn accepts_remote_candidates(&self) -> bool {
        !self.is_cancelled() && self.state() != SessionState::Failed
    }

    fn state(&self) -> SessionState {
        lock(&self.status).state
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_state(&self, state: SessionState) {
        lock(&self.status).state = state;
        self.emit(SessionEvent::StateChanged {
            peer_id: self.peer_id.clone(),
            state,
        });
    }

    fn announce_connected(&self) {
        info!(peer_id = %self.peer_id, "Session connected");
        self.emit(SessionEvent::Connected {
            peer_id: self.peer_id.clone(),
        });
    }

    async fn handle_local_candidate(&self, candidate: IceCandidate) {
        let mut buffer = self.candidates.lock().await;
        if let Some(candidate) = buffer.offer(candidate) {
            if self.is_cancelled() {
                return;
            }
            self.signaling
                .submit_local_candidate(&self.peer_id, &candidate)
                .await;
        } else {
            debug!(peer_id = %self.peer_id, queued = buffer.len(), "Buffered local candidate");
        }
    }

    async fn flush_candidates(&self) {
        let mut buffer = self.candidates.lock().await;
        let queued = buffer.flush();
        if let Some(oldest) = queued.first().and_then(|c| c.captured_at) {
            debug!(
                peer_id = %self.peer_id,
                count = queued.len(),
                waited_ms = oldest.elapsed().as_millis() as u64,
                "Flushing buffered candidates"
            );
        }
        for candidate in &queued {
            if self.is_cancelled() {
                return;
            }
            self.signaling
                .submit_local_candidate(&self.peer_id, candidate)
                .await;
        }
    }

    fn handle_track(&self, track: C::RemoteTrack) {
        let announce = {
            let mut status = lock(&self.status);
            if status.state != SessionState::Connected {
                status.pending_tracks.push(track);
                return;
            }
            status.attached_tracks += 1;
            status.take_connected_announcement()
        };

        self.sink.attach(track);
        if announce {
            self.announce_connected();
        }
    }

    /// Applies a connectivity change; returns whether a remote candidate
    /// poll should run now
    fn handle_connection_state(&self, ice_state: IceConnectionState) -> bool {
        self.emit(SessionEvent::IceState {
            peer_id: self.peer_id.clone(),
            state: ice_state,
        });

        if ice_state == IceConnectionState::New {
            return self.is_answered() && !self.polling_stopped();
        }

        let Some(next) = SessionState::from_ice(ice_state) else {
            return false;
        };

        let (tracks, announce) = {
            let mut status = lock(&self.status);
            if status.state == SessionState::Failed || status.state == next {
                return false;
            }
            status.state = next;
            if next != SessionState::Connected {
                (Vec::new(), false)
            } else {
                if status.connected_at.is_none() {
                    status.connected_at = Some(Instant::now());
                }
                let tracks = std::mem::take(&mut status.pending_tracks);
                status.attached_tracks += tracks.len();
                (tracks, status.take_connected_announcement())
            }
        };

        if next.ends_polling() {
            self.stop_polling();
        }

        for track in tracks {
            self.sink.attach(track);
        }
        if let Some(indicator) = VisualIndicator::for_state(next) {
            self.sink.set_indicator(indicator);
        }

        self.emit(SessionEvent::StateChanged {
            peer_id: self.peer_id.clone(),
            state: next,
        });

        match next {
            SessionState::Connected if announce => self.announce_connected(),
            SessionState::Disconnected => {
                warn!(peer_id = %self.peer_id, "Connectivity lost");
            }
            SessionState::Failed => {
                let reason = format!("Peer connection {}", ice_state);
                error!(peer_id = %self.peer_id, "{}", reason);
                self.emit(SessionEvent::Error {
                    peer_id: self.peer_id.clone(),
                    reason,
                });
            }
            _ => {}
        }
        false
    }

    /// Fetches and applies remote candidates; returns how many were accepted
    async fn poll_remote_candidates(&self) -> usize {
        let candidates = self.signaling.poll_remote_candidates(&self.peer_id).await;
        if candidates.is_empty() {
            return 0;
        }
        debug!(peer_id = %self.peer_id, count = candidates.len(), "Received remote candidates");

        let mut accepted = 0;
        for candidate in candidates {
            if !self.accepts_remote_candidates() {
                debug!(peer_id = %self.peer_id, "Discarding candidates of a finished session");
                break;
            }
            match self.peer.add_ice_candidate(candidate).await {
                Ok(()) => accepted += 1,
                Err(e) => warn!(peer_id = %self.peer_id, "Skipping remote candidate: {}", e),
            }
        }
        accepted
    }
}

fn spawn_extra_poll<C: PeerConnection>(ctx: &Arc<SessionContext<C>>) {
    let poll_ctx = Arc::clone(ctx);
    let poll = tokio::spawn(async move {
        poll_ctx.poll_remote_candidates().await;
    });

    let mut polls = lock(&ctx.extra_polls);
    polls.retain(|handle| !handle.is_finished());
    if ctx.is_cancelled() {
        poll.abort();
    } else {
        polls.push(poll);
    }
}

async fn run_peer_events<C: PeerConnection>(
    ctx: Arc<SessionContext<C>>,
    mut events: PeerEventReceiver<C::RemoteTrack>,
) {
    while let Some(event) = events.recv().await {
        if ctx.is_cancelled() {
            break;
        }
        match event {
            PeerEvent::ConnectionState(state) => {
                if ctx.handle_connection_state(state) {
                    spawn_extra_poll(&ctx);
                }
            }
            PeerEvent::LocalCandidate(candidate) => ctx.handle_local_candidate(candidate).await,
            PeerEvent::Track(track) => ctx.handle_track(track),
        }
    }
    debug!(peer_id = %ctx.peer_id, "Peer event loop finished");
}

async fn run_candidate_polls<C: PeerConnection>(
    ctx: Arc<SessionContext<C>>,
    interval: Duration,
    max_polls: u32,
) {
    let mut polls: u32 = 0;
    loop {
        if ctx.polling_stopped() || ctx.state().ends_polling() {
            break;
        }
        if max_polls != 0 && polls >= max_polls {
            debug!(peer_id = %ctx.peer_id, polls, "Candidate poll limit reached");
            break;
        }
        polls += 1;
        ctx.poll_remote_candidates().await;

        let wakeup = ctx.poll_wakeup.notified();
        if ctx.polling_stopped() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wakeup => {}
        }
    }
}

struct ActiveSession<C: PeerConnection> {
    ctx: Arc<SessionContext<C>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Drives one stream session at a time against a webrtc-streamer gateway
///
/// Subscribe with [`subscribe`](Self::subscribe) to observe state changes;
/// dropping the receiver ends the subscription.
pub struct SessionController<F: PeerConnectionFactory> {
    signaling: Arc<dyn Signaling>,
    factory: F,
    sink: Arc<dyn MediaSink<RemoteTrackOf<F>>>,
    config: StreamerClientConfig,
    events: broadcast::Sender<SessionEvent>,

    /// Serializes connect and disconnect
    lifecycle: tokio::sync::Mutex<()>,

    /// Current session, readable without waiting on `lifecycle`
    active: Mutex<Option<ActiveSession<F::Connection>>>,
}

impl SessionController<RtcPeerConnectionFactory> {
    /// Controller using the HTTP signaling client and the `webrtc` crate
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration does not validate.
    pub fn with_webrtc(
        config: StreamerClientConfig,
        sink: Arc<dyn MediaSink<RemoteTrackOf<RtcPeerConnectionFactory>>>,
    ) -> Result<Self> {
        let signaling = Arc::new(SignalingClient::new(&config)?);
        Ok(Self::new(signaling, RtcPeerConnectionFactory::new(), sink, config))
    }
}

impl<F: PeerConnectionFactory> SessionController<F> {
    /// Create a controller from its collaborators
    pub fn new(
        signaling: Arc<dyn Signaling>,
        factory: F,
        sink: Arc<dyn MediaSink<RemoteTrackOf<F>>>,
        config: StreamerClientConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            signaling,
            factory,
            sink,
            config,
            events,
            lifecycle: tokio::sync::Mutex::new(()),
            active: Mutex::new(None),
        }
    }

    /// Peer connection factory in use
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current state, `Idle` when no session exists
    pub fn state(&self) -> SessionState {
        lock(&self.active)
            .as_ref()
            .map(|active| active.ctx.state())
            .unwrap_or(SessionState::Idle)
    }

    /// Identifier of the current session
    pub fn peer_id(&self) -> Option<String> {
        lock(&self.active).as_ref().map(|active| active.ctx.peer_id.clone())
    }

    /// Snapshot of the current session
    pub fn snapshot(&self) -> SessionSnapshot {
        let active = lock(&self.active);
        match active.as_ref() {
            None => SessionSnapshot {
                peer_id: None,
                state: SessionState::Idle,
                connected_for: None,
            },
            Some(active) => {
                let status = lock(&active.ctx.status);
                SessionSnapshot {
                    peer_id: Some(active.ctx.peer_id.clone()),
                    state: status.state,
                    connected_for: status.connected_at.map(|at| at.elapsed()),
                }
            }
        }
    }

    /// Ask the gateway for remote candidates now instead of waiting for the
    /// next scheduled poll
    ///
    /// Returns how many candidates the peer connection accepted.
    ///
    /// # Errors
    ///
    /// Returns `State` if there is no session or its answer has not been
    /// applied yet.
    pub async fn poll_remote_candidates(&self) -> Result<usize> {
        let ctx = lock(&self.active)
            .as_ref()
            .map(|active| Arc::clone(&active.ctx))
            .ok_or_else(|| Error::State("no active session".to_string()))?;

        if !ctx.is_answered() {
            return Err(Error::State(format!(
                "session {} has no answer yet",
                ctx.peer_id
            )));
        }
        Ok(ctx.poll_remote_candidates().await)
    }

    /// Negotiate a new session, replacing the current one
    ///
    /// Returns the new session's peer id once the gateway's answer has been
    /// applied. Connectivity is reported later through events.
    ///
    /// # Errors
    ///
    /// - `Config` if the ICE servers cannot be fetched
    /// - `StreamNotFound` if the gateway does not know the media URL
    /// - `Negotiation`, `Transport` or `PeerConnection` for any other failure
    ///   of the offer/answer exchange
    ///
    /// On error the controller is left without a session.
    #[instrument(skip(self, params), fields(url = %params.media_url))]
    pub async fn connect(&self, params: ConnectParams<LocalTrackOf<F>>) -> Result<String> {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;

        let ice_servers = self.signaling.fetch_ice_servers().await.map_err(|e| {
            error!("Failed to fetch ICE servers: {}", e);
            Error::Config(e.to_string())
        })?;

        let (peer, peer_events) = self.factory.create(&ice_servers).await.map_err(|e| {
            error!("Failed to create peer connection: {}", e);
            e
        })?;

        let peer_id = uuid::Uuid::new_v4().to_string();
        let ctx = Arc::new(SessionContext {
            peer_id: peer_id.clone(),
            peer,
            signaling: Arc::clone(&self.signaling),
            sink: Arc::clone(&self.sink),
            events: self.events.clone(),
            status: Mutex::new(SessionStatus::new()),
            candidates: tokio::sync::Mutex::new(IceCandidateBuffer::new()),
            answered: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            polling_stopped: AtomicBool::new(false),
            poll_wakeup: Notify::new(),
            extra_polls: Mutex::new(Vec::new()),
        });

        ctx.set_state(SessionState::Negotiating);
        let event_task = tokio::spawn(run_peer_events(Arc::clone(&ctx), peer_events));
        *lock(&self.active) = Some(ActiveSession {
            ctx: Arc::clone(&ctx),
            tasks: vec![event_task],
        });

        if let Err(e) = self.negotiate(&ctx, params).await {
            error!(peer_id = %peer_id, "Negotiation failed: {}", e);
            self.teardown().await;
            return Err(e);
        }

        let poll_task = tokio::spawn(run_candidate_polls(
            Arc::clone(&ctx),
            self.config.candidate_poll_interval(),
            self.config.max_candidate_polls,
        ));
        if let Some(active) = lock(&self.active).as_mut() {
            active.tasks.push(poll_task);
        }

        info!(peer_id = %peer_id, "Session negotiated");
        Ok(peer_id)
    }

    async fn negotiate(
        &self,
        ctx: &SessionContext<F::Connection>,
        params: ConnectParams<LocalTrackOf<F>>,
    ) -> Result<()> {
        for track in params.local_tracks {
            ctx.peer.add_track(track).await?;
        }

        if let Some(label) = self.config.data_channel_label.as_deref() {
            if let Err(e) = ctx.peer.create_data_channel(label).await {
                warn!(peer_id = %ctx.peer_id, "Failed to open data channel {}: {}", label, e);
            }
        }

        let options = OfferOptions {
            receive_audio: self.config.receive_audio,
            receive_video: self.config.receive_video,
        };
        let mut offer = ctx.peer.create_offer(&options).await?;
        if let Some(preference) = params.preferred_codec.as_ref() {
            debug!(peer_id = %ctx.peer_id, preference = %preference, "Applying codec preference");
            offer = SessionDescription {
                sdp: filter_preferred_codec(&offer.sdp, preference),
                ..offer
            };
        }
        ctx.peer.set_local_description(offer.clone()).await?;

        let request = CallRequest {
            peer_id: ctx.peer_id.clone(),
            media_url: params.media_url,
            audio_url: params.audio_url,
            options: params.options,
        };
        let answer = self.signaling.open_session(&request, &offer).await?;
        ctx.peer.set_remote_description(answer).await?;
        ctx.answered.store(true, Ordering::SeqCst);

        ctx.flush_candidates().await;
        Ok(())
    }

    /// Tear down the current session, if any
    ///
    /// Never fails; hangup and close errors are logged. Calling it without a
    /// session does nothing.
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.teardown().await;
    }

    async fn teardown(&self) {
        let Some(active) = lock(&self.active).take() else {
            return;
        };
        let ctx = active.ctx;

        ctx.cancel();
        for task in active.tasks {
            task.abort();
        }

        self.sink.detach();
        self.sink.set_indicator(VisualIndicator::Faulted);

        self.signaling.close_session(&ctx.peer_id).await;
        if let Err(e) = ctx.peer.close().await {
            warn!(peer_id = %ctx.peer_id, "Failed to close peer connection: {}", e);
        }

        lock(&ctx.status).state = SessionState::Closed;
        ctx.emit(SessionEvent::StateChanged {
            peer_id: ctx.peer_id.clone(),
            state: SessionState::Closed,
        });
        info!(peer_id = %ctx.peer_id, "Session closed");
    }
}

impl<F: PeerConnectionFactory> Drop for SessionController<F> {
    fn drop(&mut self) {
        if let Some(active) = lock(&self.active).take() {
            active.ctx.cancel();
            for task in active.tasks {
                task.abort();
            }
        }
    }
}
