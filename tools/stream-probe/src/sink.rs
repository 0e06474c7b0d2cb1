//! Media sink that counts RTP instead of rendering it

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use webrtc::track::track_remote::TrackRemote;
use webrtc_streamer_client::{MediaSink, VisualIndicator};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Packet counters for one remote track
#[derive(Debug)]
pub struct TrackStats {
    /// Track id
    pub id: String,
    /// `audio` or `video`
    pub kind: String,
    /// Negotiated MIME type
    pub mime_type: String,
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl TrackStats {
    /// RTP packets read so far
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Payload bytes read so far
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

/// Reads every attached track to the end and counts what it sees
#[derive(Default)]
pub struct RtpCounter {
    tracks: Mutex<Vec<Arc<TrackStats>>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    indicator: Mutex<Option<VisualIndicator>>,
}

impl RtpCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats of every track attached so far
    pub fn tracks(&self) -> Vec<Arc<TrackStats>> {
        lock(&self.tracks).clone()
    }

    /// Last indicator set by the controller
    pub fn indicator(&self) -> Option<VisualIndicator> {
        *lock(&self.indicator)
    }
}

impl MediaSink<Arc<TrackRemote>> for RtpCounter {
    fn attach(&self, track: Arc<TrackRemote>) {
        let stats = Arc::new(TrackStats {
            id: track.id(),
            kind: track.kind().to_string(),
            mime_type: track.codec().capability.mime_type,
            packets: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        });
        info!("Receiving {} track {} ({})", stats.kind, stats.id, stats.mime_type);

        let counters = Arc::clone(&stats);
        let reader = tokio::spawn(async move {
            while let Ok((packet, _)) = track.read_rtp().await {
                counters.packets.fetch_add(1, Ordering::Relaxed);
                counters
                    .bytes
                    .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
            }
            debug!("Track {} ended", counters.id);
        });

        lock(&self.tracks).push(stats);
        lock(&self.readers).push(reader);
    }

    fn detach(&self) {
        for reader in lock(&self.readers).drain(..) {
            reader.abort();
        }
    }

    fn set_indicator(&self, indicator: VisualIndicator) {
        debug!("Indicator {:?} (opacity {})", indicator, indicator.opacity());
        *lock(&self.indicator) = Some(indicator);
    }
}
