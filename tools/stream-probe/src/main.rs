//! Stream Probe - check a camera stream through webrtc-streamer
//!
//! Negotiates one session, prints every session event, counts the RTP that
//! arrives on each remote track and hangs up after `--duration` seconds or
//! on Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Probe a camera directly
//! stream-probe --server http://127.0.0.1:8000 --url rtsp://10.0.0.5/Streaming/Channels/101
//!
//! # Only offer H264 and print events as JSON
//! stream-probe --url rtsp://10.0.0.5/Streaming/Channels/101 --prefer-codec video/H264 --json
//!
//! # Use a stream source file
//! stream-probe --source ./channels/lobby.toml --duration 30
//! ```

mod sink;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use sink::RtpCounter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use webrtc_streamer_client::{
    ConnectParams, SessionController, SessionEvent, StreamSource, WebRtcSource,
};

/// Stream Probe - negotiate a webrtc-streamer session and report what arrives
#[derive(Parser)]
#[command(name = "stream-probe")]
#[command(author, version)]
#[command(about = "Negotiate a camera stream through webrtc-streamer and report received media")]
struct Args {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// webrtc-streamer base URL
    #[arg(long, env = "STREAMER_URL", default_value = "http://127.0.0.1:8000")]
    server: String,

    /// Camera URL (or registered alias) to relay
    #[arg(long, required_unless_present = "source")]
    url: Option<String>,

    /// Separate audio URL
    #[arg(long)]
    audio_url: Option<String>,

    /// Gateway options string, e.g. "rtptransport=tcp&timeout=60"
    #[arg(long)]
    options: Option<String>,

    /// Preferred codec, e.g. "video/H264"
    #[arg(long)]
    prefer_codec: Option<String>,

    /// TOML stream source file; replaces the stream flags
    #[arg(long, value_name = "FILE", conflicts_with = "url")]
    source: Option<PathBuf>,

    /// Seconds to stay connected
    #[arg(short, long, default_value_t = 10)]
    duration: u64,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

fn load_source(path: &Path) -> Result<WebRtcSource> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let source: StreamSource =
        toml::from_str(&text).with_context(|| format!("Invalid stream source {}", path.display()))?;

    source.as_webrtc().cloned().ok_or_else(|| {
        anyhow!(
            "{} describes an HLS stream, there is nothing to negotiate",
            path.display()
        )
    })
}

fn resolve_source(args: &Args) -> Result<WebRtcSource> {
    if let Some(path) = args.source.as_deref() {
        return load_source(path);
    }

    let url = args
        .url
        .clone()
        .context("--url is required without --source")?;

    Ok(WebRtcSource {
        server: args.server.clone(),
        url,
        audio_url: args.audio_url.clone(),
        options: args.options.clone(),
        prefer_codec: args.prefer_codec.clone(),
    })
}

fn print_event(event: &SessionEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!("Failed to serialize event: {}", e),
        }
        return;
    }

    match event {
        SessionEvent::StateChanged { state, .. } => println!("state      {}", state),
        SessionEvent::IceState { state, .. } => println!("ice        {}", state),
        SessionEvent::Connected { peer_id } => println!("connected  {}", peer_id),
        SessionEvent::Error { reason, .. } => println!("error      {}", reason),
    }
}

/// Print events until the session fails or the channel closes
async fn watch_events(mut events: broadcast::Receiver<SessionEvent>, json: bool) -> Option<String> {
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(&event, json);
                if let SessionEvent::Error { reason, .. } = event {
                    return Some(reason);
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!("Missed {} events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let source = resolve_source(&args)?;
    let config = source.client_config();
    let counter = Arc::new(RtpCounter::new());

    let controller = SessionController::with_webrtc(config, counter.clone())
        .context("Invalid client configuration")?;
    let events = controller.subscribe();
    let watcher = tokio::spawn(watch_events(events, args.json));

    info!("Connecting to {} via {}", source.url, source.server);
    let peer_id = match controller.connect(ConnectParams::from(&source)).await {
        Ok(peer_id) => peer_id,
        Err(e) if e.is_stream_not_found() => bail!("{} is not known to {}", source.url, source.server),
        Err(e) => return Err(e).context("Negotiation failed"),
    };
    info!("Session {} negotiated", peer_id);

    let failure = tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(args.duration)) => None,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
        reason = watcher => reason.ok().flatten(),
    };

    let snapshot = controller.snapshot();
    controller.disconnect().await;

    println!();
    println!("session    {}", peer_id);
    println!("state      {}", snapshot.state);
    if let Some(connected_for) = snapshot.connected_for {
        println!("connected  {:.1}s", connected_for.as_secs_f64());
    }
    if let Some(indicator) = counter.indicator() {
        println!("indicator  {:?}", indicator);
    }
    for track in counter.tracks() {
        println!(
            "track      {} {} {}: {} packets, {} bytes",
            track.kind,
            track.id,
            track.mime_type,
            track.packets(),
            track.bytes()
        );
    }

    if let Some(reason) = failure {
        bail!("Session failed: {}", reason);
    }
    if snapshot.connected_for.is_none() {
        bail!("Session never connected");
    }

    Ok(())
}
