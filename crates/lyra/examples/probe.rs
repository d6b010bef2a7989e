//! Open an HLS stream, pull samples for a while and report what came out.
//!
//! ```
//! cargo run -p lyra --example probe [URL] [SECONDS]
//! ```

use std::{
    env::args,
    error::Error,
    sync::Arc,
    time::{Duration, Instant},
};

use lyra::prelude::*;
use tracing::{debug, info, metadata::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::default()
                .add_directive("lyra_hls=info".parse()?)
                .add_directive("lyra_net=warn".parse()?)
                .add_directive(LevelFilter::INFO.into()),
        )
        .with_line_number(false)
        .with_file(false)
        .init();

    let url: Url = args()
        .nth(1)
        .unwrap_or_else(|| "https://test-streams.mux.dev/x36xhzz/x36xhzz.m3u8".to_string())
        .parse()?;
    let seconds: u64 = args().nth(2).map_or(Ok(20), |s| s.parse())?;

    info!("Opening HLS stream: {url}");
    let (sink, rx) = ChannelSink::new();
    let source = HlsMediaStreamSource::open(HlsConfig::new(url), Arc::new(sink))?;
    let mut events = source.events();
    let rx = rx.to_async();

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut counts = [0u64; 2];
    let mut ended = [false; 2];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::select! {
            () = tokio::time::sleep(remaining) => {
                info!("Time is up");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => debug!(?event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => warn!(n, "events lagged"),
                Err(_) => {}
            },
            received = rx.recv() => match received? {
                SinkEvent::Opened(info) => {
                    info!(
                        duration = ?info.duration,
                        seekable = info.seekable,
                        video = ?info.video.as_ref().map(|d| &d.attributes),
                        audio = ?info.audio.as_ref().map(|d| d.codec),
                        "Opened"
                    );
                    source.request_sample(MediaType::Video);
                    source.request_sample(MediaType::Audio);
                }
                SinkEvent::Delivered(media, SampleDelivery::Sample(sample)) => {
                    let slot = usize::from(media == MediaType::Audio);
                    counts[slot] += 1;
                    debug!(%media, ts = sample.adjusted_timestamp, key = sample.key_frame, "sample");
                    source.recycle(media, sample)?;
                    source.request_sample(media);
                }
                SinkEvent::Delivered(media, SampleDelivery::EndOfStream) => {
                    info!(%media, "End of stream");
                    ended[usize::from(media == MediaType::Audio)] = true;
                    if ended.iter().all(|e| *e) {
                        break;
                    }
                }
                SinkEvent::BufferingProgress(progress) => debug!(progress, "buffering"),
                SinkEvent::SeekCompleted(ts) => debug!(ts, "seek completed"),
                SinkEvent::Failed(error) => {
                    warn!(%error, "Playback failed");
                    break;
                }
            },
        }
    }

    if let Ok(diagnostics) = source.diagnostics().await {
        info!(?diagnostics, "Diagnostics");
    }
    let summary = source.close().await;
    info!(
        video = counts[0],
        audio = counts[1],
        average_bps = ?summary.average_bandwidth_bps,
        segments = summary.segments_downloaded,
        skipped = summary.segments_skipped,
        "Done"
    );
    Ok(())
}
