use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use lyra_abr::{AbrMode, AbrOptions};
use lyra_net::{ByteStream, Headers, NetError, NetOptions, RetryPolicy};
use lyra_sample::{Codec, SampleDelivery, StreamAttributes};
use lyra_test_utils::{PTS_HZ, SegmentSpec, build_segment};
use parking_lot::Mutex;
use rstest::rstest;
use url::Url;

use super::*;

/// Serves fixed bodies by path; listed paths always answer 503.
#[derive(Default)]
struct MemoryNet {
    files: HashMap<String, Bytes>,
    broken: HashSet<String>,
    requests: Mutex<Vec<String>>,
}

impl MemoryNet {
    fn serve(mut self, path: &str, body: impl Into<Bytes>) -> Self {
        self.files.insert(path.to_string(), body.into());
        self
    }

    fn broken(mut self, path: &str) -> Self {
        self.broken.insert(path.to_string());
        self
    }

    fn lookup(&self, url: &Url) -> Result<Bytes, NetError> {
        let path = url.path().to_string();
        self.requests.lock().push(path.clone());
        if self.broken.contains(&path) {
            return Err(NetError::http_error(503, url.clone(), None));
        }
        self.files
            .get(&path)
            .cloned()
            .ok_or_else(|| NetError::http_error(404, url.clone(), None))
    }

    fn count(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|p| *p == path).count()
    }
}

#[async_trait]
impl Net for MemoryNet {
    async fn get_bytes(&self, url: Url, _headers: Option<Headers>) -> Result<Bytes, NetError> {
        self.lookup(&url)
    }

    async fn stream(&self, url: Url, _headers: Option<Headers>) -> Result<ByteStream, NetError> {
        let body = self.lookup(&url)?;
        let chunks: Vec<Result<Bytes, NetError>> = (0..body.len())
            .step_by(1000)
            .map(|start| Ok(body.slice(start..(start + 1000).min(body.len()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

fn media_playlist(segments: u64) -> String {
    let mut text =
        String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:0\n");
    for index in 0..segments {
        text.push_str(&format!("#EXTINF:2.0,\nseg{index}.ts\n"));
    }
    text.push_str("#EXT-X-ENDLIST\n");
    text
}

fn segment(index: u64) -> Vec<u8> {
    build_segment(&SegmentSpec {
        start_pts: 10 * PTS_HZ + index * 2 * PTS_HZ,
        ..SegmentSpec::default()
    })
}

fn vod(segments: u64) -> MemoryNet {
    (0..segments).fold(
        MemoryNet::default().serve("/index.m3u8", media_playlist(segments)),
        |net, index| net.serve(&format!("/seg{index}.ts"), segment(index)),
    )
}

fn config(path: &str) -> HlsConfig {
    let fast = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5));
    HlsConfig::new(Url::parse("http://media.test").unwrap().join(path).unwrap())
        .with_net(NetOptions::default().with_retry_policy(fast))
        .with_chunk_packets(16)
}

fn open(config: HlsConfig, net: Arc<MemoryNet>) -> (HlsMediaStreamSource, kanal::AsyncReceiver<SinkEvent>) {
    let (sink, rx) = ChannelSink::new();
    let source = HlsMediaStreamSource::open_with_net(config, net, Arc::new(sink));
    (source, rx.to_async())
}

async fn wait_open(rx: &kanal::AsyncReceiver<SinkEvent>) -> OpenInfo {
    loop {
        match rx.recv().await.unwrap() {
            SinkEvent::Opened(info) => return info,
            SinkEvent::Failed(error) => panic!("source failed: {error}"),
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct Played {
    video: Vec<(i64, bool)>,
    audio: Vec<i64>,
}

/// Pull both streams until each reports end of stream.
async fn play_to_end(
    source: &HlsMediaStreamSource,
    rx: &kanal::AsyncReceiver<SinkEvent>,
) -> Played {
    let mut played = Played::default();
    let mut ended = HashSet::new();
    source.request_sample(MediaType::Video);
    source.request_sample(MediaType::Audio);
    while ended.len() < 2 {
        match rx.recv().await.unwrap() {
            SinkEvent::Delivered(media, SampleDelivery::Sample(sample)) => {
                match media {
                    MediaType::Video => played
                        .video
                        .push((sample.adjusted_timestamp, sample.key_frame)),
                    MediaType::Audio => played.audio.push(sample.adjusted_timestamp),
                }
                source.recycle(media, sample).unwrap();
                source.request_sample(media);
            }
            SinkEvent::Delivered(media, SampleDelivery::EndOfStream) => {
                ended.insert(media);
            }
            SinkEvent::Failed(error) => panic!("source failed: {error}"),
            _ => {}
        }
    }
    played
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn vod_opens_and_plays_to_end_of_stream() {
    let net = Arc::new(vod(3));
    let (source, rx) = open(config("/index.m3u8"), Arc::clone(&net));

    let info = wait_open(&rx).await;
    assert_eq!(info.duration, Some(Duration::from_secs(6)));
    assert!(info.seekable);
    let video = info.video.unwrap();
    assert_eq!(video.codec, Codec::H264);
    assert_eq!(
        video.attributes,
        StreamAttributes::Video {
            width: 320,
            height: 240
        }
    );
    assert_eq!(info.audio.unwrap().codec, Codec::Aac);

    let played = play_to_end(&source, &rx).await;
    assert_eq!(played.video.len(), 150);
    assert_eq!(played.audio.len(), 3 * 94);
    assert_eq!(played.video[0], (0, true));
    assert!(played.video.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(played.audio.windows(2).all(|w| w[0] <= w[1]));

    let diagnostics = source.diagnostics().await.unwrap();
    assert_eq!(diagnostics.current_variant, Some(0));
    assert_eq!(diagnostics.playback.segments_downloaded, 3);
    assert!(!diagnostics.live);

    let summary = source.close().await;
    assert_eq!(summary.segments_downloaded, 3);
    assert_eq!(summary.segments_skipped, 0);
    assert!(summary.average_bandwidth_bps.is_some());
    assert_eq!(net.count("/seg0.ts"), 1);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn failing_segment_is_retried_then_skipped() {
    let net = Arc::new(vod(3).broken("/seg1.ts"));
    let (source, rx) = open(config("/index.m3u8"), Arc::clone(&net));

    wait_open(&rx).await;
    let played = play_to_end(&source, &rx).await;
    assert_eq!(played.video.len(), 100);

    let summary = source.close().await;
    assert_eq!(summary.segments_downloaded, 2);
    assert_eq!(summary.segments_skipped, 1);
    // First try plus the two retries.
    assert_eq!(net.count("/seg1.ts"), 3);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn seek_completes_on_a_key_frame() {
    let net = Arc::new(vod(3));
    let (source, rx) = open(config("/index.m3u8"), net);
    wait_open(&rx).await;

    source.seek(Duration::from_secs(3)).await.unwrap();
    let aligned = loop {
        match rx.recv().await.unwrap() {
            SinkEvent::SeekCompleted(timestamp) => break timestamp,
            SinkEvent::Failed(error) => panic!("source failed: {error}"),
            _ => {}
        }
    };
    // Segment 1 starts at 2 s.
    assert_eq!(aligned, 20_000_000);

    let played = play_to_end(&source, &rx).await;
    assert_eq!(played.video.first(), Some(&(aligned, true)));
    assert_eq!(played.video.len(), 100);
    assert!(played.audio.iter().all(|&ts| ts >= aligned));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn manual_mode_only_fetches_the_pinned_variant() {
    let master = "#EXTM3U\n\
        #EXT-X-STREAM-INF:BANDWIDTH=500000\nlow/index.m3u8\n\
        #EXT-X-STREAM-INF:BANDWIDTH=1500000\nhigh/index.m3u8\n";
    let net = (0..2).fold(
        MemoryNet::default()
            .serve("/master.m3u8", master)
            .serve("/low/index.m3u8", media_playlist(2))
            .serve("/high/index.m3u8", media_playlist(2)),
        |net, index| {
            net.serve(&format!("/low/seg{index}.ts"), segment(index))
                .serve(&format!("/high/seg{index}.ts"), segment(index))
        },
    );
    let net = Arc::new(net);
    let config = config("/master.m3u8")
        .with_abr(AbrOptions::default().with_mode(AbrMode::Manual(1)));
    let (source, rx) = open(config, Arc::clone(&net));

    wait_open(&rx).await;
    play_to_end(&source, &rx).await;
    assert_eq!(source.diagnostics().await.unwrap().bitrate, Some(1_500_000));
    drop(source);

    let requests = net.requests.lock().clone();
    assert!(requests.iter().all(|path| !path.starts_with("/low/")));
    assert!(requests.iter().any(|path| path == "/high/seg1.ts"));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn missing_entry_playlist_fails_once() {
    let net = Arc::new(MemoryNet::default());
    let (source, rx) = open(config("/index.m3u8"), net);

    let error = loop {
        match rx.recv().await.unwrap() {
            SinkEvent::Failed(error) => break error,
            SinkEvent::Opened(_) => panic!("opened without a playlist"),
            _ => {}
        }
    };
    assert!(error.contains("HTTP 404"), "{error}");

    let summary = source.close().await;
    assert_eq!(summary, SessionSummary::default());
    let mut failures = 0;
    while let Ok(Some(event)) = rx.try_recv() {
        failures += usize::from(matches!(event, SinkEvent::Failed(_)));
    }
    assert_eq!(failures, 0);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn closed_source_rejects_commands() {
    let (source, _rx) = open(config("/index.m3u8"), Arc::new(vod(1)));
    source.cancel.cancel();
    assert!(matches!(
        source.seek(Duration::ZERO).await,
        Err(HlsError::Closed)
    ));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn summary_falls_back_to_the_seed_bandwidth() {
    let config = config("/index.m3u8")
        .with_abr(AbrOptions::default().with_initial_bandwidth(Some(3_000_000)));
    let (source, rx) = open(config, Arc::new(MemoryNet::default()));
    while !matches!(rx.recv().await.unwrap(), SinkEvent::Failed(_)) {}
    assert_eq!(
        source.close().await.average_bandwidth_bps,
        Some(3_000_000)
    );
}
