#![forbid(unsafe_code)]

use std::time::Duration;

use lyra::prelude::*;
use rstest::{fixture, rstest};

use super::fixture::{
    AUDIO_FRAMES_PER_2S, Content, HlsServer, MediaPlaylist, Player, VIDEO_FRAMES_PER_SECOND,
    init_tracing, test_config, ts_segment,
};

#[fixture]
async fn vod_server() -> HlsServer {
    init_tracing();
    let content = Content::default();
    content.put("/vod/index.m3u8", MediaPlaylist::vod(3).render());
    for sequence in 0..3 {
        content.put(&format!("/vod/seg{sequence}.ts"), ts_segment(sequence, 2));
    }
    HlsServer::new(content).await
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn vod_session_opens_and_plays_to_end(#[future] vod_server: HlsServer) {
    let server = vod_server.await;
    let mut player = Player::open(test_config(server.url("/vod/index.m3u8")));

    let info = player.wait_open().await;
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

    let played = player.play_to_end().await;
    assert_eq!(played.video.len(), 6 * VIDEO_FRAMES_PER_SECOND);
    assert_eq!(played.audio.len(), 3 * AUDIO_FRAMES_PER_2S);
    // The first segment starts at PTS 10 s; the host sees zero.
    assert_eq!(played.video[0], (0, true));
    assert!(played.video.windows(2).all(|w| w[0].0 < w[1].0));
    assert!(played.audio.windows(2).all(|w| w[0] <= w[1]));

    let events = player.drain_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, HlsEvent::VariantsDiscovered { bitrates } if bitrates.len() == 1))
    );
    let completed = events
        .iter()
        .filter(|e| matches!(e, HlsEvent::SegmentCompleted { .. }))
        .count();
    assert_eq!(completed, 3);
    assert!(events.contains(&HlsEvent::EndOfStream));

    let summary = player.source.close().await;
    assert_eq!(summary.segments_downloaded, 3);
    assert_eq!(summary.segments_skipped, 0);
    assert!(summary.bytes_downloaded > 0);
    assert!(summary.average_bandwidth_bps.is_some());
    for sequence in 0..3 {
        assert_eq!(server.content().count(&format!("/vod/seg{sequence}.ts")), 1);
    }
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn diagnostics_report_drained_buffers_after_end_of_stream(
    #[future] vod_server: HlsServer,
) {
    let server = vod_server.await;
    let player = Player::open(test_config(server.url("/vod/index.m3u8")));
    player.wait_open().await;
    player.play_to_end().await;

    let diagnostics = player.source.diagnostics().await.unwrap();
    assert_eq!(diagnostics.current_variant, Some(0));
    assert!(!diagnostics.live);
    assert!(!diagnostics.buffering);
    assert_eq!(diagnostics.video_buffered, Duration::ZERO);
    assert_eq!(diagnostics.audio_buffered, Duration::ZERO);
    assert_eq!(diagnostics.playback.segments_downloaded, 3);
    assert!(diagnostics.average_bps.is_some());
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn carried_bandwidth_seeds_the_next_session(#[future] vod_server: HlsServer) {
    let server = vod_server.await;
    let first = Player::open(test_config(server.url("/vod/index.m3u8")));
    first.wait_open().await;
    first.play_to_end().await;
    let carried = first.source.close().await.average_bandwidth_bps;
    assert!(carried.is_some());

    let config = test_config(server.url("/vod/index.m3u8"))
        .with_abr(AbrOptions::default().with_initial_bandwidth(carried));
    let second = Player::open(config);
    second.wait_open().await;
    let diagnostics = second.source.diagnostics().await.unwrap();
    assert!(diagnostics.average_bps.is_some());
}
