#![forbid(unsafe_code)]

use std::time::Duration;

use axum::http::StatusCode;
use lyra::prelude::*;
use rstest::rstest;

use super::fixture::{
    Content, HlsServer, MediaPlaylist, Player, VIDEO_FRAMES_PER_SECOND, init_tracing, test_config,
    ts_segment,
};

fn vod_content(segments: u64) -> Content {
    init_tracing();
    let content = Content::default();
    content.put("/index.m3u8", MediaPlaylist::vod(segments).render());
    for sequence in 0..segments {
        content.put(&format!("/seg{sequence}.ts"), ts_segment(sequence, 2));
    }
    content
}

#[rstest]
#[case::server_error(StatusCode::INTERNAL_SERVER_ERROR)]
#[case::unavailable(StatusCode::SERVICE_UNAVAILABLE)]
#[case::not_found(StatusCode::NOT_FOUND)]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn failing_segment_is_retried_then_skipped(#[case] status: StatusCode) {
    let content = vod_content(3);
    content.fail("/seg1.ts", status);
    let server = HlsServer::new(content).await;
    let mut player = Player::open(test_config(server.url("/index.m3u8")));

    player.wait_open().await;
    let played = player.play_to_end().await;
    assert_eq!(played.video.len(), 4 * VIDEO_FRAMES_PER_SECOND);
    // Nothing from the skipped segment reaches the host.
    assert!(
        played
            .video
            .iter()
            .all(|&(ts, _)| !(20_000_000..40_000_000).contains(&ts))
    );

    // First attempt plus two retries.
    assert_eq!(server.content().count("/seg1.ts"), 3);
    let skipped: Vec<u64> = player
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            HlsEvent::SegmentSkipped { sequence, .. } => Some(sequence),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec![1]);

    let summary = player.source.close().await;
    assert_eq!(summary.segments_downloaded, 2);
    assert_eq!(summary.segments_skipped, 1);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn too_many_failures_in_a_row_end_the_session() {
    let content = vod_content(4);
    for sequence in 1..4 {
        content.fail(&format!("/seg{sequence}.ts"), StatusCode::SERVICE_UNAVAILABLE);
    }
    let server = HlsServer::new(content).await;
    let config = test_config(server.url("/index.m3u8")).with_max_consecutive_read_failures(1);
    let player = Player::open(config);

    player.wait_open().await;
    let error = player.wait_failure().await;
    assert!(error.contains("HTTP 503"), "{error}");
    // The session stops after the second skip.
    assert_eq!(server.content().count("/seg3.ts"), 0);

    let summary = player.source.close().await;
    assert_eq!(summary.segments_downloaded, 1);
    assert_eq!(summary.segments_skipped, 2);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn unreachable_playlist_is_fatal() {
    let content = vod_content(1);
    content.fail("/index.m3u8", StatusCode::SERVICE_UNAVAILABLE);
    let server = HlsServer::new(content).await;
    let player = Player::open(test_config(server.url("/index.m3u8")));

    let error = player.wait_failure().await;
    assert!(error.contains("HTTP 503"), "{error}");
    // First attempt plus the playlist retries.
    assert_eq!(server.content().count("/index.m3u8"), 4);
    assert_eq!(player.source.close().await, SessionSummary::default());
}
