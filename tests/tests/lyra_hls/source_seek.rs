#![forbid(unsafe_code)]

use std::time::Duration;

use rstest::{fixture, rstest};

use super::fixture::{
    Content, HlsServer, MediaPlaylist, Player, VIDEO_FRAMES_PER_SECOND, init_tracing, test_config,
    ts_segment,
};

/// 100 ns units per second.
const HNS: i64 = 10_000_000;

#[fixture]
async fn server() -> HlsServer {
    init_tracing();
    let content = Content::default();
    content.put("/index.m3u8", MediaPlaylist::vod(4).render());
    for sequence in 0..4 {
        content.put(&format!("/seg{sequence}.ts"), ts_segment(sequence, 2));
    }
    HlsServer::new(content).await
}

#[rstest]
#[case::segment_start(Duration::from_secs(4), 4 * HNS)]
#[case::mid_segment(Duration::from_secs(5), 4 * HNS)]
#[case::last_segment(Duration::from_millis(7_900), 6 * HNS)]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn seek_lands_on_the_segment_key_frame(
    #[future] server: HlsServer,
    #[case] target: Duration,
    #[case] expected: i64,
) {
    let server = server.await;
    let player = Player::open(test_config(server.url("/index.m3u8")));
    player.wait_open().await;

    player.source.seek(target).await.unwrap();
    let aligned = player.wait_seek().await;
    assert_eq!(aligned, expected);

    let played = player.play_to_end().await;
    assert_eq!(played.video.first(), Some(&(aligned, true)));
    assert!(played.audio.iter().all(|&ts| ts >= aligned));
    let remaining_secs = usize::try_from((8 * HNS - aligned) / HNS).unwrap();
    assert_eq!(played.video.len(), remaining_secs * VIDEO_FRAMES_PER_SECOND);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn seek_after_end_of_stream_replays(#[future] server: HlsServer) {
    let server = server.await;
    let player = Player::open(test_config(server.url("/index.m3u8")));
    player.wait_open().await;
    let first = player.play_to_end().await;
    assert_eq!(first.video.len(), 8 * VIDEO_FRAMES_PER_SECOND);

    player.source.seek(Duration::ZERO).await.unwrap();
    assert_eq!(player.wait_seek().await, 0);
    let again = player.play_to_end().await;
    assert_eq!(again.video, first.video);
    assert_eq!(server.content().count("/seg0.ts"), 2);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn seek_aborts_the_download_in_flight(#[future] server: HlsServer) {
    let server = server.await;
    // Without pulling, the buffer fills and the session waits.
    let config = test_config(server.url("/index.m3u8"))
        .with_min_buffer_to_play(Duration::from_secs(1))
        .with_max_buffer_duration(Duration::from_secs(2));
    let player = Player::open(config);
    player.wait_open().await;

    player.source.seek(Duration::from_secs(6)).await.unwrap();
    assert_eq!(player.wait_seek().await, 6 * HNS);
    let played = player.play_to_end().await;
    assert_eq!(played.video.len(), 2 * VIDEO_FRAMES_PER_SECOND);
    assert!(server.content().count("/seg3.ts") >= 1);
}
