#![forbid(unsafe_code)]

use std::time::Duration;

use lyra::prelude::*;
use rstest::rstest;

use super::fixture::{
    Content, HlsServer, MediaPlaylist, Player, VIDEO_FRAMES_PER_SECOND, init_tracing, test_config,
    ts_segment,
};

const LIVE: &str = "/live/index.m3u8";

fn live_content() -> Content {
    init_tracing();
    let content = Content::default();
    content.put(LIVE, MediaPlaylist::live(0, 3, 1).render());
    for sequence in 0..5 {
        content.put(&format!("/live/seg{sequence}.ts"), ts_segment(sequence, 1));
    }
    content
}

#[rstest]
#[timeout(Duration::from_secs(15))]
#[tokio::test]
async fn live_window_is_reloaded_until_the_end_list() {
    let server = HlsServer::new(live_content()).await;
    let config = test_config(server.url(LIVE)).with_min_buffer_to_play(Duration::from_secs(1));
    let mut player = Player::open(config);

    let info = player.wait_open().await;
    assert!(!info.seekable);

    // The packager appends two segments and closes the stream.
    let closed = MediaPlaylist {
        ended: true,
        ..MediaPlaylist::live(0, 5, 1)
    };
    server.content().put(LIVE, closed.render());

    let played = player.play_to_end().await;
    assert_eq!(played.video.len(), 5 * VIDEO_FRAMES_PER_SECOND);
    assert!(played.video.windows(2).all(|w| w[0].0 < w[1].0));
    for sequence in 0..5 {
        assert_eq!(server.content().count(&format!("/live/seg{sequence}.ts")), 1);
    }

    let loads = server.content().hits(LIVE);
    assert!(loads.len() >= 2, "playlist loaded {} times", loads.len());
    assert_eq!(loads[0].query, None);
    assert!(
        loads[1..]
            .iter()
            .all(|hit| hit.query.as_deref().is_some_and(|q| q.starts_with("_lyra="))),
        "{loads:?}"
    );

    let events = player.drain_events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, HlsEvent::PlaylistReloaded { changed: true, .. }))
    );
    assert!(events.contains(&HlsEvent::EndOfStream));
}

#[rstest]
#[timeout(Duration::from_secs(15))]
#[tokio::test]
async fn cache_busting_can_be_disabled() {
    let server = HlsServer::new(live_content()).await;
    let config = test_config(server.url(LIVE))
        .with_min_buffer_to_play(Duration::from_secs(1))
        .with_cache_bust(false);
    let player = Player::open(config);
    player.wait_open().await;

    let closed = MediaPlaylist {
        ended: true,
        ..MediaPlaylist::live(0, 4, 1)
    };
    server.content().put(LIVE, closed.render());
    player.play_to_end().await;

    let loads = server.content().hits(LIVE);
    assert!(loads.len() >= 2);
    assert!(loads.iter().all(|hit| hit.query.is_none()));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn live_diagnostics_report_live() {
    let server = HlsServer::new(live_content()).await;
    let config = test_config(server.url(LIVE)).with_min_buffer_to_play(Duration::from_secs(1));
    let player = Player::open(config);
    let info = player.wait_open().await;
    assert_eq!(info.duration, None);

    let diagnostics = player.source.diagnostics().await.unwrap();
    assert!(diagnostics.live);
    assert_eq!(diagnostics.bitrates.len(), 1);
}
