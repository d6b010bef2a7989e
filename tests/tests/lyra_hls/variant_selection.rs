#![forbid(unsafe_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use lyra::{hls::VariantChoice, prelude::*};
use parking_lot::Mutex;
use rstest::{fixture, rstest};

use super::fixture::{
    Content, HlsServer, MediaPlaylist, Player, init_tracing, master_playlist, test_config,
    ts_segment,
};

const LADDER: [(u64, &str); 3] = [
    (500_000, "low/index.m3u8"),
    (1_500_000, "mid/index.m3u8"),
    (3_000_000, "high/index.m3u8"),
];

#[fixture]
async fn ladder_server() -> HlsServer {
    init_tracing();
    let content = Content::default();
    content.put("/master.m3u8", master_playlist(&LADDER));
    for name in ["low", "mid", "high"] {
        content.put(&format!("/{name}/index.m3u8"), MediaPlaylist::vod(6).render());
        for sequence in 0..6 {
            content.put(&format!("/{name}/seg{sequence}.ts"), ts_segment(sequence, 2));
        }
    }
    HlsServer::new(content).await
}

fn segment_paths(content: &Content, name: &str) -> Vec<String> {
    content
        .paths()
        .into_iter()
        .filter(|path| path.starts_with(&format!("/{name}/seg")))
        .collect()
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn override_pins_every_segment(#[future] ladder_server: HlsServer) {
    let server = ladder_server.await;
    let consulted = Arc::new(AtomicUsize::new(0));
    let ladder = Arc::new(Mutex::new(Vec::new()));
    let (counter, seen) = (Arc::clone(&consulted), Arc::clone(&ladder));
    let config = test_config(server.url("/master.m3u8")).with_variant_override(Arc::new(
        move |choice: &VariantChoice| -> Option<usize> {
            counter.fetch_add(1, Ordering::Relaxed);
            seen.lock().clone_from(&choice.bitrates);
            Some(1)
        },
    ));
    let mut player = Player::open(config);

    player.wait_open().await;
    player.play_to_end().await;

    assert!(consulted.load(Ordering::Relaxed) >= 6);
    assert_eq!(*ladder.lock(), vec![500_000, 1_500_000, 3_000_000]);
    assert_eq!(segment_paths(server.content(), "mid").len(), 6);
    assert!(segment_paths(server.content(), "low").is_empty());
    assert!(segment_paths(server.content(), "high").is_empty());
    assert_eq!(server.content().count("/low/index.m3u8"), 0);

    let switches: Vec<usize> = player
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            HlsEvent::VariantSwitched { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(switches, vec![1]);
    assert_eq!(
        player.source.diagnostics().await.unwrap().bitrate,
        Some(1_500_000)
    );
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn out_of_range_override_falls_back_to_highest(#[future] ladder_server: HlsServer) {
    let server = ladder_server.await;
    let config = test_config(server.url("/master.m3u8"))
        .with_variant_override(Arc::new(|_: &VariantChoice| -> Option<usize> { Some(7) }));
    let player = Player::open(config);

    player.wait_open().await;
    player.play_to_end().await;
    assert_eq!(segment_paths(server.content(), "high").len(), 6);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn switch_variant_moves_the_rest_of_the_session(#[future] ladder_server: HlsServer) {
    let server = ladder_server.await;
    // A small buffer keeps the session from running ahead of the switch.
    let config = test_config(server.url("/master.m3u8"))
        .with_abr(AbrOptions::default().with_mode(AbrMode::Manual(0)))
        .with_min_buffer_to_play(Duration::from_secs(1))
        .with_max_buffer_duration(Duration::from_secs(2));
    let player = Player::open(config);
    player.wait_open().await;

    player.source.switch_variant(Some(2)).await.unwrap();
    let played = player.play_to_end().await;
    assert!(played.video.windows(2).all(|w| w[0].0 < w[1].0));

    let paths = server.content().paths();
    let first_high = paths
        .iter()
        .position(|path| path.starts_with("/high/seg"))
        .unwrap();
    assert!(paths[first_high..].iter().all(|path| !path.starts_with("/low/")));
    assert!(paths.iter().any(|path| path == "/low/seg0.ts"));

    let diagnostics = player.source.diagnostics().await.unwrap();
    assert_eq!(diagnostics.current_variant, Some(2));
    assert_eq!(diagnostics.bitrate, Some(3_000_000));
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn no_estimate_starts_on_the_lowest_rung_above_the_floor(
    #[future] ladder_server: HlsServer,
) {
    let server = ladder_server.await;
    let config = test_config(server.url("/master.m3u8"))
        .with_abr(AbrOptions::default().with_bandwidth_floor(1_000_000));
    let player = Player::open(config);
    player.wait_open().await;

    let paths = server.content().paths();
    let first_segment = paths
        .iter()
        .find(|path| path.contains("/seg"))
        .unwrap();
    assert_eq!(first_segment, "/mid/seg0.ts");
}
