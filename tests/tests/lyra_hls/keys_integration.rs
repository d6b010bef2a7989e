#![forbid(unsafe_code)]

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use lyra::{
    drm::iv_for_sequence,
    hls::{HlsError, KeyContext, KeyOptions},
    prelude::*,
};
use rstest::rstest;

use super::fixture::{
    Content, HlsServer, MediaPlaylist, Player, TEST_KEY, VIDEO_FRAMES_PER_SECOND,
    encrypt_aes128_cbc, init_tracing, test_config, ts_segment, wrap_key,
};

const EXPLICIT_IV: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff,
];

/// Serve three segments encrypted under [`TEST_KEY`], with the key itself
/// wrapped so only a session with the right processor can use it.
async fn encrypted_server(explicit_iv: bool) -> HlsServer {
    init_tracing();
    let key_tag = if explicit_iv {
        "METHOD=AES-128,URI=\"/keys/k1.bin\",IV=0x00112233445566778899aabbccddeeff"
    } else {
        "METHOD=AES-128,URI=\"/keys/k1.bin\""
    };
    let content = Content::default();
    content
        .put("/enc/index.m3u8", MediaPlaylist::vod(3).with_key(key_tag).render())
        .put("/keys/k1.bin", wrap_key(&TEST_KEY));
    for sequence in 0..3 {
        let iv = if explicit_iv {
            EXPLICIT_IV
        } else {
            iv_for_sequence(sequence)
        };
        let body = encrypt_aes128_cbc(&ts_segment(sequence, 2), &TEST_KEY, &iv);
        content.put(&format!("/enc/seg{sequence}.ts"), body);
    }
    HlsServer::new(content).await
}

fn unwrapping_keys() -> KeyOptions {
    KeyOptions::new()
        .with_key_processor(Arc::new(
            |wrapped: Bytes, _context: KeyContext| -> HlsResult<Bytes> {
                Ok(wrapped.iter().map(|b| b ^ 0x5a).collect::<Vec<u8>>().into())
            },
        ))
        .with_query_params(HashMap::from([("token".to_string(), "t0k3n".to_string())]))
        .with_request_headers(HashMap::from([(
            "x-key-auth".to_string(),
            "secret".to_string(),
        )]))
}

#[rstest]
#[case::sequence_iv(false)]
#[case::explicit_iv(true)]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn encrypted_segments_play_after_key_unwrap(#[case] explicit_iv: bool) {
    let server = encrypted_server(explicit_iv).await;
    let config = test_config(server.url("/enc/index.m3u8")).with_keys(unwrapping_keys());
    let mut player = Player::open(config);

    player.wait_open().await;
    let played = player.play_to_end().await;
    assert_eq!(played.video.len(), 6 * VIDEO_FRAMES_PER_SECOND);
    assert!(played.video[0].1);

    // One fetch, then the cache.
    let hits = server.content().hits("/keys/k1.bin");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].query.as_deref(), Some("token=t0k3n"));
    assert_eq!(
        hits[0].headers.get("x-key-auth").and_then(|v| v.to_str().ok()),
        Some("secret")
    );

    let fetched: Vec<bool> = player
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            HlsEvent::KeyFetched { cached, .. } => Some(cached),
            _ => None,
        })
        .collect();
    assert_eq!(fetched, vec![false, true, true]);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn key_processor_sees_key_url_and_iv() {
    let server = encrypted_server(true).await;
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let record = Arc::clone(&seen);
    let keys = KeyOptions::new().with_key_processor(Arc::new(
        move |wrapped: Bytes, context: KeyContext| -> HlsResult<Bytes> {
            record.lock().push((context.url.path().to_string(), context.iv));
            Ok(wrapped.iter().map(|b| b ^ 0x5a).collect::<Vec<u8>>().into())
        },
    ));
    let player = Player::open(test_config(server.url("/enc/index.m3u8")).with_keys(keys));

    player.wait_open().await;
    let seen = seen.lock().clone();
    assert_eq!(seen, vec![("/keys/k1.bin".to_string(), EXPLICIT_IV)]);
}

#[rstest]
#[timeout(Duration::from_secs(10))]
#[tokio::test]
async fn rejected_key_skips_segments_until_the_session_fails() {
    let server = encrypted_server(false).await;
    let keys = KeyOptions::new().with_key_processor(Arc::new(
        |_: Bytes, _: KeyContext| -> HlsResult<Bytes> {
            Err(HlsError::KeyProcessing("license denied".into()))
        },
    ));
    let config = test_config(server.url("/enc/index.m3u8"))
        .with_keys(keys)
        .with_max_consecutive_read_failures(1);
    let mut player = Player::open(config);

    let error = player.wait_failure().await;
    assert!(error.contains("license denied"), "{error}");

    let skipped = player
        .drain_events()
        .into_iter()
        .filter(|event| matches!(event, HlsEvent::SegmentSkipped { .. }))
        .count();
    assert_eq!(skipped, 2);
    // No segment is requested without its key.
    assert_eq!(server.content().count("/enc/seg0.ts"), 0);
    assert_eq!(server.content().count("/keys/k1.bin"), 2);
}
