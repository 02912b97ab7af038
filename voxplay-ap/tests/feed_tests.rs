//! Byte feeder: split samples, coalescing and end-of-stream handling

mod helpers;

use futures::stream;
use helpers::{expect_finished, le_bytes, test_session, ManualBackend};
use std::io::Write;
use voxplay_ap::feed::{feed_reader, feed_stream, Feeder};
use voxplay_ap::playback::Activation;
use voxplay_ap::Error;
use voxplay_common::{TrackId, TrackOutcome};

#[tokio::test]
async fn test_feed_stream_reassembles_split_samples() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();

    let bytes = le_bytes(&[100, -200, 300, -400, 500]);
    // Split at odd offsets so samples straddle buffers
    let pieces: Vec<Result<Vec<u8>, std::io::Error>> = vec![
        Ok(bytes[..3].to_vec()),
        Ok(bytes[3..4].to_vec()),
        Ok(bytes[4..].to_vec()),
    ];

    let summary = feed_stream(&session, TrackId::from("t"), stream::iter(pieces))
        .await
        .unwrap();
    assert_eq!(summary.bytes, 10);
    assert_eq!(summary.samples, 5);
    assert_eq!(summary.dropped_trailing_bytes, 0);

    let mut rendered = backend.render(5);
    rendered.truncate(5);
    assert_eq!(rendered, vec![100, -200, 300, -400, 500]);
}

#[tokio::test]
async fn test_feed_stream_drops_dangling_byte() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();

    let mut bytes = le_bytes(&[7, 8]);
    bytes.push(0x7f);
    let pieces: Vec<Result<Vec<u8>, std::io::Error>> = vec![Ok(bytes)];

    let summary = feed_stream(&session, TrackId::from("t"), stream::iter(pieces))
        .await
        .unwrap();
    assert_eq!(summary.samples, 2);
    assert_eq!(summary.dropped_trailing_bytes, 1);
}

#[tokio::test]
async fn test_feed_stream_empty_is_empty_audio() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();

    let pieces: Vec<Result<Vec<u8>, std::io::Error>> = vec![Ok(Vec::new())];
    let result = feed_stream(&session, TrackId::from("t"), stream::iter(pieces)).await;
    assert!(matches!(result, Err(Error::EmptyAudio)));
    assert!(session.queue().is_empty());
}

#[tokio::test]
async fn test_feed_stream_body_error() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();

    let pieces: Vec<Result<Vec<u8>, std::io::Error>> = vec![
        Ok(le_bytes(&[1])),
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
    ];
    let result = feed_stream(&session, TrackId::from("t"), stream::iter(pieces)).await;
    assert!(matches!(result, Err(Error::Http(_))));
}

#[tokio::test]
async fn test_feeder_coalesces_small_buffers() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();

    let mut feeder = Feeder::with_min_chunk(session.clone(), TrackId::from("t"), 4);
    assert_eq!(feeder.push(&le_bytes(&[1, 2])).unwrap(), 0);
    assert!(session.queue().is_empty());
    assert_eq!(feeder.push(&le_bytes(&[3, 4, 5])).unwrap(), 5);
    assert_eq!(feeder.push(&le_bytes(&[6])).unwrap(), 0);

    let summary = feeder.finish().unwrap();
    assert_eq!(summary.samples, 6);
    assert_eq!(summary.chunks, 2);
    assert_eq!(session.queue().queued_samples(), 6);
}

#[tokio::test]
async fn test_feed_reader_from_file_then_complete() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();
    let mut rx = session.subscribe();

    let samples: Vec<i16> = (0..1000).map(|i| i as i16).collect();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&le_bytes(&samples)).unwrap();
    let reader = tokio::fs::File::open(file.path()).await.unwrap();

    let summary = feed_reader(&session, TrackId::from("file"), reader).await.unwrap();
    assert_eq!(summary.samples, 1000);

    let rendered = backend.render(1000);
    assert_eq!(rendered, samples);

    let (outcome, count) = expect_finished(&mut rx, "file").await;
    assert_eq!(outcome, TrackOutcome::Completed);
    assert_eq!(count, 1000);
}

#[tokio::test]
async fn test_feed_before_connect_fails() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);

    let result = feed_reader(&session, TrackId::from("t"), &le_bytes(&[1; 300])[..]).await;
    assert!(matches!(result, Err(Error::InvalidState { .. })));
}

#[tokio::test]
async fn test_feeder_stops_after_interrupt() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();
    let mut rx = session.subscribe();

    let mut first = Feeder::with_min_chunk(session.clone(), TrackId::from("A"), 1);
    assert_eq!(first.push(&le_bytes(&[1, 1])).unwrap(), 2);

    session.interrupt().await.unwrap();

    let mut second = Feeder::with_min_chunk(session.clone(), TrackId::from("B"), 1);
    assert_eq!(second.push(&le_bytes(&[2, 2])).unwrap(), 2);

    // A's upload is still streaming; its next buffer must not revive it
    let result = first.push(&le_bytes(&[1, 1]));
    assert!(matches!(result, Err(Error::TrackInterrupted(ref id)) if id.as_str() == "A"));

    assert_eq!(session.active_track().unwrap().as_str(), "B");
    assert!(session.snapshot().pending_tracks.is_empty());
    assert_eq!(backend.render(8), vec![2, 2, 0, 0, 0, 0, 0, 0]);

    let (outcome, _) = expect_finished(&mut rx, "A").await;
    assert_eq!(outcome, TrackOutcome::Interrupted);
    let (outcome, count) = expect_finished(&mut rx, "B").await;
    assert_eq!(outcome, TrackOutcome::Completed);
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_feeder_started_after_interrupt_plays() {
    let backend = ManualBackend::new();
    let session = test_session(&backend);
    session.connect(Activation::UserGesture).await.unwrap();
    session.add_samples(&TrackId::from("old"), vec![9; 4]).unwrap();
    session.interrupt().await.unwrap();

    let mut feeder = Feeder::with_min_chunk(session.clone(), TrackId::from("new"), 1);
    feeder.push(&le_bytes(&[3, 4])).unwrap();
    feeder.push(&le_bytes(&[5])).unwrap();
    let summary = feeder.finish().unwrap();
    assert_eq!(summary.samples, 3);

    assert_eq!(backend.render(4), vec![3, 4, 5, 0]);
}
