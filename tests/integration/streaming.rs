use crate::*;

use fractal_services::testing::{build_tree, segmented_content, FlakyReader, RecordingConsumer};
use fractal_services::{discover, DeliveryMode, LoadSession, MemoryReader};

// ══════════════════════════════════════════════════════════════════════════════
//  Streaming — segment release order and whole-buffer fallback
// ══════════════════════════════════════════════════════════════════════════════

fn media_parts() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("init", patterned(2_000, 21)),
        ("media", patterned(40_000, 22)),
        ("media", patterned(33_000, 23)),
        ("media", patterned(10, 24)),
        ("media", patterned(29_990, 25)),
    ]
}

fn expected_stream(parts: &[(&str, Vec<u8>)]) -> Vec<u8> {
    parts.iter().flat_map(|(_, data)| data.iter().copied()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_video_segments_stream_in_order() {
    let parts = media_parts();
    let content = segmented_content(&parts);
    let reader = MemoryReader::new();
    let fixture = build_tree(&reader, &content, 15_000, 3);
    let config = LoaderConfig {
        batch_size: 2,
        ..LoaderConfig::default()
    };

    let mut consumer = RecordingConsumer::new();
    let outcome = quiet_loader(reader, config)
        .load_content(&fixture.site(ContentKind::Video), &mut consumer)
        .await
        .unwrap();

    assert_eq!(outcome.mode, DeliveryMode::Segmented { segments: 5 });
    assert_eq!(outcome.content, content);
    assert!(consumer.ended);
    let indices: Vec<usize> = consumer.segments.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    for (segment, (kind, data)) in consumer.segments.iter().zip(&parts) {
        assert_eq!(segment.kind, *kind);
        assert_eq!(segment.data.len(), data.len());
    }
    assert_eq!(consumer.joined(), expected_stream(&parts));
}

/// A leaf that only arrives in a retry round holds back its segment and
/// everything after it, and the stream still comes out whole and in order.
#[tokio::test(start_paused = true)]
async fn test_late_leaf_streams_after_retry() {
    let parts = media_parts();
    let content = segmented_content(&parts);
    let inner = MemoryReader::new();
    let fixture = build_tree(&inner, &content, 15_000, 3);
    let config = LoaderConfig {
        use_batched_reader: false,
        ..LoaderConfig::default()
    };
    let session = LoadSession::new(config.clone(), Arc::new(NoopProgress));
    let leaves = discover(&inner, &session, fixture.root, fixture.depth)
        .await
        .unwrap();

    let reader = FlakyReader::new(inner);
    reader.fail_reads(leaves[2].address, 4);

    let mut consumer = RecordingConsumer::new();
    let outcome = quiet_loader(reader, config)
        .load_content(&fixture.site(ContentKind::Audio), &mut consumer)
        .await
        .unwrap();

    assert_eq!(outcome.mode, DeliveryMode::Segmented { segments: 5 });
    assert_eq!(outcome.stats.leaves_recovered, 1);
    assert_eq!(consumer.joined(), expected_stream(&parts));
    assert!(consumer.ended);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_header_falls_back_to_whole_buffer() {
    let mut content = 64u32.to_be_bytes().to_vec();
    content.extend_from_slice(&[b'x'; 64]);
    content.extend_from_slice(&patterned(40_000, 26));
    let reader = MemoryReader::new();
    let fixture = build_tree(&reader, &content, 15_000, 3);

    let mut consumer = RecordingConsumer::new();
    let outcome = quiet_loader(reader, LoaderConfig::default())
        .load_content(&fixture.site(ContentKind::Video), &mut consumer)
        .await
        .unwrap();

    match &outcome.mode {
        DeliveryMode::Fallback { reason, released } => {
            assert_eq!(*released, 0);
            assert!(reason.contains("malformed"), "reason: {reason}");
        }
        other => panic!("expected fallback, got {other:?}"),
    }
    assert_eq!(outcome.content, content);
    assert!(consumer.segments.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_implausible_header_length_falls_back() {
    let mut content = u32::MAX.to_be_bytes().to_vec();
    content.extend_from_slice(&patterned(20_000, 27));
    let reader = MemoryReader::new();
    let fixture = build_tree(&reader, &content, 15_000, 3);

    let mut consumer = RecordingConsumer::new();
    let outcome = quiet_loader(reader, LoaderConfig::default())
        .load_streaming(&fixture.site(ContentKind::Video), &mut consumer)
        .await
        .unwrap();

    assert!(matches!(outcome.mode, DeliveryMode::Fallback { .. }));
    assert_eq!(outcome.content, content);
}

#[tokio::test(start_paused = true)]
async fn test_documents_bypass_the_consumer() {
    let content = segmented_content(&media_parts());
    let reader = MemoryReader::new();
    let fixture = build_tree(&reader, &content, 15_000, 3);

    let mut consumer = RecordingConsumer::new();
    let outcome = quiet_loader(reader, LoaderConfig::default())
        .load_content(&fixture.site(ContentKind::Document), &mut consumer)
        .await
        .unwrap();

    assert_eq!(outcome.mode, DeliveryMode::Whole);
    assert_eq!(outcome.content, content);
    assert!(consumer.segments.is_empty());
    assert!(!consumer.ended);
}
