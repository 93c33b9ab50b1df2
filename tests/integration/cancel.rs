use crate::*;

use std::time::Duration;

use fractal_core::Phase;
use fractal_services::testing::{build_tree, FlakyReader, RecordingConsumer};
use fractal_services::{LoadError, ManifestResolver, MemoryReader};
use tokio::sync::broadcast;

// ══════════════════════════════════════════════════════════════════════════════
//  Cancellation — shutdown stops the load and names the phase
// ══════════════════════════════════════════════════════════════════════════════

fn resolver_for(id: &str, site: SiteInfo) -> ManifestResolver {
    let mut resolver = ManifestResolver::new();
    resolver.insert(id, site);
    resolver
}

/// The root node fails twice, so discovery is still backing off when the
/// shutdown signal arrives.
#[tokio::test(start_paused = true)]
async fn test_shutdown_during_discovery() {
    let inner = MemoryReader::new();
    let fixture = build_tree(&inner, &patterned(50_000, 41), 15_000, 3);
    let reader = FlakyReader::new(inner);
    reader.fail_reads(fixture.root, 2);
    let resolver = resolver_for("slow", fixture.site(ContentKind::Document));
    let loader = quiet_loader(reader, LoaderConfig::default());

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(());
    });

    let mut consumer = RecordingConsumer::new();
    let err = loader
        .load_until_shutdown(&resolver, "slow", &mut consumer, rx)
        .await
        .unwrap_err();
    assert!(
        matches!(err, LoadError::Cancelled { phase: Phase::Scanning }),
        "got {err}"
    );
    assert_eq!(err.phase(), Phase::Scanning);
}

/// A leaf that never loads keeps the retry rounds going. At five seconds
/// the loader is waiting out round three.
#[tokio::test(start_paused = true)]
async fn test_shutdown_between_retry_rounds() {
    let inner = MemoryReader::new();
    let content = patterned(50_000, 42);
    let fixture = build_tree(&inner, &content, 15_000, 3);
    let reader = FlakyReader::new(inner);
    let last = Address::for_payload(&content[45_000..]);
    reader.fail_always(last);
    let resolver = resolver_for("stuck", fixture.site(ContentKind::Video));
    let config = LoaderConfig {
        use_batched_reader: false,
        ..LoaderConfig::default()
    };
    let loader = quiet_loader(reader, config);

    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let _ = tx.send(());
    });

    let mut consumer = RecordingConsumer::new();
    let err = loader
        .load_until_shutdown(&resolver, "stuck", &mut consumer, rx)
        .await
        .unwrap_err();
    assert!(
        matches!(err, LoadError::Cancelled { phase: Phase::Retrying }),
        "got {err}"
    );
    assert!(!consumer.ended);
}

#[tokio::test(start_paused = true)]
async fn test_load_finishes_before_shutdown() {
    let reader = MemoryReader::new();
    let content = patterned(20_000, 43);
    let fixture = build_tree(&reader, &content, 15_000, 3);
    let resolver = resolver_for("quick", fixture.site(ContentKind::Document));
    let loader = quiet_loader(reader, LoaderConfig::default());

    let (_tx, rx) = broadcast::channel(1);
    let mut consumer = RecordingConsumer::new();
    let outcome = loader
        .load_until_shutdown(&resolver, "quick", &mut consumer, rx)
        .await
        .unwrap();
    assert_eq!(outcome.content, content);
}
