use crate::*;

use fractal_core::LeafDescriptor;
use fractal_services::testing::{build_tree, build_tree_with_depth, store_branch};
use fractal_services::{discover, LoadSession, MemoryReader};

// ══════════════════════════════════════════════════════════════════════════════
//  Round trip — discover, fetch, assemble reproduces the original bytes
// ══════════════════════════════════════════════════════════════════════════════

async fn round_trip(content: &[u8], chunk_size: usize, depth: u32) {
    let reader = MemoryReader::new();
    let fixture = build_tree_with_depth(&reader, content, chunk_size, depth);
    let config = LoaderConfig {
        chunk_size,
        ..LoaderConfig::default()
    };
    let loader = quiet_loader(reader, config);

    let outcome = loader
        .load(&fixture.site(ContentKind::Document))
        .await
        .expect("load succeeds");
    assert_eq!(outcome.content.len(), content.len());
    assert_eq!(outcome.content, content, "content differs at depth {depth}");
    assert_eq!(outcome.leaves, fixture.leaves.len());
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_depth_zero() {
    round_trip(&patterned(9_000, 1), 15_000, 0).await;
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_depth_one() {
    round_trip(&patterned(100_000, 2), 15_000, 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_depth_two() {
    round_trip(&patterned(250_000, 3), 15_000, 2).await;
}

#[tokio::test(start_paused = true)]
async fn test_round_trip_depth_four_small_chunks() {
    round_trip(&patterned(60_000, 4), 500, 4).await;
}

/// Root at depth 2 with two branches holding leaves [0,1,2] and [3,4].
#[tokio::test(start_paused = true)]
async fn test_five_leaf_scenario() {
    let reader = MemoryReader::new();
    let sizes = [15_000, 15_000, 15_000, 15_000, 7_000];
    let fragments: Vec<Bytes> = sizes
        .iter()
        .enumerate()
        .map(|(i, &len)| Bytes::from(patterned(len, 100 + i as u32)))
        .collect();
    let addresses: Vec<Address> = fragments.iter().map(|f| reader.insert(f.clone())).collect();
    let left = store_branch(&reader, &addresses[0..3]);
    let right = store_branch(&reader, &addresses[3..5]);
    let root = store_branch(&reader, &[left, right]);
    let site = SiteInfo {
        root_address: root,
        depth: 2,
        total_size: 67_000,
        content_kind: ContentKind::Document,
    };

    let session = LoadSession::new(LoaderConfig::default(), Arc::new(NoopProgress));
    let leaves = discover(&reader, &session, root, 2).await.unwrap();
    let expected: Vec<LeafDescriptor> = addresses
        .iter()
        .enumerate()
        .map(|(index, &address)| LeafDescriptor { index, address })
        .collect();
    assert_eq!(leaves, expected);

    let outcome = quiet_loader(reader, LoaderConfig::default())
        .load(&site)
        .await
        .unwrap();
    assert_eq!(outcome.content.len(), 67_000);
    assert_eq!(outcome.content, joined(&fragments));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_order_is_independent_of_concurrency() {
    let reader = MemoryReader::new();
    let fixture = build_tree(&reader, &patterned(40_000, 5), 100, 3);
    assert!(fixture.depth >= 3);

    let mut runs = Vec::new();
    for concurrency in [1, 2, 16] {
        let config = LoaderConfig {
            discovery_concurrency: concurrency,
            ..LoaderConfig::default()
        };
        let session = LoadSession::new(config, Arc::new(NoopProgress));
        runs.push(
            discover(&reader, &session, fixture.root, fixture.depth)
                .await
                .unwrap(),
        );
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0], runs[2]);
    assert_eq!(runs[0].len(), 400);
}

#[tokio::test(start_paused = true)]
async fn test_size_hint_never_overrides_content_length() {
    let reader = MemoryReader::new();
    let content = patterned(31_000, 6);
    let fixture = build_tree(&reader, &content, 15_000, 4);
    let mut site = fixture.site(ContentKind::Image);
    site.total_size = 1;

    let outcome = quiet_loader(reader, LoaderConfig::default())
        .load(&site)
        .await
        .unwrap();
    assert_eq!(outcome.content.len(), 31_000);
}
