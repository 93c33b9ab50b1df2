use crate::*;

use fractal_core::{BatchSlot, FetchResult, LeafDescriptor};
use fractal_services::testing::FlakyReader;
use fractal_services::{
    assemble, BatchFetcher, LoadSession, MemoryReader, ReadError, RetryCoordinator,
};

// ══════════════════════════════════════════════════════════════════════════════
//  Batched reads — aggregation, fallback and equivalence with single reads
// ══════════════════════════════════════════════════════════════════════════════

fn five_leaves(reader: &MemoryReader) -> (Vec<LeafDescriptor>, Vec<Bytes>) {
    let payloads: Vec<Bytes> = (0..5)
        .map(|i| Bytes::from(patterned(1_000, 200 + i)))
        .collect();
    let leaves = payloads
        .iter()
        .enumerate()
        .map(|(index, payload)| LeafDescriptor {
            index,
            address: reader.insert(payload.clone()),
        })
        .collect();
    (leaves, payloads)
}

/// Batch size 2, the call covering leaves [2,3] fails all three attempts,
/// and so do the per-leaf fallbacks. Both leaves are reported failed and
/// recovered by the first retry round.
#[tokio::test(start_paused = true)]
async fn test_failed_batch_leaves_reach_retry() {
    let inner = MemoryReader::new();
    let (leaves, payloads) = five_leaves(&inner);
    let reader = FlakyReader::new(inner);
    reader.fail_batches_containing(leaves[2].address);
    reader.fail_reads(leaves[2].address, 3);
    reader.fail_reads(leaves[3].address, 3);

    let config = LoaderConfig {
        batch_size: 2,
        ..LoaderConfig::default()
    };
    let session = LoadSession::new(config, Arc::new(NoopProgress));
    let mut report = BatchFetcher::new(&reader, &session).fetch_all(&leaves).await;

    assert_eq!(report.failed, vec![leaves[2], leaves[3]]);
    assert!(report.results[&0].is_success());
    assert!(report.results[&4].is_success());
    // [0,1] once, [2,3] three times, [4] once.
    assert_eq!(reader.batch_calls(), 5);

    let failed = std::mem::take(&mut report.failed);
    let outcome = RetryCoordinator::new(&reader, &session)
        .retry(failed, &mut report.results)
        .await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.rounds, 1);

    let content = assemble(&report.results, 5).unwrap();
    assert_eq!(content, joined(&payloads));
}

#[tokio::test(start_paused = true)]
async fn test_batched_and_individual_results_are_identical() {
    let reader = MemoryReader::new();
    let (leaves, _) = five_leaves(&reader);

    let mut reports = Vec::new();
    for batched in [true, false] {
        let config = LoaderConfig {
            batch_size: 3,
            use_batched_reader: batched,
            ..LoaderConfig::default()
        };
        let session = LoadSession::new(config, Arc::new(NoopProgress));
        reports.push(BatchFetcher::new(&reader, &session).fetch_all(&leaves).await);
    }
    assert_eq!(reports[0].results, reports[1].results);
    assert!(reports[0].results.values().all(FetchResult::is_success));
}

struct SingleReadsOnly(MemoryReader);

impl ChunkReader for SingleReadsOnly {
    async fn read(&self, address: &Address) -> Result<Bytes, ReadError> {
        self.0.read(address).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_reader_without_batching_still_loads() {
    let inner = MemoryReader::new();
    let content = patterned(70_000, 9);
    let fixture = fractal_services::testing::build_tree(&inner, &content, 15_000, 2);
    let config = LoaderConfig {
        batch_size: 2,
        ..LoaderConfig::default()
    };
    let loader = quiet_loader(SingleReadsOnly(inner), config);

    let outcome = loader
        .load(&fixture.site(ContentKind::Document))
        .await
        .unwrap();
    assert_eq!(outcome.content, content);
    assert_eq!(outcome.stats.groups_fetched, 3);
    assert_eq!(outcome.stats.batch_fallbacks, 3);
}

/// A batch slot that cannot be decoded fails only its own leaf.
#[tokio::test(start_paused = true)]
async fn test_undecodable_slot_is_a_leaf_failure() {
    struct Garbled(MemoryReader, Address);

    impl ChunkReader for Garbled {
        async fn read(&self, address: &Address) -> Result<Bytes, ReadError> {
            self.0.read(address).await
        }

        async fn read_batch(&self, addresses: &[Address]) -> Result<Vec<BatchSlot>, ReadError> {
            let mut slots = self.0.read_batch(addresses).await?;
            for (slot, address) in slots.iter_mut().zip(addresses) {
                if *address == self.1 {
                    // Offset word points past the end of the data.
                    let mut data = vec![0u8; 64];
                    data[31] = 0xFF;
                    *slot = BatchSlot {
                        success: true,
                        return_data: Bytes::from(data),
                    };
                }
            }
            Ok(slots)
        }
    }

    let inner = MemoryReader::new();
    let (leaves, payloads) = five_leaves(&inner);
    let reader = Garbled(inner, leaves[1].address);
    let session = LoadSession::new(LoaderConfig::default(), Arc::new(NoopProgress));

    let mut report = BatchFetcher::new(&reader, &session).fetch_all(&leaves).await;
    assert_eq!(report.failed, vec![leaves[1]]);
    assert_eq!(report.successes().count(), 4);

    // Single reads are unaffected, so the load as a whole recovers.
    let failed = std::mem::take(&mut report.failed);
    RetryCoordinator::new(&reader, &session)
        .retry(failed, &mut report.results)
        .await;
    assert_eq!(assemble(&report.results, 5).unwrap(), joined(&payloads));
}
