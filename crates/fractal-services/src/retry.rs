//! Retry coordinator — gives failed leaves further chances in timed rounds.
//!
//! Round `r` (1-indexed) waits `retry_round_delay_ms × r`, then walks the
//! queue with a short pause between leaves. Each leaf gets a full single-read
//! backoff per round. Whatever is still queued after the last round is
//! returned as permanently failed.

use std::collections::BTreeMap;

use fractal_core::{FetchResult, LeafDescriptor};

use crate::fetch::fetch_leaf;
use crate::progress::ProgressEvent;
use crate::reader::ChunkReader;
use crate::session::LoadSession;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryOutcome {
    /// Leaves that never succeeded, in index order.
    pub permanent: Vec<LeafDescriptor>,
    /// Rounds actually run.
    pub rounds: u32,
}

impl RetryOutcome {
    pub fn is_complete(&self) -> bool {
        self.permanent.is_empty()
    }
}

pub struct RetryCoordinator<'a, R> {
    reader: &'a R,
    session: &'a LoadSession,
}

impl<'a, R: ChunkReader> RetryCoordinator<'a, R> {
    pub fn new(reader: &'a R, session: &'a LoadSession) -> Self {
        Self { reader, session }
    }

    /// Retry `failures`, writing every success into `results`.
    pub async fn retry(
        &self,
        failures: Vec<LeafDescriptor>,
        results: &mut BTreeMap<usize, FetchResult>,
    ) -> RetryOutcome {
        let max_rounds = self.session.config().max_retry_rounds;
        let mut queue = failures;
        queue.sort_by_key(|leaf| leaf.index);
        queue.dedup_by_key(|leaf| leaf.index);

        let mut rounds = 0;
        while !queue.is_empty() && rounds < max_rounds {
            rounds += 1;
            queue = self.run_round(rounds, max_rounds, queue, results).await;
        }

        if queue.is_empty() {
            if rounds > 0 {
                tracing::info!(rounds, "all failed leaves recovered");
            }
        } else {
            tracing::warn!(
                rounds,
                permanent = queue.len(),
                "leaves still failing after final retry round"
            );
        }

        RetryOutcome {
            permanent: queue,
            rounds,
        }
    }

    async fn run_round(
        &self,
        round: u32,
        max_rounds: u32,
        queue: Vec<LeafDescriptor>,
        results: &mut BTreeMap<usize, FetchResult>,
    ) -> Vec<LeafDescriptor> {
        let config = self.session.config();
        self.session.emit(ProgressEvent::Retry {
            round,
            max_rounds,
            pending: queue.len(),
        });
        self.session.stats().record_round();
        tokio::time::sleep(config.retry_round_delay(round)).await;

        let mut still_failing = Vec::new();
        for (n, leaf) in queue.into_iter().enumerate() {
            if n > 0 {
                tokio::time::sleep(config.retry_leaf_pause()).await;
            }
            let result = fetch_leaf(self.reader, self.session, &leaf).await;
            if result.is_success() {
                self.session.stats().record_recovered();
                tracing::debug!(index = leaf.index, round, "leaf recovered");
            } else {
                still_failing.push(leaf);
            }
            results.insert(leaf.index, result);
        }
        still_failing
    }
}
