//! Batch fetcher — pulls leaf payloads in fixed-size groups.
//!
//! Each group is requested with one aggregated read when enabled. If that
//! call still fails after its own backoff, or aggregation is off, every leaf
//! in the group is read on its own, in order. Failures are recorded per leaf
//! and handed back for the retry coordinator; they never abort the pass.

use std::collections::BTreeMap;
use std::convert::Infallible;

use bytes::Bytes;

use fractal_core::{Address, FetchResult, LeafDescriptor};

use crate::progress::ProgressEvent;
use crate::reader::{ChunkReader, ReadError};
use crate::session::LoadSession;

/// Per-leaf results of a fetch pass, keyed by leaf index, plus the leaves
/// that failed, in index order.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub results: BTreeMap<usize, FetchResult>,
    pub failed: Vec<LeafDescriptor>,
}

impl FetchReport {
    fn record(&mut self, leaf: LeafDescriptor, result: FetchResult) {
        if !result.is_success() {
            self.failed.push(leaf);
        }
        self.results.insert(leaf.index, result);
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: FetchReport) {
        self.results.extend(other.results);
        self.failed.extend(other.failed);
    }

    /// Successful payloads in leaf order.
    pub fn successes(&self) -> impl Iterator<Item = (usize, &Bytes)> {
        self.results
            .iter()
            .filter_map(|(index, result)| result.data().map(|data| (*index, data)))
    }
}

pub struct BatchFetcher<'a, R> {
    reader: &'a R,
    session: &'a LoadSession,
}

impl<'a, R: ChunkReader> BatchFetcher<'a, R> {
    pub fn new(reader: &'a R, session: &'a LoadSession) -> Self {
        Self { reader, session }
    }

    /// Fetch every leaf, group by group, pausing between groups.
    pub async fn fetch_all(&self, leaves: &[LeafDescriptor]) -> FetchReport {
        match self
            .fetch_all_with(leaves, |_| Ok::<(), Infallible>(()))
            .await
        {
            Ok(report) => report,
            Err(never) => match never {},
        }
    }

    /// Like [`fetch_all`](Self::fetch_all), handing each group's report to
    /// `on_group` as soon as the group completes. An error from `on_group`
    /// stops the pass.
    pub async fn fetch_all_with<E>(
        &self,
        leaves: &[LeafDescriptor],
        mut on_group: impl FnMut(&FetchReport) -> Result<(), E>,
    ) -> Result<FetchReport, E> {
        let batch_size = self.session.config().batch_size.max(1);
        let mut report = FetchReport::default();

        for (n, group) in leaves.chunks(batch_size).enumerate() {
            if n > 0 {
                tokio::time::sleep(self.session.config().group_pause()).await;
            }
            let group_report = self.fetch_group(group, leaves.len()).await;
            on_group(&group_report)?;
            report.merge(group_report);
        }

        if !report.failed.is_empty() {
            tracing::warn!(
                failed = report.failed.len(),
                total = leaves.len(),
                "fetch pass finished with failures"
            );
        }
        Ok(report)
    }

    /// Fetch one group. `total_leaves` is only used for progress reporting.
    pub async fn fetch_group(&self, group: &[LeafDescriptor], total_leaves: usize) -> FetchReport {
        let (Some(first), Some(last)) = (group.first(), group.last()) else {
            return FetchReport::default();
        };

        let batched = self.session.config().use_batched_reader;
        self.session.emit(ProgressEvent::Load {
            group_start: first.index,
            group_end: last.index + 1,
            total_leaves,
            batched,
        });
        self.session.stats().record_group();

        if batched {
            match self.fetch_batched(group).await {
                Ok(report) => return report,
                Err(e) => {
                    self.session.stats().record_fallback();
                    tracing::warn!(
                        group_start = first.index,
                        group_end = last.index + 1,
                        error = %e,
                        "batched read failed, falling back to individual reads"
                    );
                }
            }
        }
        self.fetch_individually(group).await
    }

    async fn fetch_batched(&self, group: &[LeafDescriptor]) -> Result<FetchReport, ReadError> {
        let addresses: Vec<Address> = group.iter().map(|leaf| leaf.address).collect();
        let addresses = &addresses;
        let reader = self.reader;

        let slots = self
            .session
            .config()
            .batch_backoff
            .run("batched read", || async move {
                let slots = reader.read_batch(addresses).await?;
                if slots.len() != addresses.len() {
                    return Err(ReadError::Transient(format!(
                        "batch returned {} slots for {} addresses",
                        slots.len(),
                        addresses.len()
                    )));
                }
                Ok(slots)
            })
            .await?;

        let mut report = FetchReport::default();
        for (leaf, slot) in group.iter().zip(slots) {
            let result = match slot.decode() {
                Ok(data) => {
                    self.session.stats().record_fetched(data.len());
                    FetchResult::Success { data }
                }
                Err(e) => {
                    self.session.stats().record_failure();
                    tracing::debug!(index = leaf.index, address = %leaf.address, error = %e, "batch slot failed");
                    FetchResult::Failure {
                        reason: e.to_string(),
                    }
                }
            };
            report.record(*leaf, result);
        }
        Ok(report)
    }

    async fn fetch_individually(&self, group: &[LeafDescriptor]) -> FetchReport {
        let mut report = FetchReport::default();
        for leaf in group {
            let result = fetch_leaf(self.reader, self.session, leaf).await;
            report.record(*leaf, result);
        }
        report
    }
}

/// Read a single leaf with the leaf backoff policy.
pub(crate) async fn fetch_leaf<R: ChunkReader>(
    reader: &R,
    session: &LoadSession,
    leaf: &LeafDescriptor,
) -> FetchResult {
    let address = leaf.address;
    let outcome = session
        .config()
        .leaf_backoff
        .run("read leaf", || async move { reader.read(&address).await })
        .await;

    match outcome {
        Ok(data) => {
            session.stats().record_fetched(data.len());
            FetchResult::Success { data }
        }
        Err(e) => {
            session.stats().record_failure();
            tracing::debug!(index = leaf.index, address = %address, error = %e, "leaf read failed");
            FetchResult::Failure {
                reason: e.to_string(),
            }
        }
    }
}
