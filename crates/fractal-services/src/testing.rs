//! Test doubles: in-memory tree fixtures, a failure-injecting reader and a
//! recording segment consumer.
//!
//! Compiled for this crate's tests and, through the `test-utils` feature,
//! for the integration suite.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::{DashMap, DashSet};

use fractal_core::{
    wire, Address, BatchSlot, ContentKind, SegmentHeader, SegmentSpec, SiteInfo,
};

use crate::demux::{ConsumerError, Segment, SegmentConsumer};
use crate::reader::{ChunkReader, MemoryReader, ReadError};

// ── Tree fixtures ─────────────────────────────────────────────────────────────

/// A tree stored in a [`MemoryReader`].
#[derive(Debug, Clone)]
pub struct TreeFixture {
    pub root: Address,
    pub depth: u32,
    /// Leaf payloads in index order.
    pub leaves: Vec<Bytes>,
}

impl TreeFixture {
    pub fn total_size(&self) -> u64 {
        self.leaves.iter().map(|leaf| leaf.len() as u64).sum()
    }

    pub fn site(&self, content_kind: ContentKind) -> SiteInfo {
        SiteInfo {
            root_address: self.root,
            depth: self.depth,
            total_size: self.total_size(),
            content_kind,
        }
    }

    /// The original content.
    pub fn content(&self) -> Bytes {
        Bytes::from(self.leaves.concat())
    }
}

/// Store a branch node listing `children` and return its address.
pub fn store_branch(reader: &MemoryReader, children: &[Address]) -> Address {
    reader.insert(wire::join_addresses(children))
}

fn split(content: &[u8], chunk_size: usize) -> Vec<Bytes> {
    if content.is_empty() {
        return vec![Bytes::new()];
    }
    content
        .chunks(chunk_size.max(1))
        .map(Bytes::copy_from_slice)
        .collect()
}

/// Split `content` into `chunk_size` leaves and stack branch nodes of at most
/// `fanout` children until one root remains.
pub fn build_tree(
    reader: &MemoryReader,
    content: &[u8],
    chunk_size: usize,
    fanout: usize,
) -> TreeFixture {
    let leaves = split(content, chunk_size);
    let mut level: Vec<Address> = leaves.iter().map(|leaf| reader.insert(leaf.clone())).collect();
    let mut depth = 0;
    while level.len() > 1 {
        level = level
            .chunks(fanout.max(2))
            .map(|children| store_branch(reader, children))
            .collect();
        depth += 1;
    }
    TreeFixture {
        root: level[0],
        depth,
        leaves,
    }
}

/// Like [`build_tree`], but picks fanouts so the tree has exactly `depth`
/// levels of branches. Panics if `depth` is 0 and there is more than one leaf.
pub fn build_tree_with_depth(
    reader: &MemoryReader,
    content: &[u8],
    chunk_size: usize,
    depth: u32,
) -> TreeFixture {
    let leaves = split(content, chunk_size);
    let mut level: Vec<Address> = leaves.iter().map(|leaf| reader.insert(leaf.clone())).collect();
    for remaining in (1..=depth).rev() {
        let mut fanout = 1usize;
        while fanout
            .checked_pow(remaining)
            .is_some_and(|reach| reach < level.len())
        {
            fanout += 1;
        }
        level = level
            .chunks(fanout)
            .map(|children| store_branch(reader, children))
            .collect();
    }
    assert_eq!(level.len(), 1, "depth {depth} cannot hold {} leaves", leaves.len());
    TreeFixture {
        root: level[0],
        depth,
        leaves,
    }
}

/// Streaming content: a segment header followed by `parts` back to back.
pub fn segmented_content(parts: &[(&str, Vec<u8>)]) -> Bytes {
    let mut offset = 0u64;
    let segments = parts
        .iter()
        .map(|(kind, data)| {
            let spec = SegmentSpec {
                kind: (*kind).to_string(),
                byte_start: offset,
                byte_end: offset + data.len() as u64,
            };
            offset = spec.byte_end;
            spec
        })
        .collect();
    let mut out = SegmentHeader { segments }
        .encode()
        .expect("header encodes");
    for (_, data) in parts {
        out.extend_from_slice(data);
    }
    Bytes::from(out)
}

// ── FlakyReader ───────────────────────────────────────────────────────────────

/// Wraps a reader and fails selected calls on demand.
pub struct FlakyReader<R> {
    inner: R,
    /// Remaining forced failures per address for single reads.
    failures: DashMap<Address, u32>,
    failing_batches: DashSet<Address>,
    corrupt: DashSet<Address>,
    single_calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl<R: ChunkReader> FlakyReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            failures: DashMap::new(),
            failing_batches: DashSet::new(),
            corrupt: DashSet::new(),
            single_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `times` single reads of `address`.
    pub fn fail_reads(&self, address: Address, times: u32) {
        self.failures.insert(address, times);
    }

    /// Fail every single read of `address`.
    pub fn fail_always(&self, address: Address) {
        self.failures.insert(address, u32::MAX);
    }

    /// Fail, as a whole, every batched call that includes `address`.
    pub fn fail_batches_containing(&self, address: Address) {
        self.failing_batches.insert(address);
    }

    /// Answer batched reads of `address` with a slot that cannot be decoded.
    pub fn corrupt_slot(&self, address: Address) {
        self.corrupt.insert(address);
    }

    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::Relaxed)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::Relaxed)
    }

    fn take_failure(&self, address: &Address) -> bool {
        let Some(mut left) = self.failures.get_mut(address) else {
            return false;
        };
        match *left {
            0 => false,
            u32::MAX => true,
            _ => {
                *left -= 1;
                true
            }
        }
    }
}

impl<R: ChunkReader> ChunkReader for FlakyReader<R> {
    async fn read(&self, address: &Address) -> Result<Bytes, ReadError> {
        self.single_calls.fetch_add(1, Ordering::Relaxed);
        if self.take_failure(address) {
            return Err(ReadError::Transient(format!("injected failure for {address}")));
        }
        self.inner.read(address).await
    }

    async fn read_batch(&self, addresses: &[Address]) -> Result<Vec<BatchSlot>, ReadError> {
        self.batch_calls.fetch_add(1, Ordering::Relaxed);
        if addresses.iter().any(|a| self.failing_batches.contains(a)) {
            return Err(ReadError::Transient("injected batch failure".into()));
        }
        let mut slots = self.inner.read_batch(addresses).await?;
        for (slot, address) in slots.iter_mut().zip(addresses) {
            if self.corrupt.contains(address) {
                *slot = BatchSlot {
                    success: true,
                    return_data: Bytes::from_static(&[0; 8]),
                };
            }
        }
        Ok(slots)
    }
}

// ── RecordingConsumer ─────────────────────────────────────────────────────────

/// Keeps every segment it accepts. Can be told to reject one index.
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    pub segments: Vec<Segment>,
    pub ended: bool,
    reject_at: Option<usize>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting_at(index: usize) -> Self {
        Self {
            reject_at: Some(index),
            ..Self::default()
        }
    }

    /// Accepted segment payloads joined back together.
    pub fn joined(&self) -> Bytes {
        let parts: Vec<&[u8]> = self.segments.iter().map(|s| s.data.as_ref()).collect();
        Bytes::from(parts.concat())
    }
}

impl SegmentConsumer for RecordingConsumer {
    fn append(&mut self, segment: Segment) -> Result<(), ConsumerError> {
        if self.reject_at == Some(segment.index) {
            return Err(ConsumerError(format!("segment {} rejected", segment.index)));
        }
        if let Some(previous) = self.segments.last() {
            assert_eq!(previous.index + 1, segment.index, "segments out of order");
        }
        self.segments.push(segment);
        Ok(())
    }

    fn end_of_stream(&mut self) {
        assert!(!self.ended, "end of stream signalled twice");
        self.ended = true;
    }
}
