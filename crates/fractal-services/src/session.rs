//! Load session — the context object threaded through every stage of one load.
//!
//! Owned by whoever starts the load and dropped when it finishes. Holds the
//! configuration, the progress sink, the current phase and running counters.
//! No state outlives it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, AcquireError, Semaphore, SemaphorePermit};

use fractal_core::{LoaderConfig, Phase};

use crate::progress::{ProgressEvent, ProgressSink};

pub struct LoadSession {
    config: LoaderConfig,
    progress: Arc<dyn ProgressSink>,
    stats: LoadStats,
    phase: watch::Sender<Phase>,
    /// Caps branch reads in flight across the whole tree walk.
    node_reads: Semaphore,
}

impl LoadSession {
    pub fn new(config: LoaderConfig, progress: Arc<dyn ProgressSink>) -> Self {
        let (phase, _) = watch::channel(Phase::Resolving);
        let node_reads = Semaphore::new(config.discovery_concurrency.max(1));
        Self {
            config,
            progress,
            stats: LoadStats::default(),
            phase,
            node_reads,
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.progress.emit(event);
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Wait for a branch-read slot. Held for the whole read, retries included.
    pub(crate) async fn node_read_permit(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.node_reads.acquire().await
    }

    pub fn set_phase(&self, phase: Phase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!(from = %previous, to = %phase, "load phase changed");
        }
    }
}

/// Running counters for one load. Updated from concurrent discovery tasks,
/// so every field is atomic.
#[derive(Debug, Default)]
pub struct LoadStats {
    nodes_read: AtomicU64,
    leaves_discovered: AtomicU64,
    groups_fetched: AtomicU64,
    batch_fallbacks: AtomicU64,
    leaves_fetched: AtomicU64,
    leaf_failures: AtomicU64,
    leaves_recovered: AtomicU64,
    retry_rounds: AtomicU64,
    bytes_fetched: AtomicU64,
}

/// Point-in-time copy of [`LoadStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub nodes_read: u64,
    pub leaves_discovered: u64,
    pub groups_fetched: u64,
    pub batch_fallbacks: u64,
    pub leaves_fetched: u64,
    pub leaf_failures: u64,
    pub leaves_recovered: u64,
    pub retry_rounds: u64,
    pub bytes_fetched: u64,
}

impl LoadStats {
    /// Returns the updated node count.
    pub fn record_node(&self) -> u64 {
        self.nodes_read.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_discovered(&self, leaves: usize) {
        self.leaves_discovered
            .store(leaves as u64, Ordering::Relaxed);
    }

    pub fn record_group(&self) {
        self.groups_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.batch_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetched(&self, bytes: usize) {
        self.leaves_fetched.fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.leaf_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovered(&self) {
        self.leaves_recovered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_round(&self) {
        self.retry_rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            nodes_read: self.nodes_read.load(Ordering::Relaxed),
            leaves_discovered: self.leaves_discovered.load(Ordering::Relaxed),
            groups_fetched: self.groups_fetched.load(Ordering::Relaxed),
            batch_fallbacks: self.batch_fallbacks.load(Ordering::Relaxed),
            leaves_fetched: self.leaves_fetched.load(Ordering::Relaxed),
            leaf_failures: self.leaf_failures.load(Ordering::Relaxed),
            leaves_recovered: self.leaves_recovered.load(Ordering::Relaxed),
            retry_rounds: self.retry_rounds.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
        }
    }
}
