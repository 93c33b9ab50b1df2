//! Progress sink — fire-and-forget events describing how far a load has got.
//!
//! Nothing in the loader depends on a sink accepting an event. Sinks must not
//! block: they are called from inside the fetch loop.

use serde::Serialize;
use tokio::sync::mpsc;

/// One progress observation. Serialized with a `phase` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// A branch node was read during discovery.
    Scan {
        depth: u32,
        children: usize,
        nodes_read: u64,
    },
    /// A fetch group is about to be requested. `group_end` is exclusive.
    Load {
        group_start: usize,
        group_end: usize,
        total_leaves: usize,
        batched: bool,
    },
    /// A retry round is about to start.
    Retry {
        round: u32,
        max_rounds: u32,
        pending: usize,
    },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Turns events into log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Scan {
                depth,
                children,
                nodes_read,
            } => {
                tracing::debug!(depth, children, nodes_read, "scanning");
            }
            ProgressEvent::Load {
                group_start,
                group_end,
                total_leaves,
                batched,
            } => {
                tracing::info!(
                    group_start,
                    group_end,
                    total_leaves,
                    multicall = batched,
                    "loading"
                );
            }
            ProgressEvent::Retry {
                round,
                max_rounds,
                pending,
            } => {
                tracing::info!(round, max_rounds, pending, "retrying");
            }
        }
    }
}

/// Forwards events over a channel. Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelProgress {
    fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}
