//! Tree discovery — walks the address tree from a root and lists its leaves.
//!
//! Branch nodes (depth > 0) hold concatenated 20-byte child addresses. Leaves
//! (depth 0) hold content and are not read here. Each subtree yields its
//! leaf addresses in order and the caller concatenates them in child order;
//! indices are assigned once, at the end, so they never depend on which read
//! finished first.

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};

use fractal_core::{wire, Address, LeafDescriptor};

use crate::progress::ProgressEvent;
use crate::reader::ChunkReader;
use crate::session::LoadSession;

/// A branch node could not be read. Fatal to the whole load: its children
/// are unknowable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("branch node {address} at depth {depth} unreadable: {reason}")]
pub struct DiscoveryError {
    pub address: Address,
    pub depth: u32,
    pub reason: String,
}

/// List every leaf under `root`, a node of the given `depth`, in
/// left-to-right depth-first order.
///
/// A depth of 0 means the root is itself the only leaf.
pub async fn discover<R: ChunkReader>(
    reader: &R,
    session: &LoadSession,
    root: Address,
    depth: u32,
) -> Result<Vec<LeafDescriptor>, DiscoveryError> {
    let addresses = walk(reader, session, root, depth).await?;
    let leaves: Vec<LeafDescriptor> = addresses
        .into_iter()
        .enumerate()
        .map(|(index, address)| LeafDescriptor { index, address })
        .collect();

    session.stats().record_discovered(leaves.len());
    tracing::info!(
        root = %root,
        depth,
        leaves = leaves.len(),
        nodes_read = session.stats().snapshot().nodes_read,
        "tree discovery complete"
    );
    Ok(leaves)
}

fn walk<'a, R: ChunkReader>(
    reader: &'a R,
    session: &'a LoadSession,
    address: Address,
    depth: u32,
) -> BoxFuture<'a, Result<Vec<Address>, DiscoveryError>> {
    async move {
        if depth == 0 {
            return Ok(vec![address]);
        }

        let permit = session
            .node_read_permit()
            .await
            .map_err(|e| DiscoveryError {
                address,
                depth,
                reason: e.to_string(),
            })?;
        let payload = session
            .config()
            .node_backoff
            .run("read branch node", || async move { reader.read(&address).await })
            .await
            .map_err(|e| DiscoveryError {
                address,
                depth,
                reason: e.to_string(),
            })?;
        drop(permit);

        let (children, trailing) = wire::split_addresses(&payload);
        if trailing != 0 {
            tracing::warn!(
                address = %address,
                depth,
                trailing,
                "branch payload not address-aligned, ignoring trailing bytes"
            );
        }

        let nodes_read = session.stats().record_node();
        session.emit(ProgressEvent::Scan {
            depth,
            children: children.len(),
            nodes_read,
        });
        tracing::trace!(address = %address, depth, children = children.len(), "branch node read");

        // `buffered` yields in input order, so concurrency never reorders leaves.
        // The session's permit count bounds reads across all levels together.
        let concurrency = session.config().discovery_concurrency.max(1);
        let subtrees: Vec<Vec<Address>> = futures::stream::iter(children)
            .map(|child| walk(reader, session, child, depth - 1))
            .buffered(concurrency)
            .try_collect()
            .await?;

        Ok(subtrees.concat())
    }
    .boxed()
}
