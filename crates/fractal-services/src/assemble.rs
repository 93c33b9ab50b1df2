//! Assembler — joins leaf payloads into the original content.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use fractal_core::FetchResult;

/// Some leaf in `[0, total)` has no successful payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("content incomplete: {} of {total} leaves missing (first: {})", .missing.len(), .missing.first().copied().unwrap_or_default())]
pub struct IncompleteContentError {
    /// Missing leaf indices, ascending.
    pub missing: Vec<usize>,
    pub total: usize,
}

/// Concatenate the payloads for leaves `0..total_leaves` in index order.
///
/// The result's length is the sum of the payload lengths, whatever size the
/// site descriptor advertised.
pub fn assemble(
    results: &BTreeMap<usize, FetchResult>,
    total_leaves: usize,
) -> Result<Bytes, IncompleteContentError> {
    let mut missing = Vec::new();
    let mut parts = Vec::with_capacity(total_leaves);
    for index in 0..total_leaves {
        match results.get(&index).and_then(FetchResult::data) {
            Some(data) => parts.push(data),
            None => missing.push(index),
        }
    }
    if !missing.is_empty() {
        return Err(IncompleteContentError {
            missing,
            total: total_leaves,
        });
    }

    // A single leaf needs no copy.
    if let [only] = parts.as_slice() {
        return Ok((*only).clone());
    }

    let len = parts.iter().map(|data| data.len()).sum();
    let mut out = BytesMut::with_capacity(len);
    for data in parts {
        out.extend_from_slice(data);
    }
    Ok(out.freeze())
}
