//! Fractal loader integration test harness.
//!
//! Every scenario runs in-process against an in-memory or temporary
//! directory chunk store. Timing-heavy tests run on paused tokio time, so
//! backoff and pacing sleeps cost nothing.
//!
//!   cargo test --test integration

mod batching;
mod cancel;
mod roundtrip;
mod store;
mod streaming;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;

use fractal_core::{wire, Address, ContentKind, LoaderConfig, SiteInfo};
use fractal_services::{ChunkReader, NoopProgress, SiteLoader};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Deterministic pseudo-random bytes. Distinct seeds give distinct content,
/// and no two chunks of one buffer collide in practice.
pub fn patterned(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Loader with no progress output.
pub fn quiet_loader<R: ChunkReader>(reader: R, config: LoaderConfig) -> SiteLoader<R> {
    SiteLoader::new(reader, config)
        .expect("valid loader config")
        .with_progress(Arc::new(NoopProgress))
}

/// Scratch directory removed on drop.
pub struct TempDir(PathBuf);

impl TempDir {
    pub fn new(label: &str) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "fractal-it-{label}-{}-{n}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).expect("create temp dir");
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Write one chunk file in the `{root}/{hex[0..2]}/{hex}` layout.
pub fn write_chunk(root: &Path, payload: &[u8]) -> Result<Address> {
    let address = Address::for_payload(payload);
    let hex = address.to_string();
    let hex = hex.trim_start_matches("0x");
    let dir = root.join(&hex[0..2]);
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    std::fs::write(dir.join(hex), payload).context("write chunk")?;
    Ok(address)
}

/// Split `content` into a tree on disk and describe it.
pub fn write_tree(
    root: &Path,
    content: &[u8],
    chunk_size: usize,
    fanout: usize,
    content_kind: ContentKind,
) -> Result<SiteInfo> {
    let mut level = content
        .chunks(chunk_size)
        .map(|chunk| write_chunk(root, chunk))
        .collect::<Result<Vec<_>>>()?;
    let mut depth = 0;
    while level.len() > 1 {
        level = level
            .chunks(fanout)
            .map(|children| write_chunk(root, &wire::join_addresses(children)))
            .collect::<Result<Vec<_>>>()?;
        depth += 1;
    }
    Ok(SiteInfo {
        root_address: *level.first().context("empty content")?,
        depth,
        total_size: content.len() as u64,
        content_kind,
    })
}

/// Concatenation of byte parts.
pub fn joined(parts: &[Bytes]) -> Vec<u8> {
    parts.concat()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[test]
fn test_patterned_content_is_deterministic() {
    assert_eq!(patterned(1000, 7), patterned(1000, 7));
    assert_ne!(patterned(1000, 7), patterned(1000, 8));
}
