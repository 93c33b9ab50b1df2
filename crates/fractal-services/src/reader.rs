//! Remote readers — the request/response capability the loader pulls chunks through.
//!
//! A reader resolves one address to its bytes. It may also serve an aggregated
//! read over many addresses in one round trip; that call can fail as a whole
//! and the loader never relies on it being available.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

use fractal_core::{Address, BatchSlot};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// Worth retrying: timeouts, rate limits, dropped connections.
    #[error("transient read failure: {0}")]
    Transient(String),
    #[error("chunk {0} not found")]
    NotFound(Address),
    #[error("{0} not supported by this reader")]
    Unsupported(&'static str),
    #[error("i/o error reading {address}: {source}")]
    Io {
        address: Address,
        source: std::io::Error,
    },
}

/// Source of chunk bytes.
pub trait ChunkReader: Send + Sync {
    /// Fetch the byte content stored at `address`.
    fn read(&self, address: &Address) -> impl Future<Output = Result<Bytes, ReadError>> + Send;

    /// Fetch many addresses in one call. Slots are aligned by position with
    /// `addresses` and succeed or fail independently.
    ///
    /// The default reports the capability as unsupported, which sends the
    /// loader down the per-address path.
    fn read_batch(
        &self,
        addresses: &[Address],
    ) -> impl Future<Output = Result<Vec<BatchSlot>, ReadError>> + Send {
        let _ = addresses;
        async { Err(ReadError::Unsupported("batched read")) }
    }
}

impl<R: ChunkReader> ChunkReader for Arc<R> {
    fn read(&self, address: &Address) -> impl Future<Output = Result<Bytes, ReadError>> + Send {
        (**self).read(address)
    }

    fn read_batch(
        &self,
        addresses: &[Address],
    ) -> impl Future<Output = Result<Vec<BatchSlot>, ReadError>> + Send {
        (**self).read_batch(addresses)
    }
}

// ── MemoryReader ──────────────────────────────────────────────────────────────

/// Chunk store held in memory, keyed by content address.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryReader {
    chunks: Arc<DashMap<Address, Bytes>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a payload under its content address and return the address.
    pub fn insert(&self, payload: impl Into<Bytes>) -> Address {
        let payload = payload.into();
        let address = Address::for_payload(&payload);
        self.chunks.insert(address, payload);
        address
    }

    /// Store a payload under an explicit address.
    pub fn insert_at(&self, address: Address, payload: impl Into<Bytes>) {
        self.chunks.insert(address, payload.into());
    }

    pub fn remove(&self, address: &Address) -> Option<Bytes> {
        self.chunks.remove(address).map(|(_, v)| v)
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.chunks.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn lookup(&self, address: &Address) -> Option<Bytes> {
        self.chunks.get(address).map(|entry| entry.value().clone())
    }
}

impl ChunkReader for MemoryReader {
    async fn read(&self, address: &Address) -> Result<Bytes, ReadError> {
        self.lookup(address).ok_or(ReadError::NotFound(*address))
    }

    async fn read_batch(&self, addresses: &[Address]) -> Result<Vec<BatchSlot>, ReadError> {
        Ok(addresses
            .iter()
            .map(|address| match self.lookup(address) {
                Some(data) => BatchSlot::ok(&data),
                None => BatchSlot::failed(),
            })
            .collect())
    }
}
