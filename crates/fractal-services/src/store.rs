//! Directory-backed chunk reader.
//!
//! Chunks are files named by address in a two-level directory structure:
//!   {root}/{hex[0..2]}/{full_hex}
//!
//! This is the same layout Git uses for objects. Files are immutable —
//! the loader only ever reads them.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use memmap2::Mmap;

use fractal_core::{Address, BatchSlot};

use crate::reader::{ChunkReader, ReadError};

#[derive(Clone)]
pub struct DirReader {
    root: PathBuf,
}

impl DirReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path of the chunk stored at `address`.
    pub fn chunk_path(&self, address: &Address) -> PathBuf {
        let hex = hex::encode(address.as_bytes());
        // Two-level: chunks/ab/abc123...
        self.root.join(&hex[0..2]).join(&hex)
    }

    /// Count chunk files under the root (for stats/debugging).
    pub fn count(&self) -> usize {
        let mut total = 0;
        if let Ok(entries) = fs::read_dir(&self.root) {
            for entry in entries.flatten() {
                if let Ok(subdir) = fs::read_dir(entry.path()) {
                    total += subdir.count();
                }
            }
        }
        total
    }

    fn load(&self, address: &Address) -> Result<Bytes, ReadError> {
        let path = self.chunk_path(address);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ReadError::NotFound(*address))
            }
            Err(source) => {
                return Err(ReadError::Io {
                    address: *address,
                    source,
                })
            }
        };

        let len = file
            .metadata()
            .map_err(|source| ReadError::Io {
                address: *address,
                source,
            })?
            .len();
        // Zero-length files cannot be mapped.
        if len == 0 {
            return Ok(Bytes::new());
        }

        // Safety: file is opened read-only and we don't mutate the mmap
        let mmap = unsafe {
            Mmap::map(&file).map_err(|source| ReadError::Io {
                address: *address,
                source,
            })?
        };
        tracing::trace!(address = %address, bytes = mmap.len(), "chunk read from disk");
        Ok(Bytes::copy_from_slice(&mmap))
    }
}

impl ChunkReader for DirReader {
    async fn read(&self, address: &Address) -> Result<Bytes, ReadError> {
        self.load(address)
    }

    async fn read_batch(&self, addresses: &[Address]) -> Result<Vec<BatchSlot>, ReadError> {
        let mut slots = Vec::with_capacity(addresses.len());
        for address in addresses {
            match self.load(address) {
                Ok(data) => slots.push(BatchSlot::ok(&data)),
                Err(ReadError::NotFound(_)) => slots.push(BatchSlot::failed()),
                // Anything else means the store itself is unhealthy: fail the whole call.
                Err(e) => return Err(e),
            }
        }
        Ok(slots)
    }
}
