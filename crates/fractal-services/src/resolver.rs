//! Site resolver — maps a site identifier to its root descriptor.
//!
//! The manifest is a JSON file:
//!
//! ```json
//! { "sites": { "docs": { "rootAddress": "0x…", "depth": 2, "totalSize": 67000, "contentKind": "document" } } }
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fractal_core::SiteInfo;

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown site: {0}")]
    Unknown(String),
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub trait SiteResolver: Send + Sync {
    fn resolve(&self, id: &str) -> impl Future<Output = Result<SiteInfo, ResolveError>> + Send;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    sites: BTreeMap<String, SiteInfo>,
}

/// Resolver backed by a manifest loaded once into memory.
#[derive(Debug, Default, Clone)]
pub struct ManifestResolver {
    manifest: Manifest,
}

impl ManifestResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path(path: &Path) -> Result<Self, ResolveError> {
        let raw = std::fs::read(path).map_err(|source| ResolveError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let resolver = Self::from_json(&raw).map_err(|source| ResolveError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), sites = resolver.manifest.sites.len(), "manifest loaded");
        Ok(resolver)
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(Self {
            manifest: serde_json::from_slice(raw)?,
        })
    }

    pub fn insert(&mut self, id: impl Into<String>, site: SiteInfo) {
        self.manifest.sites.insert(id.into(), site);
    }

    /// Known identifiers, sorted.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.manifest.sites.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.manifest)
    }

    fn lookup(&self, id: &str) -> Result<SiteInfo, ResolveError> {
        self.manifest
            .sites
            .get(id)
            .cloned()
            .ok_or_else(|| ResolveError::Unknown(id.to_string()))
    }
}

impl SiteResolver for ManifestResolver {
    async fn resolve(&self, id: &str) -> Result<SiteInfo, ResolveError> {
        self.lookup(id)
    }
}
