//! CLI command modules.

pub mod config;
pub mod load;
pub mod scan;

use anyhow::{Context, Result};

use fractal_core::{FractalConfig, StoreConfig};
use fractal_services::{DirReader, ManifestResolver, SiteLoader};

fn open_manifest(store: &StoreConfig) -> Result<ManifestResolver> {
    ManifestResolver::from_path(&store.manifest_path).context("cannot open site manifest")
}

fn open_loader(config: &FractalConfig) -> Result<SiteLoader<DirReader>> {
    let reader = DirReader::new(config.store.chunk_dir.clone());
    tracing::debug!(chunks = reader.count(), dir = %reader.root().display(), "chunk store opened");
    SiteLoader::new(reader, config.loader.clone()).context("invalid loader configuration")
}
