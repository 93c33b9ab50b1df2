//! `scan` and `sites` — inspect a site's tree and the manifest.

use anyhow::{Context, Result};

use fractal_core::{expected_leaf_count, FractalConfig};
use fractal_services::SiteResolver;

use super::{open_loader, open_manifest};

pub async fn run(config: &FractalConfig, site_id: &str) -> Result<()> {
    let resolver = open_manifest(&config.store)?;
    let site = resolver
        .resolve(site_id)
        .await
        .with_context(|| format!("cannot resolve {site_id}"))?;
    let loader = open_loader(config)?;
    let leaves = loader
        .scan(&site)
        .await
        .with_context(|| format!("scanning {site_id} failed"))?;

    println!("═══════════════════════════════════════");
    println!("  {site_id} ({})", site.content_kind);
    println!("═══════════════════════════════════════");
    println!("  Root        : {}", site.root_address);
    println!("  Depth       : {}", site.depth);
    println!("  Size hint   : {} bytes", site.total_size);
    println!(
        "  Leaves      : {} (expected {})",
        leaves.len(),
        expected_leaf_count(site.total_size, config.loader.chunk_size)
    );
    println!();
    for leaf in &leaves {
        println!("  {:>6}  {}", leaf.index, leaf.address);
    }
    Ok(())
}

pub fn list_sites(config: &FractalConfig) -> Result<()> {
    let resolver = open_manifest(&config.store)?;
    let ids: Vec<&str> = resolver.ids().collect();
    if ids.is_empty() {
        println!("No sites in {}.", config.store.manifest_path.display());
        return Ok(());
    }
    for id in ids {
        println!("  {id}");
    }
    Ok(())
}
