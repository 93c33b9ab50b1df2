//! `load` — fetch a site and write its content to a file.
//!
//! Streaming kinds are written segment by segment as they are released.
//! Everything else, and any stream that falls back, is written from the
//! assembled buffer at the end.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use fractal_core::FractalConfig;
use fractal_services::{ConsumerError, DeliveryMode, Segment, SegmentConsumer};

use super::{open_loader, open_manifest};

/// Appends released segments to a file.
struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Set when the final flush fails; the output is then incomplete.
    flush_error: Option<io::Error>,
}

impl FileSink {
    fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            flush_error: None,
        })
    }

    /// Surface a failed end-of-stream flush as an error.
    fn check_flushed(&mut self) -> Result<()> {
        match self.flush_error.take() {
            Some(e) => Err(anyhow::Error::new(e)
                .context(format!("output {} is incomplete", self.path.display()))),
            None => Ok(()),
        }
    }
}

impl SegmentConsumer for FileSink {
    fn append(&mut self, segment: Segment) -> Result<(), ConsumerError> {
        self.writer
            .write_all(&segment.data)
            .map_err(|e| ConsumerError(format!("{}: {e}", self.path.display())))?;
        tracing::debug!(index = segment.index, kind = %segment.kind, bytes = segment.data.len(), "segment written");
        Ok(())
    }

    fn end_of_stream(&mut self) {
        if let Err(e) = self.writer.flush() {
            tracing::warn!(path = %self.path.display(), error = %e, "flush failed");
            self.flush_error = Some(e);
        }
    }
}

pub async fn run(config: &FractalConfig, site_id: &str, out: Option<&Path>) -> Result<()> {
    let resolver = open_manifest(&config.store)?;
    let loader = open_loader(config)?;
    let out_path = out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{site_id}.out")));
    let mut sink = FileSink::create(&out_path)?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("interrupt received, cancelling load");
        let _ = shutdown_tx.send(());
    });

    let outcome = match loader
        .load_until_shutdown(&resolver, site_id, &mut sink, shutdown_rx)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            let phase = e.phase();
            return Err(anyhow::Error::new(e).context(format!("loading {site_id} failed while {phase}")));
        }
    };

    let streamed = matches!(outcome.mode, DeliveryMode::Segmented { .. });
    if streamed {
        sink.check_flushed()?;
    } else {
        drop(sink);
        std::fs::write(&out_path, &outcome.content)
            .with_context(|| format!("cannot write {}", out_path.display()))?;
    }

    println!("═══════════════════════════════════════");
    println!("  Loaded {site_id}");
    println!("═══════════════════════════════════════");
    println!("  Output      : {}", out_path.display());
    println!("  Bytes       : {}", outcome.content.len());
    println!("  Leaves      : {}", outcome.leaves);
    println!("  Nodes read  : {}", outcome.stats.nodes_read);
    println!("  Groups      : {}", outcome.stats.groups_fetched);
    println!("  Fallbacks   : {}", outcome.stats.batch_fallbacks);
    println!("  Retry rounds: {}", outcome.stats.retry_rounds);
    match &outcome.mode {
        DeliveryMode::Whole => println!("  Delivery    : whole buffer"),
        DeliveryMode::Segmented { segments } => {
            println!("  Delivery    : {segments} segments streamed")
        }
        DeliveryMode::Fallback { reason, released } => {
            println!("  Delivery    : whole buffer after {released} segments ({reason})")
        }
    }
    Ok(())
}
