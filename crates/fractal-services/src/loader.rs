//! Site loader — runs one load end to end.
//!
//! resolve → discover → fetch in groups → retry rounds → assemble, then for
//! streaming kinds, hand segments to a consumer as their chunks arrive.
//! Every stage shares one [`LoadSession`], created here and dropped when the
//! load returns.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::broadcast;

use fractal_core::{
    expected_leaf_count, ConfigError, LeafDescriptor, LoaderConfig, Phase, SiteInfo,
};

use crate::assemble::{assemble, IncompleteContentError};
use crate::demux::{DemuxError, SegmentConsumer, SegmentDemuxer};
use crate::discover::{discover, DiscoveryError};
use crate::fetch::{BatchFetcher, FetchReport};
use crate::progress::{ProgressSink, TracingProgress};
use crate::reader::ChunkReader;
use crate::resolver::{ResolveError, SiteResolver};
use crate::retry::RetryCoordinator;
use crate::session::{LoadSession, StatsSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("resolving site: {0}")]
    Resolve(#[from] ResolveError),
    #[error("scanning: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("retrying: {count} leaves unrecoverable after retries")]
    PermanentLeafFailure { count: usize, indices: Vec<usize> },
    #[error("assembling: {0}")]
    Incomplete(#[from] IncompleteContentError),
    #[error("streaming: {0}")]
    Consumer(#[source] DemuxError),
    #[error("cancelled while {phase}")]
    Cancelled { phase: Phase },
}

impl LoadError {
    /// Stage the load was in when it failed.
    pub fn phase(&self) -> Phase {
        match self {
            LoadError::Resolve(_) => Phase::Resolving,
            LoadError::Discovery(_) => Phase::Scanning,
            LoadError::PermanentLeafFailure { .. } => Phase::Retrying,
            LoadError::Incomplete(_) => Phase::Assembling,
            LoadError::Consumer(_) => Phase::Streaming,
            LoadError::Cancelled { phase } => *phase,
        }
    }
}

/// How the content reached the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Assembled buffer only.
    Whole,
    /// Every segment went to the consumer, then end of stream.
    Segmented { segments: usize },
    /// Segmenting was abandoned; use the assembled buffer. `released`
    /// segments had already reached the consumer.
    Fallback { reason: String, released: usize },
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// The assembled content. Always present, whatever the delivery mode.
    pub content: Bytes,
    pub leaves: usize,
    pub mode: DeliveryMode,
    pub stats: StatsSnapshot,
}

pub struct SiteLoader<R> {
    reader: R,
    config: LoaderConfig,
    progress: Arc<dyn ProgressSink>,
}

impl<R: ChunkReader> SiteLoader<R> {
    pub fn new(reader: R, config: LoaderConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            reader,
            config,
            progress: Arc::new(TracingProgress),
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn session(&self) -> LoadSession {
        LoadSession::new(self.config.clone(), Arc::clone(&self.progress))
    }

    /// Discover the leaves of `site` without fetching them.
    pub async fn scan(&self, site: &SiteInfo) -> Result<Vec<LeafDescriptor>, LoadError> {
        self.discover_phase(&self.session(), site).await
    }

    /// Load `site` into one buffer, whatever its kind.
    pub async fn load(&self, site: &SiteInfo) -> Result<LoadOutcome, LoadError> {
        self.load_whole(&self.session(), site).await
    }

    /// Load `site`, feeding segments to `consumer` as they complete.
    pub async fn load_streaming<C: SegmentConsumer + ?Sized>(
        &self,
        site: &SiteInfo,
        consumer: &mut C,
    ) -> Result<LoadOutcome, LoadError> {
        self.load_segmented(&self.session(), site, consumer).await
    }

    /// Load `site` the way its content kind asks for: streaming kinds go
    /// through `consumer`, everything else is returned whole.
    pub async fn load_content<C: SegmentConsumer + ?Sized>(
        &self,
        site: &SiteInfo,
        consumer: &mut C,
    ) -> Result<LoadOutcome, LoadError> {
        self.load_in(&self.session(), site, consumer).await
    }

    /// Resolve `id` and load it.
    pub async fn load_site<S: SiteResolver, C: SegmentConsumer + ?Sized>(
        &self,
        resolver: &S,
        id: &str,
        consumer: &mut C,
    ) -> Result<LoadOutcome, LoadError> {
        self.resolve_and_load(&self.session(), resolver, id, consumer)
            .await
    }

    /// [`load_site`](Self::load_site), abandoned as soon as `shutdown` fires.
    /// A closed channel never cancels.
    pub async fn load_until_shutdown<S: SiteResolver, C: SegmentConsumer + ?Sized>(
        &self,
        resolver: &S,
        id: &str,
        consumer: &mut C,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<LoadOutcome, LoadError> {
        let session = self.session();
        let cancelled = async {
            if let Err(broadcast::error::RecvError::Closed) = shutdown.recv().await {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = self.resolve_and_load(&session, resolver, id, consumer) => result,
            _ = cancelled => {
                let phase = session.phase();
                tracing::info!(site = id, %phase, "load cancelled");
                Err(LoadError::Cancelled { phase })
            }
        }
    }

    // ── Stages ────────────────────────────────────────────────────────────────

    async fn resolve_and_load<S: SiteResolver, C: SegmentConsumer + ?Sized>(
        &self,
        session: &LoadSession,
        resolver: &S,
        id: &str,
        consumer: &mut C,
    ) -> Result<LoadOutcome, LoadError> {
        session.set_phase(Phase::Resolving);
        let site = resolver.resolve(id).await?;
        tracing::info!(
            site = id,
            root = %site.root_address,
            depth = site.depth,
            total_size = site.total_size,
            kind = %site.content_kind,
            "site resolved"
        );
        self.load_in(session, &site, consumer).await
    }

    async fn load_in<C: SegmentConsumer + ?Sized>(
        &self,
        session: &LoadSession,
        site: &SiteInfo,
        consumer: &mut C,
    ) -> Result<LoadOutcome, LoadError> {
        if site.content_kind.is_streaming() {
            self.load_segmented(session, site, consumer).await
        } else {
            self.load_whole(session, site).await
        }
    }

    async fn discover_phase(
        &self,
        session: &LoadSession,
        site: &SiteInfo,
    ) -> Result<Vec<LeafDescriptor>, LoadError> {
        session.set_phase(Phase::Scanning);
        let leaves = discover(&self.reader, session, site.root_address, site.depth).await?;

        if site.total_size > 0 {
            let expected = expected_leaf_count(site.total_size, self.config.chunk_size);
            if expected != leaves.len() as u64 {
                tracing::warn!(
                    expected,
                    discovered = leaves.len(),
                    total_size = site.total_size,
                    "leaf count differs from size hint"
                );
            }
        }
        Ok(leaves)
    }

    /// Give failed leaves their retry rounds. Returns the leaves recovered,
    /// in index order.
    async fn retry_phase(
        &self,
        session: &LoadSession,
        report: &mut FetchReport,
    ) -> Result<Vec<LeafDescriptor>, LoadError> {
        if report.failed.is_empty() {
            return Ok(Vec::new());
        }
        session.set_phase(Phase::Retrying);

        let mut failed = std::mem::take(&mut report.failed);
        failed.sort_by_key(|leaf| leaf.index);
        let outcome = RetryCoordinator::new(&self.reader, session)
            .retry(failed.clone(), &mut report.results)
            .await;

        if !outcome.is_complete() {
            let indices: Vec<usize> = outcome.permanent.iter().map(|leaf| leaf.index).collect();
            tracing::error!(count = indices.len(), ?indices, "leaves failed permanently");
            return Err(LoadError::PermanentLeafFailure {
                count: indices.len(),
                indices,
            });
        }
        Ok(failed)
    }

    fn assemble_phase(
        &self,
        session: &LoadSession,
        site: &SiteInfo,
        report: &FetchReport,
        total_leaves: usize,
    ) -> Result<Bytes, LoadError> {
        session.set_phase(Phase::Assembling);
        let content = assemble(&report.results, total_leaves)?;
        if site.total_size > 0 && content.len() as u64 != site.total_size {
            tracing::warn!(
                assembled = content.len(),
                hint = site.total_size,
                "assembled size differs from size hint"
            );
        }
        Ok(content)
    }

    async fn load_whole(
        &self,
        session: &LoadSession,
        site: &SiteInfo,
    ) -> Result<LoadOutcome, LoadError> {
        let leaves = self.discover_phase(session, site).await?;

        session.set_phase(Phase::Loading);
        let mut report = BatchFetcher::new(&self.reader, session)
            .fetch_all(&leaves)
            .await;
        self.retry_phase(session, &mut report).await?;
        let content = self.assemble_phase(session, site, &report, leaves.len())?;

        tracing::info!(bytes = content.len(), leaves = leaves.len(), "load complete");
        Ok(LoadOutcome {
            content,
            leaves: leaves.len(),
            mode: DeliveryMode::Whole,
            stats: session.stats().snapshot(),
        })
    }

    async fn load_segmented<C: SegmentConsumer + ?Sized>(
        &self,
        session: &LoadSession,
        site: &SiteInfo,
        consumer: &mut C,
    ) -> Result<LoadOutcome, LoadError> {
        let leaves = self.discover_phase(session, site).await?;

        let hint = (site.total_size > 0).then_some(site.total_size);
        let mut feed = SegmentFeed::new(SegmentDemuxer::from_config(&self.config, hint));

        session.set_phase(Phase::Loading);
        let mut report = BatchFetcher::new(&self.reader, session)
            .fetch_all_with(&leaves, |group| {
                for (index, data) in group.successes() {
                    feed.push(index, data.clone(), consumer)?;
                }
                Ok::<(), LoadError>(())
            })
            .await?;

        let recovered = self.retry_phase(session, &mut report).await?;
        for leaf in recovered {
            if let Some(data) = report.results.get(&leaf.index).and_then(|r| r.data()) {
                feed.push(leaf.index, data.clone(), consumer)?;
            }
        }

        let content = self.assemble_phase(session, site, &report, leaves.len())?;

        session.set_phase(Phase::Streaming);
        let mode = feed.finish(consumer)?;
        tracing::info!(bytes = content.len(), leaves = leaves.len(), ?mode, "streaming load complete");
        Ok(LoadOutcome {
            content,
            leaves: leaves.len(),
            mode,
            stats: session.stats().snapshot(),
        })
    }
}

/// Demultiplexer that switches itself off on the first recoverable error.
struct SegmentFeed {
    demux: SegmentDemuxer,
    fallback: Option<String>,
}

impl SegmentFeed {
    fn new(demux: SegmentDemuxer) -> Self {
        Self {
            demux,
            fallback: None,
        }
    }

    fn push<C: SegmentConsumer + ?Sized>(
        &mut self,
        index: usize,
        data: Bytes,
        consumer: &mut C,
    ) -> Result<(), LoadError> {
        if self.fallback.is_some() {
            return Ok(());
        }
        let result = self.demux.push_chunk(index, data, consumer).map(|_| ());
        self.absorb(result)
    }

    fn finish<C: SegmentConsumer + ?Sized>(
        mut self,
        consumer: &mut C,
    ) -> Result<DeliveryMode, LoadError> {
        if self.fallback.is_none() {
            let result = self.demux.finish(consumer);
            self.absorb(result)?;
        }
        Ok(match self.fallback {
            Some(reason) => DeliveryMode::Fallback {
                reason,
                released: self.demux.released(),
            },
            None => DeliveryMode::Segmented {
                segments: self.demux.released(),
            },
        })
    }

    fn absorb(&mut self, result: Result<(), DemuxError>) -> Result<(), LoadError> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.allows_fallback() => {
                tracing::warn!(error = %e, "segmented delivery abandoned, using whole buffer");
                self.fallback = Some(e.to_string());
                Ok(())
            }
            Err(e) => Err(LoadError::Consumer(e)),
        }
    }
}
