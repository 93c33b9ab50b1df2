//! fractal-services — the content loader: readers, tree discovery, batched
//! fetching, retry rounds, assembly and segment streaming.

pub mod assemble;
pub mod demux;
pub mod discover;
pub mod fetch;
pub mod loader;
pub mod progress;
pub mod reader;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use assemble::{assemble, IncompleteContentError};
pub use demux::{ConsumerError, DemuxError, DemuxState, Segment, SegmentConsumer, SegmentDemuxer};
pub use discover::{discover, DiscoveryError};
pub use fetch::{BatchFetcher, FetchReport};
pub use loader::{DeliveryMode, LoadError, LoadOutcome, SiteLoader};
pub use progress::{ChannelProgress, NoopProgress, ProgressEvent, ProgressSink, TracingProgress};
pub use reader::{ChunkReader, MemoryReader, ReadError};
pub use resolver::{ManifestResolver, ResolveError, SiteResolver};
pub use retry::{RetryCoordinator, RetryOutcome};
pub use session::{LoadSession, LoadStats, StatsSnapshot};
pub use store::DirReader;
