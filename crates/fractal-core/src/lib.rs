//! fractal-core — shared types, wire formats, backoff policy and configuration.
//! All other fractal crates depend on this one.

pub mod backoff;
pub mod config;
pub mod types;
pub mod wire;

pub use backoff::BackoffPolicy;
pub use config::{ConfigError, FractalConfig, LoaderConfig, StoreConfig};
pub use types::{
    expected_leaf_count, Address, AddressParseError, ContentKind, FetchResult, LeafDescriptor,
    Phase, SiteInfo, ADDRESS_LEN,
};
pub use wire::{BatchSlot, DecodeError, HeaderParseError, SegmentHeader, SegmentSpec};
