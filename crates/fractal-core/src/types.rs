//! Core data model — chunk addresses, leaf descriptors, fetch results and
//! the site descriptor handed to the loader by a resolver.
//!
//! Everything here is created fresh per load and dropped when the load
//! completes. Nothing is persisted between loads.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Width of a chunk address in bytes.
pub const ADDRESS_LEN: usize = 20;

// ── Address ──────────────────────────────────────────────────────────────────

/// Opaque identifier of one remote chunk. Equality is by byte value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Build an address from a slice of exactly `ADDRESS_LEN` bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; ADDRESS_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Content address of a payload: the first 20 bytes of its BLAKE3 digest.
    ///
    /// Used by the in-memory and on-disk stores so that identical chunks
    /// collapse to one address.
    pub fn for_payload(payload: &[u8]) -> Self {
        let digest = blake3::hash(payload);
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(&digest.as_bytes()[..ADDRESS_LEN]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AddressParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected {ADDRESS_LEN} bytes, got {0}")]
    Length(usize),
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits)?;
        Self::from_slice(&bytes).ok_or(AddressParseError::Length(bytes.len()))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ── Leaves ───────────────────────────────────────────────────────────────────

/// A depth-0 node found during discovery.
///
/// `index` is the leaf's position in left-to-right, depth-first order,
/// which is also the byte order of the assembled content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeafDescriptor {
    pub index: usize,
    pub address: Address,
}

/// Outcome of fetching one leaf payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResult {
    Success { data: Bytes },
    Failure { reason: String },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchResult::Success { .. })
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            FetchResult::Success { data } => Some(data),
            FetchResult::Failure { .. } => None,
        }
    }
}

// ── Sites ────────────────────────────────────────────────────────────────────

/// What kind of content a site holds. Selects the final stage of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Document,
    Image,
    Video,
    Audio,
}

impl ContentKind {
    /// Streaming kinds carry a segment header and are fed to a consumer
    /// segment by segment.
    pub fn is_streaming(self) -> bool {
        matches!(self, ContentKind::Video | ContentKind::Audio)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContentKind::Document => "document",
            ContentKind::Image => "image",
            ContentKind::Video => "video",
            ContentKind::Audio => "audio",
        };
        f.write_str(name)
    }
}

/// Everything a resolver knows about a site.
///
/// `total_size` is a hint for progress display. The assembled length is
/// always the content's true size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInfo {
    pub root_address: Address,
    pub depth: u32,
    pub total_size: u64,
    pub content_kind: ContentKind,
}

/// Number of leaves a site of `total_size` bytes should have when split
/// into `chunk_size` pieces. Informational only.
pub fn expected_leaf_count(total_size: u64, chunk_size: usize) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_size.div_ceil(chunk_size as u64)
}

// ── Phases ───────────────────────────────────────────────────────────────────

/// Stage of a load operation, reported alongside any failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Resolving,
    Scanning,
    Loading,
    Retrying,
    Assembling,
    Streaming,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Resolving => "resolving",
            Phase::Scanning => "scanning",
            Phase::Loading => "loading",
            Phase::Retrying => "retrying",
            Phase::Assembling => "assembling",
            Phase::Streaming => "streaming",
        };
        f.write_str(name)
    }
}
