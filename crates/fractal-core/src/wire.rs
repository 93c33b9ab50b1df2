//! Wire formats — the byte layouts the loader reads.
//!
//! Three layouts live here:
//!   1. Branch node payloads: a plain concatenation of 20-byte child addresses.
//!   2. Batch slots: one entry of an aggregated read response. The slot's
//!      return data is the ABI encoding of a single dynamic `bytes` value.
//!   3. Segment header: `u32` big-endian length, then that many bytes of JSON,
//!      prefixed to the assembled content of streaming sites.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::types::{Address, ADDRESS_LEN};

// ── Branch nodes ─────────────────────────────────────────────────────────────

/// Split a branch payload into its child addresses, in array order.
///
/// Returns the children and the number of trailing bytes that did not fill
/// a whole address. Trailing bytes are ignored.
pub fn split_addresses(payload: &[u8]) -> (Vec<Address>, usize) {
    let chunks = payload.chunks_exact(ADDRESS_LEN);
    let trailing = chunks.remainder().len();
    let children = chunks.filter_map(Address::from_slice).collect();
    (children, trailing)
}

/// Concatenate child addresses into a branch payload.
pub fn join_addresses(children: &[Address]) -> Bytes {
    let mut buf = BytesMut::with_capacity(children.len() * ADDRESS_LEN);
    for child in children {
        buf.put_slice(child.as_bytes());
    }
    buf.freeze()
}

// ── Batch slots ──────────────────────────────────────────────────────────────

/// ABI word size.
const WORD: usize = 32;

/// One entry of an aggregated read response, aligned by position with the
/// requested addresses. Each slot succeeds or fails independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSlot {
    pub success: bool,
    pub return_data: Bytes,
}

impl BatchSlot {
    /// A successful slot carrying `payload`, ABI-encoded.
    pub fn ok(payload: &[u8]) -> Self {
        Self {
            success: true,
            return_data: encode_bytes_return(payload),
        }
    }

    /// A failed slot. Failed slots carry no data.
    pub fn failed() -> Self {
        Self {
            success: false,
            return_data: Bytes::new(),
        }
    }

    /// Decode the slot into the chunk payload.
    pub fn decode(&self) -> Result<Bytes, DecodeError> {
        if !self.success {
            return Err(DecodeError::SlotFailed);
        }
        decode_bytes_return(&self.return_data)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("slot reported failure")]
    SlotFailed,
    #[error("return data too short: {0} bytes")]
    TooShort(usize),
    #[error("word at byte {0} does not fit in a length")]
    Overflow(usize),
    #[error("data offset {offset} out of bounds for {len} bytes")]
    BadOffset { offset: usize, len: usize },
    #[error("data length {length} exceeds the {available} bytes available")]
    BadLength { length: usize, available: usize },
}

/// ABI-encode a single dynamic `bytes` value:
/// offset word (always 32), length word, data right-padded to a word.
pub fn encode_bytes_return(payload: &[u8]) -> Bytes {
    let padded = payload.len().div_ceil(WORD) * WORD;
    let mut buf = BytesMut::with_capacity(2 * WORD + padded);
    put_word(&mut buf, WORD as u64);
    put_word(&mut buf, payload.len() as u64);
    buf.put_slice(payload);
    buf.put_bytes(0, padded - payload.len());
    buf.freeze()
}

/// Inverse of [`encode_bytes_return`].
pub fn decode_bytes_return(data: &[u8]) -> Result<Bytes, DecodeError> {
    if data.len() < 2 * WORD {
        return Err(DecodeError::TooShort(data.len()));
    }
    let offset = read_word(data, 0)?;
    let body_start = offset
        .checked_add(WORD)
        .filter(|end| *end <= data.len())
        .ok_or(DecodeError::BadOffset {
            offset,
            len: data.len(),
        })?;
    let length = read_word(data, offset)?;
    let available = data.len() - body_start;
    if length > available {
        return Err(DecodeError::BadLength { length, available });
    }
    Ok(Bytes::copy_from_slice(&data[body_start..body_start + length]))
}

fn put_word(buf: &mut BytesMut, value: u64) {
    buf.put_bytes(0, WORD - 8);
    buf.put_u64(value);
}

fn read_word(data: &[u8], at: usize) -> Result<usize, DecodeError> {
    let word = data
        .get(at..at + WORD)
        .ok_or(DecodeError::BadOffset {
            offset: at,
            len: data.len(),
        })?;
    let (high, low) = word.split_at(WORD - 8);
    if high.iter().any(|b| *b != 0) {
        return Err(DecodeError::Overflow(at));
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(low);
    usize::try_from(u64::from_be_bytes(raw)).map_err(|_| DecodeError::Overflow(at))
}

// ── Segment header ───────────────────────────────────────────────────────────

/// Size of the big-endian header length prefix.
pub const HEADER_PREFIX_LEN: usize = 4;

/// One named byte range of the content that follows the header.
///
/// Offsets are relative to the first byte after the header. `byte_end`
/// is exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "byteStart")]
    pub byte_start: u64,
    #[serde(rename = "byteEnd")]
    pub byte_end: u64,
}

/// Self-describing header prefixed to streaming content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub segments: Vec<SegmentSpec>,
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderParseError {
    #[error("header incomplete: {available} bytes available")]
    Truncated { available: usize },
    #[error("declared header length {declared} is implausible (limit {limit})")]
    Implausible { declared: usize, limit: usize },
    #[error("malformed header: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("segment {index} has invalid range {start}..{end}")]
    InvalidRange { index: usize, start: u64, end: u64 },
    #[error("segment {index} starts before the previous segment ends")]
    OutOfOrder { index: usize },
    #[error("segment {index} ends at byte {end}, past the {total}-byte content")]
    PastEnd { index: usize, end: u64, total: u64 },
    #[error("header of {0} bytes does not fit the length prefix")]
    TooLong(usize),
}

fn length_prefix(len: usize) -> Result<[u8; HEADER_PREFIX_LEN], HeaderParseError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| HeaderParseError::TooLong(len))
}

impl SegmentHeader {
    /// Encode as length prefix + JSON.
    pub fn encode(&self) -> Result<Vec<u8>, HeaderParseError> {
        let json = serde_json::to_vec(self)?;
        let mut out = Vec::with_capacity(HEADER_PREFIX_LEN + json.len());
        out.extend_from_slice(&length_prefix(json.len())?);
        out.extend_from_slice(&json);
        Ok(out)
    }

    /// Read the declared JSON length from the first four bytes.
    pub fn declared_len(prefix: &[u8]) -> Option<usize> {
        let raw: [u8; HEADER_PREFIX_LEN] = prefix.get(..HEADER_PREFIX_LEN)?.try_into().ok()?;
        Some(u32::from_be_bytes(raw) as usize)
    }

    /// Parse the JSON body and check that segment ranges are well formed
    /// and ascending.
    pub fn parse(json: &[u8]) -> Result<Self, HeaderParseError> {
        let header: SegmentHeader = serde_json::from_slice(json)?;
        let mut previous_end = 0u64;
        for (index, seg) in header.segments.iter().enumerate() {
            if seg.byte_start > seg.byte_end {
                return Err(HeaderParseError::InvalidRange {
                    index,
                    start: seg.byte_start,
                    end: seg.byte_end,
                });
            }
            if seg.byte_start < previous_end {
                return Err(HeaderParseError::OutOfOrder { index });
            }
            previous_end = seg.byte_end;
        }
        Ok(header)
    }
}
