//! Segment demultiplexer — releases named byte ranges of streaming content
//! to a consumer as soon as the chunks covering them have arrived.
//!
//! Content starts with a length-prefixed JSON header listing segments with
//! offsets relative to the end of the header. Chunks may arrive in any
//! order; segments are always released in header order, each exactly once,
//! and never before every chunk spanning its range is present.
//!
//! State flow:
//!   AwaitingHeader → HeaderParsed → Streaming → Drained
//! Any error moves to Failed, after which the caller treats the assembled
//! content as a single buffer instead.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use fractal_core::{wire::HEADER_PREFIX_LEN, HeaderParseError, LoaderConfig, SegmentHeader};

/// One released segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Position in the header's segment list.
    pub index: usize,
    /// The header's `type` string, passed through untouched.
    pub kind: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("consumer rejected segment: {0}")]
pub struct ConsumerError(pub String);

/// Receives segments in order. `append` returns only once the segment is
/// accepted, so the next one is never offered early.
pub trait SegmentConsumer {
    fn append(&mut self, segment: Segment) -> Result<(), ConsumerError>;
    fn end_of_stream(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxState {
    AwaitingHeader,
    HeaderParsed,
    Streaming,
    Drained,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum DemuxError {
    #[error("segment header: {0}")]
    Header(#[from] HeaderParseError),
    #[error("chunk data for segment {segment} is shorter than its range")]
    Misaligned { segment: usize },
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
    #[error("content ended after {released} of {count} segments")]
    Incomplete { released: usize, count: usize },
    #[error("demultiplexer already closed")]
    Closed,
}

impl DemuxError {
    /// Whether the load can carry on with the whole assembled buffer.
    /// Only a consumer rejection is final.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, DemuxError::Consumer(_))
    }
}

/// Segment range in absolute content offsets. `end` is exclusive.
#[derive(Debug, Clone)]
struct Span {
    kind: String,
    start: u64,
    end: u64,
}

pub struct SegmentDemuxer {
    chunk_size: u64,
    max_header_len: usize,
    total_size_hint: Option<u64>,
    chunks: BTreeMap<usize, Bytes>,
    spans: Vec<Span>,
    next: usize,
    /// Chunks below this index are no longer needed and are dropped on arrival.
    low_water: usize,
    state: DemuxState,
}

impl SegmentDemuxer {
    pub fn new(chunk_size: usize, max_header_len: usize, total_size_hint: Option<u64>) -> Self {
        Self {
            chunk_size: chunk_size.max(1) as u64,
            max_header_len,
            total_size_hint,
            chunks: BTreeMap::new(),
            spans: Vec::new(),
            next: 0,
            low_water: 0,
            state: DemuxState::AwaitingHeader,
        }
    }

    pub fn from_config(config: &LoaderConfig, total_size_hint: Option<u64>) -> Self {
        Self::new(config.chunk_size, config.max_header_len, total_size_hint)
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    /// Segments released so far.
    pub fn released(&self) -> usize {
        self.next
    }

    /// Chunks currently held back waiting for a segment to complete.
    pub fn buffered_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Accept chunk `index` and release whatever segments it completes.
    /// Returns the number of segments released by this call.
    pub fn push_chunk<C: SegmentConsumer + ?Sized>(
        &mut self,
        index: usize,
        data: Bytes,
        consumer: &mut C,
    ) -> Result<usize, DemuxError> {
        if matches!(self.state, DemuxState::Drained | DemuxState::Failed) {
            return Err(DemuxError::Closed);
        }
        if index < self.low_water {
            return Ok(0);
        }
        self.chunks.entry(index).or_insert(data);

        if self.state == DemuxState::AwaitingHeader {
            match self.try_parse_header() {
                Ok(true) => {}
                Ok(false) => return Ok(0),
                Err(e) => {
                    self.state = DemuxState::Failed;
                    self.chunks.clear();
                    return Err(e.into());
                }
            }
        }

        let result = self.release_ready(consumer);
        if result.is_err() {
            self.state = DemuxState::Failed;
            self.chunks.clear();
        }
        result
    }

    /// No more chunks are coming. Signals end of stream if every segment
    /// was released.
    pub fn finish<C: SegmentConsumer + ?Sized>(&mut self, consumer: &mut C) -> Result<(), DemuxError> {
        match self.state {
            DemuxState::Drained | DemuxState::Failed => Err(DemuxError::Closed),
            DemuxState::AwaitingHeader => {
                self.state = DemuxState::Failed;
                let available = self.contiguous_prefix(usize::MAX).len();
                self.chunks.clear();
                Err(HeaderParseError::Truncated { available }.into())
            }
            DemuxState::HeaderParsed | DemuxState::Streaming => {
                if self.next < self.spans.len() {
                    self.state = DemuxState::Failed;
                    self.chunks.clear();
                    return Err(DemuxError::Incomplete {
                        released: self.next,
                        count: self.spans.len(),
                    });
                }
                consumer.end_of_stream();
                self.state = DemuxState::Drained;
                self.chunks.clear();
                tracing::debug!(segments = self.spans.len(), "segment stream drained");
                Ok(())
            }
        }
    }

    // ── Header ────────────────────────────────────────────────────────────────

    /// Bytes from chunk 0 onward, stopping at the first gap or at `want`.
    fn contiguous_prefix(&self, want: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        for (expected, (index, chunk)) in self.chunks.iter().enumerate() {
            if *index != expected || buf.len() >= want {
                break;
            }
            buf.extend_from_slice(chunk);
        }
        buf.truncate(want);
        buf
    }

    fn header_limit(&self) -> usize {
        let by_hint = self
            .total_size_hint
            .map(|total| total.saturating_sub(HEADER_PREFIX_LEN as u64))
            .and_then(|remaining| usize::try_from(remaining).ok())
            .unwrap_or(usize::MAX);
        self.max_header_len.min(by_hint)
    }

    /// Ok(false) while more bytes are needed.
    fn try_parse_header(&mut self) -> Result<bool, HeaderParseError> {
        let prefix = self.contiguous_prefix(HEADER_PREFIX_LEN);
        let Some(declared) = SegmentHeader::declared_len(&prefix) else {
            return Ok(false);
        };

        let limit = self.header_limit();
        if declared > limit {
            tracing::warn!(declared, limit, "segment header length implausible");
            return Err(HeaderParseError::Implausible { declared, limit });
        }

        let needed = HEADER_PREFIX_LEN + declared;
        let bytes = self.contiguous_prefix(needed);
        if bytes.len() < needed {
            return Ok(false);
        }

        let header = SegmentHeader::parse(&bytes[HEADER_PREFIX_LEN..])?;
        self.spans = self.place_spans(needed as u64, header)?;
        self.state = DemuxState::HeaderParsed;
        tracing::debug!(header_len = declared, segments = self.spans.len(), "segment header parsed");
        Ok(true)
    }

    /// Turn header-relative ranges into absolute content offsets.
    fn place_spans(&self, base: u64, header: SegmentHeader) -> Result<Vec<Span>, HeaderParseError> {
        let mut spans = Vec::with_capacity(header.segments.len());
        for (index, seg) in header.segments.into_iter().enumerate() {
            let (Some(start), Some(end)) = (
                base.checked_add(seg.byte_start),
                base.checked_add(seg.byte_end),
            ) else {
                return Err(HeaderParseError::InvalidRange {
                    index,
                    start: seg.byte_start,
                    end: seg.byte_end,
                });
            };
            if let Some(total) = self.total_size_hint.filter(|&total| end > total) {
                return Err(HeaderParseError::PastEnd { index, end, total });
            }
            spans.push(Span {
                kind: seg.kind,
                start,
                end,
            });
        }
        Ok(spans)
    }

    // ── Release ───────────────────────────────────────────────────────────────

    fn chunk_of(&self, offset: u64) -> usize {
        usize::try_from(offset / self.chunk_size).unwrap_or(usize::MAX)
    }

    /// Chunk indices covering `span`, or `None` for an empty span.
    fn covering(&self, span: &Span) -> Option<(usize, usize)> {
        (span.end > span.start).then(|| (self.chunk_of(span.start), self.chunk_of(span.end - 1)))
    }

    fn release_ready<C: SegmentConsumer + ?Sized>(&mut self, consumer: &mut C) -> Result<usize, DemuxError> {
        let mut released = 0;
        while let Some(span) = self.spans.get(self.next) {
            let data = match self.covering(span) {
                None => Bytes::new(),
                Some((first, last)) => {
                    if !(first..=last).all(|c| self.chunks.contains_key(&c)) {
                        break;
                    }
                    self.extract(span, first, last)
                        .ok_or(DemuxError::Misaligned { segment: self.next })?
                }
            };

            let segment = Segment {
                index: self.next,
                kind: span.kind.clone(),
                data,
            };
            tracing::trace!(index = segment.index, kind = %segment.kind, bytes = segment.data.len(), "releasing segment");
            consumer.append(segment)?;

            self.next += 1;
            released += 1;
            self.state = DemuxState::Streaming;
        }

        self.prune();
        Ok(released)
    }

    /// Exact bytes of `span` from its covering chunks. `None` if a chunk is
    /// too short to hold its part of the range.
    fn extract(&self, span: &Span, first: usize, last: usize) -> Option<Bytes> {
        let piece = |c: usize| -> Option<Bytes> {
            let chunk = self.chunks.get(&c)?;
            let chunk_start = c as u64 * self.chunk_size;
            let lo = usize::try_from(span.start.max(chunk_start) - chunk_start).ok()?;
            let hi = usize::try_from(span.end.min(chunk_start + self.chunk_size) - chunk_start).ok()?;
            (hi <= chunk.len()).then(|| chunk.slice(lo..hi))
        };

        if first == last {
            return piece(first);
        }
        let mut out = BytesMut::with_capacity((span.end - span.start) as usize);
        for c in first..=last {
            out.extend_from_slice(&piece(c)?);
        }
        Some(out.freeze())
    }

    /// Drop chunks that lie wholly before the next pending segment.
    fn prune(&mut self) {
        let keep_from = match self.spans.get(self.next) {
            Some(span) => self.chunk_of(span.start),
            None => usize::MAX,
        };
        if keep_from > self.low_water {
            self.low_water = keep_from;
            self.chunks = self.chunks.split_off(&keep_from);
        }
    }
}
