//! Error types for recording playback and capture.

use std::io;

use crate::cache::PersistError;
use crate::recording::SequenceError;
use crate::schema::ConfigError;

/// Errors raised while framing, interpreting or writing a recording.
///
/// Every variant except [`ReplayError::Io`] is fatal for the current
/// playback: the driver stops at the first error and keeps whatever was
/// already dispatched to the sinks. A clean end of stream is never an error.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fewer bytes were available than a chunk or order declared.
    #[error("truncated {context}: needed {needed} bytes, {available} available")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("chunk size {size} outside of [{min}, {max}]")]
    OversizedChunk { size: u32, min: u32, max: u32 },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("image frame decoding failed: {0}")]
    Image(#[from] png::DecodingError),

    #[error("image frame encoding failed: {0}")]
    ImageEncoding(#[from] png::EncodingError),

    #[error("bitmap cache file: {0}")]
    Persist(#[from] PersistError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("recording sequence: {0}")]
    Sequence(#[from] SequenceError),
}

impl ReplayError {
    /// Shorthand for a truncation detected while decoding `context`.
    pub fn truncated(context: &'static str, needed: usize, available: usize) -> Self {
        Self::Truncated {
            context,
            needed,
            available,
        }
    }

    /// True for protocol sequencing violations the caller must not retry.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }

    /// True when the stream ended in the middle of a declared unit.
    pub fn is_truncation(&self) -> bool {
        match self {
            Self::Truncated { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

/// Non-retriable protocol sequencing violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("{0} chunk before META")]
    MetaMissing(&'static str),

    #[error("{0} chunk before first TIMESTAMP")]
    TimestampMissing(&'static str),

    #[error("inconsistent redundant META chunk: {0}")]
    InconsistentMeta(String),

    #[error("unresolved bitmap cache reference (cache {cache_id}, index {cache_index})")]
    UnresolvedBitmap { cache_id: u16, cache_index: u16 },

    #[error("unknown chunk type {0:#06x}")]
    UnknownChunkType(u16),

    #[error("unsupported primary order {0:#04x}")]
    UnsupportedPrimaryOrder(u8),

    #[error("invalid order class in control byte {0:#04x}")]
    InvalidOrderClass(u8),

    #[error("unsupported compression algorithm {0}")]
    UnsupportedCompression(u8),

    #[error("{cache} cache slot out of range (cache {cache_id}, index {cache_index})")]
    CacheOutOfRange {
        cache: &'static str,
        cache_id: u16,
        cache_index: u16,
    },

    #[error("unsupported bitmap depth {0} bpp")]
    UnsupportedBpp(u8),

    #[error("malformed bitmap data: {0}")]
    MalformedBitmap(&'static str),

    #[error("pointer cache slot {0} was never populated")]
    PointerCacheMiss(u8),

    #[error("image frame continued by chunk type {0:#06x}")]
    ImageContinuation(u16),

    #[error("too many consumers (limit {0})")]
    TooManyConsumers(usize),

    #[error("delta list of {count} entries exceeds limit {limit}")]
    DeltaListTooLong { count: usize, limit: usize },
}

pub type Result<T> = std::result::Result<T, ReplayError>;
