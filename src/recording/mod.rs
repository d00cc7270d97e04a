//! WRM recording playback and capture.
//!
//! A recording is a flat sequence of chunks. Orders, caches and pointers
//! replay against state built up by earlier chunks, so a recording is
//! only ever read front to back.
//!
//! # File Format
//!
//! ```text
//! Chunk header (8 bytes, little-endian):
//!   Type: u16
//!   Size: u32 (header included, at most 65536 except image frames)
//!   Count: u16 (logical units in the payload)
//!
//! META       (1006)   screen geometry, bitmap cache tiers, compression
//! TIMESTAMP  (1009)   u64 microseconds, optional mouse and key input
//! ORDERS     (0)      `count` primary/secondary/altsec drawing orders
//! BITMAP     (1)      full bitmap update
//! POINTER    (1010)   position and cursor cache slot, optional shape
//! SAVE_STATE (0x1002) every primary order's last state
//! RESET      (0x1003) back to the uncompressed channel
//! PARTIAL_IMAGE (0x1001) .. LAST_IMAGE (0x1000)
//!                     one PNG frame split over consecutive chunks
//! ```
//!
//! A META chunk selecting gzip or lz4 switches every following chunk
//! (headers included) to block-framed compressed data until a RESET.

mod channel;
mod format;
mod framer;
mod image;
mod interpreter;
mod player;
mod recorder;
mod sequence;
mod sink;

pub use channel::{BlockWriter, ChunkChannel, compress_gzip, decompress_gzip};
pub use format::{
    ChunkHeader, ChunkType, CompressionType, MAX_CHUNK_SIZE, MetaHeader, PointerRecord,
    TimestampInput, TimestampRecord, TransparentChunkType,
};
pub use framer::ChunkFramer;
pub use image::{ImageChunkReader, encode_png};
pub use interpreter::{Flow, ReplayState};
pub use player::{MAX_CONSUMERS, PlayStats, Player};
pub use recorder::{RecordStats, RecorderConfig, WrmRecorder};
pub use sequence::{MetaSequenceReader, SequenceEntry, SequenceError, SequenceIndex};
pub use sink::{
    CaptureSink, Consumer, Device, GraphicSink, OrderCounter, each_capture, each_graphic,
};
