//! Binary format definitions for WRM recording files.

use std::io::{self, Read, Write};

use crate::cache::{CacheGeometry, CacheTier, MAX_BITMAP_CACHES, Pointer};
use crate::error::{ProtocolError, ReplayError, Result};
use crate::wire::{InStream, OutStream};

/// Upper bound of `chunk_size` for every chunk but image frames.
pub const MAX_CHUNK_SIZE: u32 = 65536;

/// Chunk types of the WRM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ChunkType {
    Orders = 0,
    Bitmap = 1,
    Meta = 1006,
    Timestamp = 1009,
    Pointer = 1010,
    LastImage = 0x1000,
    PartialImage = 0x1001,
    SaveState = 0x1002,
    Reset = 0x1003,
}

impl ChunkType {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(ChunkType::Orders),
            1 => Some(ChunkType::Bitmap),
            1006 => Some(ChunkType::Meta),
            1009 => Some(ChunkType::Timestamp),
            1010 => Some(ChunkType::Pointer),
            0x1000 => Some(ChunkType::LastImage),
            0x1001 => Some(ChunkType::PartialImage),
            0x1002 => Some(ChunkType::SaveState),
            0x1003 => Some(ChunkType::Reset),
            _ => None,
        }
    }

    /// Image frame chunks are streamed instead of buffered.
    pub fn is_image(self) -> bool {
        matches!(self, ChunkType::LastImage | ChunkType::PartialImage)
    }
}

/// Chunk types of the sibling transparent (pass-through) recording format.
/// The two type spaces never mix within one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransparentChunkType {
    Meta = 0,
    FastPath = 1,
    FrontChannel = 2,
    SlowPath = 3,
    Resize = 4,
}

impl TransparentChunkType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(TransparentChunkType::Meta),
            1 => Some(TransparentChunkType::FastPath),
            2 => Some(TransparentChunkType::FrontChannel),
            3 => Some(TransparentChunkType::SlowPath),
            4 => Some(TransparentChunkType::Resize),
            _ => None,
        }
    }
}

/// Compression applied to chunks following a META chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    Gzip = 1,
    Lz4 = 2,
}

impl CompressionType {
    /// Selector 3 is reserved for a compressor this build does not carry.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Gzip),
            2 => Some(CompressionType::Lz4),
            _ => None,
        }
    }
}

/// Read until `buf` is full or the reader is exhausted; returns bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fixed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Raw type; unknown values are rejected by the interpreter.
    pub chunk_type: u16,
    /// Total size including this header.
    pub size: u32,
    /// Number of logical units packed in the chunk.
    pub count: u16,
}

impl ChunkHeader {
    /// Type(2) + Size(4) + Count(2)
    pub const SIZE: usize = 8;

    pub fn new(chunk_type: ChunkType, payload_len: usize, count: u16) -> Self {
        Self {
            chunk_type: chunk_type as u16,
            size: (payload_len + Self::SIZE) as u32,
            count,
        }
    }

    pub fn kind(&self) -> Option<ChunkType> {
        ChunkType::from_u16(self.chunk_type)
    }

    pub fn is_image(&self) -> bool {
        self.kind().is_some_and(ChunkType::is_image)
    }

    /// Payload length, validating the declared size.
    pub fn payload_len(&self) -> Result<usize> {
        let max = if self.is_image() { u32::MAX } else { MAX_CHUNK_SIZE };
        if self.size < Self::SIZE as u32 || self.size > max {
            return Err(ReplayError::OversizedChunk {
                size: self.size,
                min: Self::SIZE as u32,
                max,
            });
        }
        Ok(self.size as usize - Self::SIZE)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.chunk_type.to_le_bytes())?;
        w.write_all(&self.size.to_le_bytes())?;
        w.write_all(&self.count.to_le_bytes())?;
        Ok(())
    }

    /// Read a header; `None` on a clean end of stream before its first byte.
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; Self::SIZE];
        let got = read_full(r, &mut buf)?;
        if got == 0 {
            return Ok(None);
        }
        if got < Self::SIZE {
            return Err(ReplayError::truncated("chunk header", Self::SIZE, got));
        }
        Ok(Some(Self {
            chunk_type: u16::from_le_bytes([buf[0], buf[1]]),
            size: u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]),
            count: u16::from_le_bytes([buf[6], buf[7]]),
        }))
    }
}

/// META chunk payload.
///
/// ```text
/// version u16, width u16, height u16, bpp u16
/// tier 0..=2: entries u16, size u16
/// version > 3:
///   number_of_caches u8, use_waiting_list u8,
///   persistent 0..=2 u8,
///   tier 3..=4: entries u16, size u16, persistent u8,
///   compression u8
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaHeader {
    pub version: u16,
    pub width: u16,
    pub height: u16,
    pub bpp: u16,
    pub geometry: CacheGeometry,
    pub compression: CompressionType,
}

impl MetaHeader {
    pub fn decode(s: &mut InStream<'_>) -> Result<Self> {
        let version = s.in_u16_le()?;
        let width = s.in_u16_le()?;
        let height = s.in_u16_le()?;
        let bpp = s.in_u16_le()?;
        let mut tiers = Vec::with_capacity(MAX_BITMAP_CACHES);
        for _ in 0..3 {
            tiers.push(CacheTier::new(s.in_u16_le()?, s.in_u16_le()?, false));
        }

        if version <= 3 {
            return Ok(Self {
                version,
                width,
                height,
                bpp,
                geometry: CacheGeometry {
                    tiers,
                    use_waiting_list: false,
                },
                compression: CompressionType::None,
            });
        }

        let number_of_caches = usize::from(s.in_u8()?);
        let use_waiting_list = s.in_u8()? != 0;
        for tier in &mut tiers {
            tier.persistent = s.in_u8()? != 0;
        }
        for _ in 0..2 {
            let entries = s.in_u16_le()?;
            let size = s.in_u16_le()?;
            tiers.push(CacheTier::new(entries, size, s.in_u8()? != 0));
        }
        let raw = s.in_u8()?;
        let compression =
            CompressionType::from_u8(raw).ok_or(ProtocolError::UnsupportedCompression(raw))?;

        if number_of_caches > MAX_BITMAP_CACHES {
            log::warn!(
                "META declares {} bitmap caches, using {}",
                number_of_caches,
                MAX_BITMAP_CACHES
            );
        }
        tiers.truncate(number_of_caches.min(MAX_BITMAP_CACHES));
        Ok(Self {
            version,
            width,
            height,
            bpp,
            geometry: CacheGeometry {
                tiers,
                use_waiting_list,
            },
            compression,
        })
    }

    pub fn encode(&self, out: &mut OutStream) {
        out.out_u16_le(self.version);
        out.out_u16_le(self.width);
        out.out_u16_le(self.height);
        out.out_u16_le(self.bpp);
        for id in 0..3 {
            let tier = self.geometry.tier(id);
            out.out_u16_le(tier.entries);
            out.out_u16_le(tier.size);
        }
        if self.version <= 3 {
            return;
        }
        out.out_u8(self.geometry.tiers.len() as u8);
        out.out_u8(u8::from(self.geometry.use_waiting_list));
        for id in 0..3 {
            out.out_u8(u8::from(self.geometry.tier(id).persistent));
        }
        for id in 3..5 {
            let tier = self.geometry.tier(id);
            out.out_u16_le(tier.entries);
            out.out_u16_le(tier.size);
            out.out_u8(u8::from(tier.persistent));
        }
        out.out_u8(self.compression as u8);
    }
}

/// Mouse position, frame flag and keyboard input trailing a timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampInput {
    pub mouse_x: u16,
    pub mouse_y: u16,
    /// Present on the wire from version 2 on.
    pub ignore_frame: bool,
    pub keys: Vec<char>,
}

/// TIMESTAMP chunk payload: microseconds since the epoch, optional input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampRecord {
    pub micros: u64,
    pub input: Option<TimestampInput>,
}

impl TimestampRecord {
    pub fn decode(version: u16, s: &mut InStream<'_>) -> Result<Self> {
        let micros = s.in_u64_le()?;
        if s.at_end() {
            return Ok(Self {
                micros,
                input: None,
            });
        }
        let mouse_x = s.in_u16_le()?;
        let mouse_y = s.in_u16_le()?;
        let ignore_frame = version > 1 && s.in_u8()? != 0;
        let keys = s
            .in_rest()
            .chunks_exact(4)
            .map(|c| {
                char::from_u32(u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .unwrap_or(char::REPLACEMENT_CHARACTER)
            })
            .collect();
        Ok(Self {
            micros,
            input: Some(TimestampInput {
                mouse_x,
                mouse_y,
                ignore_frame,
                keys,
            }),
        })
    }

    pub fn encode(&self, version: u16, out: &mut OutStream) {
        out.out_u64_le(self.micros);
        if let Some(input) = &self.input {
            out.out_u16_le(input.mouse_x);
            out.out_u16_le(input.mouse_y);
            if version > 1 {
                out.out_u8(u8::from(input.ignore_frame));
            }
            for key in &input.keys {
                out.out_u32_le(u32::from(*key));
            }
        }
    }
}

/// POINTER chunk payload: position plus a cache index, optionally a new shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointerRecord {
    pub mouse_x: u16,
    pub mouse_y: u16,
    pub cache_index: u8,
    pub shape: Option<Pointer>,
}

impl PointerRecord {
    /// Position(4) + CacheIndex(1)
    pub const MIN_SIZE: usize = 5;

    pub fn decode(s: &mut InStream<'_>) -> Result<Self> {
        let mouse_x = s.in_u16_le()?;
        let mouse_y = s.in_u16_le()?;
        let cache_index = s.in_u8()?;
        let shape = if s.at_end() {
            None
        } else {
            let hotspot_x = s.in_u8()?;
            let hotspot_y = s.in_u8()?;
            let data = s.in_bytes(Pointer::DATA_SIZE)?.to_vec();
            let mask = s.in_bytes(Pointer::MASK_SIZE)?.to_vec();
            Some(Pointer {
                hotspot_x,
                hotspot_y,
                data,
                mask,
            })
        };
        Ok(Self {
            mouse_x,
            mouse_y,
            cache_index,
            shape,
        })
    }

    pub fn encode(&self, out: &mut OutStream) {
        out.out_u16_le(self.mouse_x);
        out.out_u16_le(self.mouse_y);
        out.out_u8(self.cache_index);
        if let Some(p) = &self.shape {
            out.out_u8(p.hotspot_x);
            out.out_u8(p.hotspot_y);
            out.out_bytes(&p.data);
            out.out_bytes(&p.mask);
        }
    }
}
