//! Write side: produces WRM recordings the player reads back.

use std::fmt;
use std::io::Write;

use serde::{Deserialize, Serialize};

use super::channel::BlockWriter;
use super::format::{
    ChunkHeader, ChunkType, CompressionType, MAX_CHUNK_SIZE, MetaHeader, PointerRecord,
    TimestampInput, TimestampRecord,
};
use super::image::encode_png;
use super::sink::{CaptureSink, GraphicSink};
use crate::cache::{
    BitmapCache, CacheGeometry, GlyphCache, MAX_BITMAP_CACHES, POINTER_CACHE_CAPACITY, Pointer,
    PointerCache,
};
use crate::error::{ProtocolError, ReplayError, Result};
use crate::orders::{
    Bitmap, BitmapData, CacheBitmap, CacheGlyph, DstBlt, FieldWriter, FrameMarker, GlyphIndex,
    LastOrder, LineTo, Mem3Blt, MemBlt, MultiDstBlt, MultiOpaqueRect, MultiPatBlt, MultiScrBlt,
    OpaqueRect, OrderSupport, PatBlt, Polyline, PrimaryState, ScrBlt, encode_primary,
};
use crate::schema::ConfigError;
use crate::wire::{OutStream, Rect};

/// Largest payload of a single chunk.
const MAX_PAYLOAD: usize = MAX_CHUNK_SIZE as usize - ChunkHeader::SIZE;

/// Pointer slots the recorder assigns to new shapes; 0 and 1 are built in.
const FIRST_FREE_POINTER: u8 = 2;

/// Configuration for WRM recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// META layout version (1..=4).
    #[serde(default = "default_version")]
    pub version: u16,
    pub width: u16,
    pub height: u16,
    #[serde(default = "default_bpp")]
    pub bpp: u16,
    /// Bitmap cache tiers; versions before 4 carry exactly three.
    #[serde(default)]
    pub geometry: CacheGeometry,
    /// Requires version 4.
    #[serde(default)]
    pub compression: CompressionType,
}

fn default_version() -> u16 {
    4
}

fn default_bpp() -> u16 {
    24
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            width: 800,
            height: 600,
            bpp: default_bpp(),
            geometry: CacheGeometry::default(),
            compression: CompressionType::None,
        }
    }
}

impl RecorderConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.geometry.tiers.len() > MAX_BITMAP_CACHES {
            return Err(ConfigError::TooManyCacheTiers(self.geometry.tiers.len()));
        }
        if self.version < 4 {
            if self.compression != CompressionType::None {
                return Err(ConfigError::VersionTooOld(self.version, "compression"));
            }
            let plain_tiers = self.geometry.tiers.len() == 3
                && !self.geometry.use_waiting_list
                && self.geometry.tiers.iter().all(|t| !t.persistent);
            if !plain_tiers {
                return Err(ConfigError::VersionTooOld(
                    self.version,
                    "cache tier geometry",
                ));
            }
        }
        Ok(())
    }

    /// The META record this configuration produces.
    pub fn meta(&self) -> MetaHeader {
        MetaHeader {
            version: self.version,
            width: self.width,
            height: self.height,
            bpp: self.bpp,
            geometry: self.geometry.clone(),
            compression: if self.version >= 4 {
                self.compression
            } else {
                CompressionType::None
            },
        }
    }
}

/// WRM recorder writing chunks to any [`Write`].
///
/// Drawing orders are batched into ORDERS chunks and flushed whenever a
/// chunk of another type is written. The recorder also implements both
/// sink traits, so a [`Player`](super::Player) can replay into it.
///
/// Usage:
/// ```ignore
/// let mut recorder = WrmRecorder::new(File::create("out.wrm")?, RecorderConfig::default())?;
/// recorder.timestamp(1_352_304_810_000_000, None)?;
/// recorder.draw(&OpaqueRect { rect, color }, &screen)?;
/// let (_, stats) = recorder.finish()?;
/// ```
pub struct WrmRecorder<W: Write> {
    writer: BlockWriter<W>,
    config: RecorderConfig,
    support: OrderSupport,
    screen: Rect,
    orders: PrimaryState,
    bitmaps: BitmapCache,
    pointers: PointerCache,
    glyphs: GlyphCache,
    next_pointer: u8,
    batch: OutStream,
    batch_count: u16,
    /// TIMESTAMP waiting for the input and snapshot callbacks that follow it.
    pending_timestamp: Option<TimestampRecord>,
    mouse: (u16, u16),
    frame: Vec<u8>,
    /// First failure inside a sink callback, reported by [`WrmRecorder::finish`].
    error: Option<ReplayError>,
    stats: RecordStats,
}

impl<W: Write> WrmRecorder<W> {
    /// Create a recorder and write the initial META chunk.
    pub fn new(inner: W, config: RecorderConfig) -> Result<Self> {
        config.validate()?;
        let mut recorder = Self {
            writer: BlockWriter::new(inner),
            support: OrderSupport::from_version(config.version),
            screen: Rect::new(0, 0, config.width, config.height),
            orders: PrimaryState::default(),
            bitmaps: BitmapCache::new(config.geometry.clone()),
            pointers: PointerCache::with_builtins(),
            glyphs: GlyphCache::default(),
            next_pointer: FIRST_FREE_POINTER,
            batch: OutStream::with_capacity(MAX_PAYLOAD),
            batch_count: 0,
            pending_timestamp: None,
            mouse: (0, 0),
            frame: Vec::new(),
            error: None,
            stats: RecordStats::default(),
            config,
        };
        recorder.write_meta()?;
        Ok(recorder)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn screen_rect(&self) -> Rect {
        self.screen
    }

    pub fn stats(&self) -> &RecordStats {
        &self.stats
    }

    /// Write a META chunk and switch to the compression it selects.
    pub fn write_meta(&mut self) -> Result<()> {
        self.flush_orders()?;
        let meta = self.config.meta();
        let mut out = OutStream::new();
        meta.encode(&mut out);
        self.write_chunk(ChunkType::Meta, out.as_slice(), 1)?;
        if meta.compression != self.writer.compression() {
            log::debug!("recorder channel {:?}", meta.compression);
            self.writer.set_compression(meta.compression);
        }
        Ok(())
    }

    /// Write a TIMESTAMP chunk (microseconds since the epoch).
    pub fn timestamp(&mut self, micros: u64, input: Option<TimestampInput>) -> Result<()> {
        self.flush_orders()?;
        self.emit_pending_timestamp()?;
        self.write_timestamp(&TimestampRecord { micros, input })
    }

    /// Append a primary order, encoded against the previous order of its kind.
    /// A clip equal to the screen is written as an unbounded order.
    pub fn draw<T: LastOrder>(&mut self, order: &T, clip: &Rect) -> Result<()> {
        let mut fields = FieldWriter::new();
        let last = T::last(&mut self.orders);
        order.encode_fields(last, &mut fields);
        *last = order.clone();

        let bounds = (*clip != self.screen).then_some(clip);
        let mut out = OutStream::new();
        encode_primary(&mut out, &mut self.orders.common, T::KIND, bounds, &fields);
        self.push_order(out.as_slice())
    }

    /// Append a cache bitmap order and mirror it in the recorder's cache.
    pub fn cache_bitmap(&mut self, cache_id: u8, cache_index: u16, bitmap: &Bitmap) -> Result<()> {
        if bitmap.cx > 255 || bitmap.cy > 255 {
            return Err(ProtocolError::MalformedBitmap("cache bitmap larger than 255x255").into());
        }
        self.bitmaps.put(cache_id, cache_index, bitmap.clone(), 0, 0)?;
        let order = CacheBitmap {
            cache_id,
            cache_index,
            bitmap: bitmap.clone(),
        };
        let mut out = OutStream::new();
        order.encode(&mut out);
        self.push_order(out.as_slice())
    }

    /// Append a cache glyph order.
    pub fn cache_glyph(&mut self, order: &CacheGlyph) -> Result<()> {
        for entry in &order.glyphs {
            self.glyphs
                .set(order.cache_id, entry.cache_index, entry.glyph.clone())?;
        }
        let mut out = OutStream::new();
        order.encode(&mut out);
        self.push_order(out.as_slice())
    }

    pub fn frame_marker(&mut self, marker: &FrameMarker) -> Result<()> {
        let mut out = OutStream::new();
        marker.encode(&mut out);
        self.push_order(out.as_slice())
    }

    /// Write a full bitmap update chunk: header followed by `raw` pixels.
    pub fn bitmap_update(&mut self, header: &BitmapData, raw: &[u8]) -> Result<()> {
        self.flush_orders()?;
        let mut out = OutStream::with_capacity(26 + raw.len());
        header.encode(&mut out);
        out.out_bytes(&raw[..header.bitmap_size().min(raw.len())]);
        self.write_chunk(ChunkType::Bitmap, out.as_slice(), 1)
    }

    /// Write a POINTER chunk; a record carrying a shape also fills the slot.
    pub fn pointer(&mut self, record: &PointerRecord) -> Result<()> {
        self.flush_orders()?;
        if let Some(shape) = &record.shape {
            self.pointers
                .add_pointer_static(shape.clone(), record.cache_index)?;
        }
        self.mouse = (record.mouse_x, record.mouse_y);
        let mut out = OutStream::new();
        record.encode(&mut out);
        self.write_chunk(ChunkType::Pointer, out.as_slice(), 1)
    }

    /// Write a SAVE_STATE chunk with the current primary order state.
    pub fn save_state(&mut self) -> Result<()> {
        self.flush_orders()?;
        let mut out = OutStream::new();
        self.orders.write_save_state(self.support, &mut out);
        self.write_chunk(ChunkType::SaveState, out.as_slice(), 1)
    }

    /// Write a full frame as PNG, split over PARTIAL_IMAGE chunks ending
    /// with a LAST_IMAGE chunk.
    pub fn image_frame(&mut self, width: u32, height: u32, bgr: &[u8]) -> Result<()> {
        self.flush_orders()?;
        let png = encode_png(width, height, bgr)?;
        let pieces: Vec<&[u8]> = png.chunks(MAX_PAYLOAD).collect();
        for (i, piece) in pieces.iter().enumerate() {
            let kind = if i + 1 == pieces.len() {
                ChunkType::LastImage
            } else {
                ChunkType::PartialImage
            };
            self.write_chunk(kind, piece, 0)?;
        }
        self.stats.image_frames += 1;
        Ok(())
    }

    /// Write a RESET chunk and fall back to the uncompressed channel.
    pub fn reset(&mut self) -> Result<()> {
        self.flush_orders()?;
        self.write_chunk(ChunkType::Reset, &[], 1)?;
        self.writer.set_compression(CompressionType::None);
        Ok(())
    }

    /// Write the batched orders as one ORDERS chunk.
    pub fn flush_orders(&mut self) -> Result<()> {
        if self.batch_count == 0 {
            return Ok(());
        }
        let batch = std::mem::take(&mut self.batch);
        let count = self.batch_count;
        self.batch_count = 0;
        self.write_chunk(ChunkType::Orders, batch.as_slice(), count)?;
        self.batch = batch;
        self.batch.clear();
        Ok(())
    }

    /// Flush everything and return the underlying writer.
    pub fn finish(mut self) -> Result<(W, RecordStats)> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.flush_orders()?;
        self.emit_pending_timestamp()?;
        self.writer.flush()?;
        log::info!("recording finished: {}", self.stats);
        Ok((self.writer.into_inner(), self.stats))
    }

    fn push_order(&mut self, order: &[u8]) -> Result<()> {
        if order.len() > MAX_PAYLOAD {
            return Err(ReplayError::OversizedChunk {
                size: (order.len() + ChunkHeader::SIZE) as u32,
                min: ChunkHeader::SIZE as u32,
                max: MAX_CHUNK_SIZE,
            });
        }
        if self.batch.len() + order.len() > MAX_PAYLOAD || self.batch_count == u16::MAX {
            self.flush_orders()?;
        }
        self.batch.out_bytes(order);
        self.batch_count += 1;
        self.stats.orders += 1;
        Ok(())
    }

    fn write_timestamp(&mut self, record: &TimestampRecord) -> Result<()> {
        let mut out = OutStream::new();
        record.encode(self.config.version, &mut out);
        self.write_raw_chunk(ChunkType::Timestamp, out.as_slice(), 1)?;
        self.stats.timestamps += 1;
        Ok(())
    }

    fn emit_pending_timestamp(&mut self) -> Result<()> {
        match self.pending_timestamp.take() {
            Some(record) => self.write_timestamp(&record),
            None => Ok(()),
        }
    }

    fn write_chunk(&mut self, kind: ChunkType, payload: &[u8], count: u16) -> Result<()> {
        self.emit_pending_timestamp()?;
        self.write_raw_chunk(kind, payload, count)
    }

    fn write_raw_chunk(&mut self, kind: ChunkType, payload: &[u8], count: u16) -> Result<()> {
        let mut buf = Vec::with_capacity(ChunkHeader::SIZE + payload.len());
        ChunkHeader::new(kind, payload.len(), count).write_to(&mut buf)?;
        buf.extend_from_slice(payload);
        self.writer.write_chunk(&buf)?;
        self.stats.chunks += 1;
        self.stats.chunk_bytes += buf.len() as u64;
        Ok(())
    }

    /// Run `f` unless an earlier sink callback failed; keep its first error.
    fn record(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = f(self) {
            log::error!("recording failed: {}", e);
            self.error = Some(e);
        }
    }

    /// Emit a cache bitmap order unless the slot already holds `bitmap`.
    fn ensure_cached(&mut self, cache_id: u8, cache_index: u16, bitmap: &Bitmap) -> Result<()> {
        let keys = bitmap.keys();
        let cached = self
            .bitmaps
            .entry(cache_id, cache_index)?
            .is_some_and(|e| (e.key1, e.key2) == keys);
        if !cached {
            self.cache_bitmap(cache_id, cache_index, bitmap)?;
        }
        Ok(())
    }

    /// Slot already holding `pointer`, or a newly assigned one.
    fn pointer_slot(&mut self, pointer: &Pointer) -> (u8, bool) {
        let found = (0..POINTER_CACHE_CAPACITY as u8)
            .find(|&i| self.pointers.get(i).is_ok_and(|p| p == pointer));
        if let Some(index) = found {
            return (index, false);
        }
        let index = self.next_pointer;
        self.next_pointer = if usize::from(index) + 1 >= POINTER_CACHE_CAPACITY {
            FIRST_FREE_POINTER
        } else {
            index + 1
        };
        (index, true)
    }
}

impl<W: Write> GraphicSink for WrmRecorder<W> {
    fn draw_dst_blt(&mut self, order: &DstBlt, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_multi_dst_blt(&mut self, order: &MultiDstBlt, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_pat_blt(&mut self, order: &PatBlt, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_multi_pat_blt(&mut self, order: &MultiPatBlt, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_scr_blt(&mut self, order: &ScrBlt, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_multi_scr_blt(&mut self, order: &MultiScrBlt, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_opaque_rect(&mut self, order: &OpaqueRect, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_multi_opaque_rect(&mut self, order: &MultiOpaqueRect, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_mem_blt(&mut self, order: &MemBlt, clip: &Rect, bitmap: &Bitmap) {
        self.record(|r| {
            r.ensure_cached(order.bitmap_cache_id(), order.cache_index, bitmap)?;
            r.draw(order, clip)
        });
    }

    fn draw_mem3_blt(&mut self, order: &Mem3Blt, clip: &Rect, bitmap: &Bitmap) {
        self.record(|r| {
            r.ensure_cached(order.bitmap_cache_id(), order.cache_index, bitmap)?;
            r.draw(order, clip)
        });
    }

    fn draw_line_to(&mut self, order: &LineTo, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_glyph_index(&mut self, order: &GlyphIndex, clip: &Rect, _glyphs: &GlyphCache) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_polyline(&mut self, order: &Polyline, clip: &Rect) {
        self.record(|r| r.draw(order, clip));
    }

    fn draw_glyph_cache(&mut self, order: &CacheGlyph) {
        self.record(|r| r.cache_glyph(order));
    }

    fn draw_frame_marker(&mut self, order: &FrameMarker) {
        self.record(|r| r.frame_marker(order));
    }

    fn draw_bitmap_update(&mut self, header: &BitmapData, raw: &[u8], _bitmap: &Bitmap) {
        self.record(|r| r.bitmap_update(header, raw));
    }

    fn set_pointer(&mut self, pointer: &Pointer) {
        self.record(|r| {
            let (cache_index, fresh) = r.pointer_slot(pointer);
            let (mouse_x, mouse_y) = r.mouse;
            r.pointer(&PointerRecord {
                mouse_x,
                mouse_y,
                cache_index,
                shape: fresh.then(|| pointer.clone()),
            })
        });
    }

    fn flush(&mut self) {
        self.record(|r| r.flush_orders());
    }
}

impl<W: Write> CaptureSink for WrmRecorder<W> {
    fn snapshot(&mut self, _now: u64, mouse_x: u16, mouse_y: u16, ignore_frame: bool) {
        self.mouse = (mouse_x, mouse_y);
        if let Some(record) = &mut self.pending_timestamp {
            let input = record.input.get_or_insert_with(TimestampInput::default);
            input.mouse_x = mouse_x;
            input.mouse_y = mouse_y;
            input.ignore_frame = ignore_frame;
        }
    }

    fn input(&mut self, _now: u64, keys: &[char]) {
        if let Some(record) = &mut self.pending_timestamp {
            let (mouse_x, mouse_y) = self.mouse;
            let input = record.input.get_or_insert(TimestampInput {
                mouse_x,
                mouse_y,
                ..Default::default()
            });
            input.keys.extend_from_slice(keys);
        }
    }

    fn external_time(&mut self, now: u64) {
        self.record(|r| {
            r.flush_orders()?;
            r.emit_pending_timestamp()?;
            r.pending_timestamp = Some(TimestampRecord {
                micros: now,
                input: None,
            });
            Ok(())
        });
    }

    fn external_breakpoint(&mut self) {
        self.record(|r| {
            r.flush_orders()?;
            r.write_meta()
        });
    }

    fn set_row(&mut self, row: usize, bgr: &[u8]) {
        let width = usize::from(self.config.width);
        let height = usize::from(self.config.height);
        if row == 0 {
            self.frame.clear();
        }
        let mut line = bgr.to_vec();
        line.resize(width * 3, 0);
        self.frame.extend_from_slice(&line);
        if row + 1 == height {
            let frame = std::mem::take(&mut self.frame);
            self.record(|r| r.image_frame(width as u32, height as u32, &frame));
        }
    }
}

/// Statistics from a recording session.
#[derive(Debug, Clone, Default)]
pub struct RecordStats {
    /// Chunks written, image segments included.
    pub chunks: u64,
    /// Chunk bytes before channel compression.
    pub chunk_bytes: u64,
    pub orders: u64,
    pub timestamps: u64,
    pub image_frames: u64,
}

impl fmt::Display for RecordStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunks ({} bytes), {} orders, {} timestamps, {} image frames",
            self.chunks, self.chunk_bytes, self.orders, self.timestamps, self.image_frames
        )
    }
}
