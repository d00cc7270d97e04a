//! Order interpreter: decodes one logical unit of a chunk and dispatches it.

use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

use super::format::{ChunkHeader, ChunkType, MetaHeader, PointerRecord, TimestampRecord};
use super::framer::ChunkFramer;
use super::sink::{Consumer, each_capture, each_graphic};
use crate::cache::{BitmapCache, GlyphCache, PointerCache};
use crate::error::{ProtocolError, Result};
use crate::orders::{
    ALTSEC_FRAME_MARKER, Bitmap, BitmapData, CacheBitmap, CacheGlyph, FieldReader, FrameMarker,
    OrderClass, OrderSupport, PrimaryHeader, PrimaryKind, PrimaryOrder, PrimaryState,
    SecondaryHeader, TS_CACHE_BITMAP_COMPRESSED, TS_CACHE_BITMAP_UNCOMPRESSED, TS_CACHE_GLYPH,
    secondary_name,
};
use crate::wire::{InStream, Rect};

/// What the driver does with the current chunk after a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Remaining units of the chunk are still pending.
    Continue,
    /// The chunk is exhausted or was abandoned.
    EndOfChunk,
}

/// Everything playback mutates: session globals, caches and the persistent
/// per-kind primary order state.
#[derive(Debug)]
pub struct ReplayState {
    /// First META seen; fixes the screen and cache geometry.
    pub meta: Option<MetaHeader>,
    pub support: OrderSupport,
    pub screen_rect: Rect,
    /// Microseconds since the epoch of the last TIMESTAMP.
    pub record_now: u64,
    pub first_timestamp: Option<u64>,
    pub timestamp_ok: bool,
    pub mouse_x: u16,
    pub mouse_y: u16,
    pub ignore_frame: bool,
    pub orders: PrimaryState,
    pub bitmaps: Option<BitmapCache>,
    pub pointers: PointerCache,
    pub glyphs: GlyphCache,
    real_time: bool,
    /// `(record time, wall clock)` captured at the first TIMESTAMP.
    anchor: Option<(u64, Instant)>,
}

impl ReplayState {
    pub fn new(real_time: bool) -> Self {
        Self {
            meta: None,
            support: OrderSupport::default(),
            screen_rect: Rect::default(),
            record_now: 0,
            first_timestamp: None,
            timestamp_ok: false,
            mouse_x: 0,
            mouse_y: 0,
            ignore_frame: false,
            orders: PrimaryState::default(),
            bitmaps: None,
            pointers: PointerCache::with_builtins(),
            glyphs: GlyphCache::default(),
            real_time,
            anchor: None,
        }
    }

    pub fn meta_ok(&self) -> bool {
        self.meta.is_some()
    }

    fn version(&self) -> u16 {
        self.meta.as_ref().map_or(1, |m| m.version)
    }

    fn require_ready(&self, what: &'static str) -> Result<()> {
        if !self.meta_ok() {
            log::error!("{} chunk before META", what);
            return Err(ProtocolError::MetaMissing(what).into());
        }
        if !self.timestamp_ok {
            log::error!("{} chunk before first TIMESTAMP", what);
            return Err(ProtocolError::TimestampMissing(what).into());
        }
        Ok(())
    }

    /// Decode and dispatch one unit of the chunk described by `header`.
    pub fn interpret<R: Read>(
        &mut self,
        header: &ChunkHeader,
        framer: &mut ChunkFramer<R>,
        consumers: &mut [Consumer<'_>],
    ) -> Result<Flow> {
        let Some(kind) = header.kind() else {
            log::error!("unknown chunk type {:#06x}", header.chunk_type);
            return Err(ProtocolError::UnknownChunkType(header.chunk_type).into());
        };
        match kind {
            ChunkType::Orders => {
                self.require_ready("ORDERS")?;
                return self.interpret_drawing_order(framer, consumers);
            }
            ChunkType::Bitmap => {
                self.require_ready("BITMAP")?;
                let mut s = framer.stream();
                let data = BitmapData::decode(&mut s)?;
                let raw = s.in_bytes(data.bitmap_size())?;
                let bitmap = data.to_bitmap(raw)?;
                each_graphic(consumers, |g| g.draw_bitmap_update(&data, raw, &bitmap));
                framer.set_position(s.offset());
            }
            ChunkType::Timestamp => {
                let mut s = framer.stream();
                let record = TimestampRecord::decode(self.version(), &mut s)?;
                framer.set_position(s.offset());
                self.apply_timestamp(record, consumers);
            }
            ChunkType::Meta => {
                let mut s = framer.stream();
                let meta = MetaHeader::decode(&mut s)?;
                framer.skip_rest();
                self.apply_meta(meta, framer, consumers)?;
            }
            ChunkType::Pointer => {
                let mut s = framer.stream();
                let record = PointerRecord::decode(&mut s)?;
                framer.set_position(s.offset());
                self.mouse_x = record.mouse_x;
                self.mouse_y = record.mouse_y;
                if let Some(shape) = record.shape {
                    self.pointers.add_pointer_static(shape, record.cache_index)?;
                }
                let pointer = self.pointers.get(record.cache_index)?;
                each_graphic(consumers, |g| g.set_pointer(pointer));
            }
            ChunkType::SaveState => {
                let mut s = framer.stream();
                self.orders.read_save_state(self.support, &mut s)?;
                framer.set_position(s.offset());
                log::debug!("restored primary order state ({:?})", self.orders.common.kind);
            }
            ChunkType::Reset => framer.set_compression(Default::default()),
            ChunkType::LastImage | ChunkType::PartialImage => {
                let wanted = consumers.iter_mut().any(|c| c.capture_sink().is_some());
                let mut reader = framer.image_reader(header)?;
                if wanted {
                    let (w, h) = reader.decode_png(|row, bgr| {
                        each_capture(&mut *consumers, |c| c.set_row(row, bgr))
                    })?;
                    log::debug!("image frame {}x{}", w, h);
                } else {
                    let n = reader.drain()?;
                    log::trace!("discarded {} image bytes", n);
                }
                return Ok(Flow::EndOfChunk);
            }
        }
        Ok(Flow::Continue)
    }

    fn apply_meta<R: Read>(
        &mut self,
        meta: MetaHeader,
        framer: &mut ChunkFramer<R>,
        consumers: &mut [Consumer<'_>],
    ) -> Result<()> {
        if let Some(first) = &self.meta {
            if (first.width, first.height) != (meta.width, meta.height) {
                let detail = format!(
                    "{}x{} then {}x{}",
                    first.width, first.height, meta.width, meta.height
                );
                log::error!("inconsistent redundant META: {}", detail);
                return Err(ProtocolError::InconsistentMeta(detail).into());
            }
            log::debug!("redundant META v{}", meta.version);
        } else {
            log::info!(
                "META v{}: {}x{} {} bpp, {} cache tiers, {:?}",
                meta.version,
                meta.width,
                meta.height,
                meta.bpp,
                meta.geometry.tiers.len(),
                meta.compression
            );
            self.bitmaps = Some(BitmapCache::new(meta.geometry.clone()));
            self.screen_rect = Rect::new(0, 0, meta.width, meta.height);
            self.support = OrderSupport::from_version(meta.version);
            self.meta = Some(meta.clone());
        }
        framer.set_compression(meta.compression);
        each_capture(consumers, |c| c.external_breakpoint());
        Ok(())
    }

    fn apply_timestamp(&mut self, record: TimestampRecord, consumers: &mut [Consumer<'_>]) {
        let now = record.micros;
        self.record_now = now;
        each_capture(consumers, |c| c.external_time(now));
        if let Some(input) = record.input {
            self.mouse_x = input.mouse_x;
            self.mouse_y = input.mouse_y;
            self.ignore_frame = input.ignore_frame;
            if !input.keys.is_empty() {
                each_capture(consumers, |c| c.input(now, &input.keys));
            }
        }

        match self.anchor {
            None => {
                self.anchor = Some((now, Instant::now()));
                self.first_timestamp = Some(now);
            }
            Some((start, wall)) if self.real_time => {
                each_graphic(consumers, |g| g.flush());
                let target = Duration::from_micros(now.saturating_sub(start));
                if let Some(delay) = target.checked_sub(wall.elapsed()) {
                    thread::sleep(delay);
                }
            }
            Some(_) => {}
        }
        self.timestamp_ok = true;
    }

    fn interpret_drawing_order<R: Read>(
        &mut self,
        framer: &mut ChunkFramer<R>,
        consumers: &mut [Consumer<'_>],
    ) -> Result<Flow> {
        let mut s = framer.stream();
        let control = s.in_u8()?;
        match OrderClass::from_control(control)? {
            OrderClass::Primary => self.interpret_primary(control, &mut s, consumers)?,
            OrderClass::Secondary => self.interpret_secondary(&mut s, consumers)?,
            OrderClass::AltSec => {
                let order_type = control >> 2;
                if order_type != ALTSEC_FRAME_MARKER {
                    log::warn!(
                        "unsupported alternate secondary order {:#04x}, abandoning chunk",
                        order_type
                    );
                    framer.skip_rest();
                    return Ok(Flow::EndOfChunk);
                }
                let marker = FrameMarker::decode(&mut s)?;
                each_graphic(consumers, |g| g.draw_frame_marker(&marker));
            }
        }
        framer.set_position(s.offset());
        Ok(Flow::Continue)
    }

    fn interpret_primary(
        &mut self,
        control: u8,
        s: &mut InStream<'_>,
        consumers: &mut [Consumer<'_>],
    ) -> Result<()> {
        let orders = &mut self.orders;
        let header = PrimaryHeader::decode(control, &mut orders.common, s)?;
        let clip = if header.has_bounds() {
            orders.common.clip
        } else {
            self.screen_rect
        };
        let kind = orders.common.kind;
        log::trace!("primary {} clip {:?}", kind, clip);

        let mut r = FieldReader::new(s, &header);
        match kind {
            PrimaryKind::DstBlt => {
                let o = decode(&mut orders.dstblt, &mut r)?;
                each_graphic(consumers, |g| g.draw_dst_blt(o, &clip));
            }
            PrimaryKind::MultiDstBlt => {
                let o = decode(&mut orders.multidstblt, &mut r)?;
                each_graphic(consumers, |g| g.draw_multi_dst_blt(o, &clip));
            }
            PrimaryKind::PatBlt => {
                let o = decode(&mut orders.patblt, &mut r)?;
                each_graphic(consumers, |g| g.draw_pat_blt(o, &clip));
            }
            PrimaryKind::MultiPatBlt => {
                let o = decode(&mut orders.multipatblt, &mut r)?;
                each_graphic(consumers, |g| g.draw_multi_pat_blt(o, &clip));
            }
            PrimaryKind::ScrBlt => {
                let o = decode(&mut orders.scrblt, &mut r)?;
                each_graphic(consumers, |g| g.draw_scr_blt(o, &clip));
            }
            PrimaryKind::MultiScrBlt => {
                let o = decode(&mut orders.multiscrblt, &mut r)?;
                each_graphic(consumers, |g| g.draw_multi_scr_blt(o, &clip));
            }
            PrimaryKind::OpaqueRect => {
                let o = decode(&mut orders.opaquerect, &mut r)?;
                each_graphic(consumers, |g| g.draw_opaque_rect(o, &clip));
            }
            PrimaryKind::MultiOpaqueRect => {
                let o = decode(&mut orders.multiopaquerect, &mut r)?;
                each_graphic(consumers, |g| g.draw_multi_opaque_rect(o, &clip));
            }
            PrimaryKind::MemBlt => {
                let o = decode(&mut orders.memblt, &mut r)?;
                let bitmap = resolve(&self.bitmaps, o.bitmap_cache_id(), o.cache_index)?;
                each_graphic(consumers, |g| g.draw_mem_blt(o, &clip, bitmap));
            }
            PrimaryKind::Mem3Blt => {
                let o = decode(&mut orders.mem3blt, &mut r)?;
                let bitmap = resolve(&self.bitmaps, o.bitmap_cache_id(), o.cache_index)?;
                each_graphic(consumers, |g| g.draw_mem3_blt(o, &clip, bitmap));
            }
            PrimaryKind::LineTo => {
                let o = decode(&mut orders.lineto, &mut r)?;
                each_graphic(consumers, |g| g.draw_line_to(o, &clip));
            }
            PrimaryKind::GlyphIndex => {
                let o = decode(&mut orders.glyphindex, &mut r)?;
                let glyphs = &self.glyphs;
                each_graphic(consumers, |g| g.draw_glyph_index(o, &clip, glyphs));
            }
            PrimaryKind::Polyline => {
                let o = decode(&mut orders.polyline, &mut r)?;
                each_graphic(consumers, |g| g.draw_polyline(o, &clip));
            }
        }
        Ok(())
    }

    fn interpret_secondary(
        &mut self,
        s: &mut InStream<'_>,
        consumers: &mut [Consumer<'_>],
    ) -> Result<()> {
        let header = SecondaryHeader::decode(s)?;
        let mut body = s.sub_stream(header.data_len())?;
        match header.order_type {
            TS_CACHE_BITMAP_UNCOMPRESSED | TS_CACHE_BITMAP_COMPRESSED => {
                let order = CacheBitmap::decode(&header, &mut body)?;
                let cache = self
                    .bitmaps
                    .as_mut()
                    .ok_or(ProtocolError::MetaMissing("CACHE_BITMAP"))?;
                log::trace!(
                    "cache bitmap ({}, {}) {}x{}",
                    order.cache_id,
                    order.cache_index,
                    order.bitmap.cx,
                    order.bitmap.cy
                );
                cache.put(order.cache_id, order.cache_index, order.bitmap, 0, 0)?;
            }
            TS_CACHE_GLYPH => {
                let order = CacheGlyph::decode(&header, &mut body)?;
                for entry in &order.glyphs {
                    self.glyphs
                        .set(order.cache_id, entry.cache_index, entry.glyph.clone())?;
                }
                each_graphic(consumers, |g| g.draw_glyph_cache(&order));
            }
            other => log::warn!(
                "skipping unsupported secondary order {} ({} bytes)",
                secondary_name(other),
                header.data_len()
            ),
        }
        Ok(())
    }
}

fn decode<'o, T: PrimaryOrder>(order: &'o mut T, r: &mut FieldReader<'_, '_>) -> Result<&'o T> {
    order.decode_fields(r)?;
    Ok(order)
}

fn resolve(bitmaps: &Option<BitmapCache>, cache_id: u8, cache_index: u16) -> Result<&Bitmap> {
    let found = match bitmaps {
        Some(cache) => cache.get(cache_id, cache_index)?,
        None => None,
    };
    found.ok_or_else(|| {
        log::error!("unresolved bitmap ({}, {})", cache_id, cache_index);
        ProtocolError::UnresolvedBitmap {
            cache_id: u16::from(cache_id),
            cache_index,
        }
        .into()
    })
}
