//! Single-rectangle primary drawing orders.

use super::common::{Brush, FieldReader, FieldWriter, PrimaryKind, PrimaryOrder};
use crate::error::Result;
use crate::wire::Rect;

/// Destination-only blit (DSTBLT).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DstBlt {
    pub rect: Rect,
    pub rop: u8,
}

impl PrimaryOrder for DstBlt {
    const KIND: PrimaryKind = PrimaryKind::DstBlt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        r.u8(0x10, &mut self.rop)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        w.u8(0x10, self.rop, prev.rop);
    }
}

/// Pattern blit (PATBLT).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatBlt {
    pub rect: Rect,
    pub rop: u8,
    pub back_color: u32,
    pub fore_color: u32,
    pub brush: Brush,
}

impl PrimaryOrder for PatBlt {
    const KIND: PrimaryKind = PrimaryKind::PatBlt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        r.u8(0x10, &mut self.rop)?;
        r.color(0x20, &mut self.back_color)?;
        r.color(0x40, &mut self.fore_color)?;
        r.brush(0x80, &mut self.brush)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        w.u8(0x10, self.rop, prev.rop);
        w.color(0x20, self.back_color, prev.back_color);
        w.color(0x40, self.fore_color, prev.fore_color);
        w.brush(0x80, &self.brush, &prev.brush);
    }
}

/// Screen-to-screen blit (SCRBLT).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrBlt {
    pub rect: Rect,
    pub rop: u8,
    pub src_x: i16,
    pub src_y: i16,
}

impl PrimaryOrder for ScrBlt {
    const KIND: PrimaryKind = PrimaryKind::ScrBlt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        r.u8(0x10, &mut self.rop)?;
        r.coord(0x20, &mut self.src_x)?;
        r.coord(0x40, &mut self.src_y)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        w.u8(0x10, self.rop, prev.rop);
        w.coord(0x20, self.src_x, prev.src_x);
        w.coord(0x40, self.src_y, prev.src_y);
    }
}

/// Solid rectangle fill (OPAQUERECT). Each color byte is its own field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpaqueRect {
    pub rect: Rect,
    pub color: u32,
}

/// Per-byte color fields shared by the opaque rectangle orders.
pub(crate) fn decode_color_bytes(r: &mut FieldReader<'_, '_>, first_bit: u32, color: &mut u32) -> Result<()> {
    for i in 0..3 {
        if r.has(first_bit << i) {
            let byte = u32::from(r.stream().in_u8()?);
            *color = (*color & !(0xFF << (8 * i))) | (byte << (8 * i));
        }
    }
    Ok(())
}

pub(crate) fn encode_color_bytes(w: &mut FieldWriter, first_bit: u32, new: u32, old: u32) {
    for i in 0..3 {
        let n = (new >> (8 * i)) as u8;
        let o = (old >> (8 * i)) as u8;
        w.u8(first_bit << i, n, o);
    }
}

impl PrimaryOrder for OpaqueRect {
    const KIND: PrimaryKind = PrimaryKind::OpaqueRect;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        decode_color_bytes(r, 0x10, &mut self.color)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        encode_color_bytes(w, 0x10, self.color, prev.color);
    }
}

/// Blit from a cached bitmap (MEMBLT).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemBlt {
    /// Low byte is the cache id, high byte the color table index.
    pub cache_id: u16,
    pub rect: Rect,
    pub rop: u8,
    pub src_x: i16,
    pub src_y: i16,
    pub cache_index: u16,
}

impl MemBlt {
    pub fn bitmap_cache_id(&self) -> u8 {
        self.cache_id as u8
    }
}

impl PrimaryOrder for MemBlt {
    const KIND: PrimaryKind = PrimaryKind::MemBlt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.u16(0x01, &mut self.cache_id)?;
        r.rect(0x02, &mut self.rect)?;
        r.u8(0x20, &mut self.rop)?;
        r.coord(0x40, &mut self.src_x)?;
        r.coord(0x80, &mut self.src_y)?;
        r.u16(0x100, &mut self.cache_index)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.u16(0x01, self.cache_id, prev.cache_id);
        w.rect(0x02, &self.rect, &prev.rect);
        w.u8(0x20, self.rop, prev.rop);
        w.coord(0x40, self.src_x, prev.src_x);
        w.coord(0x80, self.src_y, prev.src_y);
        w.u16(0x100, self.cache_index, prev.cache_index);
    }
}

/// Three-way blit combining a cached bitmap with a brush (MEM3BLT).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mem3Blt {
    pub cache_id: u16,
    pub rect: Rect,
    pub rop: u8,
    pub src_x: i16,
    pub src_y: i16,
    pub back_color: u32,
    pub fore_color: u32,
    pub brush: Brush,
    pub cache_index: u16,
}

impl Mem3Blt {
    pub fn bitmap_cache_id(&self) -> u8 {
        self.cache_id as u8
    }
}

impl PrimaryOrder for Mem3Blt {
    const KIND: PrimaryKind = PrimaryKind::Mem3Blt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.u16(0x01, &mut self.cache_id)?;
        r.rect(0x02, &mut self.rect)?;
        r.u8(0x20, &mut self.rop)?;
        r.coord(0x40, &mut self.src_x)?;
        r.coord(0x80, &mut self.src_y)?;
        r.color(0x100, &mut self.back_color)?;
        r.color(0x200, &mut self.fore_color)?;
        r.brush(0x400, &mut self.brush)?;
        r.u16(0x8000, &mut self.cache_index)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.u16(0x01, self.cache_id, prev.cache_id);
        w.rect(0x02, &self.rect, &prev.rect);
        w.u8(0x20, self.rop, prev.rop);
        w.coord(0x40, self.src_x, prev.src_x);
        w.coord(0x80, self.src_y, prev.src_y);
        w.color(0x100, self.back_color, prev.back_color);
        w.color(0x200, self.fore_color, prev.fore_color);
        w.brush(0x400, &self.brush, &prev.brush);
        w.u16(0x8000, self.cache_index, prev.cache_index);
    }
}

/// Single line segment (LINETO).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineTo {
    pub back_mode: u16,
    pub start_x: i16,
    pub start_y: i16,
    pub end_x: i16,
    pub end_y: i16,
    pub back_color: u32,
    pub rop2: u8,
    pub pen_style: u8,
    pub pen_width: u8,
    pub pen_color: u32,
}

impl PrimaryOrder for LineTo {
    const KIND: PrimaryKind = PrimaryKind::LineTo;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.u16(0x01, &mut self.back_mode)?;
        r.coord(0x02, &mut self.start_x)?;
        r.coord(0x04, &mut self.start_y)?;
        r.coord(0x08, &mut self.end_x)?;
        r.coord(0x10, &mut self.end_y)?;
        r.color(0x20, &mut self.back_color)?;
        r.u8(0x40, &mut self.rop2)?;
        r.u8(0x80, &mut self.pen_style)?;
        r.u8(0x100, &mut self.pen_width)?;
        r.color(0x200, &mut self.pen_color)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.u16(0x01, self.back_mode, prev.back_mode);
        w.coord(0x02, self.start_x, prev.start_x);
        w.coord(0x04, self.start_y, prev.start_y);
        w.coord(0x08, self.end_x, prev.end_x);
        w.coord(0x10, self.end_y, prev.end_y);
        w.color(0x20, self.back_color, prev.back_color);
        w.u8(0x40, self.rop2, prev.rop2);
        w.u8(0x80, self.pen_style, prev.pen_style);
        w.u8(0x100, self.pen_width, prev.pen_width);
        w.color(0x200, self.pen_color, prev.pen_color);
    }
}

/// Run of cached glyphs (GLYPHINDEX).
///
/// `bk` and `op` hold `[left, top, right, bottom]` as sent; `data` holds
/// glyph fragment indices to resolve against the glyph cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlyphIndex {
    pub cache_id: u8,
    pub fl_accel: u8,
    pub char_inc: u8,
    pub op_redundant: u8,
    pub back_color: u32,
    pub fore_color: u32,
    pub bk: [i16; 4],
    pub op: [i16; 4],
    pub brush: Brush,
    pub x: i16,
    pub y: i16,
    pub data: Vec<u8>,
}

impl GlyphIndex {
    pub fn bk_rect(&self) -> Rect {
        let [l, t, r, b] = self.bk;
        Rect::new(l, t, r.wrapping_sub(l) as u16, b.wrapping_sub(t) as u16)
    }
}

impl PrimaryOrder for GlyphIndex {
    const KIND: PrimaryKind = PrimaryKind::GlyphIndex;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.u8(0x01, &mut self.cache_id)?;
        r.u8(0x02, &mut self.fl_accel)?;
        r.u8(0x04, &mut self.char_inc)?;
        r.u8(0x08, &mut self.op_redundant)?;
        r.color(0x10, &mut self.back_color)?;
        r.color(0x20, &mut self.fore_color)?;
        for (i, v) in self.bk.iter_mut().enumerate() {
            r.i16(0x40 << i, v)?;
        }
        for (i, v) in self.op.iter_mut().enumerate() {
            r.i16(0x400 << i, v)?;
        }
        r.brush(0x4000, &mut self.brush)?;
        r.i16(0x80000, &mut self.x)?;
        r.i16(0x100000, &mut self.y)?;
        if r.has(0x200000) {
            let s = r.stream();
            let len = usize::from(s.in_u8()?);
            self.data = s.in_bytes(len)?.to_vec();
        }
        Ok(())
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.u8(0x01, self.cache_id, prev.cache_id);
        w.u8(0x02, self.fl_accel, prev.fl_accel);
        w.u8(0x04, self.char_inc, prev.char_inc);
        w.u8(0x08, self.op_redundant, prev.op_redundant);
        w.color(0x10, self.back_color, prev.back_color);
        w.color(0x20, self.fore_color, prev.fore_color);
        for i in 0..4 {
            w.i16(0x40 << i, self.bk[i], prev.bk[i]);
        }
        for i in 0..4 {
            w.i16(0x400 << i, self.op[i], prev.op[i]);
        }
        w.brush(0x4000, &self.brush, &prev.brush);
        w.i16(0x80000, self.x, prev.x);
        w.i16(0x100000, self.y, prev.y);
        let data = &self.data[..self.data.len().min(255)];
        w.field(0x200000, self.data != prev.data, |o| {
            o.out_u8(data.len() as u8);
            o.out_bytes(data);
        });
    }
}
