//! Multi-rectangle primary orders and polylines.
//!
//! Each carries an entry count field and a separately flagged delta list,
//! so a record may update the count without resending the list.

use super::common::{Brush, FieldReader, FieldWriter, PrimaryKind, PrimaryOrder};
use super::delta::{
    DeltaPoint, read_delta_points, read_delta_rects, write_delta_points, write_delta_rects,
};
use super::primary::{decode_color_bytes, encode_color_bytes};
use crate::error::Result;
use crate::wire::Rect;

fn decode_rect_list(
    r: &mut FieldReader<'_, '_>,
    count_bit: u32,
    count: &mut u8,
    rects: &mut Vec<Rect>,
) -> Result<()> {
    r.u8(count_bit, count)?;
    if r.has(count_bit << 1) {
        *rects = read_delta_rects(r.stream(), usize::from(*count))?;
    }
    Ok(())
}

fn encode_rect_list(w: &mut FieldWriter, count_bit: u32, new: &[Rect], old: &[Rect]) {
    w.u8(count_bit, new.len() as u8, old.len() as u8);
    w.field(count_bit << 1, new != old, |o| write_delta_rects(o, new));
}

/// DSTBLT over a list of rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiDstBlt {
    pub rect: Rect,
    pub rop: u8,
    pub n_delta_entries: u8,
    pub delta_rects: Vec<Rect>,
}

impl PrimaryOrder for MultiDstBlt {
    const KIND: PrimaryKind = PrimaryKind::MultiDstBlt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        r.u8(0x10, &mut self.rop)?;
        decode_rect_list(r, 0x20, &mut self.n_delta_entries, &mut self.delta_rects)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        w.u8(0x10, self.rop, prev.rop);
        encode_rect_list(w, 0x20, &self.delta_rects, &prev.delta_rects);
    }
}

/// PATBLT over a list of rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiPatBlt {
    pub rect: Rect,
    pub rop: u8,
    pub back_color: u32,
    pub fore_color: u32,
    pub brush: Brush,
    pub n_delta_entries: u8,
    pub delta_rects: Vec<Rect>,
}

impl PrimaryOrder for MultiPatBlt {
    const KIND: PrimaryKind = PrimaryKind::MultiPatBlt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        r.u8(0x10, &mut self.rop)?;
        r.color(0x20, &mut self.back_color)?;
        r.color(0x40, &mut self.fore_color)?;
        r.brush(0x80, &mut self.brush)?;
        decode_rect_list(r, 0x1000, &mut self.n_delta_entries, &mut self.delta_rects)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        w.u8(0x10, self.rop, prev.rop);
        w.color(0x20, self.back_color, prev.back_color);
        w.color(0x40, self.fore_color, prev.fore_color);
        w.brush(0x80, &self.brush, &prev.brush);
        encode_rect_list(w, 0x1000, &self.delta_rects, &prev.delta_rects);
    }
}

/// SCRBLT over a list of rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiScrBlt {
    pub rect: Rect,
    pub rop: u8,
    pub src_x: i16,
    pub src_y: i16,
    pub n_delta_entries: u8,
    pub delta_rects: Vec<Rect>,
}

impl PrimaryOrder for MultiScrBlt {
    const KIND: PrimaryKind = PrimaryKind::MultiScrBlt;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        r.u8(0x10, &mut self.rop)?;
        r.coord(0x20, &mut self.src_x)?;
        r.coord(0x40, &mut self.src_y)?;
        decode_rect_list(r, 0x80, &mut self.n_delta_entries, &mut self.delta_rects)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        w.u8(0x10, self.rop, prev.rop);
        w.coord(0x20, self.src_x, prev.src_x);
        w.coord(0x40, self.src_y, prev.src_y);
        encode_rect_list(w, 0x80, &self.delta_rects, &prev.delta_rects);
    }
}

/// OPAQUERECT over a list of rectangles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiOpaqueRect {
    pub rect: Rect,
    pub color: u32,
    pub n_delta_entries: u8,
    pub delta_rects: Vec<Rect>,
}

impl PrimaryOrder for MultiOpaqueRect {
    const KIND: PrimaryKind = PrimaryKind::MultiOpaqueRect;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.rect(0x01, &mut self.rect)?;
        decode_color_bytes(r, 0x10, &mut self.color)?;
        decode_rect_list(r, 0x80, &mut self.n_delta_entries, &mut self.delta_rects)
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.rect(0x01, &self.rect, &prev.rect);
        encode_color_bytes(w, 0x10, self.color, prev.color);
        encode_rect_list(w, 0x80, &self.delta_rects, &prev.delta_rects);
    }
}

/// Connected line segments from a start point (POLYLINE).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Polyline {
    pub x_start: i16,
    pub y_start: i16,
    pub rop2: u8,
    pub brush_cache_entry: u16,
    pub pen_color: u32,
    pub num_delta_entries: u8,
    pub deltas: Vec<DeltaPoint>,
}

impl PrimaryOrder for Polyline {
    const KIND: PrimaryKind = PrimaryKind::Polyline;

    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()> {
        r.coord(0x01, &mut self.x_start)?;
        r.coord(0x02, &mut self.y_start)?;
        r.u8(0x04, &mut self.rop2)?;
        r.u16(0x08, &mut self.brush_cache_entry)?;
        r.color(0x10, &mut self.pen_color)?;
        r.u8(0x20, &mut self.num_delta_entries)?;
        if r.has(0x40) {
            self.deltas = read_delta_points(r.stream(), usize::from(self.num_delta_entries))?;
        }
        Ok(())
    }

    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter) {
        w.coord(0x01, self.x_start, prev.x_start);
        w.coord(0x02, self.y_start, prev.y_start);
        w.u8(0x04, self.rop2, prev.rop2);
        w.u16(0x08, self.brush_cache_entry, prev.brush_cache_entry);
        w.color(0x10, self.pen_color, prev.pen_color);
        w.u8(0x20, self.deltas.len() as u8, prev.deltas.len() as u8);
        w.field(0x40, self.deltas != prev.deltas, |o| {
            write_delta_points(o, &self.deltas)
        });
    }
}
