//! Drawing order control byte, primary order header and differential field codec.
//!
//! Primary orders are differentially encoded: the header carries a
//! field-presence mask and only the flagged fields follow on the wire. All
//! other fields keep the value of the last order of the same kind, so
//! decoding mutates a persistent per-kind instance in place.
//!
//! ```text
//! control: u8              STANDARD | BOUNDS | TYPE_CHANGE | DELTA | ...
//! [order_type: u8]         present when TYPE_CHANGE
//! field_flags: 1..=3 bytes count given by the order kind, minus the
//!                          zero-field-byte bits (control >> 6)
//! [bounds]                 present when BOUNDS and not ZERO_BOUNDS_DELTAS
//! fields...                in mask bit order
//! ```

use std::fmt;

use crate::error::{ProtocolError, Result};
use crate::wire::{InStream, OutStream, Rect};

pub const STANDARD: u8 = 0x01;
pub const SECONDARY: u8 = 0x02;
pub const BOUNDS: u8 = 0x04;
pub const TYPE_CHANGE: u8 = 0x08;
pub const DELTA: u8 = 0x10;
pub const ZERO_BOUNDS_DELTAS: u8 = 0x20;
pub const ZERO_FIELD_BYTE_BIT0: u8 = 0x40;
pub const ZERO_FIELD_BYTE_BIT1: u8 = 0x80;

/// Classification of a drawing order by its control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderClass {
    Primary,
    Secondary,
    AltSec,
}

impl OrderClass {
    pub fn from_control(control: u8) -> Result<Self> {
        match control & (STANDARD | SECONDARY) {
            STANDARD => Ok(OrderClass::Primary),
            c if c == STANDARD | SECONDARY => Ok(OrderClass::Secondary),
            SECONDARY => Ok(OrderClass::AltSec),
            _ => Err(ProtocolError::InvalidOrderClass(control).into()),
        }
    }
}

/// Primary drawing order kinds this decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PrimaryKind {
    DstBlt = 0x00,
    #[default]
    PatBlt = 0x01,
    ScrBlt = 0x02,
    LineTo = 0x09,
    OpaqueRect = 0x0A,
    MemBlt = 0x0D,
    Mem3Blt = 0x0E,
    MultiDstBlt = 0x0F,
    MultiPatBlt = 0x10,
    MultiScrBlt = 0x11,
    MultiOpaqueRect = 0x12,
    Polyline = 0x16,
    GlyphIndex = 0x1B,
}

impl PrimaryKind {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(PrimaryKind::DstBlt),
            0x01 => Some(PrimaryKind::PatBlt),
            0x02 => Some(PrimaryKind::ScrBlt),
            0x09 => Some(PrimaryKind::LineTo),
            0x0A => Some(PrimaryKind::OpaqueRect),
            0x0D => Some(PrimaryKind::MemBlt),
            0x0E => Some(PrimaryKind::Mem3Blt),
            0x0F => Some(PrimaryKind::MultiDstBlt),
            0x10 => Some(PrimaryKind::MultiPatBlt),
            0x11 => Some(PrimaryKind::MultiScrBlt),
            0x12 => Some(PrimaryKind::MultiOpaqueRect),
            0x16 => Some(PrimaryKind::Polyline),
            0x1B => Some(PrimaryKind::GlyphIndex),
            _ => None,
        }
    }

    /// Number of field-presence bytes carried by this kind.
    pub fn field_bytes(self) -> usize {
        match self {
            PrimaryKind::DstBlt
            | PrimaryKind::ScrBlt
            | PrimaryKind::OpaqueRect
            | PrimaryKind::MultiDstBlt
            | PrimaryKind::Polyline => 1,
            PrimaryKind::PatBlt
            | PrimaryKind::LineTo
            | PrimaryKind::MemBlt
            | PrimaryKind::MultiPatBlt
            | PrimaryKind::MultiScrBlt
            | PrimaryKind::MultiOpaqueRect => 2,
            PrimaryKind::Mem3Blt | PrimaryKind::GlyphIndex => 3,
        }
    }
}

impl fmt::Display for PrimaryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimaryKind::DstBlt => "DSTBLT",
            PrimaryKind::PatBlt => "PATBLT",
            PrimaryKind::ScrBlt => "SCRBLT",
            PrimaryKind::LineTo => "LINETO",
            PrimaryKind::OpaqueRect => "OPAQUERECT",
            PrimaryKind::MemBlt => "MEMBLT",
            PrimaryKind::Mem3Blt => "MEM3BLT",
            PrimaryKind::MultiDstBlt => "MULTIDSTBLT",
            PrimaryKind::MultiPatBlt => "MULTIPATBLT",
            PrimaryKind::MultiScrBlt => "MULTISCRBLT",
            PrimaryKind::MultiOpaqueRect => "MULTIOPAQUERECT",
            PrimaryKind::Polyline => "POLYLINE",
            PrimaryKind::GlyphIndex => "GLYPHINDEX",
        };
        f.write_str(name)
    }
}

/// Order kinds enabled by the recording version declared in META.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderSupport {
    pub mem3blt: bool,
    pub polyline: bool,
    pub multi: bool,
}

impl OrderSupport {
    pub fn from_version(version: u16) -> Self {
        Self {
            mem3blt: version > 1,
            polyline: version > 2,
            multi: version > 3,
        }
    }
}

/// State shared by all primary orders: last kind and last bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderCommon {
    pub kind: PrimaryKind,
    pub clip: Rect,
}

impl OrderCommon {
    fn read_bounds(&mut self, s: &mut InStream<'_>) -> Result<()> {
        let flags = s.in_u8()?;
        let (mut left, mut top, mut right, mut bottom) = self.clip.edges();
        for (i, edge) in [&mut left, &mut top, &mut right, &mut bottom]
            .into_iter()
            .enumerate()
        {
            if flags & (0x01 << i) != 0 {
                *edge = s.in_i16_le()?;
            } else if flags & (0x10 << i) != 0 {
                *edge = edge.wrapping_add(i16::from(s.in_i8()?));
            }
        }
        self.clip = Rect::from_edges(left, top, right, bottom);
        Ok(())
    }

    fn write_bounds(&self, clip: &Rect, out: &mut OutStream) {
        let old = self.clip.edges();
        let new = clip.edges();
        let pairs = [(old.0, new.0), (old.1, new.1), (old.2, new.2), (old.3, new.3)];
        let mut flags = 0u8;
        for (i, (o, n)) in pairs.iter().enumerate() {
            if o != n {
                flags |= 0x01 << i;
            }
        }
        out.out_u8(flags);
        for (o, n) in pairs {
            if o != n {
                out.out_i16_le(n);
            }
        }
    }
}

/// Decoded primary order header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimaryHeader {
    pub control: u8,
    pub fields: u32,
}

impl PrimaryHeader {
    /// Read the header following `control`, updating the common state.
    pub fn decode(control: u8, common: &mut OrderCommon, s: &mut InStream<'_>) -> Result<Self> {
        if control & TYPE_CHANGE != 0 {
            let raw = s.in_u8()?;
            common.kind =
                PrimaryKind::from_u8(raw).ok_or(ProtocolError::UnsupportedPrimaryOrder(raw))?;
        }
        let present = common
            .kind
            .field_bytes()
            .saturating_sub(usize::from(control >> 6));
        let mut fields = 0u32;
        for i in 0..present {
            fields |= u32::from(s.in_u8()?) << (8 * i);
        }
        if control & BOUNDS != 0 && control & ZERO_BOUNDS_DELTAS == 0 {
            common.read_bounds(s)?;
        }
        Ok(Self { control, fields })
    }

    #[inline]
    pub fn has_bounds(&self) -> bool {
        self.control & BOUNDS != 0
    }

    #[inline]
    pub fn is_delta(&self) -> bool {
        self.control & DELTA != 0
    }
}

/// Write a complete primary order: header, optional bounds, then the
/// fields collected by `fields`. `clip` is `None` for unbounded orders.
pub fn encode_primary(
    out: &mut OutStream,
    common: &mut OrderCommon,
    kind: PrimaryKind,
    clip: Option<&Rect>,
    fields: &FieldWriter,
) {
    let mut control = STANDARD;
    if kind != common.kind {
        control |= TYPE_CHANGE;
    }
    if let Some(clip) = clip {
        control |= BOUNDS;
        if *clip == common.clip {
            control |= ZERO_BOUNDS_DELTAS;
        }
    }

    let size = kind.field_bytes();
    let bytes = fields.mask().to_le_bytes();
    let mut used = size;
    while used > 0 && bytes[used - 1] == 0 {
        used -= 1;
    }
    control |= ((size - used) as u8) << 6;

    out.out_u8(control);
    if control & TYPE_CHANGE != 0 {
        out.out_u8(kind as u8);
    }
    out.out_bytes(&bytes[..used]);
    if let Some(clip) = clip {
        if control & ZERO_BOUNDS_DELTAS == 0 {
            common.write_bounds(clip, out);
            common.clip = *clip;
        }
    }
    out.out_bytes(fields.body());
    common.kind = kind;
}

/// Brush carried by pattern orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Brush {
    pub org_x: i8,
    pub org_y: i8,
    pub style: u8,
    pub hatch: u8,
    pub extra: [u8; 7],
}

/// Reads the fields flagged in a primary header.
pub struct FieldReader<'s, 'a> {
    stream: &'s mut InStream<'a>,
    fields: u32,
    delta: bool,
}

impl<'s, 'a> FieldReader<'s, 'a> {
    pub fn new(stream: &'s mut InStream<'a>, header: &PrimaryHeader) -> Self {
        Self {
            stream,
            fields: header.fields,
            delta: header.is_delta(),
        }
    }

    /// Reader for a fixed layout: every field present, absolute coordinates.
    pub fn full(stream: &'s mut InStream<'a>) -> Self {
        Self {
            stream,
            fields: u32::MAX,
            delta: false,
        }
    }

    #[inline]
    pub fn has(&self, bit: u32) -> bool {
        self.fields & bit != 0
    }

    pub fn stream(&mut self) -> &mut InStream<'a> {
        self.stream
    }

    /// Coordinate: i8 delta from the previous value, or i16 absolute.
    pub fn coord(&mut self, bit: u32, v: &mut i16) -> Result<()> {
        if self.has(bit) {
            *v = if self.delta {
                v.wrapping_add(i16::from(self.stream.in_i8()?))
            } else {
                self.stream.in_i16_le()?
            };
        }
        Ok(())
    }

    /// Rectangle as four coordinates starting at `first_bit`.
    pub fn rect(&mut self, first_bit: u32, r: &mut Rect) -> Result<()> {
        let mut cx = r.cx as i16;
        let mut cy = r.cy as i16;
        self.coord(first_bit, &mut r.x)?;
        self.coord(first_bit << 1, &mut r.y)?;
        self.coord(first_bit << 2, &mut cx)?;
        self.coord(first_bit << 3, &mut cy)?;
        r.cx = cx as u16;
        r.cy = cy as u16;
        Ok(())
    }

    pub fn u8(&mut self, bit: u32, v: &mut u8) -> Result<()> {
        if self.has(bit) {
            *v = self.stream.in_u8()?;
        }
        Ok(())
    }

    pub fn u16(&mut self, bit: u32, v: &mut u16) -> Result<()> {
        if self.has(bit) {
            *v = self.stream.in_u16_le()?;
        }
        Ok(())
    }

    /// Absolute i16, unaffected by the DELTA flag.
    pub fn i16(&mut self, bit: u32, v: &mut i16) -> Result<()> {
        if self.has(bit) {
            *v = self.stream.in_i16_le()?;
        }
        Ok(())
    }

    /// Three byte color, `r | g << 8 | b << 16`.
    pub fn color(&mut self, bit: u32, v: &mut u32) -> Result<()> {
        if self.has(bit) {
            *v = self.stream.in_u24_le()?;
        }
        Ok(())
    }

    /// Brush as five fields starting at `first_bit`.
    pub fn brush(&mut self, first_bit: u32, b: &mut Brush) -> Result<()> {
        if self.has(first_bit) {
            b.org_x = self.stream.in_i8()?;
        }
        if self.has(first_bit << 1) {
            b.org_y = self.stream.in_i8()?;
        }
        self.u8(first_bit << 2, &mut b.style)?;
        self.u8(first_bit << 3, &mut b.hatch)?;
        if self.has(first_bit << 4) {
            b.extra = self.stream.in_array()?;
        }
        Ok(())
    }
}

/// Collects changed fields and their presence mask.
///
/// Coordinates are always written absolute. In `full` mode every field
/// is written regardless of the previous value.
#[derive(Debug, Default)]
pub struct FieldWriter {
    body: OutStream,
    fields: u32,
    full: bool,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            full: true,
            ..Self::default()
        }
    }

    pub fn mask(&self) -> u32 {
        self.fields
    }

    pub fn body(&self) -> &[u8] {
        self.body.as_slice()
    }

    /// Write a field through `write` when `changed` (or in full mode).
    pub fn field(&mut self, bit: u32, changed: bool, write: impl FnOnce(&mut OutStream)) {
        if self.full || changed {
            self.fields |= bit;
            write(&mut self.body);
        }
    }

    pub fn coord(&mut self, bit: u32, new: i16, old: i16) {
        self.field(bit, new != old, |o| o.out_i16_le(new));
    }

    pub fn rect(&mut self, first_bit: u32, new: &Rect, old: &Rect) {
        self.coord(first_bit, new.x, old.x);
        self.coord(first_bit << 1, new.y, old.y);
        self.coord(first_bit << 2, new.cx as i16, old.cx as i16);
        self.coord(first_bit << 3, new.cy as i16, old.cy as i16);
    }

    pub fn u8(&mut self, bit: u32, new: u8, old: u8) {
        self.field(bit, new != old, |o| o.out_u8(new));
    }

    pub fn u16(&mut self, bit: u32, new: u16, old: u16) {
        self.field(bit, new != old, |o| o.out_u16_le(new));
    }

    pub fn i16(&mut self, bit: u32, new: i16, old: i16) {
        self.field(bit, new != old, |o| o.out_i16_le(new));
    }

    pub fn color(&mut self, bit: u32, new: u32, old: u32) {
        self.field(bit, new != old, |o| o.out_u24_le(new));
    }

    pub fn brush(&mut self, first_bit: u32, new: &Brush, old: &Brush) {
        self.field(first_bit, new.org_x != old.org_x, |o| o.out_i8(new.org_x));
        self.field(first_bit << 1, new.org_y != old.org_y, |o| o.out_i8(new.org_y));
        self.u8(first_bit << 2, new.style, old.style);
        self.u8(first_bit << 3, new.hatch, old.hatch);
        self.field(first_bit << 4, new.extra != old.extra, |o| o.out_bytes(&new.extra));
    }
}

/// A primary order kind with its differential field layout.
pub trait PrimaryOrder: Clone + Default + PartialEq + fmt::Debug {
    const KIND: PrimaryKind;

    /// Update `self` in place from the fields present in `r`.
    fn decode_fields(&mut self, r: &mut FieldReader<'_, '_>) -> Result<()>;

    /// Write the fields of `self` that differ from `prev`.
    fn encode_fields(&self, prev: &Self, w: &mut FieldWriter);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_class_from_control() {
        assert_eq!(OrderClass::from_control(0x01).unwrap(), OrderClass::Primary);
        assert_eq!(OrderClass::from_control(0x03).unwrap(), OrderClass::Secondary);
        assert_eq!(OrderClass::from_control(0x36).unwrap(), OrderClass::AltSec);
        let err = OrderClass::from_control(0x00).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_header_type_change_and_zero_field_bytes() {
        // MEMBLT with the second field byte elided.
        let data = [PrimaryKind::MemBlt as u8, 0x21];
        let mut common = OrderCommon::default();
        let mut s = InStream::new(&data);
        let control = STANDARD | TYPE_CHANGE | ZERO_FIELD_BYTE_BIT0;
        let h = PrimaryHeader::decode(control, &mut common, &mut s).unwrap();
        assert_eq!(common.kind, PrimaryKind::MemBlt);
        assert_eq!(h.fields, 0x21);
        assert!(s.at_end());
    }

    #[test]
    fn test_unknown_primary_kind_is_fatal() {
        let data = [0x07];
        let mut common = OrderCommon::default();
        let mut s = InStream::new(&data);
        let err = PrimaryHeader::decode(STANDARD | TYPE_CHANGE, &mut common, &mut s).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_bounds_absolute_then_delta() {
        let mut common = OrderCommon::default();
        let mut out = OutStream::new();
        // Absolute left/top/right/bottom.
        out.out_u8(0x0F);
        for v in [10i16, 20, 109, 219] {
            out.out_i16_le(v);
        }
        let bytes = out.into_inner();
        let mut s = InStream::new(&bytes);
        common.read_bounds(&mut s).unwrap();
        assert_eq!(common.clip, Rect::new(10, 20, 100, 200));

        // Delta on left and bottom only.
        let bytes = [0x90u8, 5, 0xFB];
        let mut s = InStream::new(&bytes);
        common.read_bounds(&mut s).unwrap();
        assert_eq!(common.clip.edges(), (15, 20, 109, 214));
    }

    #[test]
    fn test_delta_coordinates() {
        let header = PrimaryHeader {
            control: STANDARD | DELTA,
            fields: 0x01,
        };
        let data = [0xFEu8];
        let mut s = InStream::new(&data);
        let mut v = 100i16;
        FieldReader::new(&mut s, &header).coord(0x01, &mut v).unwrap();
        assert_eq!(v, 98);
    }

    #[test]
    fn test_encode_primary_elides_unchanged_bounds() {
        let mut common = OrderCommon::default();
        let clip = Rect::new(0, 0, 50, 50);
        let w = FieldWriter::new();

        let mut first = OutStream::new();
        encode_primary(&mut first, &mut common, PrimaryKind::DstBlt, Some(&clip), &w);
        assert_eq!(first.as_slice()[0] & ZERO_BOUNDS_DELTAS, 0);

        let mut second = OutStream::new();
        encode_primary(&mut second, &mut common, PrimaryKind::DstBlt, Some(&clip), &w);
        let control = second.as_slice()[0];
        assert_ne!(control & ZERO_BOUNDS_DELTAS, 0);
        assert_eq!(control & TYPE_CHANGE, 0);
        // Control byte only: no type, all field bytes elided, no bounds.
        assert_eq!(second.len(), 1);
    }
}
