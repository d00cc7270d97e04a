//! RDP drawing orders: primary, secondary and alternate secondary.
//!
//! Primary orders are decoded against a persistent "last order" per kind
//! ([`PrimaryState`]), so a record carrying only changed fields reproduces
//! the full order. Secondary orders are self-delimited and populate the
//! bitmap and glyph caches.

mod bitmap;
mod common;
mod delta;
mod multi;
mod primary;
mod rle;
mod secondary;

pub use bitmap::*;
pub use common::*;
pub use delta::*;
pub use multi::*;
pub use primary::*;
pub use rle::{decompress_interleaved, decompress_planar};
pub use secondary::*;

use crate::error::Result;
use crate::wire::{InStream, OutStream, Rect};

/// Persistent per-kind primary order state.
///
/// Never reset between orders; a SAVE_STATE record restores all of it at once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrimaryState {
    pub common: OrderCommon,
    pub dstblt: DstBlt,
    pub patblt: PatBlt,
    pub scrblt: ScrBlt,
    pub opaquerect: OpaqueRect,
    pub memblt: MemBlt,
    pub mem3blt: Mem3Blt,
    pub lineto: LineTo,
    pub glyphindex: GlyphIndex,
    pub polyline: Polyline,
    pub multidstblt: MultiDstBlt,
    pub multiopaquerect: MultiOpaqueRect,
    pub multipatblt: MultiPatBlt,
    pub multiscrblt: MultiScrBlt,
}

/// Primary orders with a slot in [`PrimaryState`].
pub trait LastOrder: PrimaryOrder {
    fn last(state: &mut PrimaryState) -> &mut Self;
}

macro_rules! last_order {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl LastOrder for $ty {
                fn last(state: &mut PrimaryState) -> &mut Self {
                    &mut state.$field
                }
            }
        )*
    };
}

last_order! {
    DstBlt => dstblt,
    PatBlt => patblt,
    ScrBlt => scrblt,
    OpaqueRect => opaquerect,
    MemBlt => memblt,
    Mem3Blt => mem3blt,
    LineTo => lineto,
    GlyphIndex => glyphindex,
    Polyline => polyline,
    MultiDstBlt => multidstblt,
    MultiOpaqueRect => multiopaquerect,
    MultiPatBlt => multipatblt,
    MultiScrBlt => multiscrblt,
}

fn write_full<T: PrimaryOrder>(order: &T, out: &mut OutStream) {
    let mut w = FieldWriter::full();
    order.encode_fields(&T::default(), &mut w);
    out.out_bytes(w.body());
}

fn read_full<T: PrimaryOrder>(order: &mut T, s: &mut InStream<'_>) -> Result<()> {
    order.decode_fields(&mut FieldReader::full(s))
}

impl PrimaryState {
    /// Write the fixed SAVE_STATE layout.
    ///
    /// ```text
    /// order kind: u8, clip: x i16, y i16, cx u16, cy u16
    /// DSTBLT PATBLT SCRBLT OPAQUERECT MEMBLT   always
    /// MEM3BLT                                  version > 1
    /// LINETO GLYPHINDEX                        always
    /// POLYLINE                                 version > 2
    /// MULTIDSTBLT MULTIOPAQUERECT
    /// MULTIPATBLT MULTISCRBLT                  version > 3
    /// ```
    ///
    /// Each order is written with every field present and absolute
    /// coordinates, the same field layout as its wire record.
    pub fn write_save_state(&self, support: OrderSupport, out: &mut OutStream) {
        out.out_u8(self.common.kind as u8);
        out.out_i16_le(self.common.clip.x);
        out.out_i16_le(self.common.clip.y);
        out.out_u16_le(self.common.clip.cx);
        out.out_u16_le(self.common.clip.cy);

        write_full(&self.dstblt, out);
        write_full(&self.patblt, out);
        write_full(&self.scrblt, out);
        write_full(&self.opaquerect, out);
        write_full(&self.memblt, out);
        if support.mem3blt {
            write_full(&self.mem3blt, out);
        }
        write_full(&self.lineto, out);
        write_full(&self.glyphindex, out);
        if support.polyline {
            write_full(&self.polyline, out);
        }
        if support.multi {
            write_full(&self.multidstblt, out);
            write_full(&self.multiopaquerect, out);
            write_full(&self.multipatblt, out);
            write_full(&self.multiscrblt, out);
        }
    }

    /// Restore from the SAVE_STATE layout written by [`Self::write_save_state`].
    pub fn read_save_state(&mut self, support: OrderSupport, s: &mut InStream<'_>) -> Result<()> {
        let raw = s.in_u8()?;
        self.common.kind = PrimaryKind::from_u8(raw)
            .ok_or(crate::error::ProtocolError::UnsupportedPrimaryOrder(raw))?;
        self.common.clip = Rect::new(
            s.in_i16_le()?,
            s.in_i16_le()?,
            s.in_u16_le()?,
            s.in_u16_le()?,
        );

        read_full(&mut self.dstblt, s)?;
        read_full(&mut self.patblt, s)?;
        read_full(&mut self.scrblt, s)?;
        read_full(&mut self.opaquerect, s)?;
        read_full(&mut self.memblt, s)?;
        if support.mem3blt {
            read_full(&mut self.mem3blt, s)?;
        }
        read_full(&mut self.lineto, s)?;
        read_full(&mut self.glyphindex, s)?;
        if support.polyline {
            read_full(&mut self.polyline, s)?;
        }
        if support.multi {
            read_full(&mut self.multidstblt, s)?;
            read_full(&mut self.multiopaquerect, s)?;
            read_full(&mut self.multipatblt, s)?;
            read_full(&mut self.multiscrblt, s)?;
        }
        Ok(())
    }
}
