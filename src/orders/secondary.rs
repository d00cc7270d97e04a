//! Secondary (cache populating) orders and alternate secondary markers.

use super::bitmap::{Bitmap, NO_BITMAP_COMPRESSION_HDR};
use super::common::{SECONDARY, STANDARD};
use crate::cache::FontChar;
use crate::error::Result;
use crate::wire::{InStream, OutStream};

pub const TS_CACHE_BITMAP_UNCOMPRESSED: u8 = 0x00;
pub const TS_CACHE_COLOR_TABLE: u8 = 0x01;
pub const TS_CACHE_BITMAP_COMPRESSED: u8 = 0x02;
pub const TS_CACHE_GLYPH: u8 = 0x03;
pub const TS_CACHE_BITMAP_UNCOMPRESSED_REV2: u8 = 0x04;
pub const TS_CACHE_BITMAP_COMPRESSED_REV2: u8 = 0x05;
pub const TS_CACHE_BRUSH: u8 = 0x07;
pub const TS_CACHE_BITMAP_COMPRESSED_REV3: u8 = 0x08;

/// extraFlags: cache glyph order carries a unicode character per glyph.
pub const CG_GLYPH_UNICODE_PRESENT: u16 = 0x0010;

/// Alternate secondary order types (`control >> 2`).
pub const ALTSEC_FRAME_MARKER: u8 = 0x0D;

/// Header following the control byte of a secondary order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryHeader {
    pub order_length: u16,
    pub extra_flags: u16,
    pub order_type: u8,
}

impl SecondaryHeader {
    pub const SIZE: usize = 5;

    pub fn decode(s: &mut InStream<'_>) -> Result<Self> {
        Ok(Self {
            order_length: s.in_u16_le()?,
            extra_flags: s.in_u16_le()?,
            order_type: s.in_u8()?,
        })
    }

    /// Bytes of order data following the header.
    pub fn data_len(&self) -> usize {
        usize::from(self.order_length.wrapping_add(7))
    }

    /// Write control byte and header for an order body of `body_len` bytes.
    pub fn encode(out: &mut OutStream, order_type: u8, extra_flags: u16, body_len: usize) {
        out.out_u8(STANDARD | SECONDARY);
        out.out_u16_le((body_len as u16).wrapping_sub(7));
        out.out_u16_le(extra_flags);
        out.out_u8(order_type);
    }
}

/// Cache bitmap insert (revision 1, compressed or not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheBitmap {
    pub cache_id: u8,
    pub cache_index: u16,
    pub bitmap: Bitmap,
}

impl CacheBitmap {
    pub fn decode(header: &SecondaryHeader, s: &mut InStream<'_>) -> Result<Self> {
        let cache_id = s.in_u8()?;
        s.in_skip(1)?;
        let width = s.in_u8()?;
        let height = s.in_u8()?;
        let bpp = s.in_u8()?;
        let mut length = usize::from(s.in_u16_le()?);
        let cache_index = s.in_u16_le()?;

        let bitmap = if header.order_type == TS_CACHE_BITMAP_COMPRESSED {
            if header.extra_flags & NO_BITMAP_COMPRESSION_HDR == 0 {
                s.in_skip(8)?;
                length = length.saturating_sub(8);
            }
            Bitmap::decompress(bpp, u16::from(width), u16::from(height), s.in_bytes(length)?)?
        } else {
            Bitmap::from_raw(bpp, u16::from(width), u16::from(height), s.in_bytes(length)?)?
        };
        Ok(Self {
            cache_id,
            cache_index,
            bitmap,
        })
    }

    /// Write as an uncompressed cache bitmap order. Bitmaps wider or taller
    /// than 255 pixels cannot be expressed in this revision.
    pub fn encode(&self, out: &mut OutStream) {
        let pixels = self.bitmap.data();
        let mut body = OutStream::with_capacity(9 + pixels.len());
        body.out_u8(self.cache_id);
        body.out_u8(0);
        body.out_u8(self.bitmap.cx as u8);
        body.out_u8(self.bitmap.cy as u8);
        body.out_u8(self.bitmap.original_bpp);
        body.out_u16_le(pixels.len() as u16);
        body.out_u16_le(self.cache_index);
        body.out_bytes(pixels);
        SecondaryHeader::encode(out, TS_CACHE_BITMAP_UNCOMPRESSED, 0, body.len());
        out.out_bytes(body.as_slice());
    }
}

/// One glyph of a cache glyph order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphEntry {
    pub cache_index: u16,
    pub glyph: FontChar,
}

/// Cache glyph insert; also forwarded to sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheGlyph {
    pub cache_id: u8,
    pub glyphs: Vec<GlyphEntry>,
}

impl CacheGlyph {
    pub fn decode(header: &SecondaryHeader, s: &mut InStream<'_>) -> Result<Self> {
        let cache_id = s.in_u8()?;
        let count = usize::from(s.in_u8()?);
        let mut glyphs = Vec::with_capacity(count);
        for _ in 0..count {
            let cache_index = s.in_u16_le()?;
            let offset = s.in_i16_le()?;
            let baseline = s.in_i16_le()?;
            let width = s.in_u16_le()?;
            let height = s.in_u16_le()?;
            let data = s.in_bytes(FontChar::data_size(width, height))?.to_vec();
            glyphs.push(GlyphEntry {
                cache_index,
                glyph: FontChar {
                    offset,
                    baseline,
                    width,
                    height,
                    data,
                },
            });
        }
        if header.extra_flags & CG_GLYPH_UNICODE_PRESENT != 0 {
            s.in_skip(count * 2)?;
        }
        Ok(Self { cache_id, glyphs })
    }

    pub fn encode(&self, out: &mut OutStream) {
        let mut body = OutStream::new();
        body.out_u8(self.cache_id);
        body.out_u8(self.glyphs.len() as u8);
        for entry in &self.glyphs {
            let g = &entry.glyph;
            body.out_u16_le(entry.cache_index);
            body.out_i16_le(g.offset);
            body.out_i16_le(g.baseline);
            body.out_u16_le(g.width);
            body.out_u16_le(g.height);
            let size = FontChar::data_size(g.width, g.height);
            let mut data = g.data.clone();
            data.resize(size, 0);
            body.out_bytes(&data);
        }
        SecondaryHeader::encode(out, TS_CACHE_GLYPH, 0, body.len());
        out.out_bytes(body.as_slice());
    }
}

/// Frame boundary marker (alternate secondary order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameMarker {
    /// 0 = frame start, 1 = frame end.
    pub action: u32,
}

impl FrameMarker {
    pub fn decode(s: &mut InStream<'_>) -> Result<Self> {
        Ok(Self {
            action: s.in_u32_le()?,
        })
    }

    pub fn encode(&self, out: &mut OutStream) {
        out.out_u8(SECONDARY | (ALTSEC_FRAME_MARKER << 2));
        out.out_u32_le(self.action);
    }
}

/// Name of a secondary order kind for diagnostics.
pub fn secondary_name(order_type: u8) -> &'static str {
    match order_type {
        TS_CACHE_BITMAP_UNCOMPRESSED => "CACHE_BITMAP",
        TS_CACHE_COLOR_TABLE => "CACHE_COLOR_TABLE",
        TS_CACHE_BITMAP_COMPRESSED => "CACHE_BITMAP_COMPRESSED",
        TS_CACHE_GLYPH => "CACHE_GLYPH",
        TS_CACHE_BITMAP_UNCOMPRESSED_REV2 => "CACHE_BITMAP_REV2",
        TS_CACHE_BITMAP_COMPRESSED_REV2 => "CACHE_BITMAP_COMPRESSED_REV2",
        TS_CACHE_BRUSH => "CACHE_BRUSH",
        TS_CACHE_BITMAP_COMPRESSED_REV3 => "CACHE_BITMAP_COMPRESSED_REV3",
        _ => "UNKNOWN",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_len_wraps() {
        let h = SecondaryHeader {
            order_length: 0xFFFA,
            extra_flags: 0,
            order_type: TS_CACHE_BRUSH,
        };
        assert_eq!(h.data_len(), 1);
    }

    #[test]
    fn test_cache_bitmap_layout() {
        let bitmap = Bitmap::from_raw(16, 2, 2, &[1, 0, 2, 0, 3, 0, 4, 0]).unwrap();
        let order = CacheBitmap {
            cache_id: 1,
            cache_index: 42,
            bitmap,
        };
        let mut out = OutStream::new();
        order.encode(&mut out);
        let bytes = out.into_inner();
        let mut s = InStream::new(&bytes);
        assert_eq!(s.in_u8().unwrap(), STANDARD | SECONDARY);
        let header = SecondaryHeader::decode(&mut s).unwrap();
        assert_eq!(header.data_len(), s.remaining());
        assert_eq!(CacheBitmap::decode(&header, &mut s).unwrap(), order);
    }

    #[test]
    fn test_cache_glyph_with_unicode_tail() {
        let mut body = OutStream::new();
        body.out_u8(2); // cache id
        body.out_u8(1); // one glyph
        body.out_u16_le(17);
        body.out_i16_le(0);
        body.out_i16_le(-8);
        body.out_u16_le(9); // 9 pixels wide = 2 bytes per row
        body.out_u16_le(3); // 6 bytes, padded to 8
        body.out_bytes(&[0xFF; 8]);
        body.out_u16_le(u16::from(b'A'));
        let bytes = body.into_inner();
        let header = SecondaryHeader {
            order_length: (bytes.len() as u16).wrapping_sub(7),
            extra_flags: CG_GLYPH_UNICODE_PRESENT,
            order_type: TS_CACHE_GLYPH,
        };
        let mut s = InStream::new(&bytes);
        let order = CacheGlyph::decode(&header, &mut s).unwrap();
        assert!(s.at_end());
        assert_eq!(order.cache_id, 2);
        assert_eq!(order.glyphs[0].cache_index, 17);
        assert_eq!(order.glyphs[0].glyph.data.len(), 8);
    }
}
