//! Glyph cache: 10 fonts of 256 glyphs.

use crate::error::{ProtocolError, Result};

pub const GLYPH_CACHES: usize = 10;
pub const GLYPHS_PER_CACHE: usize = 256;

/// One cached glyph: origin offset, size and 1 bpp rows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontChar {
    pub offset: i16,
    pub baseline: i16,
    pub width: u16,
    pub height: u16,
    pub data: Vec<u8>,
}

impl FontChar {
    /// Byte length of glyph data: rows padded to bytes, total padded to 4.
    pub fn data_size(width: u16, height: u16) -> usize {
        let row = usize::from(width).div_ceil(8);
        (row * usize::from(height) + 3) & !3
    }
}

#[derive(Debug, Clone)]
pub struct GlyphCache {
    slots: Vec<Vec<Option<FontChar>>>,
}

impl Default for GlyphCache {
    fn default() -> Self {
        Self {
            slots: vec![vec![None; GLYPHS_PER_CACHE]; GLYPH_CACHES],
        }
    }
}

impl GlyphCache {
    fn check(cache_id: u8, cache_index: u16) -> Result<(usize, usize)> {
        let (id, idx) = (usize::from(cache_id), usize::from(cache_index));
        if id >= GLYPH_CACHES || idx >= GLYPHS_PER_CACHE {
            return Err(ProtocolError::CacheOutOfRange {
                cache: "glyph",
                cache_id: u16::from(cache_id),
                cache_index,
            }
            .into());
        }
        Ok((id, idx))
    }

    pub fn set(&mut self, cache_id: u8, cache_index: u16, glyph: FontChar) -> Result<()> {
        let (id, idx) = Self::check(cache_id, cache_index)?;
        self.slots[id][idx] = Some(glyph);
        Ok(())
    }

    pub fn get(&self, cache_id: u8, cache_index: u16) -> Result<Option<&FontChar>> {
        let (id, idx) = Self::check(cache_id, cache_index)?;
        Ok(self.slots[id][idx].as_ref())
    }
}
