//! Pointer (cursor) cache with two built-in shapes.

use crate::error::{ProtocolError, Result};

/// Slot count; the wire carries a one-byte index.
pub const POINTER_CACHE_CAPACITY: usize = 32;
/// Slot holding the built-in arrow at open time.
pub const POINTER_NORMAL: u8 = 0;
/// Slot holding the built-in text I-beam at open time.
pub const POINTER_EDIT: u8 = 1;

/// 32x32 cursor: 24 bpp color rows plus a 1 bpp AND mask, both bottom-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    pub hotspot_x: u8,
    pub hotspot_y: u8,
    pub data: Vec<u8>,
    pub mask: Vec<u8>,
}

impl Pointer {
    pub const WIDTH: usize = 32;
    pub const HEIGHT: usize = 32;
    pub const DATA_SIZE: usize = Self::WIDTH * Self::HEIGHT * 3;
    pub const MASK_SIZE: usize = Self::WIDTH * Self::HEIGHT / 8;

    /// Fully transparent cursor.
    pub fn blank() -> Self {
        Self {
            hotspot_x: 0,
            hotspot_y: 0,
            data: vec![0; Self::DATA_SIZE],
            mask: vec![0xFF; Self::MASK_SIZE],
        }
    }

    /// Paint pixel `(x, y)` (top-down coordinates) opaque with `rgb`.
    fn paint(&mut self, x: usize, y: usize, rgb: u8) {
        let row = Self::HEIGHT - 1 - y;
        let at = (row * Self::WIDTH + x) * 3;
        self.data[at..at + 3].fill(rgb);
        self.mask[row * Self::WIDTH / 8 + x / 8] &= !(0x80 >> (x % 8));
    }

    /// Whether pixel `(x, y)` (top-down) is drawn.
    pub fn is_opaque(&self, x: usize, y: usize) -> bool {
        let row = Self::HEIGHT - 1 - y;
        self.mask[row * Self::WIDTH / 8 + x / 8] & (0x80 >> (x % 8)) == 0
    }

    /// Standard arrow: black outline, white fill, hotspot at the tip.
    pub fn normal() -> Self {
        let mut p = Self::blank();
        for y in 0..17 {
            for x in 0..=y.min(11) {
                let edge = x == 0 || x == y || x == 11 || y == 16;
                p.paint(x, y, if edge { 0x00 } else { 0xFF });
            }
        }
        p
    }

    /// Text insertion I-beam, hotspot in the middle of the bar.
    pub fn edit() -> Self {
        let mut p = Self::blank();
        p.hotspot_x = 15;
        p.hotspot_y = 15;
        for y in 4..28 {
            p.paint(15, y, 0x00);
        }
        for x in 12..19 {
            p.paint(x, 4, 0x00);
            p.paint(x, 27, 0x00);
        }
        p
    }
}

/// Flat pointer cache.
#[derive(Debug, Clone)]
pub struct PointerCache {
    slots: Vec<Option<Pointer>>,
}

impl Default for PointerCache {
    fn default() -> Self {
        Self {
            slots: vec![None; POINTER_CACHE_CAPACITY],
        }
    }
}

impl PointerCache {
    /// Cache pre-populated with the built-in arrow and I-beam.
    pub fn with_builtins() -> Self {
        let mut cache = Self::default();
        cache.slots[usize::from(POINTER_NORMAL)] = Some(Pointer::normal());
        cache.slots[usize::from(POINTER_EDIT)] = Some(Pointer::edit());
        cache
    }

    fn check(index: u8) -> Result<usize> {
        let idx = usize::from(index);
        if idx >= POINTER_CACHE_CAPACITY {
            return Err(ProtocolError::CacheOutOfRange {
                cache: "pointer",
                cache_id: 0,
                cache_index: u16::from(index),
            }
            .into());
        }
        Ok(idx)
    }

    /// Store `pointer` at `index`; the latest write wins, built-ins included.
    pub fn add_pointer_static(&mut self, pointer: Pointer, index: u8) -> Result<()> {
        let idx = Self::check(index)?;
        self.slots[idx] = Some(pointer);
        Ok(())
    }

    /// Stored pointer; a never-populated slot is a protocol error.
    pub fn get(&self, index: u8) -> Result<&Pointer> {
        let idx = Self::check(index)?;
        self.slots[idx]
            .as_ref()
            .ok_or_else(|| ProtocolError::PointerCacheMiss(index).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_present() {
        let cache = PointerCache::with_builtins();
        let arrow = cache.get(POINTER_NORMAL).unwrap();
        assert!(arrow.is_opaque(0, 0));
        assert!(!arrow.is_opaque(20, 0));
        let beam = cache.get(POINTER_EDIT).unwrap();
        assert_eq!((beam.hotspot_x, beam.hotspot_y), (15, 15));
        assert!(beam.is_opaque(15, 10));
    }

    #[test]
    fn test_wire_shape_overwrites_builtin() {
        let mut cache = PointerCache::with_builtins();
        let mut custom = Pointer::blank();
        custom.hotspot_x = 3;
        cache.add_pointer_static(custom.clone(), POINTER_NORMAL).unwrap();
        assert_eq!(cache.get(POINTER_NORMAL).unwrap(), &custom);
    }

    #[test]
    fn test_miss_and_range_are_errors() {
        let cache = PointerCache::with_builtins();
        assert!(cache.get(5).unwrap_err().is_protocol());
        assert!(cache.get(32).unwrap_err().is_protocol());
    }
}
