//! Tiered bitmap cache addressed by `(cache_id, cache_index)`.

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::orders::Bitmap;

/// Maximum number of bitmap cache tiers.
pub const MAX_BITMAP_CACHES: usize = 5;

/// Geometry of one cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheTier {
    /// Number of slots.
    pub entries: u16,
    /// Maximum bitmap size in bytes.
    pub size: u16,
    /// Tier survives across sessions (persistent bitmap cache file).
    #[serde(default)]
    pub persistent: bool,
}

impl CacheTier {
    pub const fn new(entries: u16, size: u16, persistent: bool) -> Self {
        Self {
            entries,
            size,
            persistent,
        }
    }
}

/// Cache geometry declared once per recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheGeometry {
    pub tiers: Vec<CacheTier>,
    #[serde(default)]
    pub use_waiting_list: bool,
}

impl Default for CacheGeometry {
    fn default() -> Self {
        Self {
            tiers: vec![
                CacheTier::new(120, 768, false),
                CacheTier::new(120, 3072, false),
                CacheTier::new(2553, 12288, false),
            ],
            use_waiting_list: false,
        }
    }
}

impl CacheGeometry {
    /// Tier `id`, or an empty tier past the declared count.
    pub fn tier(&self, id: usize) -> CacheTier {
        self.tiers.get(id).copied().unwrap_or_default()
    }
}

/// Cached bitmap with its persistent-cache key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub bitmap: Bitmap,
    pub key1: u32,
    pub key2: u32,
}

/// Bitmap cache with fixed geometry for the lifetime of a recording.
#[derive(Debug, Clone)]
pub struct BitmapCache {
    geometry: CacheGeometry,
    slots: Vec<Vec<Option<CacheEntry>>>,
}

impl BitmapCache {
    pub fn new(mut geometry: CacheGeometry) -> Self {
        geometry.tiers.truncate(MAX_BITMAP_CACHES);
        let slots = geometry
            .tiers
            .iter()
            .map(|t| vec![None; usize::from(t.entries)])
            .collect();
        Self { geometry, slots }
    }

    pub fn geometry(&self) -> &CacheGeometry {
        &self.geometry
    }

    pub fn number_of_caches(&self) -> usize {
        self.slots.len()
    }

    pub fn is_persistent(&self, cache_id: u8) -> bool {
        self.geometry.tier(usize::from(cache_id)).persistent
    }

    /// Slot count of tier `cache_id` (0 for undeclared tiers).
    pub fn capacity(&self, cache_id: u8) -> usize {
        self.slots.get(usize::from(cache_id)).map_or(0, Vec::len)
    }

    fn slot_index(&self, cache_id: u8, cache_index: u16) -> Result<(usize, usize)> {
        let (id, idx) = (usize::from(cache_id), usize::from(cache_index));
        if idx >= self.capacity(cache_id) {
            return Err(ProtocolError::CacheOutOfRange {
                cache: "bitmap",
                cache_id: u16::from(cache_id),
                cache_index,
            }
            .into());
        }
        Ok((id, idx))
    }

    /// Store `bitmap`, overwriting the slot. A `(0, 0)` key pair is replaced
    /// by the bitmap's own fingerprint.
    pub fn put(
        &mut self,
        cache_id: u8,
        cache_index: u16,
        bitmap: Bitmap,
        key1: u32,
        key2: u32,
    ) -> Result<()> {
        let (id, idx) = self.slot_index(cache_id, cache_index)?;
        let (key1, key2) = if key1 == 0 && key2 == 0 {
            bitmap.keys()
        } else {
            (key1, key2)
        };
        let limit = usize::from(self.geometry.tiers[id].size);
        if limit != 0 && bitmap.data().len() > limit {
            log::debug!(
                "bitmap of {} bytes exceeds tier {} entry size {}",
                bitmap.data().len(),
                cache_id,
                limit
            );
        }
        self.slots[id][idx] = Some(CacheEntry { bitmap, key1, key2 });
        Ok(())
    }

    /// Cached bitmap, `None` for a never-populated slot.
    pub fn get(&self, cache_id: u8, cache_index: u16) -> Result<Option<&Bitmap>> {
        Ok(self.entry(cache_id, cache_index)?.map(|e| &e.bitmap))
    }

    pub fn entry(&self, cache_id: u8, cache_index: u16) -> Result<Option<&CacheEntry>> {
        let (id, idx) = self.slot_index(cache_id, cache_index)?;
        Ok(self.slots[id][idx].as_ref())
    }

    /// Occupied slots of tier `cache_id` in index order.
    pub fn entries(&self, cache_id: u8) -> impl Iterator<Item = (u16, &CacheEntry)> {
        self.slots
            .get(usize::from(cache_id))
            .into_iter()
            .flat_map(|tier| tier.iter().enumerate())
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u16, e)))
    }

    /// Empty every slot, keeping the geometry.
    pub fn clear(&mut self) {
        for tier in &mut self.slots {
            tier.iter_mut().for_each(|slot| *slot = None);
        }
    }
}
