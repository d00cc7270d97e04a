//! Persistent bitmap cache file ("PDBC").
//!
//! ```text
//! magic "PDBC", version u8 = 1
//! per cache tier (0..number_of_caches):
//!   count u16
//!   count x { sig [u8; 8], bpp u8, cx u16, cy u16,
//!             palette [u8; 1024] if bpp == 8, size u16, pixels [u8; size] }
//! ```
//!
//! Signatures are the bitmap fingerprint and are verified on load.

use std::collections::HashMap;
use std::io::{Read, Write};

use super::bitmap::BitmapCache;
use crate::error::Result;
use crate::orders::{keys_from_signature, signature_from_keys, Bitmap};
use crate::wire::{InStream, OutStream};

pub const PERSIST_MAGIC: &[u8; 4] = b"PDBC";
pub const PERSIST_VERSION: u8 = 1;
const PALETTE_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("bad magic, not a bitmap cache file")]
    BadMagic,

    #[error("unsupported bitmap cache file version {0}")]
    UnsupportedVersion(u8),

    #[error("corrupt entry {index} of cache {cache_id}: signature mismatch")]
    CorruptSignature { cache_id: u8, index: usize },

    #[error("bitmap of {0} bytes does not fit a cache file record")]
    BitmapTooLarge(usize),
}

struct Record {
    sig: [u8; 8],
    bitmap: Bitmap,
}

fn read_header(s: &mut InStream<'_>) -> Result<()> {
    if s.in_array::<4>()? != *PERSIST_MAGIC {
        return Err(PersistError::BadMagic.into());
    }
    let version = s.in_u8()?;
    if version != PERSIST_VERSION {
        return Err(PersistError::UnsupportedVersion(version).into());
    }
    Ok(())
}

fn read_records(s: &mut InStream<'_>, cache_id: u8) -> Result<Vec<Record>> {
    let count = usize::from(s.in_u16_le()?);
    let mut records = Vec::with_capacity(count);
    for index in 0..count {
        let sig = s.in_array::<8>()?;
        let bpp = s.in_u8()?;
        let cx = s.in_u16_le()?;
        let cy = s.in_u16_le()?;
        if bpp == 8 {
            // Palettes are not tracked per bitmap.
            s.in_skip(PALETTE_SIZE)?;
        }
        let size = usize::from(s.in_u16_le()?);
        let bitmap = Bitmap::from_raw(bpp, cx, cy, s.in_bytes(size)?)?;
        if bitmap.fingerprint() != sig {
            return Err(PersistError::CorruptSignature { cache_id, index }.into());
        }
        records.push(Record { sig, bitmap });
    }
    Ok(records)
}

/// Bitmaps preloaded from a cache file, waiting for the key list that
/// places them into cache slots.
#[derive(Debug, Default)]
pub struct BitmapCachePersister {
    preloaded: Vec<HashMap<[u8; 8], Bitmap>>,
}

impl BitmapCachePersister {
    /// Read every record of `reader`, keeping those of persistent tiers.
    pub fn preload<R: Read>(cache: &BitmapCache, reader: &mut R) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let mut s = InStream::new(&bytes);
        read_header(&mut s)?;

        let mut preloaded = vec![HashMap::new(); cache.number_of_caches()];
        for cache_id in 0..cache.number_of_caches() as u8 {
            let records = read_records(&mut s, cache_id)?;
            if !cache.is_persistent(cache_id) {
                continue;
            }
            let map = &mut preloaded[usize::from(cache_id)];
            for r in records {
                map.insert(r.sig, r.bitmap);
            }
            log::debug!("preloaded {} bitmaps for cache {}", map.len(), cache_id);
        }
        Ok(Self { preloaded })
    }

    /// Bitmaps still waiting for a slot in tier `cache_id`.
    pub fn pending(&self, cache_id: u8) -> usize {
        self.preloaded.get(usize::from(cache_id)).map_or(0, HashMap::len)
    }

    /// Place preloaded bitmaps named by `signatures` into consecutive slots
    /// of tier `cache_id` starting at `first_index`. Returns how many were found.
    pub fn process_key_list(
        &mut self,
        cache: &mut BitmapCache,
        cache_id: u8,
        signatures: &[[u8; 8]],
        first_index: u16,
    ) -> Result<usize> {
        let Some(map) = self.preloaded.get_mut(usize::from(cache_id)) else {
            return Ok(0);
        };
        let capacity = cache.capacity(cache_id);
        let mut placed = 0;
        for (index, sig) in (usize::from(first_index)..capacity).zip(signatures) {
            match map.remove(sig) {
                Some(bitmap) => {
                    let (key1, key2) = keys_from_signature(sig);
                    cache.put(cache_id, index as u16, bitmap, key1, key2)?;
                    placed += 1;
                }
                None => log::debug!(
                    "bitmap {:02x?} of cache {} not found in cache file",
                    sig,
                    cache_id
                ),
            }
        }
        Ok(placed)
    }

    /// Load a cache file positionally: record `i` of a persistent tier goes to slot `i`.
    pub fn load_all<R: Read>(cache: &mut BitmapCache, reader: &mut R) -> Result<()> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let mut s = InStream::new(&bytes);
        read_header(&mut s)?;

        for cache_id in 0..cache.number_of_caches() as u8 {
            let records = read_records(&mut s, cache_id)?;
            if !cache.is_persistent(cache_id) {
                continue;
            }
            let capacity = cache.capacity(cache_id);
            for (index, r) in records.into_iter().enumerate().take(capacity) {
                let (key1, key2) = keys_from_signature(&r.sig);
                cache.put(cache_id, index as u16, r.bitmap, key1, key2)?;
            }
        }
        Ok(())
    }

    /// Write every occupied slot of persistent tiers; other tiers get an empty section.
    pub fn save_all<W: Write>(cache: &BitmapCache, writer: &mut W) -> Result<()> {
        let mut out = OutStream::new();
        out.out_bytes(PERSIST_MAGIC);
        out.out_u8(PERSIST_VERSION);

        for cache_id in 0..cache.number_of_caches() as u8 {
            let count_at = out.len();
            out.out_u16_le(0);
            if !cache.is_persistent(cache_id) {
                continue;
            }
            let mut count = 0u16;
            for (_, entry) in cache.entries(cache_id) {
                let bitmap = &entry.bitmap;
                let size = bitmap.data().len();
                if size > usize::from(u16::MAX) {
                    return Err(PersistError::BitmapTooLarge(size).into());
                }
                out.out_bytes(&signature_from_keys(entry.key1, entry.key2));
                out.out_u8(bitmap.original_bpp);
                out.out_u16_le(bitmap.cx);
                out.out_u16_le(bitmap.cy);
                if bitmap.original_bpp == 8 {
                    out.out_bytes(&[0u8; PALETTE_SIZE]);
                }
                out.out_u16_le(size as u16);
                out.out_bytes(bitmap.data());
                count += 1;
            }
            out.set_u16_le(count_at, count);
        }
        writer.write_all(out.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheGeometry, CacheTier};
    use std::fs::File;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn geometry() -> CacheGeometry {
        CacheGeometry {
            tiers: vec![
                CacheTier::new(4, 768, false),
                CacheTier::new(8, 3072, true),
                CacheTier::new(8, 12288, true),
            ],
            use_waiting_list: false,
        }
    }

    fn bitmap(seed: u8) -> Bitmap {
        Bitmap::from_raw(24, 2, 2, &[seed; 16]).unwrap()
    }

    fn populated() -> BitmapCache {
        let mut cache = BitmapCache::new(geometry());
        cache.put(0, 0, bitmap(0), 0, 0).unwrap();
        cache.put(1, 2, bitmap(1), 0, 0).unwrap();
        cache.put(1, 5, bitmap(2), 0, 0).unwrap();
        cache.put(2, 0, Bitmap::from_raw(8, 4, 1, &[7; 4]).unwrap(), 0, 0).unwrap();
        cache
    }

    #[test]
    fn test_save_then_load_all_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.pdbc");
        BitmapCachePersister::save_all(&populated(), &mut File::create(&path).unwrap()).unwrap();

        let mut cache = BitmapCache::new(geometry());
        BitmapCachePersister::load_all(&mut cache, &mut File::open(&path).unwrap()).unwrap();
        // Non-persistent tier is not saved.
        assert!(cache.get(0, 0).unwrap().is_none());
        // Positional load compacts tier 1.
        assert_eq!(cache.get(1, 0).unwrap(), Some(&bitmap(1)));
        assert_eq!(cache.get(1, 1).unwrap(), Some(&bitmap(2)));
        assert_eq!(cache.get(2, 0).unwrap().unwrap().original_bpp, 8);
    }

    #[test]
    fn test_preload_and_key_list() {
        let mut file = Vec::new();
        BitmapCachePersister::save_all(&populated(), &mut file).unwrap();

        let mut cache = BitmapCache::new(geometry());
        let mut persister = BitmapCachePersister::preload(&cache, &mut Cursor::new(&file)).unwrap();
        assert_eq!(persister.pending(1), 2);

        let wanted = [bitmap(2).fingerprint(), [0xEE; 8], bitmap(1).fingerprint()];
        let placed = persister
            .process_key_list(&mut cache, 1, &wanted, 3)
            .unwrap();
        assert_eq!(placed, 2);
        assert_eq!(cache.get(1, 3).unwrap(), Some(&bitmap(2)));
        assert!(cache.get(1, 4).unwrap().is_none());
        assert_eq!(cache.get(1, 5).unwrap(), Some(&bitmap(1)));
        assert_eq!(persister.pending(1), 0);
    }

    #[test]
    fn test_key_list_stops_at_tier_end() {
        let mut file = Vec::new();
        BitmapCachePersister::save_all(&populated(), &mut file).unwrap();
        let mut cache = BitmapCache::new(geometry());
        let mut persister = BitmapCachePersister::preload(&cache, &mut Cursor::new(&file)).unwrap();
        let wanted = [bitmap(1).fingerprint(), bitmap(2).fingerprint()];
        let placed = persister
            .process_key_list(&mut cache, 1, &wanted, 7)
            .unwrap();
        assert_eq!(placed, 1);
        assert_eq!(persister.pending(1), 1);
    }

    #[test]
    fn test_corrupt_signature_rejected() {
        let mut file = Vec::new();
        BitmapCachePersister::save_all(&populated(), &mut file).unwrap();
        // Tier 0 section is an empty count; first record of tier 1 starts after it.
        let first_sig = PERSIST_MAGIC.len() + 1 + 2 + 2;
        file[first_sig] ^= 0xFF;

        let cache = BitmapCache::new(geometry());
        let err = BitmapCachePersister::preload(&cache, &mut Cursor::new(&file)).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ReplayError::Persist(PersistError::CorruptSignature { cache_id: 1, index: 0 })
        ));
    }

    #[test]
    fn test_bad_magic_and_version() {
        let cache = BitmapCache::new(geometry());
        let err = BitmapCachePersister::preload(&cache, &mut Cursor::new(b"XXXX\x01")).unwrap_err();
        assert!(matches!(err, crate::error::ReplayError::Persist(PersistError::BadMagic)));
        let err = BitmapCachePersister::preload(&cache, &mut Cursor::new(b"PDBC\x02")).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ReplayError::Persist(PersistError::UnsupportedVersion(2))
        ));
    }
}
