//! Decoded bitmaps and the full bitmap update header.

use sha1::{Digest, Sha1};

use super::rle::{decompress_interleaved, decompress_planar};
use crate::error::{ProtocolError, Result};
use crate::wire::{InStream, OutStream};

/// Bitmap pixels as stored in caches and handed to sinks.
///
/// Scanlines are bottom-up, as sent on the wire, each padded to a
/// multiple of four bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub original_bpp: u8,
    pub cx: u16,
    pub cy: u16,
    data: Vec<u8>,
}

/// Bytes per pixel for a supported color depth.
pub fn bytes_per_pixel(bpp: u8) -> Result<usize> {
    match bpp {
        8 => Ok(1),
        15 | 16 => Ok(2),
        24 => Ok(3),
        32 => Ok(4),
        other => Err(ProtocolError::UnsupportedBpp(other).into()),
    }
}

#[inline]
fn align4(n: usize) -> usize {
    (n + 3) & !3
}

impl Bitmap {
    /// Build from uncompressed wire pixels, either 4-byte aligned or tightly packed rows.
    pub fn from_raw(bpp: u8, cx: u16, cy: u16, pixels: &[u8]) -> Result<Self> {
        let bpp_bytes = bytes_per_pixel(bpp)?;
        let tight = usize::from(cx) * bpp_bytes;
        let line = align4(tight);
        let rows = usize::from(cy);
        if pixels.len() >= line * rows {
            return Ok(Self {
                original_bpp: bpp,
                cx,
                cy,
                data: pixels[..line * rows].to_vec(),
            });
        }
        if pixels.len() == tight * rows {
            return Ok(Self::from_tight(bpp, cx, cy, pixels, tight, line));
        }
        Err(ProtocolError::MalformedBitmap("pixel data shorter than bitmap").into())
    }

    /// Decompress wire pixels: planar for 32 bpp, interleaved RLE otherwise.
    pub fn decompress(bpp: u8, cx: u16, cy: u16, compressed: &[u8]) -> Result<Self> {
        let bpp_bytes = bytes_per_pixel(bpp)?;
        let tight = usize::from(cx) * bpp_bytes;
        let pixels = if bpp == 32 {
            decompress_planar(cx, cy, compressed)?
        } else {
            decompress_interleaved(bpp, cx, cy, compressed)?
        };
        Ok(Self::from_tight(bpp, cx, cy, &pixels, tight, align4(tight)))
    }

    fn from_tight(bpp: u8, cx: u16, cy: u16, pixels: &[u8], tight: usize, line: usize) -> Self {
        let mut data = vec![0u8; line * usize::from(cy)];
        if tight > 0 {
            for (dst, src) in data.chunks_exact_mut(line).zip(pixels.chunks_exact(tight)) {
                dst[..tight].copy_from_slice(src);
            }
        }
        Self {
            original_bpp: bpp,
            cx,
            cy,
            data,
        }
    }

    /// Bytes per padded scanline.
    pub fn line_size(&self) -> usize {
        align4(usize::from(self.cx) * bytes_per_pixel(self.original_bpp).unwrap_or(4))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Scanline `y` counted from the bottom.
    pub fn row(&self, y: usize) -> &[u8] {
        let line = self.line_size();
        &self.data[y * line..(y + 1) * line]
    }

    /// Content fingerprint: first 8 bytes of SHA-1 over depth, size and pixels.
    pub fn fingerprint(&self) -> [u8; 8] {
        let mut hasher = Sha1::new();
        hasher.update([self.original_bpp]);
        hasher.update(self.cx.to_le_bytes());
        hasher.update(self.cy.to_le_bytes());
        hasher.update(&self.data);
        let digest = hasher.finalize();
        let mut sig = [0u8; 8];
        sig.copy_from_slice(&digest[..8]);
        sig
    }

    /// Fingerprint split into the `(key1, key2)` pair used by persistent caches.
    pub fn keys(&self) -> (u32, u32) {
        keys_from_signature(&self.fingerprint())
    }
}

pub fn keys_from_signature(sig: &[u8; 8]) -> (u32, u32) {
    (
        u32::from_le_bytes([sig[0], sig[1], sig[2], sig[3]]),
        u32::from_le_bytes([sig[4], sig[5], sig[6], sig[7]]),
    )
}

pub fn signature_from_keys(key1: u32, key2: u32) -> [u8; 8] {
    let mut sig = [0u8; 8];
    sig[..4].copy_from_slice(&key1.to_le_bytes());
    sig[4..].copy_from_slice(&key2.to_le_bytes());
    sig
}

pub const BITMAP_COMPRESSION: u16 = 0x0001;
pub const NO_BITMAP_COMPRESSION_HDR: u16 = 0x0400;

/// Header of a full bitmap update rectangle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitmapData {
    pub dest_left: u16,
    pub dest_top: u16,
    pub dest_right: u16,
    pub dest_bottom: u16,
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u16,
    pub flags: u16,
    /// Payload length including the compression header when present.
    pub bitmap_length: u16,
    pub cb_comp_first_row_size: u16,
    pub cb_comp_main_body_size: u16,
    pub cb_scan_width: u16,
    pub cb_uncompressed_size: u16,
}

impl BitmapData {
    pub fn is_compressed(&self) -> bool {
        self.flags & BITMAP_COMPRESSION != 0
    }

    pub fn has_compression_header(&self) -> bool {
        self.is_compressed() && self.flags & NO_BITMAP_COMPRESSION_HDR == 0
    }

    /// Length of the pixel payload following the header.
    pub fn bitmap_size(&self) -> usize {
        if self.has_compression_header() {
            usize::from(self.bitmap_length).saturating_sub(8)
        } else {
            usize::from(self.bitmap_length)
        }
    }

    pub fn decode(s: &mut InStream<'_>) -> Result<Self> {
        let mut d = Self {
            dest_left: s.in_u16_le()?,
            dest_top: s.in_u16_le()?,
            dest_right: s.in_u16_le()?,
            dest_bottom: s.in_u16_le()?,
            width: s.in_u16_le()?,
            height: s.in_u16_le()?,
            bits_per_pixel: s.in_u16_le()?,
            flags: s.in_u16_le()?,
            bitmap_length: s.in_u16_le()?,
            ..Self::default()
        };
        if d.has_compression_header() {
            d.cb_comp_first_row_size = s.in_u16_le()?;
            d.cb_comp_main_body_size = s.in_u16_le()?;
            d.cb_scan_width = s.in_u16_le()?;
            d.cb_uncompressed_size = s.in_u16_le()?;
        }
        Ok(d)
    }

    pub fn encode(&self, out: &mut OutStream) {
        out.out_u16_le(self.dest_left);
        out.out_u16_le(self.dest_top);
        out.out_u16_le(self.dest_right);
        out.out_u16_le(self.dest_bottom);
        out.out_u16_le(self.width);
        out.out_u16_le(self.height);
        out.out_u16_le(self.bits_per_pixel);
        out.out_u16_le(self.flags);
        out.out_u16_le(self.bitmap_length);
        if self.has_compression_header() {
            out.out_u16_le(self.cb_comp_first_row_size);
            out.out_u16_le(self.cb_comp_main_body_size);
            out.out_u16_le(self.cb_scan_width);
            out.out_u16_le(self.cb_uncompressed_size);
        }
    }

    /// Decode the pixel payload that followed this header.
    pub fn to_bitmap(&self, payload: &[u8]) -> Result<Bitmap> {
        let bpp = u8::try_from(self.bits_per_pixel)
            .map_err(|_| ProtocolError::MalformedBitmap("bits per pixel out of range"))?;
        if self.is_compressed() {
            Bitmap::decompress(bpp, self.width, self.height, payload)
        } else {
            Bitmap::from_raw(bpp, self.width, self.height, payload)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_are_padded() {
        // 3 pixels at 24 bpp = 9 bytes, padded to 12.
        let pixels: Vec<u8> = (0..18).collect();
        let bmp = Bitmap::from_raw(24, 3, 2, &pixels).unwrap();
        assert_eq!(bmp.line_size(), 12);
        assert_eq!(&bmp.row(1)[..9], &pixels[9..18]);
        assert_eq!(&bmp.row(1)[9..], &[0, 0, 0]);
    }

    #[test]
    fn test_compressed_zero_width_is_protocol_error() {
        let err = Bitmap::decompress(8, 0, 1, &[0x01]).unwrap_err();
        assert!(err.is_protocol());
        let err = Bitmap::decompress(32, 4, 0, &[0x20]).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_fingerprint_depends_on_content_and_shape() {
        let a = Bitmap::from_raw(8, 4, 1, &[1, 2, 3, 4]).unwrap();
        let b = Bitmap::from_raw(8, 4, 1, &[1, 2, 3, 5]).unwrap();
        let c = Bitmap::from_raw(8, 2, 2, &[1, 2, 0, 0, 3, 4, 0, 0]).unwrap();
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        let (k1, k2) = a.keys();
        assert_eq!(signature_from_keys(k1, k2), a.fingerprint());
    }

    #[test]
    fn test_unsupported_bpp_is_fatal() {
        let err = Bitmap::from_raw(4, 2, 2, &[0; 16]).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_bitmap_data_compression_header() {
        let header = BitmapData {
            width: 64,
            height: 64,
            bits_per_pixel: 16,
            flags: BITMAP_COMPRESSION,
            bitmap_length: 108,
            cb_comp_main_body_size: 100,
            ..BitmapData::default()
        };
        let mut out = OutStream::new();
        header.encode(&mut out);
        assert_eq!(out.len(), 26);
        let bytes = out.into_inner();
        let decoded = BitmapData::decode(&mut InStream::new(&bytes)).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.bitmap_size(), 100);
    }
}
