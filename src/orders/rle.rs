//! Bitmap decompression: interleaved RLE (8 to 24 bpp) and planar (32 bpp).
//!
//! Both decoders produce tightly packed scanlines in wire order (bottom-up).

use crate::error::{ProtocolError, ReplayError, Result};
use crate::wire::InStream;

const REGULAR_BG_RUN: u8 = 0x0;
const REGULAR_FG_RUN: u8 = 0x1;
const REGULAR_FGBG_IMAGE: u8 = 0x2;
const REGULAR_COLOR_RUN: u8 = 0x3;
const REGULAR_COLOR_IMAGE: u8 = 0x4;
const LITE_SET_FG_FG_RUN: u8 = 0xC;
const LITE_SET_FG_FGBG_IMAGE: u8 = 0xD;
const LITE_DITHERED_RUN: u8 = 0xE;
const MEGA_MEGA_BG_RUN: u8 = 0xF0;
const MEGA_MEGA_FG_RUN: u8 = 0xF1;
const MEGA_MEGA_FGBG_IMAGE: u8 = 0xF2;
const MEGA_MEGA_COLOR_RUN: u8 = 0xF3;
const MEGA_MEGA_COLOR_IMAGE: u8 = 0xF4;
const MEGA_MEGA_SET_FG_RUN: u8 = 0xF6;
const MEGA_MEGA_SET_FGBG_IMAGE: u8 = 0xF7;
const MEGA_MEGA_DITHERED_RUN: u8 = 0xF8;
const SPECIAL_FGBG_1: u8 = 0xF9;
const SPECIAL_FGBG_2: u8 = 0xFA;
const WHITE: u8 = 0xFD;
const BLACK: u8 = 0xFE;

const PLANAR_CLL_MASK: u8 = 0x07;
const PLANAR_CS: u8 = 0x08;
const PLANAR_RLE: u8 = 0x10;
const PLANAR_NO_ALPHA: u8 = 0x20;

fn malformed(what: &'static str) -> ReplayError {
    ProtocolError::MalformedBitmap(what).into()
}

struct PixelWriter {
    out: Vec<u8>,
    pos: usize,
    bpp_bytes: usize,
    row_delta: usize,
}

impl PixelWriter {
    fn write(&mut self, pixel: u32) -> Result<()> {
        let end = self.pos + self.bpp_bytes;
        if end > self.out.len() {
            return Err(malformed("run overflows bitmap"));
        }
        self.out[self.pos..end].copy_from_slice(&pixel.to_le_bytes()[..self.bpp_bytes]);
        self.pos = end;
        Ok(())
    }

    fn above(&self) -> Result<u32> {
        let pixel = self
            .pos
            .checked_sub(self.row_delta)
            .and_then(|at| self.out.get(at..at + self.bpp_bytes))
            .ok_or_else(|| malformed("no line above"))?;
        let mut bytes = [0u8; 4];
        bytes[..self.bpp_bytes].copy_from_slice(pixel);
        Ok(u32::from_le_bytes(bytes))
    }

    /// Pixel of the line above, or black on the first line.
    fn base(&self, first_line: bool) -> Result<u32> {
        if first_line { Ok(0) } else { self.above() }
    }

    fn fgbg_bits(&mut self, mask: u8, count: usize, fg: u32, first_line: bool) -> Result<()> {
        for bit in 0..count {
            let base = self.base(first_line)?;
            let pixel = if mask & (1 << bit) != 0 { base ^ fg } else { base };
            self.write(pixel)?;
        }
        Ok(())
    }
}

fn read_pixel(s: &mut InStream<'_>, bpp_bytes: usize) -> Result<u32> {
    match bpp_bytes {
        1 => Ok(u32::from(s.in_u8()?)),
        2 => Ok(u32::from(s.in_u16_le()?)),
        _ => s.in_u24_le(),
    }
}

fn white_pixel(bpp: u8) -> u32 {
    match bpp {
        8 => 0xFF,
        15 => 0x7FFF,
        16 => 0xFFFF,
        _ => 0xFF_FFFF,
    }
}

/// Decode an interleaved RLE bitmap into `cx * cy` tightly packed pixels.
pub fn decompress_interleaved(bpp: u8, cx: u16, cy: u16, src: &[u8]) -> Result<Vec<u8>> {
    let bpp_bytes = match bpp {
        8 => 1,
        15 | 16 => 2,
        24 => 3,
        other => return Err(ProtocolError::UnsupportedBpp(other).into()),
    };
    if cx == 0 || cy == 0 {
        return Err(malformed("empty bitmap"));
    }
    let row_delta = usize::from(cx) * bpp_bytes;
    let mut w = PixelWriter {
        out: vec![0u8; row_delta * usize::from(cy)],
        pos: 0,
        bpp_bytes,
        row_delta,
    };
    let mut s = InStream::new(src);
    let mut fg = white_pixel(bpp);
    let mut insert_fg_pel = false;
    let mut first_line = true;

    while !s.at_end() {
        if first_line && w.pos >= row_delta {
            first_line = false;
            insert_fg_pel = false;
        }

        let header = s.in_u8()?;
        let code = if header & 0xC0 != 0xC0 {
            header >> 5
        } else if header & 0xF0 == 0xF0 {
            header
        } else {
            header >> 4
        };

        let regular_run = |s: &mut InStream<'_>| -> Result<usize> {
            match usize::from(header & 0x1F) {
                0 => Ok(usize::from(s.in_u8()?) + 32),
                n => Ok(n),
            }
        };
        let regular_fgbg = |s: &mut InStream<'_>| -> Result<usize> {
            match usize::from(header & 0x1F) {
                0 => Ok(usize::from(s.in_u8()?) + 1),
                n => Ok(n * 8),
            }
        };
        let lite_run = |s: &mut InStream<'_>| -> Result<usize> {
            match usize::from(header & 0x0F) {
                0 => Ok(usize::from(s.in_u8()?) + 16),
                n => Ok(n),
            }
        };
        let lite_fgbg = |s: &mut InStream<'_>| -> Result<usize> {
            match usize::from(header & 0x0F) {
                0 => Ok(usize::from(s.in_u8()?) + 1),
                n => Ok(n * 8),
            }
        };

        if code == REGULAR_BG_RUN || code == MEGA_MEGA_BG_RUN {
            let mut len = if code == REGULAR_BG_RUN {
                regular_run(&mut s)?
            } else {
                usize::from(s.in_u16_le()?)
            };
            if insert_fg_pel && len > 0 {
                let base = w.base(first_line)?;
                w.write(base ^ fg)?;
                len -= 1;
            }
            for _ in 0..len {
                let base = w.base(first_line)?;
                w.write(base)?;
            }
            insert_fg_pel = true;
            continue;
        }
        insert_fg_pel = false;

        match code {
            REGULAR_FG_RUN | MEGA_MEGA_FG_RUN | LITE_SET_FG_FG_RUN | MEGA_MEGA_SET_FG_RUN => {
                let len = match code {
                    REGULAR_FG_RUN => regular_run(&mut s)?,
                    LITE_SET_FG_FG_RUN => lite_run(&mut s)?,
                    _ => usize::from(s.in_u16_le()?),
                };
                if code == LITE_SET_FG_FG_RUN || code == MEGA_MEGA_SET_FG_RUN {
                    fg = read_pixel(&mut s, bpp_bytes)?;
                }
                for _ in 0..len {
                    let base = w.base(first_line)?;
                    w.write(base ^ fg)?;
                }
            }
            LITE_DITHERED_RUN | MEGA_MEGA_DITHERED_RUN => {
                let len = if code == LITE_DITHERED_RUN {
                    lite_run(&mut s)?
                } else {
                    usize::from(s.in_u16_le()?)
                };
                let a = read_pixel(&mut s, bpp_bytes)?;
                let b = read_pixel(&mut s, bpp_bytes)?;
                for _ in 0..len {
                    w.write(a)?;
                    w.write(b)?;
                }
            }
            REGULAR_COLOR_RUN | MEGA_MEGA_COLOR_RUN => {
                let len = if code == REGULAR_COLOR_RUN {
                    regular_run(&mut s)?
                } else {
                    usize::from(s.in_u16_le()?)
                };
                let pixel = read_pixel(&mut s, bpp_bytes)?;
                for _ in 0..len {
                    w.write(pixel)?;
                }
            }
            REGULAR_FGBG_IMAGE
            | MEGA_MEGA_FGBG_IMAGE
            | LITE_SET_FG_FGBG_IMAGE
            | MEGA_MEGA_SET_FGBG_IMAGE => {
                let mut len = match code {
                    REGULAR_FGBG_IMAGE => regular_fgbg(&mut s)?,
                    LITE_SET_FG_FGBG_IMAGE => lite_fgbg(&mut s)?,
                    _ => usize::from(s.in_u16_le()?),
                };
                if code == LITE_SET_FG_FGBG_IMAGE || code == MEGA_MEGA_SET_FGBG_IMAGE {
                    fg = read_pixel(&mut s, bpp_bytes)?;
                }
                while len > 0 {
                    let mask = s.in_u8()?;
                    let n = len.min(8);
                    w.fgbg_bits(mask, n, fg, first_line)?;
                    len -= n;
                }
            }
            REGULAR_COLOR_IMAGE | MEGA_MEGA_COLOR_IMAGE => {
                let len = if code == REGULAR_COLOR_IMAGE {
                    regular_run(&mut s)?
                } else {
                    usize::from(s.in_u16_le()?)
                };
                for _ in 0..len {
                    let pixel = read_pixel(&mut s, bpp_bytes)?;
                    w.write(pixel)?;
                }
            }
            SPECIAL_FGBG_1 => w.fgbg_bits(0x03, 8, fg, first_line)?,
            SPECIAL_FGBG_2 => w.fgbg_bits(0x05, 8, fg, first_line)?,
            WHITE => w.write(white_pixel(bpp))?,
            BLACK => w.write(0)?,
            _ => return Err(malformed("unknown RLE order code")),
        }
    }

    if w.pos != w.out.len() {
        log::debug!(
            "RLE bitmap {}x{} filled {} of {} bytes",
            cx,
            cy,
            w.pos,
            w.out.len()
        );
    }
    Ok(w.out)
}

fn decode_rle_plane(s: &mut InStream<'_>, cx: usize, cy: usize) -> Result<Vec<u8>> {
    let mut plane = vec![0u8; cx * cy];
    for y in 0..cy {
        let row = &mut plane[y * cx..(y + 1) * cx];
        let mut x = 0;
        let mut last = 0u8;
        while x < cx {
            let control = s.in_u8()?;
            let mut run = usize::from(control & 0x0F);
            let mut raw = usize::from(control >> 4);
            if run == 1 {
                run = 16 + raw;
                raw = 0;
            } else if run == 2 {
                run = 32 + raw;
                raw = 0;
            }
            if x + raw + run > cx {
                return Err(malformed("plane run overflows scanline"));
            }
            for _ in 0..raw {
                last = s.in_u8()?;
                row[x] = last;
                x += 1;
            }
            for _ in 0..run {
                row[x] = last;
                x += 1;
            }
        }
    }
    // Scanlines after the first hold sign-magnitude deltas from the line above.
    for y in 1..cy {
        for x in 0..cx {
            let v = plane[y * cx + x];
            let delta = if v & 1 != 0 {
                -(i16::from(v >> 1) + 1)
            } else {
                i16::from(v >> 1)
            };
            let above = plane[(y - 1) * cx + x];
            plane[y * cx + x] = (i16::from(above) + delta) as u8;
        }
    }
    Ok(plane)
}

/// Decode a planar (32 bpp) bitmap into tightly packed BGRA pixels.
pub fn decompress_planar(cx: u16, cy: u16, src: &[u8]) -> Result<Vec<u8>> {
    if cx == 0 || cy == 0 {
        return Err(malformed("empty bitmap"));
    }
    let (cx, cy) = (usize::from(cx), usize::from(cy));
    let mut s = InStream::new(src);
    let header = s.in_u8()?;
    if header & PLANAR_CLL_MASK != 0 || header & PLANAR_CS != 0 {
        return Err(malformed("planar color loss or chroma subsampling"));
    }
    let rle = header & PLANAR_RLE != 0;
    let with_alpha = header & PLANAR_NO_ALPHA == 0;

    let read_plane = |s: &mut InStream<'_>| -> Result<Vec<u8>> {
        if rle {
            decode_rle_plane(s, cx, cy)
        } else {
            Ok(s.in_bytes(cx * cy)?.to_vec())
        }
    };
    let alpha = if with_alpha {
        Some(read_plane(&mut s)?)
    } else {
        None
    };
    let red = read_plane(&mut s)?;
    let green = read_plane(&mut s)?;
    let blue = read_plane(&mut s)?;

    let mut out = vec![0u8; cx * cy * 4];
    for (i, px) in out.chunks_exact_mut(4).enumerate() {
        px[0] = blue[i];
        px[1] = green[i];
        px[2] = red[i];
        px[3] = alpha.as_ref().map_or(0xFF, |a| a[i]);
    }
    Ok(out)
}
