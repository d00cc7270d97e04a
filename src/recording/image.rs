//! Streaming reader over PARTIAL_IMAGE/LAST_IMAGE chunk runs.

use std::io::{self, Read};

use super::channel::ChunkChannel;
use super::format::{ChunkHeader, ChunkType};
use crate::error::{ProtocolError, ReplayError, Result};

/// Presents the payloads of one image frame, split over any number of
/// PARTIAL_IMAGE chunks and a closing LAST_IMAGE chunk, as one byte stream.
///
/// Framing errors surface through [`Read`] as `io::Error`; the underlying
/// [`ReplayError`] is kept and returned by [`ImageChunkReader::decode_png`]
/// and [`ImageChunkReader::drain`].
pub struct ImageChunkReader<'a, R> {
    channel: &'a mut ChunkChannel<R>,
    remaining: usize,
    last: bool,
    error: Option<ReplayError>,
}

impl<'a, R: Read> ImageChunkReader<'a, R> {
    pub(crate) fn new(channel: &'a mut ChunkChannel<R>, header: &ChunkHeader) -> Result<Self> {
        Ok(Self {
            remaining: header.payload_len()?,
            last: header.kind() == Some(ChunkType::LastImage),
            channel,
            error: None,
        })
    }

    fn next_segment(&mut self) -> Result<()> {
        let header = ChunkHeader::read_from(&mut *self.channel)?
            .ok_or_else(|| ReplayError::truncated("image continuation", ChunkHeader::SIZE, 0))?;
        match header.kind() {
            Some(ChunkType::PartialImage) => self.last = false,
            Some(ChunkType::LastImage) => self.last = true,
            _ => return Err(ProtocolError::ImageContinuation(header.chunk_type).into()),
        }
        self.remaining = header.payload_len()?;
        Ok(())
    }

    fn fail(&mut self, e: ReplayError) -> io::Error {
        let kind = if e.is_truncation() {
            io::ErrorKind::UnexpectedEof
        } else {
            io::ErrorKind::InvalidData
        };
        let err = io::Error::new(kind, e.to_string());
        self.error = Some(e);
        err
    }

    /// Consume whatever is left of the frame.
    pub fn drain(&mut self) -> Result<u64> {
        let result = io::copy(self, &mut io::sink());
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        Ok(result?)
    }

    /// Decode the frame as PNG, handing each row to `on_row` as BGR
    /// triplets, then drain trailing bytes. Returns the image size.
    pub fn decode_png<F: FnMut(usize, &[u8])>(&mut self, mut on_row: F) -> Result<(u32, u32)> {
        let result = self.decode_rows(&mut on_row);
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let size = result?;
        self.drain()?;
        Ok(size)
    }

    fn decode_rows(&mut self, on_row: &mut dyn FnMut(usize, &[u8])) -> Result<(u32, u32)> {
        let mut decoder = png::Decoder::new(&mut *self);
        decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
        let mut reader = decoder.read_info()?;
        let (color, _) = reader.output_color_type();
        let (width, height) = (reader.info().width, reader.info().height);
        let mut bgr = vec![0u8; width as usize * 3];
        let mut y = 0;
        while let Some(row) = reader.next_row()? {
            to_bgr(color, row.data(), &mut bgr);
            on_row(y, &bgr);
            y += 1;
        }
        Ok((width, height))
    }
}

impl<R: Read> Read for ImageChunkReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.remaining == 0 {
            if self.last || buf.is_empty() {
                return Ok(0);
            }
            if let Err(e) = self.next_segment() {
                return Err(self.fail(e));
            }
        }
        let want = buf.len().min(self.remaining);
        let n = self.channel.read(&mut buf[..want])?;
        if n == 0 {
            let needed = self.remaining;
            return Err(self.fail(ReplayError::truncated("image chunk", needed, 0)));
        }
        self.remaining -= n;
        Ok(n)
    }
}

fn to_bgr(color: png::ColorType, src: &[u8], dst: &mut [u8]) {
    let step = match color {
        png::ColorType::Rgb => 3,
        png::ColorType::Rgba => 4,
        png::ColorType::GrayscaleAlpha => 2,
        png::ColorType::Grayscale | png::ColorType::Indexed => 1,
    };
    for (px, out) in src.chunks_exact(step).zip(dst.chunks_exact_mut(3)) {
        if step >= 3 {
            out.copy_from_slice(&[px[2], px[1], px[0]]);
        } else {
            out.fill(px[0]);
        }
    }
}

/// Encode top-down BGR rows as an RGB PNG.
pub fn encode_png(width: u32, height: u32, bgr: &[u8]) -> Result<Vec<u8>> {
    let rgb: Vec<u8> = bgr
        .chunks_exact(3)
        .flat_map(|px| [px[2], px[1], px[0]])
        .collect();
    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, width, height);
    encoder.set_color(png::ColorType::Rgb);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_compression(png::Compression::Fast);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&rgb)?;
    writer.finish()?;
    Ok(out)
}
