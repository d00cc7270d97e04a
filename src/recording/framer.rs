//! Chunk framer: headers and buffered payloads read from the active channel.

use std::io::Read;

use super::channel::ChunkChannel;
use super::format::{ChunkHeader, CompressionType, MAX_CHUNK_SIZE, read_full};
use super::image::ImageChunkReader;
use crate::error::{ReplayError, Result};
use crate::wire::InStream;

/// Splits the recording into chunks.
///
/// Non-image payloads are read whole into one reusable buffer and decoded
/// through [`ChunkFramer::stream`]; image payloads stay in the channel and
/// are pulled through [`ChunkFramer::image_reader`].
pub struct ChunkFramer<R> {
    channel: ChunkChannel<R>,
    payload: Vec<u8>,
    pos: usize,
}

impl<R: Read> ChunkFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            channel: ChunkChannel::new(reader),
            payload: Vec::with_capacity(MAX_CHUNK_SIZE as usize),
            pos: 0,
        }
    }

    /// Read the next chunk header and, unless it starts an image frame,
    /// its payload. `None` on a clean end of stream.
    pub fn next_chunk(&mut self) -> Result<Option<ChunkHeader>> {
        let Some(header) = ChunkHeader::read_from(&mut self.channel)? else {
            return Ok(None);
        };
        let len = header.payload_len()?;
        self.payload.clear();
        self.pos = 0;
        if !header.is_image() {
            self.payload.resize(len, 0);
            let got = read_full(&mut self.channel, &mut self.payload)?;
            if got < len {
                return Err(ReplayError::truncated("chunk payload", len, got));
            }
        }
        Ok(Some(header))
    }

    /// Cursor at the current position of the buffered payload.
    pub fn stream(&self) -> InStream<'_> {
        InStream::at(&self.payload, self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the payload cursor, typically to the offset a decoder stopped at.
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos.min(self.payload.len());
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.pos
    }

    /// Abandon the rest of the buffered payload.
    pub fn skip_rest(&mut self) {
        self.pos = self.payload.len();
    }

    /// Stream the image frame started by `header`.
    pub fn image_reader(&mut self, header: &ChunkHeader) -> Result<ImageChunkReader<'_, R>> {
        ImageChunkReader::new(&mut self.channel, header)
    }

    pub fn compression(&self) -> CompressionType {
        self.channel.compression()
    }

    pub fn set_compression(&mut self, mode: CompressionType) {
        if mode != self.channel.compression() {
            log::debug!("chunk channel {:?} -> {:?}", self.channel.compression(), mode);
            self.channel.set_compression(mode);
        }
    }

    pub fn get_ref(&self) -> &R {
        self.channel.get_ref()
    }
}
