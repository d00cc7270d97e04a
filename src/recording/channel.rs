//! Plain and compressed byte channels carrying the chunk stream.
//!
//! A compressed channel is a sequence of independently compressed blocks,
//! each prefixed by its compressed length (`u32` little-endian). Writers
//! close a block at every chunk boundary so a RESET can hand the stream
//! back to the plain channel without over-reading.

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::format::{ChunkHeader, CompressionType, MAX_CHUNK_SIZE, read_full};

/// Largest decompressed block: one chunk, header included.
pub const MAX_BLOCK_SIZE: usize = MAX_CHUNK_SIZE as usize + ChunkHeader::SIZE;

/// Largest compressed block accepted; covers expansion of incompressible data.
pub const MAX_COMPRESSED_BLOCK_SIZE: usize = 2 * MAX_BLOCK_SIZE;

fn oversized(what: &str, len: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{} of {} bytes exceeds {}", what, len, max),
    )
}

/// Compress one block with gzip.
pub fn compress_gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress one gzip block of at most `limit` bytes.
pub fn decompress_gzip(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(limit as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(oversized("gzip block", out.len(), limit));
    }
    Ok(out)
}

/// Compress data using LZ4.
#[cfg(feature = "lz4")]
pub fn compress_lz4(data: &[u8]) -> io::Result<Vec<u8>> {
    Ok(lz4_flex::compress_prepend_size(data))
}

/// Decompress LZ4 data of at most `limit` bytes.
#[cfg(feature = "lz4")]
pub fn decompress_lz4(data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
    if let Some(prefix) = data.first_chunk::<4>() {
        let declared = u32::from_le_bytes(*prefix) as usize;
        if declared > limit {
            return Err(oversized("lz4 block", declared, limit));
        }
    }
    lz4_flex::decompress_size_prepended(data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(not(feature = "lz4"))]
pub fn compress_lz4(_data: &[u8]) -> io::Result<Vec<u8>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "built without the lz4 feature",
    ))
}

#[cfg(not(feature = "lz4"))]
pub fn decompress_lz4(_data: &[u8], _limit: usize) -> io::Result<Vec<u8>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "built without the lz4 feature",
    ))
}

fn compress(mode: CompressionType, data: &[u8]) -> io::Result<Vec<u8>> {
    match mode {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => compress_gzip(data),
        CompressionType::Lz4 => compress_lz4(data),
    }
}

fn decompress(mode: CompressionType, data: &[u8]) -> io::Result<Vec<u8>> {
    match mode {
        CompressionType::None => Ok(data.to_vec()),
        CompressionType::Gzip => decompress_gzip(data, MAX_BLOCK_SIZE),
        CompressionType::Lz4 => decompress_lz4(data, MAX_BLOCK_SIZE),
    }
}

/// Read side: the source stream plus the currently selected decompressor.
pub struct ChunkChannel<R> {
    inner: R,
    mode: CompressionType,
    block: Vec<u8>,
    pos: usize,
}

impl<R: Read> ChunkChannel<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            mode: CompressionType::None,
            block: Vec::new(),
            pos: 0,
        }
    }

    pub fn compression(&self) -> CompressionType {
        self.mode
    }

    /// Route subsequent reads through `mode`. Undelivered bytes of the
    /// current block are dropped.
    pub fn set_compression(&mut self, mode: CompressionType) {
        let residual = self.block.len() - self.pos;
        if residual > 0 {
            log::warn!(
                "dropping {} undelivered bytes switching {:?} -> {:?}",
                residual,
                self.mode,
                mode
            );
        }
        self.block.clear();
        self.pos = 0;
        self.mode = mode;
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Load the next non-empty block; `false` on a clean end of stream.
    fn fill_block(&mut self) -> io::Result<bool> {
        loop {
            let mut len = [0u8; 4];
            match read_full(&mut self.inner, &mut len)? {
                0 => return Ok(false),
                4 => {}
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated compressed block length",
                    ));
                }
            }
            let len = u32::from_le_bytes(len) as usize;
            if len > MAX_COMPRESSED_BLOCK_SIZE {
                return Err(oversized("compressed block", len, MAX_COMPRESSED_BLOCK_SIZE));
            }
            let mut compressed = vec![0u8; len];
            self.inner.read_exact(&mut compressed)?;
            self.block = decompress(self.mode, &compressed)?;
            self.pos = 0;
            if !self.block.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl<R: Read> Read for ChunkChannel<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.mode == CompressionType::None {
            return self.inner.read(buf);
        }
        if self.pos == self.block.len() && !self.fill_block()? {
            return Ok(0);
        }
        let n = buf.len().min(self.block.len() - self.pos);
        buf[..n].copy_from_slice(&self.block[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Write side: each call to [`BlockWriter::write_chunk`] emits one chunk,
/// compressed as a single block when a compressor is selected.
pub struct BlockWriter<W> {
    inner: W,
    mode: CompressionType,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            mode: CompressionType::None,
        }
    }

    pub fn compression(&self) -> CompressionType {
        self.mode
    }

    pub fn set_compression(&mut self, mode: CompressionType) {
        self.mode = mode;
    }

    pub fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.mode == CompressionType::None {
            return self.inner.write_all(chunk);
        }
        let block = compress(self.mode, chunk)?;
        self.inner.write_all(&(block.len() as u32).to_le_bytes())?;
        self.inner.write_all(&block)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn written(mode: CompressionType, chunks: &[&[u8]]) -> Vec<u8> {
        let mut w = BlockWriter::new(Vec::new());
        w.set_compression(mode);
        for c in chunks {
            w.write_chunk(c).unwrap();
        }
        w.into_inner()
    }

    #[test]
    fn test_gzip_blocks_read_back() {
        let bytes = written(CompressionType::Gzip, &[&b"hello "[..], &b""[..], &b"world"[..]]);
        let mut channel = ChunkChannel::new(Cursor::new(bytes));
        channel.set_compression(CompressionType::Gzip);
        let mut out = String::new();
        channel.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_lz4_blocks_read_back() {
        let payload = vec![7u8; 10_000];
        let bytes = written(CompressionType::Lz4, &[payload.as_slice()]);
        assert!(bytes.len() < payload.len());
        let mut channel = ChunkChannel::new(Cursor::new(bytes));
        channel.set_compression(CompressionType::Lz4);
        let mut out = Vec::new();
        channel.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_switch_back_to_plain_is_exact() {
        let mut bytes = written(CompressionType::Gzip, &[&b"packed"[..]]);
        bytes.extend_from_slice(b"plain");
        let mut channel = ChunkChannel::new(Cursor::new(bytes));
        channel.set_compression(CompressionType::Gzip);
        let mut packed = [0u8; 6];
        channel.read_exact(&mut packed).unwrap();
        assert_eq!(&packed, b"packed");

        channel.set_compression(CompressionType::None);
        let mut rest = Vec::new();
        channel.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"plain");
    }

    fn framed(block: &[u8]) -> Vec<u8> {
        let mut bytes = (block.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(block);
        bytes
    }

    #[test]
    fn test_oversized_declared_length_rejected() {
        let bytes = ((MAX_COMPRESSED_BLOCK_SIZE + 1) as u32).to_le_bytes().to_vec();
        let mut channel = ChunkChannel::new(Cursor::new(bytes));
        channel.set_compression(CompressionType::Gzip);
        let err = channel.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_oversized_gzip_block_rejected() {
        let block = compress_gzip(&vec![0u8; 4 * MAX_BLOCK_SIZE]).unwrap();
        assert!(block.len() <= MAX_COMPRESSED_BLOCK_SIZE);
        let mut channel = ChunkChannel::new(Cursor::new(framed(&block)));
        channel.set_compression(CompressionType::Gzip);
        let err = channel.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(channel.block.is_empty());
    }

    #[test]
    fn test_full_size_chunk_fits_one_block() {
        let payload = vec![0x5Au8; MAX_BLOCK_SIZE];
        let bytes = written(CompressionType::Gzip, &[payload.as_slice()]);
        let mut channel = ChunkChannel::new(Cursor::new(bytes));
        channel.set_compression(CompressionType::Gzip);
        let mut out = Vec::new();
        channel.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_oversized_lz4_block_rejected() {
        let block = compress_lz4(&vec![0u8; MAX_BLOCK_SIZE + 1]).unwrap();
        let mut channel = ChunkChannel::new(Cursor::new(framed(&block)));
        channel.set_compression(CompressionType::Lz4);
        let err = channel.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_block_is_unexpected_eof() {
        let mut bytes = written(CompressionType::Gzip, &[&b"abcdef"[..]]);
        bytes.truncate(bytes.len() - 3);
        let mut channel = ChunkChannel::new(Cursor::new(bytes));
        channel.set_compression(CompressionType::Gzip);
        let err = channel.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
