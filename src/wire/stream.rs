//! Bounded little-endian cursors over chunk payloads.

use crate::error::{ReplayError, Result};

/// Read cursor over a borrowed payload.
///
/// Every read is bounds checked and reports [`ReplayError::Truncated`]
/// instead of panicking, so a short chunk can never mis-align decoding.
#[derive(Debug, Clone)]
pub struct InStream<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> InStream<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Cursor positioned at `pos` (clamped to the end).
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self {
            buf,
            pos: pos.min(buf.len()),
        }
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ReplayError::truncated("payload", n, self.remaining()));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn in_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn in_i8(&mut self) -> Result<i8> {
        Ok(self.in_u8()? as i8)
    }

    pub fn in_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn in_i16_le(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take_array()?))
    }

    /// Three byte little-endian value (24-bit colors and pixels).
    pub fn in_u24_le(&mut self) -> Result<u32> {
        let [a, b, c] = self.take_array()?;
        Ok(u32::from(a) | u32::from(b) << 8 | u32::from(c) << 16)
    }

    pub fn in_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn in_u64_le(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn in_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn in_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.take_array()
    }

    pub fn in_skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Rest of the payload, leaving the cursor at the end.
    pub fn in_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }

    /// Sub-cursor over the next `n` bytes; the parent skips past them.
    pub fn sub_stream(&mut self, n: usize) -> Result<InStream<'a>> {
        Ok(InStream::new(self.take(n)?))
    }
}

/// Growable little-endian write buffer.
#[derive(Debug, Clone, Default)]
pub struct OutStream {
    buf: Vec<u8>,
}

impl OutStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn out_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn out_i8(&mut self, v: i8) {
        self.buf.push(v as u8);
    }

    pub fn out_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn out_i16_le(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn out_u24_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes()[..3]);
    }

    pub fn out_u32_le(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn out_u64_le(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn out_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Overwrite a previously reserved u16 (length back-patching).
    pub fn set_u16_le(&mut self, pos: usize, v: u16) {
        self.buf[pos..pos + 2].copy_from_slice(&v.to_le_bytes());
    }

    pub fn set_u32_le(&mut self, pos: usize, v: u32) {
        self.buf[pos..pos + 4].copy_from_slice(&v.to_le_bytes());
    }
}
