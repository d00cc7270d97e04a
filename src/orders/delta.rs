//! Delta-coded rectangle and point lists used by multi orders and polylines.

use crate::error::{ProtocolError, Result};
use crate::wire::{InStream, OutStream, Rect};

/// Maximum rectangles in a multi-rectangle order.
pub const MAX_DELTA_RECTS: usize = 45;

/// Maximum points in a polyline order.
pub const MAX_DELTA_POINTS: usize = 32;

/// Polyline point, relative to the previous point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeltaPoint {
    pub x_delta: i16,
    pub y_delta: i16,
}

/// Signed 7 or 15 bit value; the high bit of the first byte selects the long form.
fn read_delta_value(s: &mut InStream<'_>) -> Result<i16> {
    let first = s.in_u8()?;
    if first & 0x80 != 0 {
        let raw = (u16::from(first & 0x7F) << 8) | u16::from(s.in_u8()?);
        // Sign-extend from bit 14.
        Ok(((raw << 1) as i16) >> 1)
    } else {
        // Sign-extend from bit 6.
        Ok((((first << 1) as i8) >> 1) as i16)
    }
}

fn write_delta_value(out: &mut OutStream, v: i16) {
    if (-64..=63).contains(&v) {
        out.out_u8((v as u8) & 0x7F);
    } else {
        let raw = (v as u16) & 0x7FFF;
        out.out_u8(0x80 | (raw >> 8) as u8);
        out.out_u8(raw as u8);
    }
}

fn check_count(count: usize, limit: usize) -> Result<()> {
    if count > limit {
        return Err(ProtocolError::DeltaListTooLong { count, limit }.into());
    }
    Ok(())
}

/// Read `count` rectangles from a `cbData: u16` prefixed delta list.
pub fn read_delta_rects(s: &mut InStream<'_>, count: usize) -> Result<Vec<Rect>> {
    check_count(count, MAX_DELTA_RECTS)?;
    let size = usize::from(s.in_u16_le()?);
    let mut list = s.sub_stream(size)?;
    let zero_bits = list.in_bytes(count.div_ceil(2))?;

    let mut rects = Vec::with_capacity(count);
    let mut prev = Rect::default();
    for i in 0..count {
        let nibble = if i % 2 == 0 {
            zero_bits[i / 2] >> 4
        } else {
            zero_bits[i / 2] & 0x0F
        };
        let mut r = Rect::default();
        let left = if nibble & 0x8 == 0 { read_delta_value(&mut list)? } else { 0 };
        let top = if nibble & 0x4 == 0 { read_delta_value(&mut list)? } else { 0 };
        let width = if nibble & 0x2 == 0 { read_delta_value(&mut list)? } else { 0 };
        let height = if nibble & 0x1 == 0 { read_delta_value(&mut list)? } else { 0 };
        r.x = prev.x.wrapping_add(left);
        r.y = prev.y.wrapping_add(top);
        r.cx = width as u16;
        r.cy = height as u16;
        rects.push(r);
        prev = r;
    }
    Ok(rects)
}

pub fn write_delta_rects(out: &mut OutStream, rects: &[Rect]) {
    let mut zero_bits = vec![0u8; rects.len().div_ceil(2)];
    let mut values = OutStream::new();
    let mut prev = Rect::default();
    for (i, r) in rects.iter().enumerate() {
        let fields = [
            r.x.wrapping_sub(prev.x),
            r.y.wrapping_sub(prev.y),
            r.cx as i16,
            r.cy as i16,
        ];
        let mut nibble = 0u8;
        for (bit, v) in fields.into_iter().enumerate() {
            if v == 0 {
                nibble |= 0x8 >> bit;
            } else {
                write_delta_value(&mut values, v);
            }
        }
        zero_bits[i / 2] |= if i % 2 == 0 { nibble << 4 } else { nibble };
        prev = *r;
    }
    out.out_u16_le((zero_bits.len() + values.len()) as u16);
    out.out_bytes(&zero_bits);
    out.out_bytes(values.as_slice());
}

/// Read `count` points from a `cbData: u8` prefixed delta list.
pub fn read_delta_points(s: &mut InStream<'_>, count: usize) -> Result<Vec<DeltaPoint>> {
    check_count(count, MAX_DELTA_POINTS)?;
    let size = usize::from(s.in_u8()?);
    let mut list = s.sub_stream(size)?;
    let zero_bits = list.in_bytes(count.div_ceil(4))?;

    let mut points = Vec::with_capacity(count);
    for i in 0..count {
        let flags = zero_bits[i / 4] << ((i % 4) * 2);
        let x_delta = if flags & 0x80 == 0 { read_delta_value(&mut list)? } else { 0 };
        let y_delta = if flags & 0x40 == 0 { read_delta_value(&mut list)? } else { 0 };
        points.push(DeltaPoint { x_delta, y_delta });
    }
    Ok(points)
}

pub fn write_delta_points(out: &mut OutStream, points: &[DeltaPoint]) {
    let mut zero_bits = vec![0u8; points.len().div_ceil(4)];
    let mut values = OutStream::new();
    for (i, p) in points.iter().enumerate() {
        let shift = (i % 4) * 2;
        if p.x_delta == 0 {
            zero_bits[i / 4] |= 0x80 >> shift;
        } else {
            write_delta_value(&mut values, p.x_delta);
        }
        if p.y_delta == 0 {
            zero_bits[i / 4] |= 0x40 >> shift;
        } else {
            write_delta_value(&mut values, p.y_delta);
        }
    }
    out.out_u8((zero_bits.len() + values.len()) as u8);
    out.out_bytes(&zero_bits);
    out.out_bytes(values.as_slice());
}
