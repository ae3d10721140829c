//! Variable-length signed integers.
//!
//! Formats, selected by the first byte:
//! - small: one byte holding -64..=127 (`b & 0xC0 != 0x80`);
//! - medium: `0b100x_xxxx` plus one byte, a 13-bit two's complement value;
//! - large: `0b101n_nnnn` followed by `n + 1` big-endian bytes (2..=8);
//! - huge: `0b1010_0000` followed by a nested packed byte count, then the bytes.
//!
//! Writers only emit the first three forms.

use anyhow::{Result, bail, ensure};

use super::xvmb::read_u8;

pub fn write_packed(out: &mut Vec<u8>, n: i64) {
    if (-64..=127).contains(&n) {
        out.push(n as u8);
        return;
    }
    let bits = 65 - n.max(!n).leading_zeros();
    if bits <= 13 {
        let v = 0x8000u16 | (n as u16 & 0x1FFF);
        out.extend_from_slice(&v.to_be_bytes());
        return;
    }
    let bytes = bits.div_ceil(8) as usize;
    out.push(0xA0 | (bytes - 1) as u8);
    out.extend_from_slice(&n.to_be_bytes()[8 - bytes..]);
}

pub fn read_packed(bytes: &[u8], cursor: &mut usize) -> Result<i64> {
    let first = read_u8(bytes, cursor)?;
    if first & 0xC0 != 0x80 {
        return Ok(first as i8 as i64);
    }
    if first & 0x20 == 0 {
        let low = read_u8(bytes, cursor)?;
        let v = (((first & 0x1F) as i64) << 8) | low as i64;
        return Ok((v << 51) >> 51);
    }
    let mut size = 1 + (first & 0x1F) as usize;
    if size == 1 {
        let nested = read_packed(bytes, cursor)?;
        ensure!((1..=8).contains(&nested), "packed integer size {nested} out of range");
        size = nested as usize;
    }
    ensure!(size <= 8, "packed integer of {size} bytes exceeds 64 bits");
    let end = cursor
        .checked_add(size)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| anyhow::anyhow!("unexpected end of input while reading packed integer"))?;
    let slice = &bytes[*cursor..end];
    let mut v = slice[0] as i8 as i64;
    for b in &slice[1..] {
        v = (v << 8) | *b as i64;
    }
    *cursor = end;
    Ok(v)
}

/// Packed count or index: non-negative and within `u32`.
pub fn read_magnitude(bytes: &[u8], cursor: &mut usize) -> Result<usize> {
    let n = read_packed(bytes, cursor)?;
    if !(0..=u32::MAX as i64).contains(&n) {
        bail!("packed magnitude {n} out of range");
    }
    Ok(n as usize)
}

/// Packed value that must fit an `i32` operand.
pub fn read_packed_i32(bytes: &[u8], cursor: &mut usize) -> Result<i32> {
    let n = read_packed(bytes, cursor)?;
    i32::try_from(n).map_err(|_| anyhow::anyhow!("packed operand {n} does not fit in 32 bits"))
}
