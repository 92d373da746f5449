//! Sample codec for leaf nodes.
//!
//! Timestamps use delta-of-delta encoding, values use XOR encoding, both
//! bit-packed MSB-first:
//!
//! - Timestamp: first raw 64 bits; then `'0'` for a zero delta-of-delta,
//!   `'10'`+7 / `'110'`+9 / `'1110'`+12 bits for small ones, `'1111'`+64 bits
//!   otherwise. The wide escape keeps arbitrary (including out-of-order)
//!   timestamps lossless.
//! - Value: first raw 64 bits; then `'0'` for an identical value, `'10'` plus
//!   the previous meaningful window, or `'11'` + 5 bits leading + 6 bits
//!   length + meaningful bits for a new window. Leading zeros are capped at
//!   31 and the extra zeros fold into the meaningful bits.
//!
//! Worst case per sample is [`MAX_SAMPLE_BITS`]; leaf capacity is derived
//! from it so an encoded leaf always fits one block.

use crate::error::{Result, StoreError};
use crate::model::Timestamp;
use bitvec::prelude::*;

/// Upper bound on encoded bits per sample: 68 for the timestamp
/// (`'1111'` + 64) plus 77 for the value (`'11'` + 5 + 6 + 64).
pub(crate) const MAX_SAMPLE_BITS: usize = 68 + 77;

type BitBuf = BitVec<u8, Msb0>;

fn push_bits(out: &mut BitBuf, value: u64, n: u32) {
    for i in (0..n).rev() {
        out.push((value >> i) & 1 == 1);
    }
}

struct BitReader<'a> {
    bits: &'a BitSlice<u8, Msb0>,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bits: &'a BitSlice<u8, Msb0>) -> Self {
        Self { bits, pos: 0 }
    }

    fn take_bit(&mut self) -> Result<bool> {
        let bit = self
            .bits
            .get(self.pos)
            .map(|b| *b)
            .ok_or_else(|| StoreError::Decode("truncated bit stream".into()))?;
        self.pos += 1;
        Ok(bit)
    }

    fn take(&mut self, n: u32) -> Result<u64> {
        let mut value = 0u64;
        for _ in 0..n {
            value = (value << 1) | u64::from(self.take_bit()?);
        }
        Ok(value)
    }
}

#[derive(Default)]
struct TimestampEncoder {
    started: bool,
    prev: u64,
    prev_delta: i64,
}

impl TimestampEncoder {
    fn encode(&mut self, ts: Timestamp, out: &mut BitBuf) {
        if !self.started {
            self.started = true;
            self.prev = ts;
            self.prev_delta = 0;
            push_bits(out, ts, 64);
            return;
        }

        let delta = ts.wrapping_sub(self.prev) as i64;
        let dod = delta.wrapping_sub(self.prev_delta);

        if dod == 0 {
            out.push(false);
        } else if (-63..=64).contains(&dod) {
            push_bits(out, 0b10, 2);
            push_bits(out, (dod + 63) as u64, 7);
        } else if (-255..=256).contains(&dod) {
            push_bits(out, 0b110, 3);
            push_bits(out, (dod + 255) as u64, 9);
        } else if (-2047..=2048).contains(&dod) {
            push_bits(out, 0b1110, 4);
            push_bits(out, (dod + 2047) as u64, 12);
        } else {
            push_bits(out, 0b1111, 4);
            push_bits(out, dod as u64, 64);
        }

        self.prev_delta = delta;
        self.prev = ts;
    }
}

#[derive(Default)]
struct TimestampDecoder {
    started: bool,
    prev: u64,
    prev_delta: i64,
}

impl TimestampDecoder {
    fn decode(&mut self, r: &mut BitReader<'_>) -> Result<Timestamp> {
        if !self.started {
            self.started = true;
            self.prev = r.take(64)?;
            self.prev_delta = 0;
            return Ok(self.prev);
        }

        let dod = if !r.take_bit()? {
            0
        } else if !r.take_bit()? {
            r.take(7)? as i64 - 63
        } else if !r.take_bit()? {
            r.take(9)? as i64 - 255
        } else if !r.take_bit()? {
            r.take(12)? as i64 - 2047
        } else {
            r.take(64)? as i64
        };

        let delta = self.prev_delta.wrapping_add(dod);
        self.prev = self.prev.wrapping_add(delta as u64);
        self.prev_delta = delta;
        Ok(self.prev)
    }
}

#[derive(Default)]
struct ValueEncoder {
    started: bool,
    prev: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl ValueEncoder {
    fn encode(&mut self, value: f64, out: &mut BitBuf) {
        let bits = value.to_bits();
        if !self.started {
            self.started = true;
            self.prev = bits;
            push_bits(out, bits, 64);
            return;
        }

        let xor = bits ^ self.prev;
        self.prev = bits;

        if xor == 0 {
            out.push(false);
            return;
        }

        let leading = xor.leading_zeros().min(31);
        let trailing = xor.trailing_zeros();

        if leading >= self.prev_leading && trailing >= self.prev_trailing {
            let meaningful = 64 - self.prev_leading - self.prev_trailing;
            push_bits(out, 0b10, 2);
            push_bits(out, xor >> self.prev_trailing, meaningful);
        } else {
            let meaningful = 64 - leading - trailing;
            push_bits(out, 0b11, 2);
            push_bits(out, u64::from(leading), 5);
            push_bits(out, u64::from(meaningful - 1), 6);
            push_bits(out, xor >> trailing, meaningful);
            self.prev_leading = leading;
            self.prev_trailing = trailing;
        }
    }
}

#[derive(Default)]
struct ValueDecoder {
    started: bool,
    prev: u64,
    prev_leading: u32,
    prev_trailing: u32,
}

impl ValueDecoder {
    fn decode(&mut self, r: &mut BitReader<'_>) -> Result<f64> {
        if !self.started {
            self.started = true;
            self.prev = r.take(64)?;
            return Ok(f64::from_bits(self.prev));
        }

        let xor = if !r.take_bit()? {
            0
        } else if !r.take_bit()? {
            let meaningful = 64 - self.prev_leading - self.prev_trailing;
            r.take(meaningful)? << self.prev_trailing
        } else {
            let leading = r.take(5)? as u32;
            let meaningful = r.take(6)? as u32 + 1;
            if leading + meaningful > 64 {
                return Err(StoreError::Decode("invalid value window".into()));
            }
            let trailing = 64 - leading - meaningful;
            self.prev_leading = leading;
            self.prev_trailing = trailing;
            r.take(meaningful)? << trailing
        };

        self.prev ^= xor;
        Ok(f64::from_bits(self.prev))
    }
}

/// Encodes samples into separate timestamp and value byte streams.
pub(crate) fn encode_samples(samples: &[(Timestamp, f64)]) -> (Vec<u8>, Vec<u8>) {
    let mut ts_bits = BitBuf::new();
    let mut val_bits = BitBuf::new();
    let mut ts_enc = TimestampEncoder::default();
    let mut val_enc = ValueEncoder::default();
    for &(ts, value) in samples {
        ts_enc.encode(ts, &mut ts_bits);
        val_enc.encode(value, &mut val_bits);
    }
    (
        ts_bits.as_raw_slice().to_vec(),
        val_bits.as_raw_slice().to_vec(),
    )
}

/// Decodes `count` samples from timestamp and value byte streams.
pub(crate) fn decode_samples(
    ts_bytes: &[u8],
    val_bytes: &[u8],
    count: usize,
) -> Result<Vec<(Timestamp, f64)>> {
    let ts_bits = BitSlice::<u8, Msb0>::try_from_slice(ts_bytes)
        .map_err(|_| StoreError::Decode("timestamp stream too long".into()))?;
    let val_bits = BitSlice::<u8, Msb0>::try_from_slice(val_bytes)
        .map_err(|_| StoreError::Decode("value stream too long".into()))?;
    let mut ts_reader = BitReader::new(ts_bits);
    let mut val_reader = BitReader::new(val_bits);
    let mut ts_dec = TimestampDecoder::default();
    let mut val_dec = ValueDecoder::default();

    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        let ts = ts_dec.decode(&mut ts_reader)?;
        let value = val_dec.decode(&mut val_reader)?;
        samples.push((ts, value));
    }
    Ok(samples)
}
