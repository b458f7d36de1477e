//! The v2 wire format groups struct fields into per-field columns and packs
//! runs. Clocks go through diff-of-runs coding, repeated info bytes and
//! parent flags collapse to almost nothing, and strings are pooled into one
//! column. The struct-section layout above these columns is identical to v1.

use std::collections::HashMap;

use crate::content::utf16_len;
use crate::encoding::any::{push_any, read_any};
use crate::encoding::tools::{BufReader, BufWriter};
use crate::encoding::varint::{num_decode_zigzag_i64, num_encode_zigzag_i64};
use crate::encoding::{Decoder, Encoder};
use crate::error::ParseError;
use crate::id::{ClientId, Clock, Id};
use crate::{Any, SmartString};

/// Byte runs: `value [count-1]`, the trailing run's count omitted (the
/// decoder repeats the last value indefinitely).
#[derive(Debug, Default)]
struct RleEncoder {
    out: Vec<u8>,
    last: Option<u8>,
    count: u64,
}

impl RleEncoder {
    fn write(&mut self, val: u8) {
        if self.last == Some(val) {
            self.count += 1;
        } else {
            if self.count > 0 {
                super::varint::push_u64(&mut self.out, self.count - 1);
            }
            self.out.push(val);
            self.last = Some(val);
            self.count = 1;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

#[derive(Debug)]
struct RleDecoder<'a> {
    r: BufReader<'a>,
    last: u8,
    count: u64,
    infinite: bool,
}

impl<'a> RleDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            r: BufReader::new(data),
            last: 0,
            count: 0,
            infinite: false,
        }
    }

    fn read(&mut self) -> Result<u8, ParseError> {
        if self.count == 0 && !self.infinite {
            self.last = self.r.next_byte()?;
            if self.r.is_empty() {
                self.infinite = true;
            } else {
                self.count = self.r.next_u64()? + 1;
            }
        }
        if !self.infinite {
            self.count -= 1;
        }
        Ok(self.last)
    }
}

/// Unsigned runs: `(value << 1 | has_count) [count-2]`.
#[derive(Debug, Default)]
struct UintOptRleEncoder {
    out: Vec<u8>,
    last: u64,
    count: u64,
}

impl UintOptRleEncoder {
    fn write(&mut self, val: u64) {
        if self.count > 0 && self.last == val {
            self.count += 1;
        } else {
            self.flush();
            self.last = val;
            self.count = 1;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            let header = (self.last << 1) | (self.count > 1) as u64;
            super::varint::push_u64(&mut self.out, header);
            if self.count > 1 {
                super::varint::push_u64(&mut self.out, self.count - 2);
            }
        }
        self.count = 0;
    }

    fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.out
    }
}

#[derive(Debug)]
struct UintOptRleDecoder<'a> {
    r: BufReader<'a>,
    last: u64,
    count: u64,
}

impl<'a> UintOptRleDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            r: BufReader::new(data),
            last: 0,
            count: 0,
        }
    }

    fn read(&mut self) -> Result<u64, ParseError> {
        if self.count == 0 {
            let header = self.r.next_u64()?;
            self.last = header >> 1;
            self.count = if header & 1 == 1 {
                self.r.next_u64()? + 2
            } else {
                1
            };
        }
        self.count -= 1;
        Ok(self.last)
    }
}

/// Runs of a constant difference: `(zigzag(diff) << 1 | has_count)
/// [count-2]`, each element advancing the cursor by `diff`.
#[derive(Debug, Default)]
struct IntDiffOptRleEncoder {
    out: Vec<u8>,
    last: i64,
    diff: i64,
    count: u64,
}

impl IntDiffOptRleEncoder {
    fn write(&mut self, val: u64) {
        let val = val as i64;
        if self.count > 0 && self.diff == val - self.last {
            self.last = val;
            self.count += 1;
        } else {
            self.flush();
            self.count = 1;
            self.diff = val - self.last;
            self.last = val;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            let header = (num_encode_zigzag_i64(self.diff) << 1) | (self.count > 1) as u64;
            super::varint::push_u64(&mut self.out, header);
            if self.count > 1 {
                super::varint::push_u64(&mut self.out, self.count - 2);
            }
        }
        self.count = 0;
    }

    fn finish(mut self) -> Vec<u8> {
        self.flush();
        self.out
    }
}

#[derive(Debug)]
struct IntDiffOptRleDecoder<'a> {
    r: BufReader<'a>,
    last: i64,
    diff: i64,
    count: u64,
}

impl<'a> IntDiffOptRleDecoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            r: BufReader::new(data),
            last: 0,
            diff: 0,
            count: 0,
        }
    }

    fn read(&mut self) -> Result<u64, ParseError> {
        if self.count == 0 {
            let header = self.r.next_u64()?;
            self.diff = num_decode_zigzag_i64(header >> 1);
            self.count = if header & 1 == 1 {
                self.r.next_u64()? + 2
            } else {
                1
            };
        }
        self.count -= 1;
        self.last += self.diff;
        u64::try_from(self.last).map_err(|_| ParseError::InvalidVarInt)
    }
}

/// All strings pooled into one buffer, with a length column alongside.
#[derive(Debug, Default)]
struct StringEncoder {
    pool: String,
    lens: UintOptRleEncoder,
}

impl StringEncoder {
    fn write(&mut self, s: &str) {
        self.pool.push_str(s);
        self.lens.write(utf16_len(s) as u64);
    }

    fn finish(self) -> Vec<u8> {
        let mut w = BufWriter::new();
        w.push_str(&self.pool);
        w.push_raw(&self.lens.finish());
        w.into_inner()
    }
}

#[derive(Debug)]
struct StringDecoder<'a> {
    remaining: &'a str,
    lens: UintOptRleDecoder<'a>,
}

impl<'a> StringDecoder<'a> {
    fn new(data: &'a [u8]) -> Result<Self, ParseError> {
        let mut r = BufReader::new(data);
        let pool = r.next_str()?;
        Ok(Self {
            remaining: pool,
            lens: UintOptRleDecoder::new(r.0),
        })
    }

    fn read(&mut self) -> Result<&'a str, ParseError> {
        let units = self.lens.read()? as usize;
        let bytes = str_indices::utf16::to_byte_idx(self.remaining, units);
        let (out, rest) = self.remaining.split_at(bytes);
        self.remaining = rest;
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub(crate) struct EncoderV2 {
    key_clock: IntDiffOptRleEncoder,
    client: UintOptRleEncoder,
    left_clock: IntDiffOptRleEncoder,
    right_clock: IntDiffOptRleEncoder,
    info: RleEncoder,
    string: StringEncoder,
    parent_info: RleEncoder,
    type_ref: UintOptRleEncoder,
    len: UintOptRleEncoder,
    rest: BufWriter,

    keys: HashMap<SmartString, u64>,
    ds_cur: Clock,
}

impl EncoderV2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Encoder for EncoderV2 {
    fn rest(&mut self) -> &mut BufWriter {
        &mut self.rest
    }

    fn to_vec(self) -> Vec<u8> {
        let mut w = BufWriter::new();
        w.push_buf(&self.key_clock.finish());
        w.push_buf(&self.client.finish());
        w.push_buf(&self.left_clock.finish());
        w.push_buf(&self.right_clock.finish());
        w.push_buf(&self.info.finish());
        w.push_buf(&self.string.finish());
        w.push_buf(&self.parent_info.finish());
        w.push_buf(&self.type_ref.finish());
        w.push_buf(&self.len.finish());
        w.push_raw(&self.rest.into_inner());
        w.into_inner()
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur = 0;
    }

    fn write_ds_clock(&mut self, clock: Clock) {
        let diff = clock - self.ds_cur;
        self.ds_cur = clock;
        self.rest.push_u32(diff);
    }

    fn write_ds_len(&mut self, len: Clock) {
        debug_assert!(len > 0);
        self.rest.push_u32(len - 1);
        self.ds_cur += len;
    }

    fn write_left_id(&mut self, id: Id) {
        self.client.write(id.client as u64);
        self.left_clock.write(id.clock as u64);
    }

    fn write_right_id(&mut self, id: Id) {
        self.client.write(id.client as u64);
        self.right_clock.write(id.clock as u64);
    }

    fn write_client(&mut self, client: ClientId) {
        self.client.write(client as u64);
    }

    fn write_info(&mut self, info: u8) {
        self.info.write(info);
    }

    fn write_parent_info(&mut self, is_root: bool) {
        self.parent_info.write(is_root as u8);
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.type_ref.write(type_ref as u64);
    }

    fn write_len(&mut self, len: u32) {
        self.len.write(len as u64);
    }

    fn write_any(&mut self, any: &Any) {
        push_any(&mut self.rest, any);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.rest.push_buf(buf);
    }

    fn write_str(&mut self, s: &str) {
        self.string.write(s);
    }

    fn write_key(&mut self, key: &str) {
        if let Some(&index) = self.keys.get(key) {
            self.key_clock.write(index);
        } else {
            let index = self.keys.len() as u64;
            self.key_clock.write(index);
            self.string.write(key);
            self.keys.insert(key.into(), index);
        }
    }

    fn write_json(&mut self, any: &Any) {
        push_any(&mut self.rest, any);
    }
}

pub(crate) struct DecoderV2<'a> {
    key_clock: IntDiffOptRleDecoder<'a>,
    client: UintOptRleDecoder<'a>,
    left_clock: IntDiffOptRleDecoder<'a>,
    right_clock: IntDiffOptRleDecoder<'a>,
    info: RleDecoder<'a>,
    string: StringDecoder<'a>,
    parent_info: RleDecoder<'a>,
    type_ref: UintOptRleDecoder<'a>,
    len: UintOptRleDecoder<'a>,
    rest: BufReader<'a>,

    keys: Vec<SmartString>,
    ds_cur: Clock,
}

impl<'a> DecoderV2<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, ParseError> {
        let mut r = BufReader::new(data);
        let key_clock = r.next_buf()?;
        let client = r.next_buf()?;
        let left_clock = r.next_buf()?;
        let right_clock = r.next_buf()?;
        let info = r.next_buf()?;
        let string = r.next_buf()?;
        let parent_info = r.next_buf()?;
        let type_ref = r.next_buf()?;
        let len = r.next_buf()?;
        Ok(Self {
            key_clock: IntDiffOptRleDecoder::new(key_clock),
            client: UintOptRleDecoder::new(client),
            left_clock: IntDiffOptRleDecoder::new(left_clock),
            right_clock: IntDiffOptRleDecoder::new(right_clock),
            info: RleDecoder::new(info),
            string: StringDecoder::new(string)?,
            parent_info: RleDecoder::new(parent_info),
            type_ref: UintOptRleDecoder::new(type_ref),
            len: UintOptRleDecoder::new(len),
            rest: r,
            keys: Vec::new(),
            ds_cur: 0,
        })
    }

    fn clock_u32(val: u64) -> Result<u32, ParseError> {
        u32::try_from(val).map_err(|_| ParseError::InvalidVarInt)
    }
}

impl<'a> Decoder for DecoderV2<'a> {
    fn rest_usize(&mut self) -> Result<usize, ParseError> {
        self.rest.next_usize()
    }

    fn rest_u32(&mut self) -> Result<u32, ParseError> {
        self.rest.next_u32()
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_cur = 0;
    }

    fn read_ds_clock(&mut self) -> Result<Clock, ParseError> {
        let diff = self.rest.next_u32()?;
        self.ds_cur += diff;
        Ok(self.ds_cur)
    }

    fn read_ds_len(&mut self) -> Result<Clock, ParseError> {
        let len = self.rest.next_u32()? + 1;
        self.ds_cur += len;
        Ok(len)
    }

    fn read_left_id(&mut self) -> Result<Id, ParseError> {
        let client = Self::clock_u32(self.client.read()?)?;
        let clock = Self::clock_u32(self.left_clock.read()?)?;
        Ok(Id::new(client, clock))
    }

    fn read_right_id(&mut self) -> Result<Id, ParseError> {
        let client = Self::clock_u32(self.client.read()?)?;
        let clock = Self::clock_u32(self.right_clock.read()?)?;
        Ok(Id::new(client, clock))
    }

    fn read_client(&mut self) -> Result<ClientId, ParseError> {
        Self::clock_u32(self.client.read()?)
    }

    fn read_info(&mut self) -> Result<u8, ParseError> {
        self.info.read()
    }

    fn read_parent_info(&mut self) -> Result<bool, ParseError> {
        Ok(self.parent_info.read()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u8, ParseError> {
        let val = self.type_ref.read()?;
        u8::try_from(val).map_err(|_| ParseError::UnknownTypeRef(255))
    }

    fn read_len(&mut self) -> Result<u32, ParseError> {
        Self::clock_u32(self.len.read()?)
    }

    fn read_any(&mut self) -> Result<Any, ParseError> {
        read_any(&mut self.rest)
    }

    fn read_buf(&mut self) -> Result<Vec<u8>, ParseError> {
        Ok(self.rest.next_buf()?.to_vec())
    }

    fn read_str(&mut self) -> Result<SmartString, ParseError> {
        Ok(self.string.read()?.into())
    }

    fn read_key(&mut self) -> Result<SmartString, ParseError> {
        let index = self.key_clock.read()? as usize;
        if index == self.keys.len() {
            let key: SmartString = self.string.read()?.into();
            self.keys.push(key.clone());
            Ok(key)
        } else {
            self.keys
                .get(index)
                .cloned()
                .ok_or(ParseError::InvalidLength)
        }
    }

    fn read_json(&mut self) -> Result<Any, ParseError> {
        read_any(&mut self.rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rle_bytes() {
        let mut enc = RleEncoder::default();
        for b in [5u8, 5, 5, 5, 7, 7, 1] {
            enc.write(b);
        }
        let data = enc.finish();
        let mut dec = RleDecoder::new(&data);
        for b in [5u8, 5, 5, 5, 7, 7, 1] {
            assert_eq!(dec.read().unwrap(), b);
        }
        // Trailing value repeats forever.
        assert_eq!(dec.read().unwrap(), 1);
        assert_eq!(dec.read().unwrap(), 1);
    }

    #[test]
    fn uint_opt_rle() {
        let values = [1u64, 1, 1, 9, 0, 0, 0, 0, 12345, 6];
        let mut enc = UintOptRleEncoder::default();
        for &v in &values {
            enc.write(v);
        }
        let data = enc.finish();
        let mut dec = UintOptRleDecoder::new(&data);
        for &v in &values {
            assert_eq!(dec.read().unwrap(), v);
        }
    }

    #[test]
    fn int_diff_opt_rle() {
        let values = [10u64, 11, 12, 13, 5, 5, 5, 100, 90, 80];
        let mut enc = IntDiffOptRleEncoder::default();
        for &v in &values {
            enc.write(v);
        }
        let data = enc.finish();
        let mut dec = IntDiffOptRleDecoder::new(&data);
        for &v in &values {
            assert_eq!(dec.read().unwrap(), v);
        }
    }

    #[test]
    fn string_column() {
        let strings = ["hello", "", "wörld", "a\u{10437}b", "key"];
        let mut enc = StringEncoder::default();
        for s in strings {
            enc.write(s);
        }
        let data = enc.finish();
        let mut dec = StringDecoder::new(&data).unwrap();
        for s in strings {
            assert_eq!(dec.read().unwrap(), s);
        }
    }

    #[test]
    fn key_dedup_roundtrip() {
        let mut enc = EncoderV2::new();
        enc.write_key("bold");
        enc.write_key("italic");
        enc.write_key("bold");
        enc.write_str("payload");
        let data = enc.to_vec();

        let mut dec = DecoderV2::new(&data).unwrap();
        assert_eq!(dec.read_key().unwrap(), "bold");
        assert_eq!(dec.read_key().unwrap(), "italic");
        assert_eq!(dec.read_key().unwrap(), "bold");
        assert_eq!(dec.read_str().unwrap(), "payload");
    }

    #[test]
    fn ds_diff_coding() {
        let mut enc = EncoderV2::new();
        enc.reset_ds_cur_val();
        enc.write_ds_clock(4);
        enc.write_ds_len(10);
        enc.write_ds_clock(20);
        enc.write_ds_len(1);
        let data = enc.to_vec();

        let mut dec = DecoderV2::new(&data).unwrap();
        dec.reset_ds_cur_val();
        assert_eq!(dec.read_ds_clock().unwrap(), 4);
        assert_eq!(dec.read_ds_len().unwrap(), 10);
        assert_eq!(dec.read_ds_clock().unwrap(), 20);
        assert_eq!(dec.read_ds_len().unwrap(), 1);
    }
}
