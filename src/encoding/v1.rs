//! The v1 wire format: every field is written inline as plain varints and
//! length-prefixed strings, in struct order.

use crate::encoding::any::{push_any, read_any};
use crate::encoding::tools::{BufReader, BufWriter};
use crate::encoding::{Decoder, Encoder};
use crate::error::ParseError;
use crate::id::{ClientId, Clock, Id};
use crate::{Any, SmartString};

#[derive(Debug, Default)]
pub(crate) struct EncoderV1 {
    rest: BufWriter,
}

impl EncoderV1 {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_id(&mut self, id: Id) {
        self.rest.push_u32(id.client);
        self.rest.push_u32(id.clock);
    }
}

impl Encoder for EncoderV1 {
    fn rest(&mut self) -> &mut BufWriter {
        &mut self.rest
    }

    fn to_vec(self) -> Vec<u8> {
        self.rest.into_inner()
    }

    fn reset_ds_cur_val(&mut self) {}

    fn write_ds_clock(&mut self, clock: Clock) {
        self.rest.push_u32(clock);
    }

    fn write_ds_len(&mut self, len: Clock) {
        self.rest.push_u32(len);
    }

    fn write_left_id(&mut self, id: Id) {
        self.write_id(id);
    }

    fn write_right_id(&mut self, id: Id) {
        self.write_id(id);
    }

    fn write_client(&mut self, client: ClientId) {
        self.rest.push_u32(client);
    }

    fn write_info(&mut self, info: u8) {
        self.rest.push_byte(info);
    }

    fn write_parent_info(&mut self, is_root: bool) {
        self.rest.push_u32(is_root as u32);
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.rest.push_u32(type_ref as u32);
    }

    fn write_len(&mut self, len: u32) {
        self.rest.push_u32(len);
    }

    fn write_any(&mut self, any: &Any) {
        push_any(&mut self.rest, any);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.rest.push_buf(buf);
    }

    fn write_str(&mut self, s: &str) {
        self.rest.push_str(s);
    }

    fn write_key(&mut self, key: &str) {
        self.rest.push_str(key);
    }

    fn write_json(&mut self, any: &Any) {
        // Legacy payloads are JSON text in this version.
        let text = serde_json::to_string(any).unwrap_or_else(|_| "null".to_string());
        self.rest.push_str(&text);
    }
}

#[derive(Debug)]
pub(crate) struct DecoderV1<'a> {
    rest: BufReader<'a>,
}

impl<'a> DecoderV1<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            rest: BufReader::new(data),
        }
    }

    fn read_id(&mut self) -> Result<Id, ParseError> {
        let client = self.rest.next_u32()?;
        let clock = self.rest.next_u32()?;
        Ok(Id::new(client, clock))
    }
}

impl<'a> Decoder for DecoderV1<'a> {
    fn rest_usize(&mut self) -> Result<usize, ParseError> {
        self.rest.next_usize()
    }

    fn rest_u32(&mut self) -> Result<u32, ParseError> {
        self.rest.next_u32()
    }

    fn reset_ds_cur_val(&mut self) {}

    fn read_ds_clock(&mut self) -> Result<Clock, ParseError> {
        self.rest.next_u32()
    }

    fn read_ds_len(&mut self) -> Result<Clock, ParseError> {
        self.rest.next_u32()
    }

    fn read_left_id(&mut self) -> Result<Id, ParseError> {
        self.read_id()
    }

    fn read_right_id(&mut self) -> Result<Id, ParseError> {
        self.read_id()
    }

    fn read_client(&mut self) -> Result<ClientId, ParseError> {
        self.rest.next_u32()
    }

    fn read_info(&mut self) -> Result<u8, ParseError> {
        self.rest.next_byte()
    }

    fn read_parent_info(&mut self) -> Result<bool, ParseError> {
        Ok(self.rest.next_u32()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u8, ParseError> {
        let val = self.rest.next_u32()?;
        u8::try_from(val).map_err(|_| ParseError::UnknownTypeRef(255))
    }

    fn read_len(&mut self) -> Result<u32, ParseError> {
        self.rest.next_u32()
    }

    fn read_any(&mut self) -> Result<Any, ParseError> {
        read_any(&mut self.rest)
    }

    fn read_buf(&mut self) -> Result<Vec<u8>, ParseError> {
        Ok(self.rest.next_buf()?.to_vec())
    }

    fn read_str(&mut self) -> Result<SmartString, ParseError> {
        Ok(self.rest.next_str()?.into())
    }

    fn read_key(&mut self) -> Result<SmartString, ParseError> {
        Ok(self.rest.next_str()?.into())
    }

    fn read_json(&mut self) -> Result<Any, ParseError> {
        let text = self.rest.next_str()?;
        if text == "undefined" {
            return Ok(Any::Null);
        }
        serde_json::from_str(text).map_err(|_| ParseError::InvalidJson)
    }
}
