//! Compact tagged binary encoding for JSON-ish values. Tag numbers count
//! downward from 127 so they stay clear of the positive varint space.

use serde_json::{Map, Number};

use crate::encoding::tools::{BufReader, BufWriter};
use crate::error::ParseError;
use crate::Any;

const TAG_UNDEFINED: u8 = 127;
const TAG_NULL: u8 = 126;
const TAG_INTEGER: u8 = 125;
const TAG_FLOAT64: u8 = 123;
const TAG_FALSE: u8 = 121;
const TAG_TRUE: u8 = 120;
const TAG_STRING: u8 = 119;
const TAG_OBJECT: u8 = 118;
const TAG_ARRAY: u8 = 117;
const TAG_BINARY: u8 = 116;

pub(crate) fn push_any(w: &mut BufWriter, value: &Any) {
    match value {
        Any::Null => w.push_byte(TAG_NULL),
        Any::Bool(true) => w.push_byte(TAG_TRUE),
        Any::Bool(false) => w.push_byte(TAG_FALSE),
        Any::Number(n) => {
            if let Some(i) = n.as_i64() {
                w.push_byte(TAG_INTEGER);
                w.push_i64(i);
            } else {
                w.push_byte(TAG_FLOAT64);
                w.push_f64(n.as_f64().unwrap_or(f64::NAN));
            }
        }
        Any::String(s) => {
            w.push_byte(TAG_STRING);
            w.push_str(s);
        }
        Any::Array(values) => {
            w.push_byte(TAG_ARRAY);
            w.push_usize(values.len());
            for v in values {
                push_any(w, v);
            }
        }
        Any::Object(entries) => {
            w.push_byte(TAG_OBJECT);
            w.push_usize(entries.len());
            for (key, v) in entries {
                w.push_str(key);
                push_any(w, v);
            }
        }
    }
}

pub(crate) fn read_any(r: &mut BufReader<'_>) -> Result<Any, ParseError> {
    let tag = r.next_byte()?;
    Ok(match tag {
        TAG_UNDEFINED | TAG_NULL => Any::Null,
        TAG_TRUE => Any::Bool(true),
        TAG_FALSE => Any::Bool(false),
        TAG_INTEGER => Any::from(r.next_i64()?),
        TAG_FLOAT64 => {
            let f = r.next_f64()?;
            Number::from_f64(f).map(Any::Number).unwrap_or(Any::Null)
        }
        TAG_STRING => Any::String(r.next_str()?.to_owned()),
        TAG_ARRAY => {
            let len = r.next_usize()?;
            if len > r.len() {
                return Err(ParseError::InvalidLength);
            }
            let mut values = Vec::with_capacity(len);
            for _ in 0..len {
                values.push(read_any(r)?);
            }
            Any::Array(values)
        }
        TAG_OBJECT => {
            let len = r.next_usize()?;
            if len > r.len() {
                return Err(ParseError::InvalidLength);
            }
            let mut map = Map::new();
            for _ in 0..len {
                let key = r.next_str()?.to_owned();
                map.insert(key, read_any(r)?);
            }
            Any::Object(map)
        }
        TAG_BINARY => {
            let bytes = r.next_buf()?;
            Any::Array(bytes.iter().map(|&b| Any::from(b as i64)).collect())
        }
        other => return Err(ParseError::UnknownAnyTag(other)),
    })
}
