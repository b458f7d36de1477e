//! Binary codecs for updates, state vectors and delete sets.
//!
//! Two wire versions share the same structural layout and differ only in
//! how low level fields are written: v1 interleaves plain varints, v2
//! groups fields into columns and packs runs (see [`v2`]).

pub(crate) mod any;
pub(crate) mod tools;
pub(crate) mod v1;
pub(crate) mod v2;
pub(crate) mod varint;

use crate::error::ParseError;
use crate::id::{ClientId, Clock, Id};
use crate::store::StateVector;
use crate::{Any, SmartString};

pub(crate) use tools::{BufReader, BufWriter};

/// Field level sink shared by both wire versions. The struct/delete-set
/// layout above this trait is identical for v1 and v2.
pub(crate) trait Encoder {
    /// The raw, uncolumned byte stream (counts, skip lengths, any payloads).
    fn rest(&mut self) -> &mut BufWriter;
    fn to_vec(self) -> Vec<u8>;

    fn reset_ds_cur_val(&mut self);
    fn write_ds_clock(&mut self, clock: Clock);
    fn write_ds_len(&mut self, len: Clock);

    fn write_left_id(&mut self, id: Id);
    fn write_right_id(&mut self, id: Id);
    fn write_client(&mut self, client: ClientId);
    fn write_info(&mut self, info: u8);
    fn write_parent_info(&mut self, is_root: bool);
    fn write_type_ref(&mut self, type_ref: u8);
    fn write_len(&mut self, len: u32);
    fn write_any(&mut self, any: &Any);
    fn write_buf(&mut self, buf: &[u8]);
    fn write_str(&mut self, s: &str);
    /// Attribute / format keys; deduplicated in v2.
    fn write_key(&mut self, key: &str);
    /// Legacy JSON payloads: JSON text in v1, binary any in v2.
    fn write_json(&mut self, any: &Any);
}

/// Field level source shared by both wire versions.
pub(crate) trait Decoder {
    /// Plain varints from the uncolumned stream (counts, skip lengths).
    fn rest_usize(&mut self) -> Result<usize, ParseError>;
    fn rest_u32(&mut self) -> Result<u32, ParseError>;

    fn reset_ds_cur_val(&mut self);
    fn read_ds_clock(&mut self) -> Result<Clock, ParseError>;
    fn read_ds_len(&mut self) -> Result<Clock, ParseError>;

    fn read_left_id(&mut self) -> Result<Id, ParseError>;
    fn read_right_id(&mut self) -> Result<Id, ParseError>;
    fn read_client(&mut self) -> Result<ClientId, ParseError>;
    fn read_info(&mut self) -> Result<u8, ParseError>;
    fn read_parent_info(&mut self) -> Result<bool, ParseError>;
    fn read_type_ref(&mut self) -> Result<u8, ParseError>;
    fn read_len(&mut self) -> Result<u32, ParseError>;
    fn read_any(&mut self) -> Result<Any, ParseError>;
    fn read_buf(&mut self) -> Result<Vec<u8>, ParseError>;
    fn read_str(&mut self) -> Result<SmartString, ParseError>;
    fn read_key(&mut self) -> Result<SmartString, ParseError>;
    fn read_json(&mut self) -> Result<Any, ParseError>;
}

/// State vectors encode identically in both versions: client count, then
/// `(client, clock)` pairs in descending client order.
pub fn encode_state_vector(sv: &StateVector) -> Vec<u8> {
    let mut w = BufWriter::new();
    w.push_usize(sv.len());
    let mut clients: Vec<(ClientId, Clock)> = sv.iter().collect();
    clients.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    for (client, clock) in clients {
        w.push_u32(client);
        w.push_u32(clock);
    }
    w.into_inner()
}

pub fn decode_state_vector(data: &[u8]) -> Result<StateVector, ParseError> {
    let mut r = BufReader::new(data);
    let len = r.next_usize()?;
    let mut sv = StateVector::new();
    for _ in 0..len {
        let client = r.next_u32()?;
        let clock = r.next_u32()?;
        sv.set(client, clock);
    }
    Ok(sv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_vector_roundtrip() {
        let mut sv = StateVector::new();
        sv.set(1, 10);
        sv.set(9, 3);
        sv.set(400, 77);
        let bytes = encode_state_vector(&sv);
        assert_eq!(decode_state_vector(&bytes).unwrap(), sv);
    }

    #[test]
    fn empty_state_vector() {
        let bytes = encode_state_vector(&StateVector::new());
        assert_eq!(decode_state_vector(&bytes).unwrap(), StateVector::new());
    }
}
