use std::collections::HashMap;

use crate::content::{Content, ContentRef, TypeDef, TypeKind};
use crate::deleteset::DeleteSet;
use crate::encoding::v1::{DecoderV1, EncoderV1};
use crate::encoding::v2::{DecoderV2, EncoderV2};
use crate::encoding::{Decoder, Encoder};
use crate::error::{Error, ParseError};
use crate::id::{ClientId, Clock, Id};
use crate::item::{Item, Parent, Struct};
use crate::store::{StateVector, StructStore};

const INFO_ORIGIN: u8 = 0b1000_0000;
const INFO_RIGHT_ORIGIN: u8 = 0b0100_0000;
const INFO_PARENT_SUB: u8 = 0b0010_0000;
const INFO_CONTENT: u8 = 0b0001_1111;

/// A decoded update: per-client struct runs (possibly with `Skip` gaps) plus
/// a delete set. Structs are sorted by clock and unintegrated (no resolved
/// neighbors).
#[derive(Debug, Default)]
pub struct Update {
    pub(crate) structs: HashMap<ClientId, Vec<Struct>>,
    pub(crate) ds: DeleteSet,
}

/// Structs that could not be integrated because their causal dependencies
/// have not arrived, plus the state vector entries they are waiting for.
#[derive(Debug)]
pub(crate) struct PendingUpdate {
    pub update: Update,
    pub missing: StateVector,
}

impl Update {
    pub fn is_empty(&self) -> bool {
        self.structs.is_empty() && self.ds.is_empty()
    }

    pub fn decode_v1(data: &[u8]) -> Result<Update, ParseError> {
        Self::decode(&mut DecoderV1::new(data))
    }

    pub fn decode_v2(data: &[u8]) -> Result<Update, ParseError> {
        Self::decode(&mut DecoderV2::new(data)?)
    }

    pub fn encode_v1(&self) -> Vec<u8> {
        let mut enc = EncoderV1::new();
        self.encode(&mut enc);
        enc.to_vec()
    }

    pub fn encode_v2(&self) -> Vec<u8> {
        let mut enc = EncoderV2::new();
        self.encode(&mut enc);
        enc.to_vec()
    }

    pub(crate) fn decode<D: Decoder>(dec: &mut D) -> Result<Update, ParseError> {
        let mut structs: HashMap<ClientId, Vec<Struct>> = HashMap::new();
        let num_clients = dec.rest_usize()?;
        for _ in 0..num_clients {
            let num_structs = dec.rest_usize()?;
            let client = dec.read_client()?;
            let mut clock = dec.rest_u32()?;
            let run = structs.entry(client).or_default();
            // The count is attacker controlled; cap the preallocation.
            run.reserve(num_structs.min(1024));
            for _ in 0..num_structs {
                let s = read_struct(dec, Id::new(client, clock))?;
                clock += s.len();
                run.push(s);
            }
        }
        let ds = read_delete_set(dec)?;
        Ok(Update { structs, ds })
    }

    pub(crate) fn encode<E: Encoder>(&self, enc: &mut E) {
        let mut clients: Vec<ClientId> = self.structs.keys().copied().collect();
        clients.sort_unstable_by(|a, b| b.cmp(a));
        enc.rest().push_usize(clients.len());
        for client in clients {
            let run = &self.structs[&client];
            enc.rest().push_usize(run.len());
            enc.write_client(client);
            enc.rest().push_u32(run.first().map(|s| s.id().clock).unwrap_or(0));
            for s in run {
                write_struct(enc, s, 0);
            }
        }
        write_delete_set(enc, &self.ds);
    }

    /// Merge several updates into one. Order-insensitive for disjoint
    /// updates; overlapping runs (identical by construction) are deduplicated
    /// and gaps between runs are recorded as `Skip` ranges.
    pub fn merge(updates: Vec<Update>) -> Update {
        let mut ds = DeleteSet::new();
        let mut candidates: HashMap<ClientId, Vec<Struct>> = HashMap::new();
        for update in updates {
            for (client, run) in update.structs {
                candidates.entry(client).or_default().extend(run);
            }
            ds.merge(update.ds);
        }

        let mut structs = HashMap::new();
        for (client, mut run) in candidates {
            // Real structs win over skips covering the same clocks.
            run.sort_by_key(|s| (s.id().clock, s.is_skip()));
            let mut out: Vec<Struct> = Vec::with_capacity(run.len());
            let mut covered: Option<Clock> = None;
            for mut s in run {
                let start = s.id().clock;
                let end = s.end_clock();
                match covered {
                    Some(c) if end <= c => continue,
                    Some(c) => {
                        if start > c {
                            out.push(Struct::Skip {
                                id: Id::new(client, c),
                                len: start - c,
                            });
                        } else if start < c {
                            s = s.split(c - start);
                        }
                        push_merged(&mut out, s);
                        covered = Some(end);
                    }
                    None => {
                        out.push(s);
                        covered = Some(end);
                    }
                }
            }
            // A trailing skip carries no information.
            if matches!(out.last(), Some(s) if s.is_skip()) {
                out.pop();
            }
            if !out.is_empty() {
                structs.insert(client, out);
            }
        }
        Update { structs, ds }
    }

    /// The subset of this update with clocks not covered by `sv`.
    pub fn diff(mut self, sv: &StateVector) -> Update {
        let mut structs = HashMap::new();
        for (client, run) in self.structs.drain() {
            let target = sv.get(client);
            let mut out = Vec::new();
            for mut s in run {
                if s.end_clock() <= target {
                    continue;
                }
                if s.id().clock < target {
                    s = s.split(target - s.id().clock);
                }
                out.push(s);
            }
            if !out.is_empty() {
                structs.insert(client, out);
            }
        }
        Update {
            structs,
            ds: self.ds,
        }
    }
}

fn push_merged(out: &mut Vec<Struct>, s: Struct) {
    // Adjacent skips coalesce.
    if let (Some(Struct::Skip { len, .. }), Struct::Skip { len: add, .. }) = (out.last_mut(), &s) {
        *len += add;
        return;
    }
    out.push(s);
}

/// Merge binary v1 updates without a document.
pub fn merge_updates(updates: &[&[u8]]) -> Result<Vec<u8>, ParseError> {
    let decoded = updates
        .iter()
        .map(|u| Update::decode_v1(u))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Update::merge(decoded).encode_v1())
}

/// Merge binary v2 updates without a document.
pub fn merge_updates_v2(updates: &[&[u8]]) -> Result<Vec<u8>, ParseError> {
    let decoded = updates
        .iter()
        .map(|u| Update::decode_v2(u))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Update::merge(decoded).encode_v2())
}

/// Strip the parts of a binary v1 update already covered by an encoded
/// state vector.
pub fn diff_update(update: &[u8], state_vector: &[u8]) -> Result<Vec<u8>, ParseError> {
    let sv = crate::encoding::decode_state_vector(state_vector)?;
    Ok(Update::decode_v1(update)?.diff(&sv).encode_v1())
}

/// V2 counterpart of [`diff_update`].
pub fn diff_update_v2(update: &[u8], state_vector: &[u8]) -> Result<Vec<u8>, ParseError> {
    let sv = crate::encoding::decode_state_vector(state_vector)?;
    Ok(Update::decode_v2(update)?.diff(&sv).encode_v2())
}

fn read_struct<D: Decoder>(dec: &mut D, id: Id) -> Result<Struct, ParseError> {
    let info = dec.read_info()?;
    let content_ref = info & INFO_CONTENT;
    match content_ref {
        0 => {
            let len = dec.read_len()?;
            if len == 0 {
                return Err(ParseError::InvalidLength);
            }
            Ok(Struct::Gc { id, len })
        }
        10 => {
            let len = dec.rest_u32()?;
            if len == 0 {
                return Err(ParseError::InvalidLength);
            }
            Ok(Struct::Skip { id, len })
        }
        _ => {
            let origin = if info & INFO_ORIGIN != 0 {
                Some(dec.read_left_id()?)
            } else {
                None
            };
            let right_origin = if info & INFO_RIGHT_ORIGIN != 0 {
                Some(dec.read_right_id()?)
            } else {
                None
            };
            // With either origin present, parent and key are inherited from
            // the resolved neighbor instead of travelling on the wire.
            let cant_copy_parent = info & (INFO_ORIGIN | INFO_RIGHT_ORIGIN) == 0;
            let parent = if cant_copy_parent {
                if dec.read_parent_info()? {
                    Parent::Root(dec.read_str()?)
                } else {
                    Parent::Id(dec.read_left_id()?)
                }
            } else {
                Parent::Unset
            };
            let parent_sub = if cant_copy_parent && info & INFO_PARENT_SUB != 0 {
                Some(dec.read_str()?)
            } else {
                None
            };
            let content = read_content(dec, content_ref)?;
            if content.len() == 0 {
                return Err(ParseError::InvalidLength);
            }
            Ok(Struct::Item(Item::new(
                id,
                origin,
                right_origin,
                parent,
                parent_sub,
                content,
            )))
        }
    }
}

pub(crate) fn write_struct<E: Encoder>(enc: &mut E, s: &Struct, offset: Clock) {
    match s {
        Struct::Gc { len, .. } => {
            enc.write_info(ContentRef::Gc.into());
            enc.write_len(len - offset);
        }
        Struct::Skip { len, .. } => {
            enc.write_info(ContentRef::Skip.into());
            enc.rest().push_u32(len - offset);
        }
        Struct::Item(item) => write_item(enc, item, offset),
    }
}

fn write_item<E: Encoder>(enc: &mut E, item: &Item, offset: Clock) {
    let origin = if offset > 0 {
        Some(Id::new(item.id.client, item.id.clock + offset - 1))
    } else {
        item.origin
    };
    let mut info = u8::from(item.content.content_ref());
    if origin.is_some() {
        info |= INFO_ORIGIN;
    }
    if item.right_origin.is_some() {
        info |= INFO_RIGHT_ORIGIN;
    }
    if item.parent_sub.is_some() {
        info |= INFO_PARENT_SUB;
    }
    enc.write_info(info);
    if let Some(origin) = origin {
        enc.write_left_id(origin);
    }
    if let Some(right_origin) = item.right_origin {
        enc.write_right_id(right_origin);
    }
    if origin.is_none() && item.right_origin.is_none() {
        match &item.parent {
            Parent::Branch(crate::BranchId::Root(name)) | Parent::Root(name) => {
                enc.write_parent_info(true);
                enc.write_str(name);
            }
            Parent::Branch(crate::BranchId::Nested(id)) | Parent::Id(id) => {
                enc.write_parent_info(false);
                enc.write_left_id(*id);
            }
            Parent::Unset | Parent::Gone => {
                unreachable!("item without origins must carry a parent")
            }
        }
        if let Some(sub) = &item.parent_sub {
            enc.write_str(sub);
        }
    }
    write_content(enc, &item.content, offset);
}

fn write_content<E: Encoder>(enc: &mut E, content: &Content, offset: Clock) {
    match content {
        Content::Deleted(len) => {
            enc.write_len(len - offset);
        }
        Content::Json(values) => {
            enc.write_len(values.len() as u32 - offset);
            for value in &values[offset as usize..] {
                enc.write_json(value);
            }
        }
        Content::Binary(data) => {
            enc.write_buf(data);
        }
        Content::String(s) => {
            if offset == 0 {
                enc.write_str(s);
            } else {
                let bytes = str_indices::utf16::to_byte_idx(s, offset as usize);
                enc.write_str(&s[bytes..]);
            }
        }
        Content::Embed(value) => {
            enc.write_json(value);
        }
        Content::Format { key, value } => {
            enc.write_key(key);
            enc.write_json(value);
        }
        Content::Type(def) => {
            debug_assert_ne!(def.kind, TypeKind::Abstract);
            enc.write_type_ref(def.kind.into());
            if matches!(def.kind, TypeKind::XmlElement | TypeKind::XmlHook) {
                enc.write_key(def.node_name.as_deref().unwrap_or(""));
            }
        }
        Content::Any(values) => {
            enc.write_len(values.len() as u32 - offset);
            for value in &values[offset as usize..] {
                enc.write_any(value);
            }
        }
        Content::Doc { guid, opts } => {
            enc.write_str(guid);
            enc.write_any(opts);
        }
    }
}

fn read_content<D: Decoder>(dec: &mut D, content_ref: u8) -> Result<Content, ParseError> {
    let content_ref =
        ContentRef::try_from(content_ref).map_err(|_| ParseError::UnknownContentRef(content_ref))?;
    match content_ref {
        ContentRef::Deleted => Ok(Content::Deleted(dec.read_len()?)),
        ContentRef::Json => {
            let len = dec.read_len()?;
            let mut values = smallvec::SmallVec::new();
            for _ in 0..len {
                values.push(dec.read_json()?);
            }
            Ok(Content::Json(values))
        }
        ContentRef::Binary => Ok(Content::Binary(dec.read_buf()?)),
        ContentRef::String => Ok(Content::String(dec.read_str()?)),
        ContentRef::Embed => Ok(Content::Embed(dec.read_json()?)),
        ContentRef::Format => Ok(Content::Format {
            key: dec.read_key()?,
            value: dec.read_json()?,
        }),
        ContentRef::Type => {
            let raw = dec.read_type_ref()?;
            let kind =
                TypeKind::try_from(raw).map_err(|_| ParseError::UnknownTypeRef(raw))?;
            if kind == TypeKind::Abstract {
                return Err(ParseError::UnknownTypeRef(raw));
            }
            let node_name = if matches!(kind, TypeKind::XmlElement | TypeKind::XmlHook) {
                Some(dec.read_key()?)
            } else {
                None
            };
            Ok(Content::Type(TypeDef { kind, node_name }))
        }
        ContentRef::Any => {
            let len = dec.read_len()?;
            let mut values = smallvec::SmallVec::new();
            for _ in 0..len {
                values.push(dec.read_any()?);
            }
            Ok(Content::Any(values))
        }
        ContentRef::Doc => Ok(Content::Doc {
            guid: dec.read_str()?,
            opts: dec.read_any()?,
        }),
        ContentRef::Gc | ContentRef::Skip => Err(ParseError::UnknownContentRef(content_ref.into())),
    }
}

pub(crate) fn write_delete_set<E: Encoder>(enc: &mut E, ds: &DeleteSet) {
    let clients = ds.clients_desc();
    enc.rest().push_usize(clients.len());
    for client in clients {
        let ranges = ds.ranges(client);
        enc.reset_ds_cur_val();
        enc.rest().push_u32(client);
        enc.rest().push_usize(ranges.len());
        for range in ranges {
            enc.write_ds_clock(range.clock);
            enc.write_ds_len(range.len);
        }
    }
}

pub(crate) fn read_delete_set<D: Decoder>(dec: &mut D) -> Result<DeleteSet, ParseError> {
    let mut ds = DeleteSet::new();
    let num_clients = dec.rest_usize()?;
    for _ in 0..num_clients {
        dec.reset_ds_cur_val();
        let client = dec.rest_u32()?;
        let num_ranges = dec.rest_usize()?;
        for _ in 0..num_ranges {
            let clock = dec.read_ds_clock()?;
            let len = dec.read_ds_len()?;
            ds.insert(Id::new(client, clock), len);
        }
    }
    ds.sort_and_merge();
    Ok(ds)
}

/// Write every struct at or past `sv` from a live store, plus the given
/// delete set. The first struct of each client segment is sliced at the
/// requested clock.
pub(crate) fn encode_store_diff<E: Encoder>(
    enc: &mut E,
    blocks: &StructStore,
    sv: &StateVector,
    ds: &DeleteSet,
) {
    // Clients with anything newer than the target, plus clients the target
    // has never heard of.
    let mut to_write: Vec<(ClientId, Clock)> = Vec::new();
    for (client, structs) in blocks.clients() {
        let local = structs.last().map(|s| s.end_clock()).unwrap_or(0);
        let requested = sv.get(client);
        if local > requested {
            to_write.push((client, requested));
        }
    }
    to_write.sort_unstable_by(|a, b| b.0.cmp(&a.0));

    enc.rest().push_usize(to_write.len());
    for (client, clock) in to_write {
        let structs = blocks.structs(client);
        let clock = clock.max(structs[0].id().clock);
        let start = StructStore::find_index(structs, client, clock).unwrap();
        enc.rest().push_usize(structs.len() - start);
        enc.write_client(client);
        enc.rest().push_u32(clock);
        write_struct(enc, &structs[start], clock - structs[start].id().clock);
        for s in &structs[start + 1..] {
            write_struct(enc, s, 0);
        }
    }
    write_delete_set(enc, ds);
}

impl Update {
    /// Integrate all decoded structs into the document. Structs whose causal
    /// dependencies are missing are returned (with the clocks they wait
    /// for); the caller parks them in the store's pending buffer. The delete
    /// set is *not* applied here - see `Transaction::apply_delete`.
    pub(crate) fn integrate_structs(
        self,
        txn: &mut crate::transaction::Transaction<'_>,
    ) -> Result<(Option<PendingUpdate>, DeleteSet), Error> {
        let Update { structs, ds } = self;
        // Queues own their structs; a slot is taken exactly once.
        let mut queues: HashMap<ClientId, (Vec<Option<Struct>>, usize)> = structs
            .into_iter()
            .filter(|(_, run)| !run.is_empty())
            .map(|(client, run)| (client, (run.into_iter().map(Some).collect(), 0)))
            .collect();

        let mut stack: Vec<Struct> = Vec::new();
        let mut rest: HashMap<ClientId, Vec<Struct>> = HashMap::new();
        let mut missing = StateVector::new();

        // Highest client first; conflicts bias toward already-known work.
        let next_client = |queues: &HashMap<ClientId, (Vec<Option<Struct>>, usize)>| {
            queues
                .iter()
                .filter(|(_, (run, i))| *i < run.len())
                .map(|(client, _)| *client)
                .max()
        };

        let add_stack_to_rest =
            |stack: &mut Vec<Struct>, rest: &mut HashMap<ClientId, Vec<Struct>>| {
                for s in stack.drain(..) {
                    rest.entry(s.id().client).or_default().push(s);
                }
            };

        let mut cur_client = match next_client(&queues) {
            Some(client) => client,
            None => return Ok((None, ds)),
        };
        let mut head = {
            let (run, i) = queues.get_mut(&cur_client).unwrap();
            *i += 1;
            run[*i - 1].take()
        };

        while let Some(s) = head.take() {
            if !s.is_skip() {
                let id = s.id();
                let local_clock = txn.store.blocks.get_state(id.client);
                if local_clock < id.clock {
                    // A prior update from the same client is missing.
                    missing.set_min(id.client, id.clock - 1);
                    stack.push(s);
                    add_stack_to_rest(&mut stack, &mut rest);
                } else {
                    let offset = local_clock - id.clock;
                    match &s {
                        Struct::Item(item) => {
                            match crate::integrate::missing_dependency(item, &txn.store.blocks) {
                                Some(dep) => {
                                    stack.push(s);
                                    // Causally blocked; work the dependency's
                                    // queue first.
                                    match queues.get_mut(&dep) {
                                        Some((run, i)) if *i < run.len() => {
                                            *i += 1;
                                            head = run[*i - 1].take();
                                            cur_client = dep;
                                            continue;
                                        }
                                        _ => {
                                            missing.set_min(
                                                dep,
                                                txn.store.blocks.get_state(dep),
                                            );
                                            add_stack_to_rest(&mut stack, &mut rest);
                                        }
                                    }
                                }
                                None => {
                                    if offset < s.len() {
                                        if let Struct::Item(item) = s {
                                            crate::integrate::integrate_item(txn, item, offset)?;
                                        }
                                    }
                                    // Otherwise fully known already; drop.
                                }
                            }
                        }
                        Struct::Gc { .. } => {
                            if offset < s.len() {
                                let (id, len) = (s.id(), s.len());
                                txn.store.blocks.add(Struct::Gc {
                                    id: Id::new(id.client, id.clock + offset),
                                    len: len - offset,
                                })?;
                            }
                        }
                        Struct::Skip { .. } => unreachable!(),
                    }
                }
            }

            head = if let Some(s) = stack.pop() {
                Some(s)
            } else {
                match queues.get_mut(&cur_client) {
                    Some((run, i)) if *i < run.len() => {
                        *i += 1;
                        run[*i - 1].take()
                    }
                    _ => match next_client(&queues) {
                        Some(client) => {
                            cur_client = client;
                            let (run, i) = queues.get_mut(&client).unwrap();
                            *i += 1;
                            run[*i - 1].take()
                        }
                        None => None,
                    },
                }
            };
        }

        let pending = if rest.is_empty() {
            None
        } else {
            for run in rest.values_mut() {
                run.sort_by_key(|s| s.id().clock);
            }
            Some(PendingUpdate {
                update: Update {
                    structs: rest,
                    ds: DeleteSet::new(),
                },
                missing,
            })
        };
        Ok((pending, ds))
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::Any;

    fn item(client: u32, clock: u32, values: &[i64]) -> Struct {
        let mut item = Item::new(
            Id::new(client, clock),
            None,
            None,
            Parent::Root("arr".into()),
            None,
            Content::Any(values.iter().map(|&v| Any::from(v)).collect()),
        );
        if clock > 0 {
            item.origin = Some(Id::new(client, clock - 1));
            item.parent = Parent::Unset;
        }
        Struct::Item(item)
    }

    fn update_of(structs: Vec<(u32, Vec<Struct>)>) -> Update {
        Update {
            structs: structs.into_iter().collect(),
            ds: DeleteSet::new(),
        }
    }

    fn roundtrip(update: &Update) {
        let v1 = Update::decode_v1(&update.encode_v1()).unwrap();
        assert_eq!(v1.structs, update.structs);
        assert_eq!(v1.ds, update.ds);
        let v2 = Update::decode_v2(&update.encode_v2()).unwrap();
        assert_eq!(v2.structs, update.structs);
        assert_eq!(v2.ds, update.ds);
    }

    #[test]
    fn encode_decode_matches_both_versions() {
        let mut ds = DeleteSet::new();
        ds.insert(Id::new(1, 3), 2);
        ds.insert(Id::new(7, 0), 1);
        ds.sort_and_merge();
        let mut update = update_of(vec![
            (1, vec![item(1, 0, &[1, 2, 3]), item(1, 3, &[4])]),
            (7, vec![item(7, 0, &[9])]),
        ]);
        update.ds = ds;
        roundtrip(&update);
    }

    #[test]
    fn all_content_kinds_roundtrip() {
        use serde_json::json;
        let mk = |clock: u32, content: Content| {
            let mut it = Item::new(
                Id::new(3, clock),
                Some(Id::new(3, clock.wrapping_sub(1))),
                None,
                Parent::Unset,
                None,
                content,
            );
            if clock == 0 {
                it.origin = None;
                it.parent = Parent::Root("stuff".into());
                it.parent_sub = Some("k".into());
            }
            Struct::Item(it)
        };
        let structs = vec![
            mk(0, Content::Any(smallvec![json!({"a": 1}), json!(null)])),
            mk(2, Content::String("héllo".into())),
            mk(7, Content::Binary(vec![0, 1, 255])),
            mk(8, Content::Embed(json!({"img": "x.png"}))),
            mk(
                9,
                Content::Format {
                    key: "bold".into(),
                    value: json!(true),
                },
            ),
            mk(
                10,
                Content::Type(TypeDef {
                    kind: TypeKind::Map,
                    node_name: None,
                }),
            ),
            mk(
                11,
                Content::Type(TypeDef {
                    kind: TypeKind::XmlElement,
                    node_name: Some("div".into()),
                }),
            ),
            mk(12, Content::Json(smallvec![json!([1, 2])])),
            mk(
                13,
                Content::Doc {
                    guid: "sub-1".into(),
                    opts: json!({}),
                },
            ),
            mk(14, Content::Deleted(4)),
        ];
        roundtrip(&update_of(vec![(3, structs)]));
    }

    #[test]
    fn gc_and_skip_roundtrip() {
        let update = update_of(vec![(
            2,
            vec![
                Struct::Gc {
                    id: Id::new(2, 0),
                    len: 5,
                },
                Struct::Skip {
                    id: Id::new(2, 5),
                    len: 3,
                },
                item(2, 8, &[1]),
            ],
        )]);
        roundtrip(&update);
    }

    #[test]
    fn merge_disjoint_fills_gap_with_skip() {
        let a = update_of(vec![(1, vec![item(1, 0, &[1, 2])])]);
        let b = update_of(vec![(1, vec![item(1, 5, &[6])])]);
        let merged = Update::merge(vec![a, b]);
        let run = &merged.structs[&1];
        assert_eq!(run.len(), 3);
        assert_eq!(
            run[1],
            Struct::Skip {
                id: Id::new(1, 2),
                len: 3
            }
        );
    }

    #[test]
    fn merge_dedupes_overlap() {
        let a = update_of(vec![(1, vec![item(1, 0, &[1, 2, 3])])]);
        let b = update_of(vec![(1, vec![item(1, 0, &[1, 2, 3]), item(1, 3, &[4])])]);
        let merged = Update::merge(vec![a, b]);
        let run = &merged.structs[&1];
        assert_eq!(run.len(), 2);
        assert_eq!(run[0].len(), 3);
        assert_eq!(run[1].id(), Id::new(1, 3));
    }

    #[test]
    fn merge_is_order_insensitive() {
        let mk = || {
            (
                update_of(vec![(1, vec![item(1, 0, &[1, 2])])]),
                update_of(vec![(1, vec![item(1, 2, &[3])]), (4, vec![item(4, 0, &[7])])]),
            )
        };
        let (a1, b1) = mk();
        let (a2, b2) = mk();
        let ab = Update::merge(vec![a1, b1]);
        let ba = Update::merge(vec![b2, a2]);
        assert_eq!(ab.encode_v1(), ba.encode_v1());
    }

    #[test]
    fn diff_slices_at_boundary() {
        let update = update_of(vec![(1, vec![item(1, 0, &[1, 2, 3, 4])])]);
        let mut sv = StateVector::new();
        sv.set(1, 2);
        let diffed = update.diff(&sv);
        let run = &diffed.structs[&1];
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].id(), Id::new(1, 2));
        assert_eq!(run[0].len(), 2);
    }
}
