//! Typed handles over containers and the shared positional machinery they
//! sit on. A handle is just a named pointer into the document; every
//! operation goes through an explicit [`Transaction`].

pub use array::ArrayRef;
pub use map::MapRef;
pub use text::TextRef;
pub use xml::{XmlElementRef, XmlFragmentRef};

mod array;
mod map;
mod text;
mod xml;

use smallvec::SmallVec;

use crate::branch::BranchId;
use crate::content::{Content, In, Out, TypeDef, TypeKind};
use crate::error::Error;
use crate::id::Id;
use crate::integrate::integrate_item;
use crate::item::{Item, Parent};
use crate::marker::{SearchMarker, MAX_SEARCH_MARKERS};
use crate::store::Store;
use crate::transaction::Transaction;
use crate::{Any, SmartString};

/// Anything that names a shared container inside a document.
pub trait SharedRef {
    fn branch_id(&self) -> &BranchId;
}

// ---- search markers ----

/// Find a cached position at or near `index` and walk the remainder, per
/// the marker discipline: start at the nearest marker, walk right counting
/// live lengths, walk left on overshoot, then retreat to a merge boundary.
/// Returns the item containing `index` (or the last item for an append)
/// and the document index of its first unit.
pub(crate) fn find_marker(store: &mut Store, target: &BranchId, index: u32) -> Option<(Id, u32)> {
    let branch = store.branch(target);
    let start = branch.start?;
    let markers = branch.markers.as_ref()?;
    if index == 0 {
        return None;
    }

    let nearest = markers
        .iter()
        .enumerate()
        .min_by_key(|(_, m)| (m.index as i64 - index as i64).abs())
        .map(|(slot, m)| (slot, *m));

    let (mut p, mut p_index) = match nearest {
        Some((_, m)) => (m.item, m.index),
        None => (start, 0),
    };

    loop {
        let item = store.blocks.item(p);
        if p_index >= index || item.right.is_none() {
            break;
        }
        if !item.deleted() && item.countable() {
            if index < p_index + item.len {
                break;
            }
            p_index += item.len;
        }
        p = item.right.unwrap();
    }
    loop {
        let item = store.blocks.item(p);
        if p_index <= index || item.left.is_none() {
            break;
        }
        p = item.left.unwrap();
        let item = store.blocks.item(p);
        if !item.deleted() && item.countable() {
            p_index -= item.len;
        }
    }
    // Retreat to a merge boundary so positions stay stable when the left
    // run recombines.
    loop {
        let item = store.blocks.item(p);
        let left = match item.left {
            Some(left) => left,
            None => break,
        };
        let left_item = store.blocks.item(left);
        if left_item.id.client == item.id.client
            && left_item.id.clock + left_item.len == item.id.clock
        {
            p = left;
            if !left_item.deleted() && left_item.countable() {
                p_index -= left_item.len;
            }
        } else {
            break;
        }
    }

    let timestamp = store.next_marker_timestamp();
    let branch_len = store.branch(target).len;
    let markers = store.branch_mut(target).markers.as_mut().unwrap();

    match nearest {
        Some((slot, m))
            if (m.index as i64 - p_index as i64).unsigned_abs()
                < (branch_len as u64 / MAX_SEARCH_MARKERS as u64).max(1) =>
        {
            // Close enough: refresh the existing marker in place.
            markers[slot] = SearchMarker {
                item: p,
                index: p_index,
                timestamp,
            };
        }
        _ => {
            let marker = SearchMarker {
                item: p,
                index: p_index,
                timestamp,
            };
            if markers.len() >= MAX_SEARCH_MARKERS {
                // Evict the stalest entry.
                let oldest = markers
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, m)| m.timestamp)
                    .map(|(slot, _)| slot)
                    .unwrap();
                markers[oldest] = marker;
            } else {
                markers.push(marker);
            }
        }
    }
    set_marked_flags(store, target);

    Some((p, p_index))
}

fn set_marked_flags(store: &mut Store, target: &BranchId) {
    let marked: Vec<Id> = store
        .branch(target)
        .markers
        .as_ref()
        .map(|markers| markers.iter().map(|m| m.item).collect())
        .unwrap_or_default();
    for id in marked {
        store.blocks.item_mut(id).info |= crate::item::ItemFlags::MARKED;
    }
}

/// Shift cached positions after an edit at `index` of signed length
/// `len` (positive insert, negative delete). On inserts, markers anchored
/// on dead items are first walked left to live ground or dropped.
pub(crate) fn update_marker_changes(store: &mut Store, target: &BranchId, index: u32, len: i64) {
    let Some(mut markers) = store
        .branch_mut(target)
        .markers
        .as_mut()
        .map(std::mem::take)
    else {
        return;
    };

    let mut slot = markers.len();
    while slot > 0 {
        slot -= 1;
        let m = &mut markers[slot];
        if len > 0 {
            let mut p = Some(m.item);
            while let Some(id) = p {
                let item = store.blocks.item(id);
                if !item.deleted() && item.countable() {
                    break;
                }
                p = item.left;
                if let Some(left) = p {
                    let left_item = store.blocks.item(left);
                    if !left_item.deleted() && left_item.countable() {
                        m.index -= left_item.len;
                    }
                }
            }
            match p {
                Some(id) => m.item = id,
                None => {
                    markers.remove(slot);
                    continue;
                }
            }
        }
        let m = &mut markers[slot];
        if index < m.index || (len > 0 && index == m.index) {
            m.index = (index as i64).max(m.index as i64 + len) as u32;
        }
    }

    store.branch_mut(target).markers = Some(markers);
    set_marked_flags(store, target);
}

// ---- positional lookup ----

/// The item after which an insert at `index` lands (None = at the head),
/// splitting a covering item so the boundary is exact.
fn find_insert_left(
    txn: &mut Transaction<'_>,
    target: &BranchId,
    index: u32,
) -> Result<Option<Id>, Error> {
    let branch_len = txn.store.branch(target).len;
    if index > branch_len {
        return Err(Error::LengthExceeded {
            index,
            len: branch_len,
        });
    }
    if index == 0 {
        return Ok(None);
    }

    let (mut n, mut rel) = match find_marker(txn.store, target, index) {
        Some((item, item_index)) => {
            let mut n = Some(item);
            let mut rel = index - item_index;
            if rel == 0 {
                // Step to the previous live item so the walk below can land
                // on its right edge.
                let mut prev = txn.store.blocks.item(item).left;
                while let Some(id) = prev {
                    if !txn.store.blocks.item(id).deleted() {
                        break;
                    }
                    prev = txn.store.blocks.item(id).left;
                }
                n = prev;
                if let Some(id) = n {
                    let item = txn.store.blocks.item(id);
                    if item.countable() && !item.deleted() {
                        rel += item.len;
                    }
                }
            }
            (n, rel)
        }
        None => (txn.store.branch(target).start, index),
    };

    while let Some(id) = n {
        let item = txn.store.blocks.item(id);
        if !item.deleted() && item.countable() {
            if rel <= item.len {
                if rel < item.len {
                    let at = Id::new(item.id.client, item.id.clock + rel);
                    let _ = txn.store.get_item_clean_start(at, &mut txn.merge_blocks)?;
                }
                break;
            }
            rel -= item.len;
        }
        n = txn.store.blocks.item(id).right;
    }
    Ok(n)
}

// ---- insert generics ----

/// One future item: its content, plus the buffered children when it is a
/// container built before integration.
enum Chunk {
    Plain(Content),
    Prelim(Content, In),
}

/// Coalesce an input run into item-sized chunks: contiguous scalars pack
/// into one `Any` item, everything else gets its own.
fn chunk_values(values: Vec<In>) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut scalars: SmallVec<Any, 1> = SmallVec::new();
    for value in values {
        match value {
            In::Any(v) => scalars.push(v),
            other => {
                if !scalars.is_empty() {
                    chunks.push(Chunk::Plain(Content::Any(std::mem::take(&mut scalars))));
                }
                let type_of = |kind: TypeKind, node_name: Option<SmartString>| {
                    Content::Type(TypeDef { kind, node_name })
                };
                chunks.push(match other {
                    In::Bytes(data) => Chunk::Plain(Content::Binary(data)),
                    In::Embed(value) => Chunk::Plain(Content::Embed(value)),
                    In::Doc { guid, opts } => Chunk::Plain(Content::Doc { guid, opts }),
                    prelim @ In::Text(_) => {
                        Chunk::Prelim(type_of(TypeKind::Text, None), prelim)
                    }
                    prelim @ In::Array(_) => {
                        Chunk::Prelim(type_of(TypeKind::Array, None), prelim)
                    }
                    prelim @ In::Map(_) => Chunk::Prelim(type_of(TypeKind::Map, None), prelim),
                    prelim @ In::XmlText(_) => {
                        Chunk::Prelim(type_of(TypeKind::XmlText, None), prelim)
                    }
                    In::XmlElement {
                        name,
                        attrs,
                        children,
                    } => {
                        let content = type_of(TypeKind::XmlElement, Some(name.clone()));
                        Chunk::Prelim(
                            content,
                            In::XmlElement {
                                name,
                                attrs,
                                children,
                            },
                        )
                    }
                    In::Any(_) => unreachable!(),
                });
            }
        }
    }
    if !scalars.is_empty() {
        chunks.push(Chunk::Plain(Content::Any(scalars)));
    }
    chunks
}

/// Flush a prelim container's buffered children once it has a real branch.
fn integrate_prelim(txn: &mut Transaction<'_>, nested: BranchId, prelim: In) -> Result<(), Error> {
    match prelim {
        In::Array(values) => list_insert(txn, &nested, 0, values),
        In::Map(entries) => {
            for (key, value) in entries {
                map_set(txn, &nested, key, value)?;
            }
            Ok(())
        }
        In::Text(chunk) | In::XmlText(chunk) => text_insert(txn, &nested, 0, &chunk),
        In::XmlElement {
            attrs, children, ..
        } => {
            for (key, value) in attrs {
                map_set(txn, &nested, key, value)?;
            }
            list_insert(txn, &nested, 0, children)
        }
        _ => Ok(()),
    }
}

/// Insert a chain of new items after `left` (None = head of the list).
fn list_insert_after(
    txn: &mut Transaction<'_>,
    target: &BranchId,
    left: Option<Id>,
    values: Vec<In>,
) -> Result<(), Error> {
    let right_origin = match left {
        Some(left) => txn.store.blocks.item(left).right,
        None => txn.store.branch(target).start,
    };
    let mut left = left;

    for chunk in chunk_values(values) {
        let (content, prelim) = match chunk {
            Chunk::Plain(content) => (content, None),
            Chunk::Prelim(content, prelim) => (content, Some(prelim)),
        };
        let client = txn.store.client;
        let id = Id::new(client, txn.store.blocks.get_state(client));
        let origin = left.map(|l| txn.store.blocks.item(l).last_id());
        let item = Item::new(
            id,
            origin,
            right_origin,
            Parent::Branch(target.clone()),
            None,
            content,
        );
        integrate_item(txn, item, 0)?;
        left = Some(id);
        if let Some(prelim) = prelim {
            integrate_prelim(txn, BranchId::Nested(id), prelim)?;
        }
    }
    Ok(())
}

// ---- shared container operations ----

pub(crate) fn list_insert(
    txn: &mut Transaction<'_>,
    target: &BranchId,
    index: u32,
    values: Vec<In>,
) -> Result<(), Error> {
    if values.is_empty() {
        return Ok(());
    }
    // Every input value occupies exactly one countable unit (scalar runs
    // coalesce into one item, but keep one unit per value).
    let countable_len = values.len() as u32;
    let left = find_insert_left(txn, target, index)?;
    update_marker_changes(txn.store, target, index, countable_len as i64);
    list_insert_after(txn, target, left, values)
}

pub(crate) fn list_remove(
    txn: &mut Transaction<'_>,
    target: &BranchId,
    index: u32,
    len: u32,
) -> Result<(), Error> {
    if len == 0 {
        return Ok(());
    }
    let branch_len = txn.store.branch(target).len;
    if index + len > branch_len {
        return Err(Error::LengthExceeded {
            index: index + len,
            len: branch_len,
        });
    }

    let mut remaining = len;
    let (mut n, mut rel) = match find_marker(txn.store, target, index) {
        Some((item, item_index)) => (Some(item), index - item_index),
        None => (txn.store.branch(target).start, index),
    };

    // Walk to the first unit to delete, splitting at the left boundary.
    while let Some(id) = n {
        if rel == 0 {
            break;
        }
        let item = txn.store.blocks.item(id);
        let (countable, item_len, right) = (!item.deleted() && item.countable(), item.len, item.right);
        if countable {
            if rel < item_len {
                let at = Id::new(id.client, id.clock + rel);
                let _ = txn.store.get_item_clean_start(at, &mut txn.merge_blocks)?;
                n = txn.store.blocks.item(id).right;
                break;
            }
            rel -= item_len;
        }
        n = right;
    }

    while remaining > 0 {
        let Some(id) = n else { break };
        let item = txn.store.blocks.item(id);
        let (live, item_len, right) = (
            !item.deleted() && item.countable(),
            item.len,
            item.right,
        );
        if live {
            if remaining < item_len {
                let at = Id::new(id.client, id.clock + remaining);
                let _ = txn.store.get_item_clean_start(at, &mut txn.merge_blocks)?;
            }
            let item_len = txn.store.blocks.item(id).len;
            let right = txn.store.blocks.item(id).right;
            txn.delete_item(id);
            remaining -= item_len;
            n = right;
        } else {
            n = right;
        }
    }

    if remaining > 0 {
        return Err(Error::LengthExceeded {
            index: index + len,
            len: branch_len,
        });
    }
    update_marker_changes(txn.store, target, index, -(len as i64));
    Ok(())
}

pub(crate) fn list_get(txn: &mut Transaction<'_>, target: &BranchId, index: u32) -> Option<Out> {
    if index >= txn.store.branch(target).len {
        return None;
    }
    let (mut n, mut rel) = match find_marker(txn.store, target, index) {
        Some((item, item_index)) => (Some(item), index - item_index),
        None => (txn.store.branch(target).start, index),
    };
    while let Some(id) = n {
        let item = txn.store.blocks.item(id);
        if !item.deleted() && item.countable() {
            if rel < item.len {
                return item.content.read(rel, Some(BranchId::Nested(item.id)));
            }
            rel -= item.len;
        }
        n = item.right;
    }
    None
}

/// Every live value in document order.
pub(crate) fn list_values(store: &Store, target: &BranchId) -> Vec<Out> {
    let mut out = Vec::new();
    let mut cur = store.branch(target).start;
    while let Some(id) = cur {
        let item = store.blocks.item(id);
        if !item.deleted() && item.countable() {
            let nested = Some(BranchId::Nested(item.id));
            for offset in 0..item.len {
                if let Some(value) = item.content.read(offset, nested.clone()) {
                    out.push(value);
                }
            }
        }
        cur = item.right;
    }
    out
}

pub(crate) fn map_set(
    txn: &mut Transaction<'_>,
    target: &BranchId,
    key: SmartString,
    value: In,
) -> Result<(), Error> {
    let left = txn.store.branch(target).map.get(&key).copied();
    let origin = left.map(|l| txn.store.blocks.item(l).last_id());
    let client = txn.store.client;
    let id = Id::new(client, txn.store.blocks.get_state(client));

    let mut chunks = chunk_values(vec![value]);
    debug_assert_eq!(chunks.len(), 1);
    let (content, prelim) = match chunks.pop().unwrap() {
        Chunk::Plain(content) => (content, None),
        Chunk::Prelim(content, prelim) => (content, Some(prelim)),
    };

    let item = Item::new(
        id,
        origin,
        None,
        Parent::Branch(target.clone()),
        Some(key),
        content,
    );
    integrate_item(txn, item, 0)?;
    if let Some(prelim) = prelim {
        integrate_prelim(txn, BranchId::Nested(id), prelim)?;
    }
    Ok(())
}

pub(crate) fn map_get(store: &Store, target: &BranchId, key: &str) -> Option<Out> {
    let tail = store.branch(target).map.get(key).copied()?;
    let item = store.blocks.item(tail);
    if item.deleted() {
        return None;
    }
    item.content
        .read(item.len - 1, Some(BranchId::Nested(item.id)))
}

pub(crate) fn map_remove(txn: &mut Transaction<'_>, target: &BranchId, key: &str) -> Option<Out> {
    let old = map_get(txn.store, target, key);
    if let Some(tail) = txn.store.branch(target).map.get(key).copied() {
        if !txn.store.blocks.item(tail).deleted() {
            txn.delete_item(tail);
        }
    }
    old
}

/// Live keys of a map container.
pub(crate) fn map_keys(store: &Store, target: &BranchId) -> Vec<SmartString> {
    let branch = store.branch(target);
    branch
        .map
        .iter()
        .filter(|(_, tail)| !store.blocks.item(**tail).deleted())
        .map(|(key, _)| key.clone())
        .collect()
}

pub(crate) fn text_insert(
    txn: &mut Transaction<'_>,
    target: &BranchId,
    index: u32,
    chunk: &str,
) -> Result<(), Error> {
    if chunk.is_empty() {
        return Ok(());
    }
    let left = find_insert_left(txn, target, index)?;
    let inserted = crate::content::utf16_len(chunk);
    update_marker_changes(txn.store, target, index, inserted as i64);

    let client = txn.store.client;
    let id = Id::new(client, txn.store.blocks.get_state(client));
    let origin = left.map(|l| txn.store.blocks.item(l).last_id());
    let right_origin = match left {
        Some(left) => txn.store.blocks.item(left).right,
        None => txn.store.branch(target).start,
    };
    let item = Item::new(
        id,
        origin,
        right_origin,
        Parent::Branch(target.clone()),
        None,
        Content::String(chunk.into()),
    );
    integrate_item(txn, item, 0)
}

pub(crate) fn text_string(store: &Store, target: &BranchId) -> String {
    let mut out = String::new();
    let mut cur = store.branch(target).start;
    while let Some(id) = cur {
        let item = store.blocks.item(id);
        if !item.deleted() {
            if let Content::String(s) = &item.content {
                out.push_str(s);
            }
        }
        cur = item.right;
    }
    out
}

/// Deep JSON view of a container.
pub(crate) fn to_json(store: &Store, target: &BranchId) -> Any {
    let kind = store.branch(target).kind;
    match kind {
        TypeKind::Map | TypeKind::XmlHook => {
            let mut object = serde_json::Map::new();
            for key in map_keys(store, target) {
                if let Some(value) = map_get(store, target, &key) {
                    object.insert(key.to_string(), out_to_json(store, value));
                }
            }
            Any::Object(object)
        }
        TypeKind::Text | TypeKind::XmlText => Any::String(text_string(store, target)),
        _ => Any::Array(
            list_values(store, target)
                .into_iter()
                .map(|value| out_to_json(store, value))
                .collect(),
        ),
    }
}

fn out_to_json(store: &Store, value: Out) -> Any {
    match value {
        Out::Any(any) => any,
        Out::Bytes(bytes) => Any::Array(bytes.into_iter().map(|b| Any::from(b as i64)).collect()),
        Out::Array(array) => to_json(store, array.branch_id()),
        Out::Map(map) => to_json(store, map.branch_id()),
        Out::Text(text) => to_json(store, text.branch_id()),
        Out::XmlElement(el) => to_json(store, el.branch_id()),
        Out::XmlFragment(frag) => to_json(store, frag.branch_id()),
        Out::Doc { guid } => Any::String(guid.to_string()),
    }
}
