use std::collections::HashMap;

use crate::branch::BranchId;
use crate::content::{Content, Out};
use crate::deleteset::DeleteSet;
use crate::id::Id;
use crate::store::{StateVector, Store};
use crate::transaction::{Origin, Transaction};
use crate::SmartString;

/// One step from a container toward a descendant.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(SmartString),
    Index(u32),
}

/// How a map key changed within one transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryChange {
    Inserted(Out),
    Updated { old: Out, new: Out },
    Removed(Out),
}

/// Sequence change summary, quill style: retained spans interleaved with
/// inserts and deletes, in document order.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Retain(u32),
    Inserted(Vec<Out>),
    Deleted(u32),
}

/// Owned summary of what one transaction did to one container. Delivered to
/// observers after the transaction settles; carries no live references.
#[derive(Debug, Clone)]
pub struct Event {
    pub target: BranchId,
    /// Path from the observed container down to `target` (empty for shallow
    /// observations).
    pub path: Vec<PathSegment>,
    pub keys: HashMap<SmartString, EntryChange>,
    pub delta: Vec<Delta>,
    /// Origin tag of the transaction that produced this event.
    pub origin: Option<Origin>,
    pub local: bool,
}

/// Payload of the binary update emitted at transaction close.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub data: Vec<u8>,
    pub origin: Option<Origin>,
}

/// Doc-level view of a settled transaction.
#[derive(Debug, Clone)]
pub struct TransactionSummary {
    pub origin: Option<Origin>,
    pub local: bool,
    pub before_state: StateVector,
    pub after_state: StateVector,
    pub delete_set: DeleteSet,
}

/// Sub-document lifecycle diff of one transaction.
#[derive(Debug, Clone, Default)]
pub struct SubdocsEvent {
    pub added: Vec<SmartString>,
    pub removed: Vec<SmartString>,
    pub loaded: Vec<SmartString>,
}

/// Handle returned by the observe/subscribe calls; pass back to
/// `Doc::unsubscribe` to remove the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(pub(crate) u32);

pub(crate) struct Handlers<E: ?Sized> {
    entries: Vec<(u32, Box<dyn FnMut(&E)>)>,
}

impl<E: ?Sized> Default for Handlers<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<E: ?Sized> Handlers<E> {
    pub fn push(&mut self, id: u32, f: Box<dyn FnMut(&E)>) {
        self.entries.push((id, f));
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn call(&mut self, event: &E) {
        for (_, f) in self.entries.iter_mut() {
            f(event);
        }
    }
}

/// Every callback registered on a document. Callbacks receive owned
/// summaries and cannot reach back into the document, so dispatch never
/// reenters a transaction.
#[derive(Default)]
pub(crate) struct Observers {
    pub next_id: u32,
    pub update_v1: Handlers<UpdateEvent>,
    pub update_v2: Handlers<UpdateEvent>,
    pub before_all_transactions: Handlers<TransactionSummary>,
    pub before_transaction: Handlers<TransactionSummary>,
    pub before_observer_calls: Handlers<TransactionSummary>,
    pub after_transaction: Handlers<TransactionSummary>,
    pub after_transaction_cleanup: Handlers<TransactionSummary>,
    pub after_all_transactions: Handlers<TransactionSummary>,
    pub subdocs: Handlers<SubdocsEvent>,
    pub destroy: Handlers<()>,
    pub branch: HashMap<BranchId, Handlers<Event>>,
    pub branch_deep: HashMap<BranchId, Handlers<[Event]>>,
}

impl Observers {
    pub fn next_subscription(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        let id = sub.0;
        self.update_v1.remove(id)
            || self.update_v2.remove(id)
            || self.before_all_transactions.remove(id)
            || self.before_transaction.remove(id)
            || self.before_observer_calls.remove(id)
            || self.after_transaction.remove(id)
            || self.after_transaction_cleanup.remove(id)
            || self.after_all_transactions.remove(id)
            || self.subdocs.remove(id)
            || self.destroy.remove(id)
            || self.branch.values_mut().any(|h| h.remove(id))
            || self.branch_deep.values_mut().any(|h| h.remove(id))
    }
}

/// Whether `id` was created by this transaction.
fn added_in(txn: &Transaction<'_>, id: Id) -> bool {
    id.clock >= txn.before_state.get(id.client)
}

/// Whether `id` was tombstoned by this transaction.
fn deleted_in(txn: &Transaction<'_>, id: Id) -> bool {
    txn.delete_set.is_deleted(id)
}

fn last_value(store: &Store, item_id: Id) -> Out {
    let item = store.blocks.item(item_id);
    let nested = Some(BranchId::Nested(item.id));
    item.content
        .read(item.len - 1, nested)
        .unwrap_or(Out::Any(crate::Any::Null))
}

/// Build the change summary for one changed container.
pub(crate) fn create_event(
    txn: &Transaction<'_>,
    target: &BranchId,
    subs: &std::collections::HashSet<Option<SmartString>>,
) -> Event {
    let mut keys = HashMap::new();
    let mut delta = Vec::new();

    for sub in subs {
        match sub {
            None => delta = sequence_delta(txn, target),
            Some(key) => {
                if let Some(change) = key_change(txn, target, key) {
                    keys.insert(key.clone(), change);
                }
            }
        }
    }

    Event {
        target: target.clone(),
        path: Vec::new(),
        keys,
        delta,
        origin: txn.origin.clone(),
        local: txn.local,
    }
}

fn sequence_delta(txn: &Transaction<'_>, target: &BranchId) -> Vec<Delta> {
    let mut delta: Vec<Delta> = Vec::new();
    let mut retain = 0u32;
    let mut cur = txn.store.branch(target).start;

    while let Some(id) = cur {
        let item = txn.store.blocks.item(id);
        if item.countable() {
            let added = added_in(txn, item.id);
            if item.deleted() {
                // Added-and-deleted within the transaction is invisible.
                if deleted_in(txn, item.id) && !added {
                    if retain > 0 {
                        delta.push(Delta::Retain(retain));
                        retain = 0;
                    }
                    match delta.last_mut() {
                        Some(Delta::Deleted(n)) => *n += item.len,
                        _ => delta.push(Delta::Deleted(item.len)),
                    }
                }
            } else if added {
                if retain > 0 {
                    delta.push(Delta::Retain(retain));
                    retain = 0;
                }
                let values = content_values(item.id, &item.content, item.len);
                match delta.last_mut() {
                    Some(Delta::Inserted(run)) => run.extend(values),
                    _ => delta.push(Delta::Inserted(values)),
                }
            } else {
                retain += item.len;
            }
        }
        cur = item.right;
    }
    // Trailing retain carries no information.
    delta
}

fn content_values(id: Id, content: &Content, len: u32) -> Vec<Out> {
    match content {
        Content::String(s) => vec![Out::Any(crate::Any::String(s.to_string()))],
        _ => {
            let nested = Some(BranchId::Nested(id));
            (0..len)
                .filter_map(|offset| content.read(offset, nested.clone()))
                .collect()
        }
    }
}

fn key_change(txn: &Transaction<'_>, target: &BranchId, key: &SmartString) -> Option<EntryChange> {
    let tail = txn.store.branch(target).map.get(key).copied()?;
    let item = txn.store.blocks.item(tail);

    if added_in(txn, item.id) {
        // Skip everything else written during this same transaction.
        let mut previous = item.left;
        while let Some(prev) = previous {
            if !added_in(txn, prev) {
                break;
            }
            previous = txn.store.blocks.item(prev).left;
        }
        let prev_deleted_now = previous.map(|p| deleted_in(txn, p)).unwrap_or(false);
        if deleted_in(txn, item.id) {
            if previous.is_some() && prev_deleted_now {
                Some(EntryChange::Removed(last_value(txn.store, previous.unwrap())))
            } else {
                None
            }
        } else if let Some(prev) = previous {
            if prev_deleted_now {
                Some(EntryChange::Updated {
                    old: last_value(txn.store, prev),
                    new: last_value(txn.store, tail),
                })
            } else {
                // Prior value was already dead before this transaction.
                Some(EntryChange::Inserted(last_value(txn.store, tail)))
            }
        } else {
            Some(EntryChange::Inserted(last_value(txn.store, tail)))
        }
    } else if deleted_in(txn, item.id) {
        Some(EntryChange::Removed(last_value(txn.store, tail)))
    } else {
        None
    }
}

/// Absolute path of a container from its root.
pub(crate) fn path_of(store: &Store, target: &BranchId) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut cur = target.clone();
    while let BranchId::Nested(item_id) = cur {
        let item = match store.blocks.find(item_id) {
            Ok(s) => match s.as_item() {
                Some(item) => item,
                None => break,
            },
            Err(_) => break,
        };
        let parent = match &item.parent {
            crate::item::Parent::Branch(parent) => parent.clone(),
            _ => break,
        };
        match &item.parent_sub {
            Some(key) => segments.push(PathSegment::Key(key.clone())),
            None => {
                let mut index = 0u32;
                let mut walk = store.branch(&parent).start;
                while let Some(id) = walk {
                    if id == item_id {
                        break;
                    }
                    let w = store.blocks.item(id);
                    if w.countable() && !w.deleted() {
                        index += w.len;
                    }
                    walk = w.right;
                }
                segments.push(PathSegment::Index(index));
            }
        }
        cur = parent;
    }
    segments.reverse();
    segments
}

/// Ancestor chain of a container, nearest first, ending at its root.
pub(crate) fn ancestors(store: &Store, target: &BranchId) -> Vec<BranchId> {
    let mut out = Vec::new();
    let mut cur = target.clone();
    while let BranchId::Nested(item_id) = cur {
        let parent = match store.blocks.find(item_id) {
            Ok(s) => match s.as_item() {
                Some(item) => match &item.parent {
                    crate::item::Parent::Branch(parent) => parent.clone(),
                    _ => return out,
                },
                None => return out,
            },
            Err(_) => return out,
        };
        out.push(parent.clone());
        cur = parent;
    }
    out
}
