//! Placement of items into their container's document-order list, including
//! conflict resolution between concurrent inserts at the same position.

use std::collections::HashSet;

use crate::branch::BranchId;
use crate::content::{Content, TypeKind};
use crate::error::Error;
use crate::id::{ClientId, Clock, Id};
use crate::item::{Item, Parent, Struct};
use crate::store::StructStore;
use crate::transaction::Transaction;

/// If any causal dependency of `item` (origins, wire parent) addresses a
/// clock this store has not reached, return the client we are waiting for.
pub(crate) fn missing_dependency(item: &Item, blocks: &StructStore) -> Option<ClientId> {
    if let Some(origin) = item.origin {
        if origin.client != item.id.client && origin.clock >= blocks.get_state(origin.client) {
            return Some(origin.client);
        }
    }
    if let Some(right_origin) = item.right_origin {
        if right_origin.client != item.id.client
            && right_origin.clock >= blocks.get_state(right_origin.client)
        {
            return Some(right_origin.client);
        }
    }
    if let Parent::Id(parent) = &item.parent {
        if parent.client != item.id.client && parent.clock >= blocks.get_state(parent.client) {
            return Some(parent.client);
        }
    }
    None
}

/// Resolve origins to concrete neighbors (splitting covering structs) and
/// the parent to a live branch. Requires `missing_dependency` to be None.
fn repair(txn: &mut Transaction<'_>, item: &mut Item) -> Result<(), Error> {
    item.left = match item.origin {
        Some(origin) => txn
            .store
            .get_item_clean_end(origin, &mut txn.merge_blocks)?,
        None => None,
    };
    item.right = match item.right_origin {
        Some(right_origin) => txn
            .store
            .get_item_clean_start(right_origin, &mut txn.merge_blocks)?,
        None => None,
    };

    match &item.parent {
        Parent::Branch(_) | Parent::Gone => {}
        Parent::Id(parent_id) => {
            item.parent = match txn.store.blocks.find(*parent_id) {
                Ok(Struct::Item(p)) if matches!(p.content, Content::Type(_)) => {
                    Parent::Branch(BranchId::Nested(p.id))
                }
                // The embedding item was collected; the whole subtree is gone.
                _ => Parent::Gone,
            };
        }
        Parent::Root(name) => {
            // Unregistered root names materialize as abstract containers.
            let id = BranchId::Root(name.clone());
            txn.store
                .get_or_create_branch(id.clone(), TypeKind::Abstract, None);
            item.parent = Parent::Branch(id);
        }
        Parent::Unset => {
            let neighbor = item.left.or(item.right);
            item.parent = match neighbor {
                Some(n) => {
                    let neighbor = txn.store.blocks.item(n);
                    item.parent_sub = neighbor.parent_sub.clone();
                    neighbor.parent.clone()
                }
                None => Parent::Gone,
            };
        }
    }
    Ok(())
}

/// Leftmost item of the chain rooted at `map[sub]`.
fn leftmost_in_key_chain(
    txn: &Transaction<'_>,
    branch_id: &BranchId,
    sub: &crate::SmartString,
) -> Option<Id> {
    let mut cur = txn.store.branch(branch_id).map.get(sub).copied();
    while let Some(id) = cur {
        match txn.store.blocks.item(id).left {
            Some(left) => cur = Some(left),
            None => break,
        }
    }
    cur
}

/// Integrate one item, local or remote. `offset > 0` trims an already-known
/// prefix off a remote item.
pub(crate) fn integrate_item(
    txn: &mut Transaction<'_>,
    mut item: Item,
    offset: Clock,
) -> Result<(), Error> {
    debug_assert!(item.len > offset);
    if offset > 0 {
        item.id.clock += offset;
        item.origin = Some(Id::new(item.id.client, item.id.clock - 1));
        item.content = item.content.splice(offset);
        item.len -= offset;
    }

    repair(txn, &mut item)?;

    let branch_id = match &item.parent {
        Parent::Branch(id) => id.clone(),
        _ => {
            // No surviving parent: keep only the clock range.
            return txn.store.blocks.add(Struct::Gc {
                id: item.id,
                len: item.len,
            });
        }
    };

    let no_conflict = match (item.left, item.right) {
        (Some(left), right) => txn.store.blocks.item(left).right == right,
        (None, right) => {
            let head = if item.parent_sub.is_some() {
                None // a fresh key chain conflicts whenever other versions exist
            } else {
                txn.store.branch(&branch_id).start
            };
            right.is_some() && head == right
        }
    };

    if !no_conflict {
        resolve_conflict(txn, &mut item, &branch_id);
    }

    link(txn, &mut item, &branch_id)?;

    let id = item.id;
    let len = item.len;
    let left = item.left;
    let right = item.right;
    let parent_sub = item.parent_sub.clone();
    let countable = item.countable();
    let deleted = item.deleted();

    if parent_sub.is_none() && countable && !deleted {
        txn.store.branch_mut(&branch_id).len += len;
    }

    // Content side effects once the item is in the store.
    let content_actions = match &item.content {
        Content::Type(def) => Some((def.kind, def.node_name.clone())),
        Content::Doc { guid, .. } => {
            let guid = guid.clone();
            txn.store.subdocs.insert(id, guid.clone());
            txn.subdocs_added.push(guid);
            None
        }
        Content::Deleted(len) => {
            txn.delete_set.insert(id, *len);
            None
        }
        Content::Format { .. } => {
            let kind = txn.store.branch(&branch_id).kind;
            if !txn.local && matches!(kind, TypeKind::Text | TypeKind::XmlText) {
                txn.needs_formatting_cleanup = true;
            }
            None
        }
        _ => None,
    };

    txn.store.blocks.add(Struct::Item(item))?;

    if let Some((kind, node_name)) = content_actions {
        txn.store
            .get_or_create_branch(BranchId::Nested(id), kind, node_name);
    }

    txn.add_changed(branch_id.clone(), parent_sub.clone());

    // A new map tail obsoletes the previous version of the key.
    if parent_sub.is_some() && right.is_none() {
        if let Some(left) = left {
            txn.delete_item(left);
        }
    }

    // A value that lands under a deleted parent, or a map write that lost to
    // a newer one, is dead on arrival.
    if txn.store.branch_deleted(&branch_id) || (parent_sub.is_some() && right.is_some()) {
        txn.delete_item(id);
    }

    Ok(())
}

/// The conflict scan: walk candidates between the provisional left neighbor
/// and the right origin, deciding where `item` lands among concurrent
/// inserts that observed the same neighbors.
fn resolve_conflict(txn: &mut Transaction<'_>, item: &mut Item, branch_id: &BranchId) {
    let mut left = item.left;
    let mut o = match item.left {
        Some(l) => txn.store.blocks.item(l).right,
        None => match &item.parent_sub {
            Some(sub) => leftmost_in_key_chain(txn, branch_id, sub),
            None => txn.store.branch(branch_id).start,
        },
    };

    // Start ids of every struct visited, and the subset still tied with the
    // new item. Visited structs enter the first set before classification.
    let mut items_before_origin: HashSet<Id> = HashSet::new();
    let mut conflicting: HashSet<Id> = HashSet::new();

    while let Some(oid) = o {
        if Some(oid) == item.right {
            break;
        }
        items_before_origin.insert(oid);
        conflicting.insert(oid);

        let other = txn.store.blocks.item(oid);
        let o_origin = other.origin;
        let o_right_origin = other.right_origin;
        let o_client = other.id.client;
        let o_right = other.right;

        if o_origin == item.origin {
            // Same original left neighbor: a direct race, ordered by client.
            if o_client < item.id.client {
                left = Some(oid);
                conflicting.clear();
            } else if item.right_origin == o_right_origin {
                // The new item sorts before this one and everything it
                // still conflicts with.
                break;
            }
        } else if let Some(o_origin) = o_origin {
            // The other item chains after something we already walked past.
            match txn.store.blocks.find(o_origin) {
                Ok(covering) => {
                    let anchor = covering.id();
                    if items_before_origin.contains(&anchor) {
                        if !conflicting.contains(&anchor) {
                            left = Some(oid);
                            conflicting.clear();
                        }
                    } else {
                        break;
                    }
                }
                Err(_) => break,
            }
        } else {
            break;
        }
        o = o_right;
    }

    item.left = left;
}

/// Wire the item between its final neighbors and update the container head
/// or map tail.
fn link(txn: &mut Transaction<'_>, item: &mut Item, branch_id: &BranchId) -> Result<(), Error> {
    match item.left {
        Some(left) => {
            let l = txn.store.blocks.item_mut(left);
            item.right = l.right;
            l.right = Some(item.id);
        }
        None => {
            item.right = match &item.parent_sub {
                Some(sub) => leftmost_in_key_chain(txn, branch_id, sub),
                None => {
                    let branch = txn.store.branch_mut(branch_id);
                    let old = branch.start;
                    branch.start = Some(item.id);
                    old
                }
            };
        }
    }

    match item.right {
        Some(right) => {
            txn.store.blocks.item_mut(right).left = Some(item.id);
        }
        None => {
            if let Some(sub) = &item.parent_sub {
                txn.store
                    .branch_mut(branch_id)
                    .map
                    .insert(sub.clone(), item.id);
            }
        }
    }
    Ok(())
}
