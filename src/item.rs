use std::fmt::{Debug, Formatter};

use bitflags::bitflags;

use crate::branch::BranchId;
use crate::content::Content;
use crate::id::{Clock, Id};
use crate::SmartString;

bitflags! {
    /// Per-item state bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ItemFlags: u8 {
        /// Exempt from garbage collection (still referenced by a snapshot or
        /// an undo stack).
        const KEEP = 0b0001;
        /// Content contributes to container length and positional indexes.
        const COUNTABLE = 0b0010;
        /// Tombstoned.
        const DELETED = 0b0100;
        /// A search marker currently points at this item.
        const MARKED = 0b1000;
    }
}

/// Where an item lives. Decoded items arrive with an unresolved parent;
/// integration resolves everything to `Branch`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Parent {
    /// Resolved to a live container.
    Branch(BranchId),
    /// Wire form: the id of the item embedding the parent container.
    Id(Id),
    /// Wire form: a root name.
    Root(SmartString),
    /// Wire form: inherit the parent from a neighbor during integration.
    Unset,
    /// The parent container was destroyed; the item integrates as a GC
    /// marker.
    Gone,
}

/// One insertion operation: the atom of replication. Occupies the clock
/// range `id.clock .. id.clock + len` of `id.client`.
#[derive(Clone, PartialEq)]
pub(crate) struct Item {
    pub id: Id,
    pub len: Clock,

    /// Last id of the item immediately left at creation time on the
    /// originating client. Immutable after creation.
    pub origin: Option<Id>,
    /// First id of the item immediately right at creation time. Immutable.
    pub right_origin: Option<Id>,

    /// Current left neighbor in the container list (start id). Mutable;
    /// established at integration, adjusted on splits and merges.
    pub left: Option<Id>,
    /// Current right neighbor (start id).
    pub right: Option<Id>,

    pub parent: Parent,
    /// Map key; None means the item lives in the container's sequence.
    pub parent_sub: Option<SmartString>,

    /// A later item that redoes this one, if any. Runtime only.
    pub redone: Option<Id>,

    pub content: Content,
    pub info: ItemFlags,
}

impl Item {
    pub fn new(
        id: Id,
        origin: Option<Id>,
        right_origin: Option<Id>,
        parent: Parent,
        parent_sub: Option<SmartString>,
        content: Content,
    ) -> Self {
        let mut info = ItemFlags::empty();
        if content.countable() {
            info |= ItemFlags::COUNTABLE;
        }
        if matches!(content, Content::Deleted(_)) {
            info |= ItemFlags::DELETED;
        }
        Item {
            id,
            len: content.len(),
            origin,
            right_origin,
            left: None,
            right: None,
            parent,
            parent_sub,
            redone: None,
            content,
            info,
        }
    }

    #[inline]
    pub fn last_id(&self) -> Id {
        Id::new(self.id.client, self.id.clock + self.len - 1)
    }

    #[inline]
    pub fn end_clock(&self) -> Clock {
        self.id.clock + self.len
    }

    #[inline]
    pub fn contains(&self, id: Id) -> bool {
        id.client == self.id.client && id.clock >= self.id.clock && id.clock < self.end_clock()
    }

    #[inline]
    pub fn deleted(&self) -> bool {
        self.info.contains(ItemFlags::DELETED)
    }

    #[inline]
    pub fn countable(&self) -> bool {
        self.info.contains(ItemFlags::COUNTABLE)
    }

    #[inline]
    pub fn keep(&self) -> bool {
        self.info.contains(ItemFlags::KEEP)
    }

    pub fn mark_deleted(&mut self) {
        self.info |= ItemFlags::DELETED;
    }

    /// Split off the clock range `offset..len` into a new item. Left/right
    /// pointers of the two halves are wired here; the store is responsible
    /// for rewiring the old right neighbor and any map tail.
    pub fn split(&mut self, offset: Clock) -> Item {
        debug_assert!(offset > 0 && offset < self.len);
        let right_id = Id::new(self.id.client, self.id.clock + offset);
        let right = Item {
            id: right_id,
            len: self.len - offset,
            origin: Some(Id::new(self.id.client, self.id.clock + offset - 1)),
            right_origin: self.right_origin,
            left: Some(self.id),
            right: self.right,
            parent: self.parent.clone(),
            parent_sub: self.parent_sub.clone(),
            redone: self
                .redone
                .map(|id| Id::new(id.client, id.clock + offset)),
            content: self.content.splice(offset),
            // The marker bit stays on the left half; markers address the
            // item's first unit.
            info: self.info & !ItemFlags::MARKED,
        };
        self.len = offset;
        self.right = Some(right_id);
        right
    }

    /// Whether `right` may be collapsed into this item: causally contiguous,
    /// same client, same neighbors/origins, same tombstone state, merge
    /// friendly content.
    pub fn can_merge(&self, right: &Item) -> bool {
        self.id.client == right.id.client
            && self.end_clock() == right.id.clock
            && self.right == Some(right.id)
            && right.origin == Some(self.last_id())
            && self.right_origin == right.right_origin
            && self.deleted() == right.deleted()
            && self.redone.is_none()
            && right.redone.is_none()
            && self.content.content_ref() == right.content.content_ref()
            && self.content.mergeable()
    }

    /// Absorb `right`. Callers handle search markers and map tail pointers.
    pub fn merge(&mut self, right: Item) {
        debug_assert!(self.can_merge(&right));
        if right.keep() {
            self.info |= ItemFlags::KEEP;
        }
        self.right = right.right;
        self.len += right.len;
        self.content.merge(right.content);
    }
}

impl Debug for Item {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Item");
        s.field("id", &self.id).field("len", &self.len);
        if let Some(origin) = &self.origin {
            s.field("origin", origin);
        }
        if let Some(right_origin) = &self.right_origin {
            s.field("right_origin", right_origin);
        }
        s.field("left", &self.left)
            .field("right", &self.right)
            .field("parent", &self.parent);
        if let Some(sub) = &self.parent_sub {
            s.field("parent_sub", sub);
        }
        if self.deleted() {
            s.field("deleted", &true);
        }
        s.field("content", &self.content);
        s.finish()
    }
}

/// A slot in the struct store: an insertion, a collapsed tombstone range, or
/// (inside updates only) a range known to be intentionally absent.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Struct {
    Item(Item),
    Gc { id: Id, len: Clock },
    Skip { id: Id, len: Clock },
}

impl Struct {
    #[inline]
    pub fn id(&self) -> Id {
        match self {
            Struct::Item(item) => item.id,
            Struct::Gc { id, .. } | Struct::Skip { id, .. } => *id,
        }
    }

    #[inline]
    pub fn len(&self) -> Clock {
        match self {
            Struct::Item(item) => item.len,
            Struct::Gc { len, .. } | Struct::Skip { len, .. } => *len,
        }
    }

    #[inline]
    pub fn end_clock(&self) -> Clock {
        self.id().clock + self.len()
    }

    pub fn last_id(&self) -> Id {
        let id = self.id();
        Id::new(id.client, id.clock + self.len() - 1)
    }

    pub fn as_item(&self) -> Option<&Item> {
        match self {
            Struct::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut Item> {
        match self {
            Struct::Item(item) => Some(item),
            _ => None,
        }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, Struct::Skip { .. })
    }

    /// Split a struct at `offset`, returning the right part. Items defer to
    /// `Item::split`; gc and skip ranges split arithmetically.
    pub fn split(&mut self, offset: Clock) -> Struct {
        match self {
            Struct::Item(item) => Struct::Item(item.split(offset)),
            Struct::Gc { id, len } => {
                let right = Struct::Gc {
                    id: Id::new(id.client, id.clock + offset),
                    len: *len - offset,
                };
                *len = offset;
                right
            }
            Struct::Skip { id, len } => {
                let right = Struct::Skip {
                    id: Id::new(id.client, id.clock + offset),
                    len: *len - offset,
                };
                *len = offset;
                right
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Any;

    fn item(client: u32, clock: u32, values: &[i64]) -> Item {
        Item::new(
            Id::new(client, clock),
            None,
            None,
            Parent::Root("root".into()),
            None,
            Content::Any(values.iter().map(|&v| Any::from(v)).collect()),
        )
    }

    #[test]
    fn split_keeps_ids_contiguous() {
        let mut left = item(1, 10, &[1, 2, 3, 4]);
        let right = left.split(3);
        assert_eq!(left.len, 3);
        assert_eq!(right.id, Id::new(1, 13));
        assert_eq!(right.len, 1);
        assert_eq!(right.origin, Some(Id::new(1, 12)));
        assert_eq!(left.right, Some(right.id));
        assert_eq!(right.left, Some(left.id));
    }

    #[test]
    fn split_then_merge_roundtrips() {
        let orig = item(7, 0, &[1, 2, 3]);
        let mut left = orig.clone();
        let right = left.split(1);
        assert!(left.can_merge(&right));
        left.merge(right);
        assert_eq!(left, orig);
    }

    #[test]
    fn merge_needs_adjacency() {
        let mut a = item(1, 0, &[1]);
        let b = item(1, 5, &[2]);
        a.right = Some(b.id);
        assert!(!a.can_merge(&b)); // clock gap
    }

    #[test]
    fn deleted_items_do_not_merge_with_live() {
        let mut a = item(1, 0, &[1]);
        let mut b = item(1, 1, &[2]);
        a.right = Some(b.id);
        b.origin = Some(a.last_id());
        assert!(a.can_merge(&b));
        b.mark_deleted();
        assert!(!a.can_merge(&b));
    }
}
