use std::collections::HashMap;

use crate::branch::{Branch, BranchId};
use crate::content::TypeKind;
use crate::deleteset::DeleteSet;
use crate::error::Error;
use crate::id::{ClientId, Clock, Id};
use crate::item::{Item, Struct};
use crate::update::PendingUpdate;
use crate::SmartString;

/// `client -> next expected clock`: the frontier of what this peer has seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVector(HashMap<ClientId, Clock>);

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, client: ClientId) -> Clock {
        self.0.get(&client).copied().unwrap_or(0)
    }

    pub fn set(&mut self, client: ClientId, clock: Clock) {
        self.0.insert(client, clock);
    }

    /// Keep the smaller of the stored and given clocks.
    pub fn set_min(&mut self, client: ClientId, clock: Clock) {
        self.0
            .entry(client)
            .and_modify(|c| *c = (*c).min(clock))
            .or_insert(clock);
    }

    /// Keep the larger of the stored and given clocks.
    pub fn set_max(&mut self, client: ClientId, clock: Clock) {
        self.0
            .entry(client)
            .and_modify(|c| *c = (*c).max(clock))
            .or_insert(clock);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientId, Clock)> + '_ {
        self.0.iter().map(|(client, clock)| (*client, *clock))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-client ordered struct arrays, contiguous in clock space:
/// `a[i].id.clock + a[i].len == a[i+1].id.clock` for every client.
#[derive(Debug, Default)]
pub(crate) struct StructStore {
    clients: HashMap<ClientId, Vec<Struct>>,
}

impl StructStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tail clock of a client's segment, 0 if absent.
    pub fn get_state(&self, client: ClientId) -> Clock {
        self.clients
            .get(&client)
            .and_then(|structs| structs.last())
            .map(|s| s.end_clock())
            .unwrap_or(0)
    }

    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, structs) in &self.clients {
            if let Some(last) = structs.last() {
                sv.set(*client, last.end_clock());
            }
        }
        sv
    }

    pub fn clients(&self) -> impl Iterator<Item = (ClientId, &Vec<Struct>)> + '_ {
        self.clients.iter().map(|(client, v)| (*client, v))
    }

    /// Clients in descending id order, the iteration order of the codec.
    pub fn clients_desc(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }

    pub fn structs(&self, client: ClientId) -> &[Struct] {
        self.clients
            .get(&client)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn structs_mut(&mut self, client: ClientId) -> Option<&mut Vec<Struct>> {
        self.clients.get_mut(&client)
    }

    /// Append a struct to its client's segment. The struct's start clock
    /// must equal the segment's tail clock.
    pub fn add(&mut self, s: Struct) -> Result<(), Error> {
        debug_assert!(!s.is_skip());
        let structs = self.clients.entry(s.id().client).or_default();
        let state = structs.last().map(|t| t.end_clock()).unwrap_or(0);
        if s.id().clock != state {
            return Err(Error::BrokenInvariant("clock gap in struct store segment"));
        }
        structs.push(s);
        Ok(())
    }

    /// Index of the struct covering `clock` in this client's segment.
    /// Interpolation search with bisection fallback; clock distributions are
    /// near-uniform so the first probe usually lands adjacent to the target.
    pub fn find_index(structs: &[Struct], client: ClientId, clock: Clock) -> Result<usize, Error> {
        let last = match structs.last() {
            Some(last) => last,
            None => return Err(Error::NotPresent(Id::new(client, clock))),
        };
        if clock >= last.end_clock() {
            return Err(Error::NotPresent(Id::new(client, clock)));
        }

        let mut left = 0usize;
        let mut right = structs.len() - 1;
        let mut mid_clock = last.id().clock;
        if mid_clock == clock {
            return Ok(right);
        }
        let denom = mid_clock as u64 + last.len() as u64 - 1;
        let mut mid = if denom == 0 {
            0
        } else {
            ((clock as u64 * right as u64) / denom) as usize
        };

        while left <= right {
            let s = &structs[mid];
            mid_clock = s.id().clock;
            if mid_clock <= clock {
                if clock < s.end_clock() {
                    return Ok(mid);
                }
                left = mid + 1;
            } else {
                if mid == 0 {
                    break;
                }
                right = mid - 1;
            }
            mid = (left + right) / 2;
        }

        // Unreachable while the contiguity invariant holds.
        Err(Error::BrokenInvariant("struct store segment has gaps"))
    }

    pub fn find(&self, id: Id) -> Result<&Struct, Error> {
        let structs = self.structs(id.client);
        let index = Self::find_index(structs, id.client, id.clock)?;
        Ok(&structs[index])
    }

    /// The item covering `id`. Callers use this only on references that the
    /// linked-list invariants guarantee point at live items.
    pub fn item(&self, id: Id) -> &Item {
        self.find(id)
            .ok()
            .and_then(|s| s.as_item())
            .unwrap_or_else(|| panic!("no item covering {}", id))
    }

    pub fn item_mut(&mut self, id: Id) -> &mut Item {
        let structs = self.clients.get_mut(&id.client).expect("unknown client");
        let index = Self::find_index(structs, id.client, id.clock).unwrap();
        structs[index]
            .as_item_mut()
            .unwrap_or_else(|| panic!("no item covering {}", id))
    }

    /// In-place substitution preserving ordering. `old_start` names the
    /// struct's first clock; the replacement must cover the same range.
    pub fn replace(&mut self, old_start: Id, new: Struct) {
        let structs = self.clients.get_mut(&old_start.client).expect("unknown client");
        let index = Self::find_index(structs, old_start.client, old_start.clock).unwrap();
        debug_assert_eq!(structs[index].id(), new.id());
        debug_assert_eq!(structs[index].len(), new.len());
        structs[index] = new;
    }
}

/// Everything a transaction mutates: the struct log, the container arena,
/// and the pending (missing-causality) buffers.
pub(crate) struct Store {
    pub client: ClientId,
    pub blocks: StructStore,
    pub branches: HashMap<BranchId, Branch>,
    /// Structs whose causal dependencies have not arrived yet.
    pub pending: Option<PendingUpdate>,
    /// Delete ranges addressing clocks we have not seen yet.
    pub pending_ds: Option<DeleteSet>,
    pub gc: bool,
    /// Veto predicate consulted before collecting a tombstone.
    pub gc_filter: Option<Box<dyn Fn(Id) -> bool>>,
    /// Logical clock handed to search markers for LRU eviction.
    pub marker_clock: u64,
    /// Guids of live sub-documents.
    pub subdocs: HashMap<Id, SmartString>,
}

impl Store {
    pub fn new(client: ClientId, gc: bool) -> Self {
        Store {
            client,
            blocks: StructStore::new(),
            branches: HashMap::new(),
            pending: None,
            pending_ds: None,
            gc,
            gc_filter: None,
            marker_clock: 0,
            subdocs: HashMap::new(),
        }
    }

    pub fn branch(&self, id: &BranchId) -> &Branch {
        self.branches.get(id).expect("missing branch")
    }

    pub fn branch_mut(&mut self, id: &BranchId) -> &mut Branch {
        self.branches.get_mut(id).expect("missing branch")
    }

    pub fn get_or_create_branch(
        &mut self,
        id: BranchId,
        kind: TypeKind,
        node_name: Option<SmartString>,
    ) -> &mut Branch {
        self.branches
            .entry(id.clone())
            .or_insert_with(|| Branch::new(id, kind, node_name))
    }

    /// Whether a container (or any ancestor) has been tombstoned.
    pub fn branch_deleted(&self, id: &BranchId) -> bool {
        match id {
            BranchId::Root(_) => false,
            BranchId::Nested(item_id) => match self.blocks.find(*item_id) {
                Ok(Struct::Item(item)) => item.deleted(),
                _ => true, // collected
            },
        }
    }

    /// Locate the struct covering `id` and split so that a struct starts
    /// exactly at `id`. Returns None when the range was collected (covered
    /// by a GC struct). New right halves land in `merge_out` so the closing
    /// transaction can try to recombine them.
    pub fn get_item_clean_start(
        &mut self,
        id: Id,
        merge_out: &mut Vec<Id>,
    ) -> Result<Option<Id>, Error> {
        let structs = self
            .blocks
            .structs_mut(id.client)
            .ok_or(Error::NotPresent(id))?;
        let index = StructStore::find_index(structs, id.client, id.clock)?;
        match &structs[index] {
            Struct::Item(item) if item.id.clock < id.clock => {
                let offset = id.clock - item.id.clock;
                self.split_at(id.client, index, offset, merge_out);
                Ok(Some(id))
            }
            Struct::Item(item) => Ok(Some(item.id)),
            _ => Ok(None),
        }
    }

    /// Locate the struct covering `id` and split so that a struct *ends*
    /// exactly at `id`. Returns the start id of that struct, or None when
    /// collected.
    pub fn get_item_clean_end(
        &mut self,
        id: Id,
        merge_out: &mut Vec<Id>,
    ) -> Result<Option<Id>, Error> {
        let structs = self
            .blocks
            .structs_mut(id.client)
            .ok_or(Error::NotPresent(id))?;
        let index = StructStore::find_index(structs, id.client, id.clock)?;
        match &structs[index] {
            Struct::Item(item) => {
                let start = item.id;
                if id.clock != item.last_id().clock {
                    let offset = id.clock - item.id.clock + 1;
                    self.split_at(id.client, index, offset, merge_out);
                }
                Ok(Some(start))
            }
            _ => Ok(None),
        }
    }

    /// Split the item at `index` of `client`'s segment at `offset`, fixing
    /// the old right neighbor's back pointer and the parent map tail.
    pub(crate) fn split_at(
        &mut self,
        client: ClientId,
        index: usize,
        offset: Clock,
        merge_out: &mut Vec<Id>,
    ) {
        let structs = self.blocks.structs_mut(client).unwrap();
        let item = structs[index].as_item_mut().expect("split of non-item");
        let right = item.split(offset);
        let right_id = right.id;
        let old_right = right.right;
        let parent = right.parent.clone();
        let parent_sub = right.parent_sub.clone();
        structs.insert(index + 1, Struct::Item(right));

        // The old right neighbor now has a new item on its left.
        if let Some(old_right) = old_right {
            self.blocks.item_mut(old_right).left = Some(right_id);
        } else if let (crate::item::Parent::Branch(bid), Some(sub)) = (&parent, &parent_sub) {
            // The split item was a map tail; the tail is the right half now.
            if let Some(branch) = self.branches.get_mut(bid) {
                if let Some(tail) = branch.map.get_mut(sub) {
                    *tail = right_id;
                }
            }
        }
        merge_out.push(right_id);
    }

    /// Split at both ends of `clock .. clock + len`, then return the start
    /// ids of every covered struct.
    pub fn slice_range(
        &mut self,
        client: ClientId,
        clock: Clock,
        len: Clock,
        merge_out: &mut Vec<Id>,
    ) -> Result<Vec<Id>, Error> {
        let _ = self.get_item_clean_start(Id::new(client, clock), merge_out)?;
        let _ = self.get_item_clean_end(Id::new(client, clock + len - 1), merge_out)?;
        let structs = self.blocks.structs(client);
        let mut index = StructStore::find_index(structs, client, clock)?;
        let mut out = Vec::new();
        while index < structs.len() && structs[index].id().clock < clock + len {
            out.push(structs[index].id());
            index += 1;
        }
        Ok(out)
    }

    pub fn next_marker_timestamp(&mut self) -> u64 {
        self.marker_clock += 1;
        self.marker_clock
    }
}

/// Snapshot of every deleted range currently in the store (tombstones and
/// collected ranges alike).
pub(crate) fn delete_set_from_store(blocks: &StructStore) -> DeleteSet {
    let mut ds = DeleteSet::new();
    for (_, structs) in blocks.clients() {
        for s in structs {
            match s {
                Struct::Item(item) if item.deleted() => ds.insert(item.id, item.len),
                Struct::Gc { id, len } => ds.insert(*id, *len),
                _ => {}
            }
        }
    }
    ds.sort_and_merge();
    ds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::item::Parent;
    use crate::Any;

    fn any_item(client: u32, clock: u32, n: usize) -> Struct {
        let values = (0..n).map(|i| Any::from(i as i64)).collect();
        Struct::Item(Item::new(
            Id::new(client, clock),
            None,
            None,
            Parent::Root("r".into()),
            None,
            Content::Any(values),
        ))
    }

    #[test]
    fn add_enforces_contiguity() {
        let mut ss = StructStore::new();
        ss.add(any_item(1, 0, 3)).unwrap();
        ss.add(any_item(1, 3, 2)).unwrap();
        assert!(ss.add(any_item(1, 6, 1)).is_err());
        assert_eq!(ss.get_state(1), 5);
        assert_eq!(ss.get_state(2), 0);
    }

    #[test]
    fn find_index_hits_every_offset() {
        let mut ss = StructStore::new();
        ss.add(any_item(1, 0, 4)).unwrap();
        ss.add(any_item(1, 4, 1)).unwrap();
        ss.add(any_item(1, 5, 10)).unwrap();
        let structs = ss.structs(1);
        for clock in 0..15u32 {
            let idx = StructStore::find_index(structs, 1, clock).unwrap();
            let s = &structs[idx];
            assert!(s.id().clock <= clock && clock < s.end_clock());
        }
        assert!(StructStore::find_index(structs, 1, 15).is_err());
        assert!(StructStore::find_index(&[], 2, 0).is_err());
    }

    #[test]
    fn clean_start_splits() {
        let mut store = Store::new(99, true);
        store.blocks.add(any_item(1, 0, 10)).unwrap();
        let mut merge = Vec::new();
        let id = store
            .get_item_clean_start(Id::new(1, 4), &mut merge)
            .unwrap()
            .unwrap();
        assert_eq!(id, Id::new(1, 4));
        assert_eq!(store.blocks.structs(1).len(), 2);
        assert_eq!(store.blocks.structs(1)[0].len(), 4);
        assert_eq!(store.blocks.structs(1)[1].id(), Id::new(1, 4));
        assert_eq!(merge, vec![Id::new(1, 4)]);

        // Splitting at an existing boundary is a no-op.
        let id = store
            .get_item_clean_start(Id::new(1, 4), &mut merge)
            .unwrap()
            .unwrap();
        assert_eq!(id, Id::new(1, 4));
        assert_eq!(store.blocks.structs(1).len(), 2);
    }

    #[test]
    fn clean_end_splits() {
        let mut store = Store::new(99, true);
        store.blocks.add(any_item(1, 0, 10)).unwrap();
        let mut merge = Vec::new();
        let id = store
            .get_item_clean_end(Id::new(1, 3), &mut merge)
            .unwrap()
            .unwrap();
        assert_eq!(id, Id::new(1, 0));
        let structs = store.blocks.structs(1);
        assert_eq!(structs.len(), 2);
        assert_eq!(structs[0].len(), 4);
        assert_eq!(structs[1].id(), Id::new(1, 4));
    }
}
