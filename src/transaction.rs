use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display, Formatter};

use crate::branch::BranchId;
use crate::content::{Content, TypeKind};
use crate::deleteset::DeleteSet;
use crate::encoding::{Encoder, v1::EncoderV1, v2::EncoderV2};
use crate::error::Error;
use crate::event::{
    ancestors, create_event, path_of, Event, SubdocsEvent, TransactionSummary,
};
use crate::id::{ClientId, Id};
use crate::item::{Parent, Struct};
use crate::store::{StateVector, Store, StructStore};
use crate::update::{encode_store_diff, Update};
use crate::SmartString;

/// Caller supplied tag identifying where a transaction came from. Carried on
/// emitted update events so providers can ignore their own echoes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Origin(SmartString);

impl From<&str> for Origin {
    fn from(s: &str) -> Self {
        Origin(s.into())
    }
}

impl From<String> for Origin {
    fn from(s: String) -> Self {
        Origin(s.into())
    }
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Origin({})", self.0)
    }
}

/// A batch of mutations with atomic observer and update-emission boundaries.
/// Created through [`crate::Doc::transact`]; one per document at a time.
pub struct Transaction<'doc> {
    pub(crate) store: &'doc mut Store,
    /// State vector captured when the transaction opened.
    pub(crate) before_state: StateVector,
    /// Filled at close.
    pub(crate) after_state: StateVector,
    /// Deletions performed in this transaction.
    pub(crate) delete_set: DeleteSet,
    /// Changed containers -> changed map keys (None = sequence changed).
    pub(crate) changed: HashMap<BranchId, HashSet<Option<SmartString>>>,
    /// Right halves produced by splits, to be recombined at close.
    pub(crate) merge_blocks: Vec<Id>,
    pub(crate) origin: Option<Origin>,
    /// True for local mutations, false while applying remote updates.
    pub(crate) local: bool,
    pub(crate) subdocs_added: Vec<SmartString>,
    pub(crate) subdocs_removed: Vec<SmartString>,
    pub(crate) subdocs_loaded: Vec<SmartString>,
    /// Set when remote formatting landed in a text container.
    pub(crate) needs_formatting_cleanup: bool,
}

/// Everything the document dispatches after the store mutations settled.
pub(crate) struct CommitOutput {
    pub events: Vec<(BranchId, Event)>,
    pub deep_events: Vec<(BranchId, Vec<Event>)>,
    pub update_v1: Option<Vec<u8>>,
    pub update_v2: Option<Vec<u8>>,
    pub summary: TransactionSummary,
    pub subdocs: Option<SubdocsEvent>,
}

impl<'doc> Transaction<'doc> {
    pub(crate) fn new(store: &'doc mut Store, origin: Option<Origin>, local: bool) -> Self {
        let before_state = store.blocks.state_vector();
        Transaction {
            store,
            before_state,
            after_state: StateVector::new(),
            delete_set: DeleteSet::new(),
            changed: HashMap::new(),
            merge_blocks: Vec::new(),
            origin,
            local,
            subdocs_added: Vec::new(),
            subdocs_removed: Vec::new(),
            subdocs_loaded: Vec::new(),
            needs_formatting_cleanup: false,
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn local(&self) -> bool {
        self.local
    }

    pub fn before_state(&self) -> &StateVector {
        &self.before_state
    }

    /// Record a change for observer dispatch. Containers created inside this
    /// very transaction are skipped - there is nobody observing them yet.
    pub(crate) fn add_changed(&mut self, target: BranchId, sub: Option<SmartString>) {
        let include = match &target {
            BranchId::Root(_) => true,
            BranchId::Nested(item_id) => {
                item_id.clock < self.before_state.get(item_id.client)
                    && matches!(
                        self.store.blocks.find(*item_id),
                        Ok(Struct::Item(item)) if !item.deleted()
                    )
            }
        };
        if include {
            self.changed.entry(target).or_default().insert(sub);
        }
    }

    /// Tombstone the item starting at `id`, recursing into embedded
    /// containers (iteratively - container trees can be deep).
    pub(crate) fn delete_item(&mut self, id: Id) {
        let mut queue: Vec<Id> = vec![id];
        while let Some(id) = queue.pop() {
            if !matches!(self.store.blocks.find(id), Ok(Struct::Item(item)) if !item.deleted()) {
                continue;
            }
            let item = self.store.blocks.item_mut(id);
            item.mark_deleted();
            let len = item.len;
            let parent = item.parent.clone();
            let parent_sub = item.parent_sub.clone();
            let countable = item.countable();
            let is_type = matches!(item.content, Content::Type(_));
            let doc_guid = match &item.content {
                Content::Doc { guid, .. } => Some(guid.clone()),
                _ => None,
            };

            self.delete_set.insert(id, len);
            if let Parent::Branch(target) = parent {
                if countable && parent_sub.is_none() {
                    self.store.branch_mut(&target).len -= len;
                }
                self.add_changed(target, parent_sub);
            }
            if let Some(guid) = doc_guid {
                self.store.subdocs.remove(&id);
                self.subdocs_removed.push(guid);
            }
            if is_type {
                let nested = BranchId::Nested(id);
                if let Some(branch) = self.store.branches.get(&nested) {
                    let mut children: Vec<Id> = branch.map.values().copied().collect();
                    let mut cur = branch.start;
                    while let Some(child) = cur {
                        let item = self.store.blocks.item(child);
                        children.push(child);
                        cur = item.right;
                    }
                    for child in children {
                        if self.store.blocks.item(child).deleted() {
                            self.merge_blocks.push(child);
                        } else {
                            queue.push(child);
                        }
                    }
                }
                self.changed.remove(&nested);
            }
        }
    }

    /// Apply a remote delete set: split covered structs at range boundaries
    /// and tombstone them. Ranges addressing clocks we have not seen yet are
    /// returned for the pending-deletes buffer.
    pub(crate) fn apply_delete(&mut self, ds: &DeleteSet) -> Option<DeleteSet> {
        let mut unapplied = DeleteSet::new();
        for (client, ranges) in ds.iter() {
            let state = self.store.blocks.get_state(client);
            for range in ranges {
                if range.clock >= state {
                    unapplied.insert(Id::new(client, range.clock), range.len);
                    continue;
                }
                if state < range.end() {
                    unapplied.insert(Id::new(client, state), range.end() - state);
                }
                let len = range.end().min(state) - range.clock;
                let covered = self
                    .store
                    .slice_range(client, range.clock, len, &mut self.merge_blocks)
                    .unwrap_or_default();
                for id in covered {
                    if matches!(self.store.blocks.find(id), Ok(Struct::Item(item)) if !item.deleted())
                    {
                        self.delete_item(id);
                    }
                }
            }
        }
        if unapplied.is_empty() {
            None
        } else {
            unapplied.sort_and_merge();
            Some(unapplied)
        }
    }

    /// Integrate a decoded update: structs first (buffering whatever lacks
    /// causal dependencies), then the delete set, then a retry of the
    /// pending buffer if this update unblocked it.
    pub(crate) fn apply_update(&mut self, update: Update) -> Result<(), Error> {
        let (fresh_pending, ds) = update.integrate_structs(self)?;

        let mut retry = false;
        match self.store.pending.take() {
            Some(mut pending) => {
                for (client, clock) in pending.missing.iter() {
                    if clock < self.store.blocks.get_state(client) {
                        retry = true;
                        break;
                    }
                }
                if let Some(fresh) = fresh_pending {
                    for (client, clock) in fresh.missing.iter() {
                        pending.missing.set_min(client, clock);
                    }
                    pending.update = Update::merge(vec![pending.update, fresh.update]);
                }
                self.store.pending = Some(pending);
            }
            None => self.store.pending = fresh_pending,
        }

        let unapplied = self.apply_delete(&ds);
        let unapplied_pending = match self.store.pending_ds.take() {
            Some(pending_ds) => self.apply_delete(&pending_ds),
            None => None,
        };
        self.store.pending_ds = match (unapplied, unapplied_pending) {
            (Some(mut a), Some(b)) => {
                a.merge(b);
                Some(a)
            }
            (Some(ds), None) | (None, Some(ds)) => Some(ds),
            (None, None) => None,
        };

        if retry {
            if let Some(pending) = self.store.pending.take() {
                self.apply_update(pending.update)?;
            }
        }
        Ok(())
    }

    /// Close the transaction: normalize deletions, snapshot the new state,
    /// compute observer events, clean up formatting, collect garbage, merge
    /// adjacent structs, rotate a colliding client id, and encode updates.
    pub(crate) fn commit(mut self, encode_v1: bool, encode_v2: bool) -> CommitOutput {
        self.delete_set.sort_and_merge();
        self.after_state = self.store.blocks.state_vector();

        // Remote restructuring invalidates cached positions wholesale.
        if !self.local {
            for target in self.changed.keys() {
                if let Some(branch) = self.store.branches.get_mut(target) {
                    if let Some(markers) = branch.markers.as_mut() {
                        markers.clear();
                    }
                }
            }
        }

        let (events, deep_events) = self.collect_events();

        if self.needs_formatting_cleanup {
            self.cleanup_formatting();
        }

        if self.store.gc {
            self.try_gc();
        }
        self.try_merge_deleted();
        self.merge_new_structs();

        // A remote peer wrote into our clock space: our id is burned.
        if !self.local
            && self.after_state.get(self.store.client) != self.before_state.get(self.store.client)
        {
            self.store.client = rand::random::<u32>();
        }

        let changed_structs = self.after_state != self.before_state;
        let emit = changed_structs || !self.delete_set.is_empty();
        let update_v1 = (encode_v1 && emit).then(|| {
            let mut enc = EncoderV1::new();
            encode_store_diff(&mut enc, &self.store.blocks, &self.before_state, &self.delete_set);
            enc.to_vec()
        });
        let update_v2 = (encode_v2 && emit).then(|| {
            let mut enc = EncoderV2::new();
            encode_store_diff(&mut enc, &self.store.blocks, &self.before_state, &self.delete_set);
            enc.to_vec()
        });

        let subdocs = (!self.subdocs_added.is_empty()
            || !self.subdocs_removed.is_empty()
            || !self.subdocs_loaded.is_empty())
        .then(|| SubdocsEvent {
            added: std::mem::take(&mut self.subdocs_added),
            removed: std::mem::take(&mut self.subdocs_removed),
            loaded: std::mem::take(&mut self.subdocs_loaded),
        });

        CommitOutput {
            events,
            deep_events,
            update_v1,
            update_v2,
            summary: TransactionSummary {
                origin: self.origin.clone(),
                local: self.local,
                before_state: self.before_state.clone(),
                after_state: self.after_state.clone(),
                delete_set: self.delete_set.clone(),
            },
            subdocs,
        }
    }

    /// Shallow events for each changed container, plus per-ancestor event
    /// lists for deep observers (path length ascending).
    fn collect_events(&self) -> (Vec<(BranchId, Event)>, Vec<(BranchId, Vec<Event>)>) {
        let mut events = Vec::new();
        let mut deep: HashMap<BranchId, Vec<Event>> = HashMap::new();

        let mut changed: Vec<(&BranchId, &HashSet<Option<SmartString>>)> =
            self.changed.iter().collect();
        // Deterministic dispatch order.
        changed.sort_by(|a, b| a.0.cmp(b.0));

        for (target, subs) in changed {
            if self.store.branches.get(target).is_none() || self.store.branch_deleted(target) {
                continue;
            }
            let event = create_event(self, target, subs);
            let abs_path = path_of(self.store, target);
            let chain = ancestors(self.store, target);

            // The container itself sees the event with an empty path...
            deep.entry(target.clone())
                .or_default()
                .push(event.clone());
            // ...each ancestor with the path from itself down to the target.
            for (depth, ancestor) in chain.iter().enumerate() {
                let mut scoped = event.clone();
                scoped.path = abs_path[abs_path.len() - 1 - depth..].to_vec();
                deep.entry(ancestor.clone()).or_default().push(scoped);
            }
            events.push((target.clone(), event));
        }

        let mut deep_events: Vec<(BranchId, Vec<Event>)> = deep
            .into_iter()
            .map(|(target, mut list)| {
                list.sort_by_key(|e| e.path.len());
                (target, list)
            })
            .collect();
        deep_events.sort_by(|a, b| a.0.cmp(&b.0));
        (events, deep_events)
    }

    /// Drop format boundaries that no longer affect any content: a format
    /// item immediately followed by another for the same key (no countable
    /// content between the two) is dead weight.
    fn cleanup_formatting(&mut self) {
        let targets: Vec<BranchId> = self
            .changed
            .keys()
            .filter(|target| {
                self.store
                    .branches
                    .get(target)
                    .map(|b| matches!(b.kind, TypeKind::Text | TypeKind::XmlText))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for target in targets {
            let mut redundant: Vec<Id> = Vec::new();
            let mut pending: HashMap<SmartString, Id> = HashMap::new();
            let mut cur = self.store.branch(&target).start;
            while let Some(id) = cur {
                let item = self.store.blocks.item(id);
                if !item.deleted() {
                    match &item.content {
                        Content::Format { key, .. } => {
                            if let Some(prev) = pending.insert(key.clone(), id) {
                                redundant.push(prev);
                            }
                        }
                        _ if item.countable() => pending.clear(),
                        _ => {}
                    }
                }
                cur = item.right;
            }
            for id in redundant {
                self.delete_item(id);
            }
        }
    }

    /// Replace collectable tombstones: content shrinks to a bare `Deleted`
    /// length, and items under destroyed containers become `GC` structs.
    fn try_gc(&mut self) {
        let ranges: Vec<(ClientId, Vec<crate::id::IdRange>)> = self
            .delete_set
            .iter()
            .map(|(client, ranges)| (client, ranges.to_vec()))
            .collect();

        for (client, ranges) in ranges {
            for range in ranges {
                let structs = self.store.blocks.structs(client);
                let mut index = match StructStore::find_index(structs, client, range.clock) {
                    Ok(index) => index,
                    Err(_) => continue,
                };
                loop {
                    let structs = self.store.blocks.structs(client);
                    if index >= structs.len() || structs[index].id().clock >= range.end() {
                        break;
                    }
                    let start = structs[index].id();
                    if let Struct::Item(item) = &structs[index] {
                        let allowed = self
                            .store
                            .gc_filter
                            .as_ref()
                            .map(|filter| filter(start))
                            .unwrap_or(true);
                        if item.deleted() && !item.keep() && allowed {
                            gc_item(self.store, start, false);
                        }
                    }
                    index += 1;
                }
            }
        }
    }

    /// Merge adjacent structs inside every deleted range.
    fn try_merge_deleted(&mut self) {
        let ranges: Vec<(ClientId, Vec<crate::id::IdRange>)> = self
            .delete_set
            .iter()
            .map(|(client, ranges)| (client, ranges.to_vec()))
            .collect();
        for (client, ranges) in ranges {
            for range in ranges {
                let structs = self.store.blocks.structs(client);
                if structs.is_empty() || range.clock >= self.store.blocks.get_state(client) {
                    continue;
                }
                let last = match StructStore::find_index(structs, client, range.end() - 1) {
                    Ok(index) => (index + 1).min(structs.len() - 1),
                    Err(_) => continue,
                };
                let mut index = last;
                while index > 0 {
                    let structs = self.store.blocks.structs(client);
                    if index >= structs.len() {
                        index -= 1;
                        continue;
                    }
                    if structs[index].id().clock < range.clock {
                        break;
                    }
                    try_merge_with_left(self.store, client, index);
                    index -= 1;
                }
            }
        }
    }

    /// Recombine structs created in this transaction with their left
    /// neighbors, plus any split remainders recorded along the way.
    fn merge_new_structs(&mut self) {
        for (client, after) in self.after_state.clone().iter() {
            let before = self.before_state.get(client);
            if before == after {
                continue;
            }
            let structs = self.store.blocks.structs(client);
            if structs.is_empty() {
                continue;
            }
            let first = StructStore::find_index(structs, client, before)
                .unwrap_or(0)
                .max(1);
            let mut index = structs.len() - 1;
            while index >= first {
                try_merge_with_left(self.store, client, index);
                index -= 1;
            }
        }

        for id in std::mem::take(&mut self.merge_blocks) {
            let structs = self.store.blocks.structs(id.client);
            if let Ok(index) = StructStore::find_index(structs, id.client, id.clock) {
                try_merge_with_left(self.store, id.client, index);
            }
        }
    }
}

/// Merge `structs[index]` into its left neighbor when eligible. Fixes the
/// map tail pointer and search markers that referenced the absorbed struct.
pub(crate) fn try_merge_with_left(store: &mut Store, client: ClientId, index: usize) -> bool {
    let structs = store.blocks.structs(client);
    if index == 0 || index >= structs.len() {
        return false;
    }
    match (&structs[index - 1], &structs[index]) {
        (Struct::Gc { id, len }, Struct::Gc { .. }) => {
            if id.clock + len == structs[index].id().clock {
                let absorbed = structs[index].len();
                let vec = store.blocks.structs_mut(client).unwrap();
                vec.remove(index);
                match &mut vec[index - 1] {
                    Struct::Gc { len, .. } => *len += absorbed,
                    _ => unreachable!(),
                }
                true
            } else {
                false
            }
        }
        (Struct::Item(left), Struct::Item(right)) if left.can_merge(right) => {
            let left_id = left.id;
            let left_len = left.len;
            let left_live = !left.deleted() && left.countable();
            let right_id = right.id;
            let right_sub = right.parent_sub.clone();
            let parent = match &right.parent {
                Parent::Branch(target) => Some(target.clone()),
                _ => None,
            };

            let vec = store.blocks.structs_mut(client).unwrap();
            let removed = vec.remove(index);
            let right_item = match removed {
                Struct::Item(item) => item,
                _ => unreachable!(),
            };
            vec[index - 1].as_item_mut().unwrap().merge(right_item);

            // The absorbed struct's right neighbor gets a new left.
            let new_right = vec[index - 1].as_item().unwrap().right;
            if let Some(neighbor) = new_right {
                store.blocks.item_mut(neighbor).left = Some(left_id);
            }

            if let Some(target) = parent {
                if let Some(branch) = store.branches.get_mut(&target) {
                    if let Some(sub) = right_sub {
                        if branch.map.get(&sub) == Some(&right_id) {
                            branch.map.insert(sub, left_id);
                        }
                    }
                    if let Some(markers) = branch.markers.as_mut() {
                        for marker in markers.iter_mut() {
                            if marker.item == right_id {
                                marker.item = left_id;
                                if left_live {
                                    marker.index -= left_len;
                                }
                            }
                        }
                    }
                }
            }
            true
        }
        _ => false,
    }
}

/// Collect one tombstone: swap its payload for a bare length, or drop the
/// whole struct to a `GC` range when the surrounding container is gone.
/// Embedded containers take their entire subtree with them.
pub(crate) fn gc_item(store: &mut Store, id: Id, parent_collected: bool) {
    let mut queue: Vec<(Id, bool)> = vec![(id, parent_collected)];
    while let Some((id, parent_collected)) = queue.pop() {
        let item = match store.blocks.find(id) {
            Ok(Struct::Item(item)) if item.deleted() => item,
            _ => continue,
        };
        let len = item.len;

        if matches!(item.content, Content::Type(_)) {
            let nested = BranchId::Nested(id);
            if let Some(branch) = store.branches.remove(&nested) {
                let mut cur = branch.start;
                while let Some(child) = cur {
                    queue.push((child, true));
                    cur = store.blocks.item(child).right;
                }
                for tail in branch.map.values() {
                    let mut cur = Some(*tail);
                    while let Some(child) = cur {
                        queue.push((child, true));
                        cur = store.blocks.item(child).left;
                    }
                }
            }
        }

        if parent_collected {
            store.blocks.replace(id, Struct::Gc { id, len });
        } else {
            let item = store.blocks.item_mut(id);
            item.content = Content::Deleted(len);
            item.info &= !crate::item::ItemFlags::COUNTABLE;
        }
    }
}
