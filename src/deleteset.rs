use std::collections::HashMap;

use rle::MergableSpan;
use smallvec::SmallVec;

use crate::id::{ClientId, Clock, Id, IdRange};

/// Compact record of deleted clock ranges, per client. Ranges are kept
/// sorted and non-overlapping after [`DeleteSet::sort_and_merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteSet {
    clients: HashMap<ClientId, SmallVec<IdRange, 2>>,
}

impl DeleteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clients(&self) -> usize {
        self.clients.len()
    }

    /// Record `id .. id + len` as deleted. Appends run-length style; callers
    /// batching unordered ranges must normalize before queries.
    pub fn insert(&mut self, id: Id, len: Clock) {
        if len == 0 {
            return;
        }
        let ranges = self.clients.entry(id.client).or_default();
        let item = IdRange::new(id.clock, len);
        if let Some(last) = ranges.last_mut() {
            if last.can_append(&item) {
                last.append(item);
                return;
            }
        }
        ranges.push(item);
    }

    /// Sort ranges and merge overlapping or adjacent ones.
    pub fn sort_and_merge(&mut self) {
        for ranges in self.clients.values_mut() {
            ranges.sort_unstable_by_key(|r| r.clock);
            let mut write = 0;
            for read in 1..ranges.len() {
                let cur = ranges[read];
                let prev = &mut ranges[write];
                if cur.clock <= prev.end() {
                    let end = prev.end().max(cur.end());
                    prev.len = end - prev.clock;
                } else {
                    write += 1;
                    ranges[write] = cur;
                }
            }
            ranges.truncate(write + 1);
        }
    }

    /// Whether `id` falls in a recorded range. Assumes normalized ranges.
    pub fn is_deleted(&self, id: Id) -> bool {
        self.find_range(id).is_some()
    }

    fn find_range(&self, id: Id) -> Option<IdRange> {
        let ranges = self.clients.get(&id.client)?;
        let idx = ranges.partition_point(|r| r.clock <= id.clock);
        if idx == 0 {
            return None;
        }
        let r = ranges[idx - 1];
        r.contains(id.clock).then_some(r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &[IdRange])> + '_ {
        self.clients
            .iter()
            .map(|(client, ranges)| (*client, ranges.as_slice()))
    }

    /// Clients in descending id order, the iteration order of the codec.
    pub(crate) fn clients_desc(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.clients.keys().copied().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }

    pub(crate) fn ranges(&self, client: ClientId) -> &[IdRange] {
        self.clients
            .get(&client)
            .map(|r| r.as_slice())
            .unwrap_or(&[])
    }

    /// Union with another delete set, renormalizing.
    pub fn merge(&mut self, other: DeleteSet) {
        for (client, ranges) in other.clients {
            let own = self.clients.entry(client).or_default();
            own.extend(ranges);
        }
        self.sort_and_merge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_coalesces_adjacent() {
        let mut ds = DeleteSet::new();
        ds.insert(Id::new(1, 0), 3);
        ds.insert(Id::new(1, 3), 2);
        assert_eq!(ds.ranges(1), &[IdRange::new(0, 5)]);
    }

    #[test]
    fn sort_and_merge_overlaps() {
        let mut ds = DeleteSet::new();
        ds.insert(Id::new(1, 10), 5);
        ds.insert(Id::new(1, 0), 3);
        ds.insert(Id::new(1, 12), 6);
        ds.insert(Id::new(1, 2), 2);
        ds.sort_and_merge();
        assert_eq!(ds.ranges(1), &[IdRange::new(0, 4), IdRange::new(10, 8)]);
    }

    #[test]
    fn is_deleted_boundaries() {
        let mut ds = DeleteSet::new();
        ds.insert(Id::new(2, 5), 3);
        ds.sort_and_merge();
        assert!(!ds.is_deleted(Id::new(2, 4)));
        assert!(ds.is_deleted(Id::new(2, 5)));
        assert!(ds.is_deleted(Id::new(2, 7)));
        assert!(!ds.is_deleted(Id::new(2, 8)));
        assert!(!ds.is_deleted(Id::new(3, 5)));
    }

    #[test]
    fn merge_unions() {
        let mut a = DeleteSet::new();
        a.insert(Id::new(1, 0), 2);
        let mut b = DeleteSet::new();
        b.insert(Id::new(1, 2), 2);
        b.insert(Id::new(9, 0), 1);
        a.merge(b);
        assert_eq!(a.ranges(1), &[IdRange::new(0, 4)]);
        assert_eq!(a.ranges(9), &[IdRange::new(0, 1)]);
    }
}
