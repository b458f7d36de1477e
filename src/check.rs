//! Self-check of the structural invariants. Called from tests after every
//! interesting operation; cheap enough to sprinkle liberally there, not
//! meant for production paths.

use std::collections::HashSet;

use crate::branch::BranchId;
use crate::doc::Doc;
use crate::item::Struct;
use crate::store::Store;

impl Doc {
    /// Assert every structural invariant: per-client clock contiguity,
    /// linked-list symmetry, container length sums, map tail shape, and
    /// search marker coherence. Panics on violation.
    pub fn dbg_check(&self) {
        check_store(&self.store);
    }
}

pub(crate) fn check_store(store: &Store) {
    // Clock contiguity: no gaps, no overlaps, no empty structs.
    for (client, structs) in store.blocks.clients() {
        let mut clock = 0;
        for s in structs {
            assert!(s.len() > 0, "empty struct for client {}", client);
            assert!(!s.is_skip(), "skip struct in store for client {}", client);
            assert_eq!(
                s.id().clock,
                clock,
                "clock gap in client {} segment",
                client
            );
            clock += s.len();
        }
    }

    for (id, branch) in &store.branches {
        // Sequence chain: link symmetry and the length sum.
        let mut live_len = 0;
        let mut prev: Option<crate::Id> = None;
        let mut cur = branch.start;
        let mut seen = HashSet::new();
        while let Some(item_id) = cur {
            assert!(seen.insert(item_id), "cycle in list of {:?}", id);
            let item = store.blocks.item(item_id);
            assert_eq!(item.left, prev, "left link broken at {} in {:?}", item_id, id);
            assert!(
                item.parent_sub.is_none(),
                "map item {} linked into sequence of {:?}",
                item_id,
                id
            );
            if item.countable() && !item.deleted() {
                live_len += item.len;
            }
            prev = cur;
            cur = item.right;
        }
        assert_eq!(
            branch.len, live_len,
            "length sum mismatch in {:?}: cached {} counted {}",
            id, branch.len, live_len
        );

        // Map tails point at the end of their chains.
        for (key, tail) in &branch.map {
            let tail_item = store.blocks.item(*tail);
            assert!(
                tail_item.right.is_none(),
                "map tail {} for key {} in {:?} has a right neighbor",
                tail,
                key,
                id
            );
            assert_eq!(tail_item.parent_sub.as_ref(), Some(key));
            // Walking left stays within the same key and terminates.
            let mut cur = tail_item.left;
            let mut hops = 0u32;
            while let Some(prev_id) = cur {
                let prev = store.blocks.item(prev_id);
                assert_eq!(prev.parent_sub.as_ref(), Some(key));
                assert!(prev.id < tail_item.id || prev.id.client != tail_item.id.client);
                cur = prev.left;
                hops += 1;
                assert!(hops < 100_000, "unbounded key chain in {:?}", id);
            }
        }

        // Marker coherence: the cached index equals the live prefix length.
        if let Some(markers) = &branch.markers {
            for marker in markers {
                let mut index = 0;
                let mut cur = branch.start;
                let mut found = false;
                while let Some(item_id) = cur {
                    if item_id == marker.item {
                        found = true;
                        break;
                    }
                    let item = store.blocks.item(item_id);
                    if item.countable() && !item.deleted() {
                        index += item.len;
                    }
                    cur = item.right;
                }
                assert!(found, "marker target {} not in {:?}", marker.item, id);
                assert_eq!(
                    index, marker.index,
                    "marker for {} in {:?} cached index {} actual {}",
                    marker.item, id, marker.index, index
                );
            }
        }
    }

    // Origins of every live item point at real clock space.
    for (_, structs) in store.blocks.clients() {
        for s in structs {
            if let Struct::Item(item) = s {
                if let Some(origin) = item.origin {
                    assert!(origin.clock < store.blocks.get_state(origin.client));
                }
                if let Some(right_origin) = item.right_origin {
                    assert!(right_origin.clock < store.blocks.get_state(right_origin.client));
                }
                if let crate::item::Parent::Branch(parent) = &item.parent {
                    if !item.deleted() {
                        assert!(
                            store.branches.contains_key(parent)
                                || matches!(parent, BranchId::Root(_)),
                            "live item {} has no parent branch",
                            item.id
                        );
                    }
                }
            }
        }
    }
}
