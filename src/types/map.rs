use crate::branch::BranchId;
use crate::content::{In, Out};
use crate::error::Error;
use crate::transaction::Transaction;
use crate::types::SharedRef;
use crate::{Any, SmartString};

/// A shared key/value map with last-writer-wins keys (ties broken by client
/// id; older versions stay reachable as tombstones until collected).
#[derive(Debug, Clone, PartialEq)]
pub struct MapRef(BranchId);

impl MapRef {
    pub(crate) fn from_branch(id: BranchId) -> Self {
        MapRef(id)
    }

    pub fn insert<K, V>(&self, txn: &mut Transaction<'_>, key: K, value: V) -> Result<(), Error>
    where
        K: Into<SmartString>,
        V: Into<In>,
    {
        super::map_set(txn, &self.0, key.into(), value.into())
    }

    pub fn get(&self, txn: &Transaction<'_>, key: &str) -> Option<Out> {
        super::map_get(txn.store, &self.0, key)
    }

    pub fn contains_key(&self, txn: &Transaction<'_>, key: &str) -> bool {
        self.get(txn, key).is_some()
    }

    /// Remove a key, returning the value it had.
    pub fn remove(&self, txn: &mut Transaction<'_>, key: &str) -> Option<Out> {
        super::map_remove(txn, &self.0, key)
    }

    pub fn keys(&self, txn: &Transaction<'_>) -> Vec<SmartString> {
        super::map_keys(txn.store, &self.0)
    }

    pub fn len(&self, txn: &Transaction<'_>) -> u32 {
        self.keys(txn).len() as u32
    }

    pub fn is_empty(&self, txn: &Transaction<'_>) -> bool {
        self.len(txn) == 0
    }

    pub fn clear(&self, txn: &mut Transaction<'_>) {
        for key in self.keys(txn) {
            super::map_remove(txn, &self.0, &key);
        }
    }

    pub fn to_json(&self, txn: &Transaction<'_>) -> Any {
        super::to_json(txn.store, &self.0)
    }
}

impl SharedRef for MapRef {
    fn branch_id(&self) -> &BranchId {
        &self.0
    }
}
