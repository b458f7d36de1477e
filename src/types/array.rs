use crate::branch::BranchId;
use crate::content::{In, Out};
use crate::error::Error;
use crate::transaction::Transaction;
use crate::types::SharedRef;
use crate::Any;

/// A shared, eventually consistent ordered sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRef(BranchId);

impl ArrayRef {
    pub(crate) fn from_branch(id: BranchId) -> Self {
        ArrayRef(id)
    }

    /// Insert `values` before position `index`.
    pub fn insert<V>(&self, txn: &mut Transaction<'_>, index: u32, values: V) -> Result<(), Error>
    where
        V: IntoIterator,
        V::Item: Into<In>,
    {
        let values: Vec<In> = values.into_iter().map(Into::into).collect();
        super::list_insert(txn, &self.0, index, values)
    }

    pub fn push_back<V: Into<In>>(&self, txn: &mut Transaction<'_>, value: V) -> Result<(), Error> {
        let index = self.len(txn);
        super::list_insert(txn, &self.0, index, vec![value.into()])
    }

    pub fn push_front<V: Into<In>>(
        &self,
        txn: &mut Transaction<'_>,
        value: V,
    ) -> Result<(), Error> {
        super::list_insert(txn, &self.0, 0, vec![value.into()])
    }

    /// Delete `len` values starting at `index`.
    pub fn remove_range(
        &self,
        txn: &mut Transaction<'_>,
        index: u32,
        len: u32,
    ) -> Result<(), Error> {
        super::list_remove(txn, &self.0, index, len)
    }

    pub fn get(&self, txn: &mut Transaction<'_>, index: u32) -> Option<Out> {
        super::list_get(txn, &self.0, index)
    }

    pub fn len(&self, txn: &Transaction<'_>) -> u32 {
        txn.store.branch(&self.0).len
    }

    pub fn is_empty(&self, txn: &Transaction<'_>) -> bool {
        self.len(txn) == 0
    }

    /// Snapshot of every live value in order.
    pub fn to_vec(&self, txn: &Transaction<'_>) -> Vec<Out> {
        super::list_values(txn.store, &self.0)
    }

    /// The values in `start..end`, clamped to the live length.
    pub fn slice(&self, txn: &Transaction<'_>, start: u32, end: u32) -> Vec<Out> {
        let mut values = super::list_values(txn.store, &self.0);
        let end = (end as usize).min(values.len());
        let start = (start as usize).min(end);
        values.drain(..start);
        values.truncate(end - start);
        values
    }

    pub fn to_json(&self, txn: &Transaction<'_>) -> Any {
        super::to_json(txn.store, &self.0)
    }
}

impl SharedRef for ArrayRef {
    fn branch_id(&self) -> &BranchId {
        &self.0
    }
}
