use crate::branch::BranchId;
use crate::content::In;
use crate::error::Error;
use crate::transaction::Transaction;
use crate::types::SharedRef;

/// Shared text. Positions are measured in utf-16 code units, matching the
/// wire format's length accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRef(BranchId);

impl TextRef {
    pub(crate) fn from_branch(id: BranchId) -> Self {
        TextRef(id)
    }

    pub fn insert(&self, txn: &mut Transaction<'_>, index: u32, chunk: &str) -> Result<(), Error> {
        super::text_insert(txn, &self.0, index, chunk)
    }

    pub fn push(&self, txn: &mut Transaction<'_>, chunk: &str) -> Result<(), Error> {
        let index = self.len(txn);
        super::text_insert(txn, &self.0, index, chunk)
    }

    /// Insert an opaque embedded value (an image reference, a mention) at a
    /// text position.
    pub fn insert_embed(
        &self,
        txn: &mut Transaction<'_>,
        index: u32,
        embed: crate::Any,
    ) -> Result<(), Error> {
        super::list_insert(txn, &self.0, index, vec![In::Embed(embed)])
    }

    /// Delete `len` utf-16 units starting at `index`.
    pub fn remove_range(
        &self,
        txn: &mut Transaction<'_>,
        index: u32,
        len: u32,
    ) -> Result<(), Error> {
        super::list_remove(txn, &self.0, index, len)
    }

    /// Length in utf-16 code units.
    pub fn len(&self, txn: &Transaction<'_>) -> u32 {
        txn.store.branch(&self.0).len
    }

    pub fn is_empty(&self, txn: &Transaction<'_>) -> bool {
        self.len(txn) == 0
    }

    pub fn get_string(&self, txn: &Transaction<'_>) -> String {
        super::text_string(txn.store, &self.0)
    }
}

impl SharedRef for TextRef {
    fn branch_id(&self) -> &BranchId {
        &self.0
    }
}
