use crate::branch::BranchId;
use crate::content::{In, Out};
use crate::error::Error;
use crate::transaction::Transaction;
use crate::types::SharedRef;
use crate::SmartString;

fn check_xml_child(value: &In) -> Result<(), Error> {
    match value {
        In::XmlElement { .. } | In::XmlText(_) => Ok(()),
        _ => Err(Error::UnexpectedContent),
    }
}

/// An ordered sequence of xml nodes with no tag of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlFragmentRef(BranchId);

impl XmlFragmentRef {
    pub(crate) fn from_branch(id: BranchId) -> Self {
        XmlFragmentRef(id)
    }

    /// Insert child nodes before position `index`. Only xml nodes are
    /// accepted here.
    pub fn insert<V>(&self, txn: &mut Transaction<'_>, index: u32, children: V) -> Result<(), Error>
    where
        V: IntoIterator<Item = In>,
    {
        let children: Vec<In> = children.into_iter().collect();
        for child in &children {
            check_xml_child(child)?;
        }
        super::list_insert(txn, &self.0, index, children)
    }

    pub fn push<V: Into<In>>(&self, txn: &mut Transaction<'_>, child: V) -> Result<(), Error> {
        let index = self.len(txn);
        self.insert(txn, index, [child.into()])
    }

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

    pub fn children(&self, txn: &Transaction<'_>) -> Vec<Out> {
        super::list_values(txn.store, &self.0)
    }
}

impl SharedRef for XmlFragmentRef {
    fn branch_id(&self) -> &BranchId {
        &self.0
    }
}

/// A tagged xml node: attributes behave like a map, children like a
/// fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElementRef(BranchId);

impl XmlElementRef {
    pub(crate) fn from_branch(id: BranchId) -> Self {
        XmlElementRef(id)
    }

    pub fn tag(&self, txn: &Transaction<'_>) -> SmartString {
        txn.store
            .branch(&self.0)
            .node_name
            .clone()
            .unwrap_or_default()
    }

    pub fn insert_attribute<K, V>(
        &self,
        txn: &mut Transaction<'_>,
        key: K,
        value: V,
    ) -> Result<(), Error>
    where
        K: Into<SmartString>,
        V: Into<In>,
    {
        super::map_set(txn, &self.0, key.into(), value.into())
    }

    pub fn get_attribute(&self, txn: &Transaction<'_>, key: &str) -> Option<Out> {
        super::map_get(txn.store, &self.0, key)
    }

    pub fn remove_attribute(&self, txn: &mut Transaction<'_>, key: &str) -> Option<Out> {
        super::map_remove(txn, &self.0, key)
    }

    pub fn attributes(&self, txn: &Transaction<'_>) -> Vec<SmartString> {
        super::map_keys(txn.store, &self.0)
    }

    pub fn insert<V>(&self, txn: &mut Transaction<'_>, index: u32, children: V) -> Result<(), Error>
    where
        V: IntoIterator<Item = In>,
    {
        let children: Vec<In> = children.into_iter().collect();
        for child in &children {
            check_xml_child(child)?;
        }
        super::list_insert(txn, &self.0, index, children)
    }

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

    pub fn children(&self, txn: &Transaction<'_>) -> Vec<Out> {
        super::list_values(txn.store, &self.0)
    }
}

impl SharedRef for XmlElementRef {
    fn branch_id(&self) -> &BranchId {
        &self.0
    }
}
