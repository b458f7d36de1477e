use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use crate::content::TypeKind;
use crate::id::Id;
use crate::marker::SearchMarker;
use crate::SmartString;

/// Names a container. Roots are registered on the document by name; nested
/// containers are addressed by the id of the item embedding them (stable:
/// type-bearing items never split or merge).
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BranchId {
    Root(SmartString),
    Nested(Id),
}

impl Debug for BranchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BranchId::Root(name) => write!(f, "root({})", name),
            BranchId::Nested(id) => write!(f, "nested({})", id),
        }
    }
}

/// Shared state of one container instance: the head of the document-order
/// list, the per-key tail pointer map, and the live sequence length.
pub(crate) struct Branch {
    pub id: BranchId,
    pub kind: TypeKind,
    /// Tag name for xml elements and hooks.
    pub node_name: Option<SmartString>,
    /// Head of the document-order linked list, or None while empty.
    pub start: Option<Id>,
    /// Map key -> most recently integrated item for that key. The key's
    /// current value is the (undeleted) tail of the left-linked chain.
    pub map: HashMap<SmartString, Id>,
    /// Sum of countable lengths of undeleted sequence items.
    pub len: u32,
    /// Bounded cache of positional lookups. None for kinds that are never
    /// indexed positionally (maps, hooks).
    pub markers: Option<Vec<SearchMarker>>,
}

impl Branch {
    pub fn new(id: BranchId, kind: TypeKind, node_name: Option<SmartString>) -> Self {
        let markers = if kind.uses_markers() {
            Some(Vec::new())
        } else {
            None
        };
        Branch {
            id,
            kind,
            node_name,
            start: None,
            map: HashMap::new(),
            len: 0,
            markers,
        }
    }

    /// The item embedding this container, or None for roots.
    pub fn item_id(&self) -> Option<Id> {
        match &self.id {
            BranchId::Root(_) => None,
            BranchId::Nested(id) => Some(*id),
        }
    }

    /// Called when an abstract root gets its first typed accessor.
    pub fn retype(&mut self, kind: TypeKind) {
        debug_assert_eq!(self.kind, TypeKind::Abstract);
        self.kind = kind;
        if kind.uses_markers() && self.markers.is_none() {
            self.markers = Some(Vec::new());
        }
    }
}

impl TypeKind {
    fn uses_markers(&self) -> bool {
        matches!(
            self,
            TypeKind::Array
                | TypeKind::Text
                | TypeKind::XmlElement
                | TypeKind::XmlFragment
                | TypeKind::XmlText
                | TypeKind::Abstract
        )
    }
}

impl Debug for Branch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("start", &self.start)
            .field("len", &self.len)
            .field("map", &self.map)
            .finish_non_exhaustive()
    }
}
