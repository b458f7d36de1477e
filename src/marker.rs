use crate::id::Id;

/// Upper bound on cached positions per container.
pub(crate) const MAX_SEARCH_MARKERS: usize = 80;

/// A cached `(item, index)` pair. `index` is the document position of the
/// item's first content unit. `timestamp` is a document-wide logical clock
/// used for oldest-first eviction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SearchMarker {
    pub item: Id,
    pub index: u32,
    pub timestamp: u64,
}
