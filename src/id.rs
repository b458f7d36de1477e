use std::fmt::{Debug, Display, Formatter};

use rle::{HasLength, MergableSpan, Searchable, SplitableSpanHelpers};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A peer participating in a document, named by a random 32 bit integer.
pub type ClientId = u32;

/// Per-client monotonically increasing counter addressing one unit of
/// inserted content. 32 bits on the wire; exhaustion is fatal and the host
/// is expected to rotate the client id long before that.
pub type Clock = u32;

/// Identifies a single content unit in a client's append-only history. An
/// item of length `L` starting at `Id { client, clock }` occupies clocks
/// `clock .. clock + L`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Id {
    pub client: ClientId,
    pub clock: Clock,
}

impl Id {
    #[inline]
    pub const fn new(client: ClientId, clock: Clock) -> Self {
        Id { client, clock }
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}:{}>", self.client, self.clock)
    }
}

/// A run of clocks `clock .. clock + len` belonging to a single client.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IdRange {
    pub clock: Clock,
    pub len: Clock,
}

impl IdRange {
    #[inline]
    pub const fn new(clock: Clock, len: Clock) -> Self {
        IdRange { clock, len }
    }

    #[inline]
    pub fn end(&self) -> Clock {
        self.clock + self.len
    }

    #[inline]
    pub fn contains(&self, clock: Clock) -> bool {
        self.clock <= clock && clock < self.end()
    }
}

impl HasLength for IdRange {
    fn len(&self) -> usize {
        self.len as usize
    }
}

impl SplitableSpanHelpers for IdRange {
    fn truncate_h(&mut self, at: usize) -> Self {
        let other = IdRange::new(self.clock + at as Clock, self.len - at as Clock);
        self.len = at as Clock;
        other
    }
}

impl MergableSpan for IdRange {
    fn can_append(&self, other: &Self) -> bool {
        other.clock == self.end()
    }

    fn append(&mut self, other: Self) {
        self.len += other.len;
    }

    fn prepend(&mut self, other: Self) {
        self.clock = other.clock;
        self.len += other.len;
    }
}

impl Searchable for IdRange {
    type Item = Clock;

    fn get_offset(&self, loc: Clock) -> Option<usize> {
        if self.contains(loc) {
            Some((loc - self.clock) as usize)
        } else {
            None
        }
    }

    fn at_offset(&self, offset: usize) -> Clock {
        self.clock + offset as Clock
    }
}

#[cfg(test)]
mod tests {
    use rle::test_splitable_methods_valid;

    use super::*;

    #[test]
    fn id_order() {
        assert!(Id::new(1, 5) < Id::new(2, 0));
        assert!(Id::new(1, 5) < Id::new(1, 6));
        assert_eq!(Id::new(3, 3), Id::new(3, 3));
    }

    #[test]
    fn range_valid() {
        test_splitable_methods_valid(IdRange::new(10, 5));
    }

    #[test]
    fn range_contains() {
        let r = IdRange::new(4, 3);
        assert!(!r.contains(3));
        assert!(r.contains(4));
        assert!(r.contains(6));
        assert!(!r.contains(7));
    }
}
