use std::error::Error as StdError;
use std::fmt::{Display, Formatter};

use crate::content::TypeKind;
use crate::id::Id;
use crate::SmartString;

/// Codec failures while reading an update, state vector or delete set.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
#[non_exhaustive]
pub enum ParseError {
    UnexpectedEof,
    InvalidVarInt,
    InvalidUtf8,
    InvalidLength,
    UnknownContentRef(u8),
    UnknownTypeRef(u8),
    UnknownAnyTag(u8),
    InvalidJson,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseError {:?}", self)
    }
}

impl StdError for ParseError {}

/// Operation failures surfaced to the caller.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An internal structural invariant does not hold - a clock gap in a
    /// client's struct segment, a split past an item's bounds, and the like.
    /// Fatal to the transaction.
    BrokenInvariant(&'static str),

    /// A sequence insert or delete addressed a position past the container's
    /// current length.
    LengthExceeded { index: u32, len: u32 },

    /// An inserted value cannot be represented as any content variant in
    /// this position.
    UnexpectedContent,

    /// A root container was requested with a different concrete kind than it
    /// already has.
    TypeMismatch {
        name: SmartString,
        expected: TypeKind,
        actual: TypeKind,
    },

    /// A struct lookup addressed a clock this store has never seen.
    NotPresent(Id),

    Parse(ParseError),
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::BrokenInvariant(what) => write!(f, "broken invariant: {}", what),
            Error::LengthExceeded { index, len } => {
                write!(f, "position {} exceeds container length {}", index, len)
            }
            Error::UnexpectedContent => write!(f, "unexpected content"),
            Error::TypeMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "root \"{}\" is a {:?}, requested as {:?}",
                name, actual, expected
            ),
            Error::NotPresent(id) => write!(f, "no struct covering {}", id),
            Error::Parse(e) => Display::fmt(e, f),
        }
    }
}

impl StdError for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}
