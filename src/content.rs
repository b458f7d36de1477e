use std::fmt::{Debug, Formatter};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use smallvec::SmallVec;

use crate::id::Clock;
use crate::types::{ArrayRef, MapRef, TextRef, XmlElementRef, XmlFragmentRef};
use crate::{Any, SmartString};

/// Stable wire identifiers for struct payloads. Decoders reject anything
/// else with `ParseError::UnknownContentRef`.
#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub(crate) enum ContentRef {
    Gc = 0,
    Deleted = 1,
    Json = 2,
    Binary = 3,
    String = 4,
    Embed = 5,
    Format = 6,
    Type = 7,
    Any = 8,
    Doc = 9,
    Skip = 10,
}

/// Concrete shape of a container.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TypeKind {
    Array = 0,
    Map = 1,
    Text = 2,
    XmlElement = 3,
    XmlFragment = 4,
    XmlHook = 5,
    XmlText = 6,

    /// A root instantiated by a remote update before any local `get`. Never
    /// encoded; re-typed in place by the first typed accessor.
    Abstract = 255,
}

/// Wire description of a nested container.
#[derive(Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub kind: TypeKind,
    /// Tag name for xml elements and hooks.
    pub node_name: Option<SmartString>,
}

/// Payload of an item. The tag decides whether units count toward container
/// length and whether two adjacent runs may coalesce into one item.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Tombstone placeholder. Only the covered clock length survives.
    Deleted(Clock),
    /// JSON values, one per clock unit. Legacy encoding (stored as JSON
    /// text in the v1 format).
    Json(SmallVec<Any, 1>),
    /// An immutable byte blob occupying a single clock unit.
    Binary(Vec<u8>),
    /// Text, measured in utf-16 code units.
    String(SmartString),
    /// An opaque embedded value occupying a single clock unit.
    Embed(Any),
    /// Rich text attribute boundary. Not countable.
    Format { key: SmartString, value: Any },
    /// A nested container.
    Type(TypeDef),
    /// JSON values, one per clock unit.
    Any(SmallVec<Any, 1>),
    /// A sub-document reference.
    Doc { guid: SmartString, opts: Any },
}

pub(crate) fn utf16_len(s: &str) -> Clock {
    str_indices::utf16::count(s) as Clock
}

impl Content {
    pub(crate) fn content_ref(&self) -> ContentRef {
        match self {
            Content::Deleted(_) => ContentRef::Deleted,
            Content::Json(_) => ContentRef::Json,
            Content::Binary(_) => ContentRef::Binary,
            Content::String(_) => ContentRef::String,
            Content::Embed(_) => ContentRef::Embed,
            Content::Format { .. } => ContentRef::Format,
            Content::Type(_) => ContentRef::Type,
            Content::Any(_) => ContentRef::Any,
            Content::Doc { .. } => ContentRef::Doc,
        }
    }

    /// Clock units this content occupies.
    pub(crate) fn len(&self) -> Clock {
        match self {
            Content::Deleted(len) => *len,
            Content::Json(values) | Content::Any(values) => values.len() as Clock,
            Content::String(s) => utf16_len(s),
            Content::Binary(_)
            | Content::Embed(_)
            | Content::Format { .. }
            | Content::Type(_)
            | Content::Doc { .. } => 1,
        }
    }

    /// Countable content contributes to container length and positional
    /// indexes.
    pub(crate) fn countable(&self) -> bool {
        !matches!(self, Content::Deleted(_) | Content::Format { .. })
    }

    /// Whether two causally contiguous runs of this kind may be collapsed
    /// into a single item.
    pub(crate) fn mergeable(&self) -> bool {
        matches!(
            self,
            Content::Deleted(_) | Content::Json(_) | Content::String(_) | Content::Any(_)
        )
    }

    /// Split at `offset` clock units, keeping the left part in place and
    /// returning the right. Caller guarantees `0 < offset < len`.
    pub(crate) fn splice(&mut self, offset: Clock) -> Content {
        match self {
            Content::Deleted(len) => {
                let rest = *len - offset;
                *len = offset;
                Content::Deleted(rest)
            }
            Content::Json(values) => {
                let rest = values.drain(offset as usize..).collect();
                Content::Json(rest)
            }
            Content::Any(values) => {
                let rest = values.drain(offset as usize..).collect();
                Content::Any(rest)
            }
            Content::String(s) => {
                let byte_idx = str_indices::utf16::to_byte_idx(s, offset as usize);
                let rest = SmartString::from(&s[byte_idx..]);
                s.truncate(byte_idx);
                Content::String(rest)
            }
            _ => unreachable!("splice of unsplittable content"),
        }
    }

    /// Append `other` onto this content. Caller has already checked the
    /// merge conditions, including `mergeable()` and matching tags.
    pub(crate) fn merge(&mut self, other: Content) {
        match (self, other) {
            (Content::Deleted(len), Content::Deleted(other)) => *len += other,
            (Content::Json(values), Content::Json(other)) => values.extend(other),
            (Content::Any(values), Content::Any(other)) => values.extend(other),
            (Content::String(s), Content::String(other)) => s.push_str(&other),
            _ => unreachable!("merge of incompatible content"),
        }
    }

    /// Read the countable unit at `offset` as an output value. The branch id
    /// for nested containers is supplied by the caller (it is the embedding
    /// item's id).
    pub(crate) fn read(&self, offset: Clock, nested: Option<crate::BranchId>) -> Option<Out> {
        match self {
            Content::Json(values) | Content::Any(values) => values
                .get(offset as usize)
                .map(|value| Out::Any(value.clone())),
            Content::Binary(data) => Some(Out::Bytes(data.clone())),
            Content::Embed(value) => Some(Out::Any(value.clone())),
            Content::String(s) => {
                let start = str_indices::utf16::to_byte_idx(s, offset as usize);
                let c = s[start..].chars().next()?;
                Some(Out::Any(Any::String(c.to_string())))
            }
            Content::Type(def) => {
                let id = nested?;
                Some(match def.kind {
                    TypeKind::Array => Out::Array(ArrayRef::from_branch(id)),
                    TypeKind::Map | TypeKind::XmlHook => Out::Map(MapRef::from_branch(id)),
                    TypeKind::Text | TypeKind::XmlText => Out::Text(TextRef::from_branch(id)),
                    TypeKind::XmlElement => Out::XmlElement(XmlElementRef::from_branch(id)),
                    TypeKind::XmlFragment | TypeKind::Abstract => {
                        Out::XmlFragment(XmlFragmentRef::from_branch(id))
                    }
                })
            }
            Content::Doc { guid, .. } => Some(Out::Doc { guid: guid.clone() }),
            Content::Deleted(_) | Content::Format { .. } => None,
        }
    }
}

/// Value accepted by insert operations: either a ready JSON-ish scalar or a
/// pre-integration ("prelim") container that is built once it lands in a
/// document.
#[derive(Debug, Clone, PartialEq)]
pub enum In {
    Any(Any),
    Bytes(Vec<u8>),
    Embed(Any),
    Array(Vec<In>),
    Map(Vec<(SmartString, In)>),
    Text(String),
    XmlElement {
        name: SmartString,
        attrs: Vec<(SmartString, In)>,
        children: Vec<In>,
    },
    XmlText(String),
    Doc {
        guid: SmartString,
        opts: Any,
    },
}

impl From<Any> for In {
    fn from(value: Any) -> Self {
        In::Any(value)
    }
}

impl From<bool> for In {
    fn from(value: bool) -> Self {
        In::Any(Any::Bool(value))
    }
}

impl From<i64> for In {
    fn from(value: i64) -> Self {
        In::Any(Any::from(value))
    }
}

impl From<i32> for In {
    fn from(value: i32) -> Self {
        In::Any(Any::from(value))
    }
}

impl From<u32> for In {
    fn from(value: u32) -> Self {
        In::Any(Any::from(value))
    }
}

impl From<f64> for In {
    fn from(value: f64) -> Self {
        In::Any(Any::from(value))
    }
}

impl From<&str> for In {
    fn from(value: &str) -> Self {
        In::Any(Any::String(value.into()))
    }
}

impl From<String> for In {
    fn from(value: String) -> Self {
        In::Any(Any::String(value))
    }
}

impl From<Vec<u8>> for In {
    fn from(value: Vec<u8>) -> Self {
        In::Bytes(value)
    }
}

/// Value read out of a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Out {
    Any(Any),
    Bytes(Vec<u8>),
    Array(ArrayRef),
    Map(MapRef),
    Text(TextRef),
    XmlElement(XmlElementRef),
    XmlFragment(XmlFragmentRef),
    Doc { guid: SmartString },
}

impl Out {
    /// The scalar payload, if this is one.
    pub fn into_any(self) -> Option<Any> {
        match self {
            Out::Any(value) => Some(value),
            _ => None,
        }
    }
}

impl Debug for TypeDef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.node_name {
            Some(name) => write!(f, "{:?}({})", self.kind, name),
            None => write!(f, "{:?}", self.kind),
        }
    }
}
