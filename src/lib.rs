//! An eventually consistent engine for collaborative shared data structures
//! (ordered lists, key/value maps, text) replicated over an unreliable,
//! partially ordered update channel.
//!
//! Every peer mutates its own [`Doc`] without coordination. Mutations are
//! batched in [`Transaction`]s, which emit binary updates. Applying the
//! updates of all peers - in any order - converges every replica to the same
//! state.
//!
//! ```
//! use weft::Doc;
//!
//! let mut a = Doc::new();
//! let mut b = Doc::new();
//!
//! let text = a.get_text("quote").unwrap();
//! a.transact(|txn| text.insert(txn, 0, "hello")).unwrap();
//!
//! let update = a.encode_state_as_update(None);
//! b.apply_update(&update).unwrap();
//!
//! let text_b = b.get_text("quote").unwrap();
//! assert_eq!(b.transact(|txn| text_b.get_string(txn)), "hello");
//! ```

pub use branch::BranchId;
pub use content::{In, Out, TypeKind};
pub use deleteset::DeleteSet;
pub use doc::{Doc, Options};
pub use error::{Error, ParseError};
pub use event::{
    Delta, EntryChange, Event, PathSegment, SubdocsEvent, Subscription, TransactionSummary,
    UpdateEvent,
};
pub use id::{ClientId, Clock, Id};
pub use store::StateVector;
pub use transaction::{Origin, Transaction};
pub use types::{ArrayRef, MapRef, SharedRef, TextRef, XmlElementRef, XmlFragmentRef};
pub use update::{diff_update, diff_update_v2, merge_updates, merge_updates_v2, Update};

mod branch;
mod check;
mod content;
mod deleteset;
mod doc;
pub mod encoding;
mod error;
mod event;
mod id;
mod integrate;
mod item;
mod marker;
mod store;
mod transaction;
mod types;
mod update;

pub(crate) type SmartString = smartstring::alias::String;

/// JSON-ish scalar payload carried by `Any`, embed and format content.
pub type Any = serde_json::Value;
