use std::fmt::{Debug, Formatter, Write};

use humansize::{format_size, DECIMAL};

use crate::branch::BranchId;
use crate::content::TypeKind;
use crate::encoding::v1::EncoderV1;
use crate::encoding::v2::EncoderV2;
use crate::encoding::Encoder;
use crate::error::Error;
use crate::event::{Event, Observers, Subscription, SubdocsEvent, TransactionSummary, UpdateEvent};
use crate::id::{ClientId, Id};
use crate::item::Struct;
use crate::store::{delete_set_from_store, StateVector, Store};
use crate::transaction::{CommitOutput, Origin, Transaction};
use crate::types::{
    ArrayRef, MapRef, SharedRef, TextRef, XmlElementRef, XmlFragmentRef,
};
use crate::update::{encode_store_diff, Update};
use crate::{Any, SmartString};

/// Construction options for a [`Doc`].
pub struct Options {
    /// Fixed client id; random when absent. Collisions are handled by
    /// rotation, so fixing this is mostly useful in tests.
    pub client_id: Option<ClientId>,
    /// Globally unique document identifier; random when absent.
    pub guid: Option<SmartString>,
    /// Grouping key for documents that belong together.
    pub collection_id: Option<SmartString>,
    /// Collect tombstones at transaction close.
    pub gc: bool,
    /// Veto predicate: return false to keep a deleted range around (still
    /// referenced by a snapshot or an undo stack).
    pub gc_filter: Option<Box<dyn Fn(Id) -> bool>>,
    /// Opaque application metadata.
    pub meta: Option<Any>,
    /// Whether a containing document should load this one eagerly.
    pub auto_load: bool,
    pub should_load: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            client_id: None,
            guid: None,
            collection_id: None,
            gc: true,
            gc_filter: None,
            meta: None,
            auto_load: false,
            should_load: true,
        }
    }
}

fn random_guid() -> SmartString {
    let mut guid = SmartString::new();
    write!(guid, "{:08x}-{:08x}", rand::random::<u32>(), rand::random::<u32>()).unwrap();
    guid
}

/// A collaborative document: a set of named root containers sharing one
/// struct store, one client id, and one transaction at a time.
pub struct Doc {
    pub(crate) store: Store,
    pub(crate) observers: Observers,
    guid: SmartString,
    collection_id: Option<SmartString>,
    meta: Option<Any>,
    auto_load: bool,
    should_load: bool,
}

impl Doc {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_options(options: Options) -> Self {
        let client = options.client_id.unwrap_or_else(rand::random);
        let mut store = Store::new(client, options.gc);
        store.gc_filter = options.gc_filter;
        Doc {
            store,
            observers: Observers::default(),
            guid: options.guid.unwrap_or_else(random_guid),
            collection_id: options.collection_id,
            meta: options.meta,
            auto_load: options.auto_load,
            should_load: options.should_load,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.store.client
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn collection_id(&self) -> Option<&str> {
        self.collection_id.as_deref()
    }

    pub fn meta(&self) -> Option<&Any> {
        self.meta.as_ref()
    }

    pub fn auto_load(&self) -> bool {
        self.auto_load
    }

    pub fn should_load(&self) -> bool {
        self.should_load
    }

    // ---- roots ----

    pub fn get_array(&mut self, name: &str) -> Result<ArrayRef, Error> {
        self.get_root(name, TypeKind::Array).map(ArrayRef::from_branch)
    }

    pub fn get_map(&mut self, name: &str) -> Result<MapRef, Error> {
        self.get_root(name, TypeKind::Map).map(MapRef::from_branch)
    }

    pub fn get_text(&mut self, name: &str) -> Result<TextRef, Error> {
        self.get_root(name, TypeKind::Text).map(TextRef::from_branch)
    }

    pub fn get_xml_fragment(&mut self, name: &str) -> Result<XmlFragmentRef, Error> {
        self.get_root(name, TypeKind::XmlFragment)
            .map(XmlFragmentRef::from_branch)
    }

    pub fn get_xml_element(&mut self, name: &str) -> Result<XmlElementRef, Error> {
        self.get_root(name, TypeKind::XmlElement)
            .map(XmlElementRef::from_branch)
    }

    /// Root container registry. Repeated calls with the same name and kind
    /// return the same instance; an abstract root (instantiated by a remote
    /// update before any local accessor) is re-typed in place; any other
    /// kind conflict fails.
    fn get_root(&mut self, name: &str, kind: TypeKind) -> Result<BranchId, Error> {
        let id = BranchId::Root(name.into());
        if let Some(branch) = self.store.branches.get_mut(&id) {
            if branch.kind == kind {
                return Ok(id);
            }
            if branch.kind == TypeKind::Abstract {
                branch.retype(kind);
                if kind == TypeKind::XmlElement && branch.node_name.is_none() {
                    branch.node_name = Some(name.into());
                }
                return Ok(id);
            }
            return Err(Error::TypeMismatch {
                name: name.into(),
                expected: kind,
                actual: branch.kind,
            });
        }
        let node_name = (kind == TypeKind::XmlElement).then(|| SmartString::from(name));
        self.store.get_or_create_branch(id.clone(), kind, node_name);
        Ok(id)
    }

    // ---- transactions ----

    /// Run `f` inside a transaction and settle it: observers fire and an
    /// update is emitted once `f` returns (even when it returns an error).
    pub fn transact<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce(&mut Transaction) -> T,
    {
        self.transact_inner(None, true, f)
    }

    /// [`Doc::transact`] with an origin tag carried on emitted events.
    pub fn transact_with<F, T>(&mut self, origin: Origin, f: F) -> T
    where
        F: FnOnce(&mut Transaction) -> T,
    {
        self.transact_inner(Some(origin), true, f)
    }

    fn transact_inner<F, T>(&mut self, origin: Option<Origin>, local: bool, f: F) -> T
    where
        F: FnOnce(&mut Transaction) -> T,
    {
        let opening = TransactionSummary {
            origin: origin.clone(),
            local,
            before_state: self.store.blocks.state_vector(),
            after_state: StateVector::new(),
            delete_set: crate::DeleteSet::new(),
        };
        self.observers.before_all_transactions.call(&opening);
        self.observers.before_transaction.call(&opening);

        let mut txn = Transaction::new(&mut self.store, origin, local);
        let result = f(&mut txn);

        let encode_v1 = !self.observers.update_v1.is_empty();
        let encode_v2 = !self.observers.update_v2.is_empty();
        let out = txn.commit(encode_v1, encode_v2);
        self.dispatch_commit(out);
        result
    }

    fn dispatch_commit(&mut self, out: CommitOutput) {
        let CommitOutput {
            events,
            deep_events,
            update_v1,
            update_v2,
            summary,
            subdocs,
        } = out;

        self.observers.before_observer_calls.call(&summary);

        for (target, event) in &events {
            if let Some(mut handlers) = self.observers.branch.remove(target) {
                handlers.call(event);
                self.observers.branch.insert(target.clone(), handlers);
            }
        }
        for (target, list) in &deep_events {
            if let Some(mut handlers) = self.observers.branch_deep.remove(target) {
                handlers.call(list.as_slice());
                self.observers.branch_deep.insert(target.clone(), handlers);
            }
        }

        self.observers.after_transaction.call(&summary);
        self.observers.after_transaction_cleanup.call(&summary);

        if let Some(data) = update_v1 {
            let event = UpdateEvent {
                data,
                origin: summary.origin.clone(),
            };
            self.observers.update_v1.call(&event);
        }
        if let Some(data) = update_v2 {
            let event = UpdateEvent {
                data,
                origin: summary.origin.clone(),
            };
            self.observers.update_v2.call(&event);
        }
        if let Some(event) = subdocs {
            self.observers.subdocs.call(&event);
        }

        self.observers.after_all_transactions.call(&summary);
    }

    // ---- update / state vector byte interface ----

    pub fn state_vector(&self) -> StateVector {
        self.store.blocks.state_vector()
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        crate::encoding::encode_state_vector(&self.state_vector())
    }

    /// Everything a peer at `remote` is missing (everything, when absent),
    /// in the v1 format.
    pub fn encode_state_as_update(&self, remote: Option<&StateVector>) -> Vec<u8> {
        let mut enc = EncoderV1::new();
        self.encode_diff(&mut enc, remote);
        enc.to_vec()
    }

    /// V2 counterpart of [`Doc::encode_state_as_update`].
    pub fn encode_state_as_update_v2(&self, remote: Option<&StateVector>) -> Vec<u8> {
        let mut enc = EncoderV2::new();
        self.encode_diff(&mut enc, remote);
        enc.to_vec()
    }

    fn encode_diff<E: Encoder>(&self, enc: &mut E, remote: Option<&StateVector>) {
        let empty = StateVector::new();
        let since = remote.unwrap_or(&empty);
        let ds = delete_set_from_store(&self.store.blocks);
        encode_store_diff(enc, &self.store.blocks, since, &ds);
    }

    pub fn apply_update(&mut self, data: &[u8]) -> Result<(), Error> {
        self.apply_update_with(data, None)
    }

    pub fn apply_update_with(&mut self, data: &[u8], origin: Option<Origin>) -> Result<(), Error> {
        let update = Update::decode_v1(data)?;
        self.transact_inner(origin, false, |txn| txn.apply_update(update))
    }

    pub fn apply_update_v2(&mut self, data: &[u8]) -> Result<(), Error> {
        self.apply_update_v2_with(data, None)
    }

    pub fn apply_update_v2_with(
        &mut self,
        data: &[u8],
        origin: Option<Origin>,
    ) -> Result<(), Error> {
        let update = Update::decode_v2(data)?;
        self.transact_inner(origin, false, |txn| txn.apply_update(update))
    }

    /// Whether structs are parked waiting for missing causal dependencies.
    pub fn has_pending_structs(&self) -> bool {
        self.store.pending.is_some()
    }

    /// The clocks the pending buffer is waiting for, if any.
    pub fn pending_missing(&self) -> Option<StateVector> {
        self.store.pending.as_ref().map(|p| p.missing.clone())
    }

    // ---- observers ----

    pub fn observe<T, F>(&mut self, target: &T, f: F) -> Subscription
    where
        T: SharedRef,
        F: FnMut(&Event) + 'static,
    {
        let id = self.observers.next_subscription();
        self.observers
            .branch
            .entry(target.branch_id().clone())
            .or_default()
            .push(id, Box::new(f));
        Subscription(id)
    }

    pub fn observe_deep<T, F>(&mut self, target: &T, f: F) -> Subscription
    where
        T: SharedRef,
        F: FnMut(&[Event]) + 'static,
    {
        let id = self.observers.next_subscription();
        self.observers
            .branch_deep
            .entry(target.branch_id().clone())
            .or_default()
            .push(id, Box::new(f));
        Subscription(id)
    }

    pub fn on_update<F: FnMut(&UpdateEvent) + 'static>(&mut self, f: F) -> Subscription {
        let id = self.observers.next_subscription();
        self.observers.update_v1.push(id, Box::new(f));
        Subscription(id)
    }

    pub fn on_update_v2<F: FnMut(&UpdateEvent) + 'static>(&mut self, f: F) -> Subscription {
        let id = self.observers.next_subscription();
        self.observers.update_v2.push(id, Box::new(f));
        Subscription(id)
    }

    pub fn on_before_transaction<F: FnMut(&TransactionSummary) + 'static>(
        &mut self,
        f: F,
    ) -> Subscription {
        let id = self.observers.next_subscription();
        self.observers.before_transaction.push(id, Box::new(f));
        Subscription(id)
    }

    pub fn on_after_transaction<F: FnMut(&TransactionSummary) + 'static>(
        &mut self,
        f: F,
    ) -> Subscription {
        let id = self.observers.next_subscription();
        self.observers.after_transaction.push(id, Box::new(f));
        Subscription(id)
    }

    pub fn on_subdocs<F: FnMut(&SubdocsEvent) + 'static>(&mut self, f: F) -> Subscription {
        let id = self.observers.next_subscription();
        self.observers.subdocs.push(id, Box::new(f));
        Subscription(id)
    }

    pub fn on_destroy<F: FnMut(&()) + 'static>(&mut self, f: F) -> Subscription {
        let id = self.observers.next_subscription();
        self.observers.destroy.push(id, Box::new(f));
        Subscription(id)
    }

    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        self.observers.unsubscribe(sub)
    }

    /// Alias of [`Doc::unsubscribe`] for container observers.
    pub fn unobserve(&mut self, sub: Subscription) -> bool {
        self.unsubscribe(sub)
    }

    /// Alias of [`Doc::unsubscribe`] for deep container observers.
    pub fn unobserve_deep(&mut self, sub: Subscription) -> bool {
        self.unsubscribe(sub)
    }

    /// Emit `destroy` and drop every registered callback. The data itself
    /// stays usable.
    pub fn destroy(&mut self) {
        self.observers.destroy.call(&());
        self.observers = Observers::default();
    }

    // ---- diagnostics ----

    pub fn print_stats(&self, detailed: bool) {
        let mut structs = 0usize;
        let mut items = 0usize;
        let mut tombstones = 0usize;
        let mut content_bytes = 0usize;
        for (_, run) in self.store.blocks.clients() {
            structs += run.len();
            for s in run {
                match s {
                    Struct::Item(item) => {
                        items += 1;
                        if item.deleted() {
                            tombstones += 1;
                        }
                        content_bytes += std::mem::size_of_val(item);
                    }
                    _ => content_bytes += std::mem::size_of_val(s),
                }
            }
        }
        println!(
            "Doc {}: {} structs ({} items, {} tombstones) across {} clients",
            self.guid,
            structs,
            items,
            tombstones,
            self.store.blocks.clients().count()
        );
        println!("Approx struct memory: {}", format_size(content_bytes, DECIMAL));
        println!("Containers: {}", self.store.branches.len());
        if let Some(pending) = &self.store.pending {
            println!(
                "Pending structs for {} clients",
                pending.update.structs.len()
            );
        }
        if detailed {
            for (client, run) in self.store.blocks.clients() {
                println!("  client {}: {} structs, state {}", client, run.len(), {
                    self.store.blocks.get_state(client)
                });
            }
        }
    }
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for Doc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Doc")
            .field("guid", &self.guid)
            .field("client_id", &self.store.client)
            .field("roots", &self.store.branches.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc_with_client(client: ClientId) -> Doc {
        Doc::with_options(Options {
            client_id: Some(client),
            ..Options::default()
        })
    }

    #[test]
    fn smoke() {
        let mut doc = doc_with_client(1);
        let text = doc.get_text("body").unwrap();
        doc.transact(|txn| {
            text.insert(txn, 0, "hi")?;
            text.insert(txn, 1, "yooo")
        })
        .unwrap();
        doc.transact(|txn| text.remove_range(txn, 1, 3)).unwrap();
        assert_eq!(doc.transact(|txn| text.get_string(txn)), "hoi");
        doc.dbg_check();
    }

    #[test]
    fn array_roundtrip() {
        let mut doc = doc_with_client(1);
        let arr = doc.get_array("list").unwrap();
        doc.transact(|txn| {
            arr.insert(txn, 0, [1i64, 2, 3])?;
            arr.insert(txn, 1, ["mid"])?;
            arr.remove_range(txn, 3, 1)
        })
        .unwrap();
        let json = doc.transact(|txn| arr.to_json(txn));
        assert_eq!(json, json!([1, "mid", 2]));
        doc.dbg_check();
    }

    #[test]
    fn map_last_write_wins_locally() {
        let mut doc = doc_with_client(1);
        let map = doc.get_map("kv").unwrap();
        doc.transact(|txn| {
            map.insert(txn, "k", 1i64)?;
            map.insert(txn, "k", 2i64)?;
            map.insert(txn, "other", "x")
        })
        .unwrap();
        doc.transact(|txn| {
            assert_eq!(map.get(txn, "k"), Some(crate::Out::Any(json!(2))));
            assert_eq!(map.len(txn), 2);
        });
        doc.transact(|txn| {
            assert_eq!(map.remove(txn, "k"), Some(crate::Out::Any(json!(2))));
        });
        doc.transact(|txn| {
            assert_eq!(map.get(txn, "k"), None);
            assert_eq!(map.keys(txn), vec![crate::SmartString::from("other")]);
        });
        doc.dbg_check();
    }

    #[test]
    fn nested_prelim_types() {
        let mut doc = doc_with_client(1);
        let map = doc.get_map("root").unwrap();
        doc.transact(|txn| {
            map.insert(
                txn,
                "todo",
                crate::In::Array(vec![crate::In::from("a"), crate::In::from("b")]),
            )
        })
        .unwrap();
        let json = doc.transact(|txn| map.to_json(txn));
        assert_eq!(json, json!({"todo": ["a", "b"]}));
        doc.dbg_check();
    }

    #[test]
    fn root_type_mismatch() {
        let mut doc = Doc::new();
        doc.get_array("thing").unwrap();
        assert!(matches!(
            doc.get_map("thing"),
            Err(Error::TypeMismatch { .. })
        ));
        // Same accessor twice names the same container.
        assert!(doc.get_array("thing").is_ok());
    }

    #[test]
    fn abstract_root_retypes() {
        // A remote update names a root we have never accessed locally; the
        // first typed accessor specializes it in place.
        let mut a = doc_with_client(1);
        let arr = a.get_array("items").unwrap();
        a.transact(|txn| arr.insert(txn, 0, [7i64])).unwrap();
        let update = a.encode_state_as_update(None);

        let mut b = doc_with_client(2);
        b.apply_update(&update).unwrap();
        let arr_b = b.get_array("items").unwrap();
        assert_eq!(b.transact(|txn| arr_b.to_json(txn)), json!([7]));
        b.dbg_check();
    }

    #[test]
    fn length_exceeded_surfaces() {
        let mut doc = Doc::new();
        let arr = doc.get_array("a").unwrap();
        let result = doc.transact(|txn| arr.insert(txn, 5, [1i64]));
        assert!(matches!(result, Err(Error::LengthExceeded { .. })));
        // The transaction still settled; the doc stays usable.
        doc.transact(|txn| arr.insert(txn, 0, [1i64])).unwrap();
        doc.dbg_check();
    }

    #[test]
    fn xml_elements() {
        let mut doc = doc_with_client(1);
        let frag = doc.get_xml_fragment("dom").unwrap();
        doc.transact(|txn| {
            frag.insert(
                txn,
                0,
                [crate::In::XmlElement {
                    name: "div".into(),
                    attrs: vec![("class".into(), crate::In::from("wide"))],
                    children: vec![crate::In::XmlText("hello".into())],
                }],
            )
        })
        .unwrap();
        doc.transact(|txn| {
            let Some(crate::Out::XmlElement(div)) = frag.get(txn, 0) else {
                panic!("expected an element");
            };
            assert_eq!(div.tag(txn), "div");
            assert_eq!(
                div.get_attribute(txn, "class"),
                Some(crate::Out::Any(json!("wide")))
            );
            assert_eq!(div.len(txn), 1);
        });
        // Plain scalars are not xml nodes.
        let err = doc.transact(|txn| frag.insert(txn, 0, [crate::In::from(1i64)]));
        assert!(matches!(err, Err(Error::UnexpectedContent)));
        doc.dbg_check();
    }

    #[test]
    fn client_id_rotates_on_collision() {
        let mut a = doc_with_client(7);
        let text = a.get_text("t").unwrap();
        a.transact(|txn| text.insert(txn, 0, "abc")).unwrap();
        let update = a.encode_state_as_update(None);

        // A doc claiming the same client id receives writes in its own
        // clock space and must abandon the id.
        let mut b = doc_with_client(7);
        b.apply_update(&update).unwrap();
        assert_ne!(b.client_id(), 7);
        let text_b = b.get_text("t").unwrap();
        b.transact(|txn| text_b.insert(txn, 3, "!")).unwrap();
        b.dbg_check();
    }
}
