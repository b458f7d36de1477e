//! Missing-causality buffering: out-of-order updates park in the pending
//! buffers and drain once their dependencies arrive.

use weft::{Doc, Options};

fn doc_with_client(client: u32) -> Doc {
    Doc::with_options(Options {
        client_id: Some(client),
        ..Options::default()
    })
}

/// Capture the update emitted by each transaction on `doc`.
fn capture_updates(doc: &mut Doc) -> std::rc::Rc<std::cell::RefCell<Vec<Vec<u8>>>> {
    let updates = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = updates.clone();
    doc.on_update(move |e| sink.borrow_mut().push(e.data.clone()));
    updates
}

#[test]
fn out_of_order_updates_buffer_then_drain() {
    let mut source = doc_with_client(7);
    let text = source.get_text("t").unwrap();
    let updates = capture_updates(&mut source);
    source.transact(|txn| text.insert(txn, 0, "abcd")).unwrap();
    source.transact(|txn| text.insert(txn, 4, "e")).unwrap();
    let updates = updates.borrow();
    let (u1, u2) = (&updates[0], &updates[1]);

    let mut replica = doc_with_client(1);
    replica.apply_update(u2).unwrap();

    // Nothing observable yet; the dependency on client 7's earlier clocks
    // is recorded.
    let text_r = replica.get_text("t").unwrap();
    assert_eq!(replica.transact(|txn| text_r.get_string(txn)), "");
    assert!(replica.has_pending_structs());
    let missing = replica.pending_missing().unwrap();
    assert_eq!(missing.get(7), 3);

    replica.apply_update(u1).unwrap();
    assert!(!replica.has_pending_structs());
    assert_eq!(replica.transact(|txn| text_r.get_string(txn)), "abcde");
    replica.dbg_check();

    // Forward order on a second replica produces the identical state.
    let mut forward = doc_with_client(2);
    forward.apply_update(u1).unwrap();
    forward.apply_update(u2).unwrap();
    let text_f = forward.get_text("t").unwrap();
    assert_eq!(
        forward.transact(|txn| text_f.get_string(txn)),
        replica.transact(|txn| text_r.get_string(txn))
    );
    assert_eq!(forward.state_vector(), replica.state_vector());
}

#[test]
fn deletes_for_unknown_clocks_wait_in_pending_ds() {
    let mut source = doc_with_client(7);
    let text = source.get_text("t").unwrap();
    let updates = capture_updates(&mut source);
    source.transact(|txn| text.insert(txn, 0, "abc")).unwrap();
    source.transact(|txn| text.remove_range(txn, 1, 1)).unwrap();
    let updates = updates.borrow();
    let (u_ins, u_del) = (&updates[0], &updates[1]);

    let mut replica = doc_with_client(1);
    // The delete arrives before the content it tombstones.
    replica.apply_update(u_del).unwrap();
    let text_r = replica.get_text("t").unwrap();
    assert_eq!(replica.transact(|txn| text_r.get_string(txn)), "");

    replica.apply_update(u_ins).unwrap();
    assert_eq!(replica.transact(|txn| text_r.get_string(txn)), "ac");
    replica.dbg_check();
}

#[test]
fn deep_dependency_chains_drain_transitively() {
    let mut source = doc_with_client(7);
    let arr = source.get_array("seq").unwrap();
    let updates = capture_updates(&mut source);
    for i in 0..5i64 {
        source
            .transact(|txn| arr.insert(txn, i as u32, [i]))
            .unwrap();
    }
    let updates = updates.borrow();

    // Apply newest-first: each application parks, the final one drains all.
    let mut replica = doc_with_client(1);
    for update in updates.iter().rev() {
        replica.apply_update(update).unwrap();
    }
    assert!(!replica.has_pending_structs());
    let arr_r = replica.get_array("seq").unwrap();
    assert_eq!(
        replica.transact(|txn| arr_r.to_json(txn)),
        serde_json::json!([0, 1, 2, 3, 4])
    );
    replica.dbg_check();
}

#[test]
fn pending_updates_survive_unrelated_traffic() {
    let mut source = doc_with_client(7);
    let text = source.get_text("t").unwrap();
    let updates = capture_updates(&mut source);
    source.transact(|txn| text.insert(txn, 0, "base")).unwrap();
    source.transact(|txn| text.insert(txn, 4, "!")).unwrap();
    let updates = updates.borrow();

    let mut other = doc_with_client(3);
    let other_text = other.get_text("other").unwrap();
    other
        .transact(|txn| other_text.insert(txn, 0, "noise"))
        .unwrap();

    let mut replica = doc_with_client(1);
    replica.apply_update(&updates[1]).unwrap();
    assert!(replica.has_pending_structs());

    // Unrelated updates neither drain nor drop the parked structs.
    replica
        .apply_update(&other.encode_state_as_update(None))
        .unwrap();
    assert!(replica.has_pending_structs());

    replica.apply_update(&updates[0]).unwrap();
    assert!(!replica.has_pending_structs());
    let text_r = replica.get_text("t").unwrap();
    assert_eq!(replica.transact(|txn| text_r.get_string(txn)), "base!");
    replica.dbg_check();
}
