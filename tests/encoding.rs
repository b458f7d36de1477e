//! Byte-level laws: encode/decode roundtrips, merge associativity, diffs.

use serde_json::json;
use weft::{diff_update, merge_updates, Doc, Options};

fn doc_with_client(client: u32) -> Doc {
    Doc::with_options(Options {
        client_id: Some(client),
        ..Options::default()
    })
}

fn populated_doc() -> Doc {
    let mut doc = doc_with_client(3);
    let text = doc.get_text("t").unwrap();
    let arr = doc.get_array("seq").unwrap();
    let map = doc.get_map("kv").unwrap();
    doc.transact(|txn| {
        text.insert(txn, 0, "hello wörld")?;
        arr.insert(txn, 0, [json!(1), json!(null), json!({"k": [1, 2]})])?;
        map.insert(txn, "title", "doc")?;
        map.insert(txn, "count", 42i64)
    })
    .unwrap();
    doc.transact(|txn| {
        text.remove_range(txn, 0, 6)?;
        arr.remove_range(txn, 1, 1)
    })
    .unwrap();
    doc
}

fn observable_state(doc: &mut Doc) -> (String, serde_json::Value, serde_json::Value) {
    let text = doc.get_text("t").unwrap();
    let arr = doc.get_array("seq").unwrap();
    let map = doc.get_map("kv").unwrap();
    doc.transact(|txn| {
        (
            text.get_string(txn),
            arr.to_json(txn),
            map.to_json(txn),
        )
    })
}

#[test]
fn self_encode_reconstructs_the_doc() {
    let mut doc = populated_doc();
    let update = doc.encode_state_as_update(None);

    let mut replica = doc_with_client(8);
    replica.apply_update(&update).unwrap();
    assert_eq!(observable_state(&mut doc), observable_state(&mut replica));
    assert_eq!(doc.state_vector(), replica.state_vector());
    replica.dbg_check();
}

#[test]
fn v2_counterparts_match_v1_semantics() {
    let mut doc = populated_doc();
    let v2 = doc.encode_state_as_update_v2(None);

    let mut replica = doc_with_client(8);
    replica.apply_update_v2(&v2).unwrap();
    assert_eq!(observable_state(&mut doc), observable_state(&mut replica));
    replica.dbg_check();
}

#[test]
fn merged_updates_equal_sequential_application() {
    let mut source = doc_with_client(5);
    let arr = source.get_array("seq").unwrap();
    let updates = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = updates.clone();
    source.on_update(move |e| sink.borrow_mut().push(e.data.clone()));

    source.transact(|txn| arr.insert(txn, 0, [1i64, 2])).unwrap();
    source.transact(|txn| arr.insert(txn, 2, [3i64])).unwrap();
    source.transact(|txn| arr.remove_range(txn, 0, 1)).unwrap();

    let updates = updates.borrow();
    let slices: Vec<&[u8]> = updates.iter().map(|u| u.as_slice()).collect();
    let merged = merge_updates(&slices).unwrap();

    let mut sequential = doc_with_client(9);
    for update in updates.iter() {
        sequential.apply_update(update).unwrap();
    }
    let mut at_once = doc_with_client(9);
    at_once.apply_update(&merged).unwrap();

    let arr_seq = sequential.get_array("seq").unwrap();
    let arr_once = at_once.get_array("seq").unwrap();
    assert_eq!(
        sequential.transact(|txn| arr_seq.to_json(txn)),
        at_once.transact(|txn| arr_once.to_json(txn))
    );
    at_once.dbg_check();
}

#[test]
fn merge_is_order_insensitive_for_disjoint_histories() {
    let mut a = doc_with_client(1);
    let mut b = doc_with_client(2);
    let arr_a = a.get_array("seq").unwrap();
    let arr_b = b.get_array("seq").unwrap();
    a.transact(|txn| arr_a.insert(txn, 0, [1i64])).unwrap();
    b.transact(|txn| arr_b.insert(txn, 0, [2i64])).unwrap();
    let ua = a.encode_state_as_update(None);
    let ub = b.encode_state_as_update(None);

    let ab = merge_updates(&[&ua, &ub]).unwrap();
    let ba = merge_updates(&[&ub, &ua]).unwrap();
    assert_eq!(ab, ba);

    let mut replica = doc_with_client(9);
    replica.apply_update(&ab).unwrap();
    let arr = replica.get_array("seq").unwrap();
    assert_eq!(
        replica
            .transact(|txn| arr.to_json(txn))
            .as_array()
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn merge_reassembles_split_history() {
    // An arbitrary split of one history into slices merges back losslessly.
    let mut source = doc_with_client(4);
    let text = source.get_text("t").unwrap();
    let updates = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = updates.clone();
    source.on_update(move |e| sink.borrow_mut().push(e.data.clone()));
    let mut pos = 0u32;
    for chunk in ["one ", "two ", "three ", "four"] {
        source.transact(|txn| text.insert(txn, pos, chunk)).unwrap();
        pos += chunk.len() as u32;
    }

    let updates = updates.borrow();
    let slices: Vec<&[u8]> = updates.iter().map(|u| u.as_slice()).collect();
    // Merge the middle two first, then fold in the outer ones.
    let middle = merge_updates(&slices[1..3]).unwrap();
    let merged = merge_updates(&[slices[0], &middle, slices[3]]).unwrap();

    let mut replica = doc_with_client(9);
    replica.apply_update(&merged).unwrap();
    let text_r = replica.get_text("t").unwrap();
    assert_eq!(
        replica.transact(|txn| text_r.get_string(txn)),
        "one two three four"
    );
    assert!(!replica.has_pending_structs());
    replica.dbg_check();
}

#[test]
fn diff_update_completes_a_stale_replica() {
    let mut doc = doc_with_client(6);
    let text = doc.get_text("t").unwrap();
    doc.transact(|txn| text.insert(txn, 0, "base")).unwrap();

    let mut stale = doc_with_client(9);
    stale
        .apply_update(&doc.encode_state_as_update(None))
        .unwrap();

    doc.transact(|txn| text.insert(txn, 4, " extended")).unwrap();

    let full = doc.encode_state_as_update(None);
    let diffed = diff_update(&full, &stale.encode_state_vector()).unwrap();
    assert!(diffed.len() < full.len());

    stale.apply_update(&diffed).unwrap();
    let text_s = stale.get_text("t").unwrap();
    assert_eq!(
        stale.transact(|txn| text_s.get_string(txn)),
        "base extended"
    );
    stale.dbg_check();
}

#[test]
fn transaction_updates_match_state_diffs() {
    // The update emitted at transaction close equals the state diff across
    // that transaction.
    let mut doc = doc_with_client(2);
    let arr = doc.get_array("seq").unwrap();
    doc.transact(|txn| arr.insert(txn, 0, [1i64])).unwrap();

    let before = doc.state_vector();
    let captured = std::rc::Rc::new(std::cell::RefCell::new(None));
    let sink = captured.clone();
    let sub = doc.on_update(move |e| *sink.borrow_mut() = Some(e.data.clone()));
    doc.transact(|txn| arr.insert(txn, 1, [2i64])).unwrap();
    doc.unsubscribe(sub);

    let emitted = captured.borrow().clone().unwrap();
    let diff = doc.encode_state_as_update(Some(&before));
    assert_eq!(emitted, diff);
}

#[test]
fn state_vector_roundtrips_through_bytes() {
    let doc = populated_doc();
    let encoded = doc.encode_state_vector();
    let decoded = weft::encoding::decode_state_vector(&encoded).unwrap();
    assert_eq!(decoded, doc.state_vector());
}
