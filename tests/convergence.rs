//! Multi-peer convergence: every replica that has seen the same set of
//! updates reports the same state, regardless of delivery order.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use weft::{Doc, Options, Out};

fn doc_with_client(client: u32) -> Doc {
    Doc::with_options(Options {
        client_id: Some(client),
        ..Options::default()
    })
}

fn sync(a: &mut Doc, b: &mut Doc) {
    let sv_a = a.state_vector();
    let sv_b = b.state_vector();
    let from_a = a.encode_state_as_update(Some(&sv_b));
    let from_b = b.encode_state_as_update(Some(&sv_a));
    b.apply_update(&from_a).unwrap();
    a.apply_update(&from_b).unwrap();
}

#[test]
fn concurrent_head_inserts_converge() {
    let mut a = doc_with_client(1);
    let mut b = doc_with_client(2);
    let arr_a = a.get_array("seq").unwrap();
    let arr_b = b.get_array("seq").unwrap();

    a.transact(|txn| arr_a.insert(txn, 0, [1i64])).unwrap();
    b.transact(|txn| arr_b.insert(txn, 0, [2i64])).unwrap();
    sync(&mut a, &mut b);

    let json_a = a.transact(|txn| arr_a.to_json(txn));
    let json_b = b.transact(|txn| arr_b.to_json(txn));
    assert_eq!(json_a, json_b);
    assert!(json_a == json!([1, 2]) || json_a == json!([2, 1]));
    a.dbg_check();
    b.dbg_check();

    // The outcome only depends on client ids, not on sync direction.
    let mut c = doc_with_client(1);
    let mut d = doc_with_client(2);
    let arr_c = c.get_array("seq").unwrap();
    let arr_d = d.get_array("seq").unwrap();
    c.transact(|txn| arr_c.insert(txn, 0, [1i64])).unwrap();
    d.transact(|txn| arr_d.insert(txn, 0, [2i64])).unwrap();
    sync(&mut d, &mut c);
    assert_eq!(c.transact(|txn| arr_c.to_json(txn)), json_a);
}

#[test]
fn interleaved_text_edits_converge() {
    let mut a = doc_with_client(1);
    let text_a = a.get_text("t").unwrap();
    a.transact(|txn| text_a.insert(txn, 0, "abc")).unwrap();

    let mut b = doc_with_client(2);
    b.apply_update(&a.encode_state_as_update(None)).unwrap();
    let text_b = b.get_text("t").unwrap();

    // A replaces "b" with "X"; B appends "Y" after "b" concurrently.
    a.transact(|txn| {
        text_a.remove_range(txn, 1, 1)?;
        text_a.insert(txn, 1, "X")
    })
    .unwrap();
    b.transact(|txn| text_b.insert(txn, 2, "Y")).unwrap();
    sync(&mut a, &mut b);

    let result_a = a.transact(|txn| text_a.get_string(txn));
    let result_b = b.transact(|txn| text_b.get_string(txn));
    assert_eq!(result_a, result_b);
    assert_eq!(result_a.len(), 4);
    assert!(result_a.starts_with('a'));
    assert!(result_a.ends_with('c'));
    assert!(result_a.contains('X'));
    assert!(result_a.contains('Y'));
    a.dbg_check();
    b.dbg_check();
}

#[test]
fn concurrent_map_writes_pick_one_winner() {
    let mut a = doc_with_client(1);
    let mut b = doc_with_client(2);
    let map_a = a.get_map("kv").unwrap();
    let map_b = b.get_map("kv").unwrap();

    a.transact(|txn| map_a.insert(txn, "k", "1")).unwrap();
    b.transact(|txn| map_b.insert(txn, "k", "2")).unwrap();
    sync(&mut a, &mut b);

    let value_a = a.transact(|txn| map_a.get(txn, "k"));
    let value_b = b.transact(|txn| map_b.get(txn, "k"));
    assert_eq!(value_a, value_b);
    // Ties break toward the higher client id.
    assert_eq!(value_a, Some(Out::Any(json!("2"))));
    a.dbg_check();
    b.dbg_check();
}

#[test]
fn updates_apply_in_any_order() {
    let mut source = doc_with_client(9);
    let arr = source.get_array("seq").unwrap();

    let updates = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = updates.clone();
    source.on_update(move |e| sink.borrow_mut().push(e.data.clone()));

    source.transact(|txn| arr.insert(txn, 0, [1i64, 2, 3])).unwrap();
    source
        .transact(|txn| arr.insert(txn, 1, ["mid"]))
        .unwrap();
    source.transact(|txn| arr.remove_range(txn, 0, 1)).unwrap();
    let expected = source.transact(|txn| arr.to_json(txn));
    let updates = updates.borrow();
    assert_eq!(updates.len(), 3);

    // Every permutation of the three updates converges to the same state.
    let permutations: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    for order in permutations {
        let mut replica = doc_with_client(50);
        for &i in &order {
            replica.apply_update(&updates[i]).unwrap();
        }
        let arr = replica.get_array("seq").unwrap();
        assert_eq!(
            replica.transact(|txn| arr.to_json(txn)),
            expected,
            "order {:?} diverged",
            order
        );
        assert!(!replica.has_pending_structs());
        replica.dbg_check();
    }
}

#[test]
fn applying_an_update_twice_is_idempotent() {
    let mut a = doc_with_client(1);
    let text = a.get_text("t").unwrap();
    a.transact(|txn| text.insert(txn, 0, "hello")).unwrap();
    let update = a.encode_state_as_update(None);

    let mut b = doc_with_client(2);
    b.apply_update(&update).unwrap();
    b.apply_update(&update).unwrap();
    let text_b = b.get_text("t").unwrap();
    assert_eq!(b.transact(|txn| text_b.get_string(txn)), "hello");
    b.dbg_check();
}

#[test]
fn random_two_peer_editing_converges() {
    let mut rng = SmallRng::seed_from_u64(321);
    let mut a = doc_with_client(1);
    let mut b = doc_with_client(2);
    a.get_text("t").unwrap();
    b.get_text("t").unwrap();

    for round in 0..40 {
        for (doc, client) in [(&mut a, 1u32), (&mut b, 2u32)] {
            let text = doc.get_text("t").unwrap();
            for _ in 0..3 {
                let len = doc.transact(|txn| text.len(txn));
                let insert = len == 0 || rng.gen_bool(0.7);
                if insert {
                    let pos = rng.gen_range(0..=len);
                    let content = format!("{}{}", (b'a' + (client as u8 % 26)) as char, round);
                    doc.transact(|txn| text.insert(txn, pos, &content)).unwrap();
                } else {
                    let pos = rng.gen_range(0..len);
                    let del = rng.gen_range(1..=(len - pos).min(3));
                    doc.transact(|txn| text.remove_range(txn, pos, del)).unwrap();
                }
            }
            doc.dbg_check();
        }
        sync(&mut a, &mut b);
        let text_a = a.get_text("t").unwrap();
        let text_b = b.get_text("t").unwrap();
        assert_eq!(
            a.transact(|txn| text_a.get_string(txn)),
            b.transact(|txn| text_b.get_string(txn)),
            "diverged at round {}",
            round
        );
        a.dbg_check();
        b.dbg_check();
    }
}

#[test]
fn random_three_peer_array_editing_converges() {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut docs = vec![doc_with_client(1), doc_with_client(2), doc_with_client(3)];
    for doc in &mut docs {
        doc.get_array("seq").unwrap();
    }

    for round in 0..25 {
        for doc in docs.iter_mut() {
            let arr = doc.get_array("seq").unwrap();
            let len = doc.transact(|txn| arr.len(txn));
            if len == 0 || rng.gen_bool(0.6) {
                let pos = rng.gen_range(0..=len);
                let value = rng.gen_range(0..100i64);
                doc.transact(|txn| arr.insert(txn, pos, [value])).unwrap();
            } else {
                let pos = rng.gen_range(0..len);
                doc.transact(|txn| arr.remove_range(txn, pos, 1)).unwrap();
            }
        }
        // Pairwise sync in a ring.
        for i in 0..docs.len() {
            let (left, right) = docs.split_at_mut(i + 1);
            let j = i + 1;
            if j < left.len() + right.len() {
                let a = &mut left[i];
                let b = &mut right[0];
                sync(a, b);
            }
        }
        sync_all(&mut docs);
        let first = {
            let arr = docs[0].get_array("seq").unwrap();
            docs[0].transact(|txn| arr.to_json(txn))
        };
        for doc in docs.iter_mut().skip(1) {
            let arr = doc.get_array("seq").unwrap();
            assert_eq!(
                doc.transact(|txn| arr.to_json(txn)),
                first,
                "diverged at round {}",
                round
            );
        }
        for doc in docs.iter() {
            doc.dbg_check();
        }
    }
}

fn sync_all(docs: &mut [Doc]) {
    // Broadcast everything everywhere until quiescent (two passes suffice
    // for a fully connected exchange).
    for _ in 0..2 {
        let full: Vec<Vec<u8>> = docs.iter().map(|d| d.encode_state_as_update(None)).collect();
        for doc in docs.iter_mut() {
            for update in &full {
                doc.apply_update(update).unwrap();
            }
        }
    }
}
