//! Observer dispatch: shallow and deep events, change summaries, doc-level
//! events, subscriptions.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use weft::{Delta, Doc, EntryChange, Event, Options, Out, PathSegment};

fn doc_with_client(client: u32) -> Doc {
    Doc::with_options(Options {
        client_id: Some(client),
        ..Options::default()
    })
}

#[test]
fn sequence_observers_see_a_delta() {
    let mut doc = doc_with_client(1);
    let arr = doc.get_array("seq").unwrap();
    doc.transact(|txn| arr.insert(txn, 0, [1i64, 2, 3])).unwrap();

    let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    doc.observe(&arr, move |e| sink.borrow_mut().push(e.clone()));

    doc.transact(|txn| {
        arr.insert(txn, 1, ["new"])?;
        arr.remove_range(txn, 3, 1)
    })
    .unwrap();

    let events = seen.borrow();
    assert_eq!(events.len(), 1);
    let delta = &events[0].delta;
    assert_eq!(
        delta.as_slice(),
        &[
            Delta::Retain(1),
            Delta::Inserted(vec![Out::Any(json!("new"))]),
            Delta::Retain(1),
            Delta::Deleted(1),
        ]
    );
    assert!(events[0].path.is_empty());
}

#[test]
fn map_observers_see_entry_changes() {
    let mut doc = doc_with_client(1);
    let map = doc.get_map("kv").unwrap();
    doc.transact(|txn| map.insert(txn, "stays", 1i64)).unwrap();
    doc.transact(|txn| map.insert(txn, "updated", "old")).unwrap();

    let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    doc.observe(&map, move |e| sink.borrow_mut().push(e.clone()));

    doc.transact(|txn| {
        map.insert(txn, "added", true)?;
        map.insert(txn, "updated", "new")?;
        map.remove(txn, "stays");
        Ok::<(), weft::Error>(())
    })
    .unwrap();

    let events = seen.borrow();
    assert_eq!(events.len(), 1);
    let keys = &events[0].keys;
    assert_eq!(
        keys.get("added"),
        Some(&EntryChange::Inserted(Out::Any(json!(true))))
    );
    assert_eq!(
        keys.get("updated"),
        Some(&EntryChange::Updated {
            old: Out::Any(json!("old")),
            new: Out::Any(json!("new")),
        })
    );
    assert_eq!(
        keys.get("stays"),
        Some(&EntryChange::Removed(Out::Any(json!(1))))
    );
}

#[test]
fn deep_observers_get_paths_to_nested_changes() {
    let mut doc = doc_with_client(1);
    let map = doc.get_map("root").unwrap();
    doc.transact(|txn| {
        map.insert(txn, "list", weft::In::Array(vec![weft::In::from("a")]))
    })
    .unwrap();

    let seen: Rc<RefCell<Vec<Vec<Event>>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    doc.observe_deep(&map, move |events| sink.borrow_mut().push(events.to_vec()));

    let nested = doc.transact(|txn| match map.get(txn, "list") {
        Some(Out::Array(list)) => list,
        _ => panic!("expected a nested array"),
    });
    doc.transact(|txn| nested.insert(txn, 1, ["b"])).unwrap();

    let batches = seen.borrow();
    assert_eq!(batches.len(), 1);
    let events = &batches[0];
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].path.as_slice(), &[PathSegment::Key("list".into())]);
    assert_eq!(
        events[0].delta.as_slice(),
        &[Delta::Retain(1), Delta::Inserted(vec![Out::Any(json!("b"))])]
    );
}

#[test]
fn remote_transactions_fire_observers_too() {
    let mut a = doc_with_client(1);
    let text_a = a.get_text("t").unwrap();
    a.transact(|txn| text_a.insert(txn, 0, "hi")).unwrap();

    let mut b = doc_with_client(2);
    let text_b = b.get_text("t").unwrap();
    let seen: Rc<RefCell<Vec<Event>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    b.observe(&text_b, move |e| sink.borrow_mut().push(e.clone()));

    b.apply_update(&a.encode_state_as_update(None)).unwrap();

    let events = seen.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].delta.as_slice(),
        &[Delta::Inserted(vec![Out::Any(json!("hi"))])]
    );
}

#[test]
fn unsubscribed_observers_stay_silent() {
    let mut doc = doc_with_client(1);
    let arr = doc.get_array("seq").unwrap();

    let count = Rc::new(RefCell::new(0u32));
    let sink = count.clone();
    let sub = doc.observe(&arr, move |_| *sink.borrow_mut() += 1);

    doc.transact(|txn| arr.insert(txn, 0, [1i64])).unwrap();
    assert_eq!(*count.borrow(), 1);

    assert!(doc.unsubscribe(sub));
    doc.transact(|txn| arr.insert(txn, 0, [2i64])).unwrap();
    assert_eq!(*count.borrow(), 1);
    assert!(!doc.unsubscribe(sub));
}

#[test]
fn update_events_carry_the_origin() {
    let mut doc = doc_with_client(1);
    let arr = doc.get_array("seq").unwrap();

    let origins: Rc<RefCell<Vec<Option<String>>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = origins.clone();
    doc.on_update(move |e| {
        sink.borrow_mut()
            .push(e.origin.as_ref().map(|o| o.to_string()))
    });

    doc.transact_with("provider-7".into(), |txn| arr.insert(txn, 0, [1i64]))
        .unwrap();
    doc.transact(|txn| arr.insert(txn, 0, [2i64])).unwrap();

    assert_eq!(
        origins.borrow().as_slice(),
        &[Some("provider-7".to_string()), None]
    );
}

#[test]
fn transaction_summaries_describe_the_boundaries() {
    let mut doc = doc_with_client(4);
    let text = doc.get_text("t").unwrap();

    let summaries = Rc::new(RefCell::new(Vec::new()));
    let sink = summaries.clone();
    doc.on_after_transaction(move |s| {
        sink.borrow_mut()
            .push((s.local, s.before_state.get(4), s.after_state.get(4)))
    });

    doc.transact(|txn| text.insert(txn, 0, "abc")).unwrap();
    doc.transact(|txn| text.insert(txn, 3, "d")).unwrap();

    assert_eq!(summaries.borrow().as_slice(), &[(true, 0, 3), (true, 3, 4)]);
}

#[test]
fn destroy_fires_once_and_clears_handlers() {
    let mut doc = doc_with_client(1);
    let fired = Rc::new(RefCell::new(0u32));
    let sink = fired.clone();
    doc.on_destroy(move |_| *sink.borrow_mut() += 1);
    doc.destroy();
    doc.destroy();
    assert_eq!(*fired.borrow(), 1);
}
