//! Ordered collections following edits made by another yrs peer.

use std::sync::Arc;

use collabmap::{
    crdt::{CrdtMap, Value},
    ordered::{JsonMapper, MappedOrderedMap, ValueMapper},
};

use crate::helpers::*;

fn strings(root: &dyn collabmap::crdt::CrdtRoot) -> MappedOrderedMap<String> {
    MappedOrderedMap::new(root.get_map("list"), Arc::new(JsonMapper::<String>::new()))
}

#[test]
fn test_remote_adds_and_removes_patch_cache() {
    let (a, b) = yrs_pair();
    let list_a = strings(a.as_ref());
    let list_b = strings(b.as_ref());

    list_a.add("x", "one".to_string()).unwrap();
    list_a.add("y", "two".to_string()).unwrap();
    push_state(a.as_ref(), b.as_ref());
    assert_eq!(list_b.keys(), vec!["x", "y"]);
    assert_eq!(list_b.get("y"), Some("two".to_string()));

    list_a.remove("x").unwrap();
    push_state(a.as_ref(), b.as_ref());
    assert_eq!(list_b.keys(), vec!["y"]);
}

#[test]
fn test_remote_insert_renumbering_is_applied() {
    let (a, b) = yrs_pair();
    let list_a = strings(a.as_ref());
    let list_b = strings(b.as_ref());

    for key in ["a", "b", "c"] {
        list_a.add(key, key.to_uppercase()).unwrap();
    }
    push_state(a.as_ref(), b.as_ref());

    // only nested index keys change for a, b and c
    list_a.insert("d", "D".to_string(), 0).unwrap();
    list_a.set_index("c", 1).unwrap();
    push_state(a.as_ref(), b.as_ref());

    assert_eq!(list_b.keys(), list_a.keys());
    for key in list_a.keys() {
        assert_eq!(list_b.order_index(&key), list_a.order_index(&key));
    }
}

#[test]
fn test_concurrent_adds_converge() {
    let (a, b) = yrs_pair();
    let list_a = strings(a.as_ref());
    let list_b = strings(b.as_ref());

    list_a.add("from_a", "A".to_string()).unwrap();
    list_b.add("from_b", "B".to_string()).unwrap();
    exchange(a.as_ref(), b.as_ref());

    // both picked index 1; the key decides
    assert_eq!(list_a.order_index("from_a"), list_a.order_index("from_b"));
    assert_eq!(list_a.keys(), vec!["from_a", "from_b"]);
    assert_eq!(list_a.keys(), list_b.keys());
}

#[test]
fn test_remote_payload_edit_is_reloaded() {
    let (a, b) = yrs_pair();
    let list_a = MappedOrderedMap::new(a.get_map("values"), Arc::new(ValueMapper));
    let list_b = MappedOrderedMap::new(b.get_map("values"), Arc::new(ValueMapper));

    list_a.add("k", Value::from(1)).unwrap();
    push_state(a.as_ref(), b.as_ref());
    assert_eq!(list_b.get("k"), Some(Value::Int(1)));

    // edit the nested record directly, as another client implementation might
    let record = a.get_map("values").get("k").unwrap();
    record.as_map().unwrap().set("value", Value::from(2)).unwrap();
    push_state(a.as_ref(), b.as_ref());
    assert_eq!(list_b.get("k"), Some(Value::Int(2)));
}

#[test]
fn test_corrupt_remote_entry_is_dropped() {
    let (a, b) = yrs_pair();
    let list_b = strings(b.as_ref());

    a.get_map("list").set("bad", Value::from(7)).unwrap();
    push_state(a.as_ref(), b.as_ref());
    assert!(list_b.is_empty());
    assert!(b.get_map("list").has("bad"));
}

#[test]
fn test_local_inserts_race_remote_applies() {
    let (a, b) = yrs_pair();
    let list_a = strings(a.as_ref());
    for i in 0..5 {
        list_a.add(&format!("base{i}"), i.to_string()).unwrap();
    }
    push_state(a.as_ref(), b.as_ref());

    let remote = {
        let (a, b) = (a.clone(), b.clone());
        std::thread::spawn(move || {
            let list_b = strings(b.as_ref());
            for i in 0..40 {
                list_b.add(&format!("remote{i}"), i.to_string()).unwrap();
                push_state(b.as_ref(), a.as_ref());
            }
        })
    };
    for i in 0..40 {
        list_a.insert(&format!("local{i}"), i.to_string(), 0).unwrap();
    }
    remote.join().unwrap();

    let reloaded = strings(a.as_ref());
    assert_eq!(list_a.size(), 85);
    assert_eq!(list_a.keys(), reloaded.keys());
    for key in reloaded.keys() {
        assert_eq!(list_a.order_index(&key), reloaded.order_index(&key), "{key}");
    }
}
