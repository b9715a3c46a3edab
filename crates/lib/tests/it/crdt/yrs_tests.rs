//! Yrs backend: update exchange, remote events and convergence between peers.

use std::sync::{Arc, Mutex};

use collabmap::crdt::{
    CrdtMap, CrdtRoot, MapEvent, MapEventKind, MapHandle, Value, YrsMap, YrsRoot,
};

use crate::helpers::*;

const REMOTE_KINDS: [MapEventKind; 4] = [
    MapEventKind::RemoteInsert,
    MapEventKind::RemoteUpdate,
    MapEventKind::RemoteDelete,
    MapEventKind::RemoteAfterTransaction,
];

fn record_remote(map: &MapHandle) -> Arc<Mutex<Vec<MapEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in REMOTE_KINDS {
        let sink = events.clone();
        map.on(
            kind,
            Arc::new(move |event: &MapEvent| {
                sink.lock().unwrap().push(event.clone());
            }),
        );
    }
    events
}

fn kinds(events: &Mutex<Vec<MapEvent>>) -> Vec<MapEventKind> {
    events.lock().unwrap().iter().map(MapEvent::kind).collect()
}

#[test]
fn test_remote_insert_update_delete() {
    let (a, b) = yrs_pair();
    let map_a = a.get_map("m");
    let map_b = b.get_map("m");
    let events = record_remote(&map_b);

    map_a.set("k", Value::from(1)).unwrap();
    push_state(a.as_ref(), b.as_ref());
    {
        let recorded = events.lock().unwrap();
        assert!(matches!(
            &recorded[0],
            MapEvent::RemoteInsert { key, value } if key == "k" && *value == Value::Int(1)
        ));
    }
    assert_eq!(
        kinds(&events),
        vec![MapEventKind::RemoteInsert, MapEventKind::RemoteAfterTransaction]
    );

    events.lock().unwrap().clear();
    map_a.set("k", Value::from("two")).unwrap();
    push_state(a.as_ref(), b.as_ref());
    assert_eq!(
        kinds(&events),
        vec![MapEventKind::RemoteUpdate, MapEventKind::RemoteAfterTransaction]
    );
    assert!(map_b.get("k").unwrap() == "two");

    events.lock().unwrap().clear();
    map_a.delete("k").unwrap();
    push_state(a.as_ref(), b.as_ref());
    assert_eq!(
        kinds(&events),
        vec![MapEventKind::RemoteDelete, MapEventKind::RemoteAfterTransaction]
    );
    assert_eq!(map_b.get("k"), None);
}

#[test]
fn test_local_writes_emit_no_remote_events() {
    let (a, _b) = yrs_pair();
    let map = a.get_map("m");
    let events = record_remote(&map);
    map.set("k", Value::from(1)).unwrap();
    map.delete("k").unwrap();
    assert!(events.lock().unwrap().is_empty());
}

#[test]
fn test_transaction_ships_one_update() {
    let (a, b) = yrs_pair();
    let updates = capture_updates(a.as_ref());
    let map_a = a.get_map("m");
    let map_b = b.get_map("m");
    let events = record_remote(&map_b);

    a.transact(&mut || {
        map_a.set("x", Value::from(1))?;
        map_a.set("y", Value::from(2))?;
        map_a.delete("x")?;
        Ok(())
    })
    .unwrap();

    let updates = updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    b.apply_update(&updates[0]).unwrap();

    assert_eq!(sorted_keys(map_b.as_ref()), vec!["y"]);
    let after = kinds(&events)
        .into_iter()
        .filter(|kind| *kind == MapEventKind::RemoteAfterTransaction)
        .count();
    assert_eq!(after, 1);
}

#[test]
fn test_concurrent_edits_converge() {
    let (a, b) = yrs_pair();
    let map_a = a.get_map("m");
    let map_b = b.get_map("m");

    map_a.set("only_a", Value::from("a")).unwrap();
    map_b.set("only_b", Value::from("b")).unwrap();
    map_a.set("both", Value::from("from a")).unwrap();
    map_b.set("both", Value::from("from b")).unwrap();

    exchange(a.as_ref(), b.as_ref());

    assert_eq!(sorted_keys(map_a.as_ref()), vec!["both", "only_a", "only_b"]);
    assert_eq!(sorted_keys(map_a.as_ref()), sorted_keys(map_b.as_ref()));
    assert_eq!(map_a.get("both"), map_b.get("both"));
}

#[test]
fn test_nested_maps_replicate() {
    let (a, b) = yrs_pair();
    let map_a = a.get_map("m");
    let child = a
        .factory()
        .make_map(vec![("x".to_string(), Value::from(1))])
        .unwrap();
    let detached = child
        .as_any()
        .downcast_ref::<YrsMap>()
        .map(YrsMap::is_attached);
    assert_eq!(detached, Some(false));

    map_a.set("child", Value::Map(child.clone())).unwrap();
    assert_eq!(
        child.as_any().downcast_ref::<YrsMap>().map(YrsMap::is_attached),
        Some(true)
    );

    // an attached map cannot gain a second parent
    let err = map_a.set("again", Value::Map(child)).unwrap_err();
    assert!(err.is_handle_error());

    push_state(a.as_ref(), b.as_ref());
    let nested = b.get_map("m").get("child").unwrap();
    assert_eq!(nested.as_map().unwrap().get("x"), Some(Value::Int(1)));
}

#[test]
fn test_numbers_follow_js_semantics() {
    let root = YrsRoot::new();
    let map = root.get_map("numbers");
    map.set("int", Value::Int(3)).unwrap();
    map.set("float", Value::Float(2.5)).unwrap();
    map.set("integral_float", Value::Float(4.0)).unwrap();

    assert!(matches!(map.get("int"), Some(Value::Int(3))));
    assert!(matches!(map.get("float"), Some(Value::Float(f)) if f == 2.5));
    assert!(matches!(map.get("integral_float"), Some(Value::Int(4))));
}

#[test]
fn test_remote_handler_reads_applied_state() {
    let (a, b) = yrs_pair();
    let map_a = a.get_map("m");
    let map_b = b.get_map("m");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reader = map_b.clone();
    map_b.on(
        MapEventKind::RemoteAfterTransaction,
        Arc::new(move |_: &MapEvent| {
            sink.lock().unwrap().push(reader.len());
        }),
    );

    a.transact(&mut || {
        map_a.set("one", Value::from(1))?;
        map_a.set("two", Value::from(2))?;
        Ok(())
    })
    .unwrap();
    push_state(a.as_ref(), b.as_ref());

    assert_eq!(*seen.lock().unwrap(), vec![2]);
}

#[test]
fn test_malformed_update_is_rejected() {
    let root = YrsRoot::new();
    let err = root.apply_update(&[0xff, 0xff, 0xff]).unwrap_err();
    assert!(err.is_update_error());
}
