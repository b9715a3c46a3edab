//! Memory backend specifics: identity, unsupported update exchange, handle checks.

use std::sync::{Arc, Mutex};

use collabmap::crdt::{CrdtMap, CrdtRoot, MapEvent, MapEventKind, MemoryRoot, Value};

#[test]
fn test_fixed_client_id() {
    let root = MemoryRoot::with_client_id(42);
    assert_eq!(root.client_id(), 42);
    assert_eq!(root.backend(), "memory");
    assert_eq!(root.get_map("m").backend(), "memory");
}

#[test]
fn test_update_exchange_is_unsupported() {
    let root = MemoryRoot::new();
    root.get_map("m").set("k", Value::from(1)).unwrap();

    let err = root.state_vector().unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(err.module(), "crdt");
    assert!(root.encode_update(None).unwrap_err().is_unsupported());
    assert!(root.apply_update(&[0, 0]).unwrap_err().is_unsupported());
    assert!(!root.off_update(root.on_update(Arc::new(|_: &[u8]| {}))));
}

#[test]
fn test_handlers_may_read_the_map() {
    let root = MemoryRoot::new();
    let map = root.get_map("reentrant");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let reader = map.clone();
    map.on(
        MapEventKind::LocalAfterTransaction,
        Arc::new(move |_: &MapEvent| {
            let mut keys = reader.keys();
            keys.sort();
            sink.lock().unwrap().push(keys);
        }),
    );

    map.set("a", Value::from(1)).unwrap();
    map.set("b", Value::from(2)).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1], vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_never_emits_remote_events() {
    let root = MemoryRoot::new();
    let map = root.get_map("quiet");
    let remote = Arc::new(Mutex::new(0usize));
    for kind in [
        MapEventKind::RemoteInsert,
        MapEventKind::RemoteUpdate,
        MapEventKind::RemoteDelete,
        MapEventKind::RemoteAfterTransaction,
    ] {
        let counter = remote.clone();
        map.on(
            kind,
            Arc::new(move |_: &MapEvent| {
                *counter.lock().unwrap() += 1;
            }),
        );
    }
    map.set("a", Value::from(1)).unwrap();
    map.set("a", Value::from(2)).unwrap();
    map.delete("a").unwrap();
    assert_eq!(*remote.lock().unwrap(), 0);
}

#[cfg(feature = "y-crdt")]
#[test]
fn test_rejects_maps_of_other_backends() {
    use collabmap::crdt::YrsRoot;

    let memory = MemoryRoot::new();
    let yrs = YrsRoot::new();
    let foreign = yrs.factory().make_map(Vec::new()).unwrap();

    let err = memory
        .get_map("m")
        .set("nested", Value::Map(foreign))
        .unwrap_err();
    assert!(err.is_handle_error());
}
