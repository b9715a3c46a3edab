//! Whole-structure operations: set, init, get_clone, typed access.

use collabmap::{
    crdt::{CrdtMap, Value},
    object::CrdtObject,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::helpers::*;

fn new_object(name: &str) -> (std::sync::Arc<dyn collabmap::crdt::CrdtRoot>, CrdtObject) {
    let root = test_root();
    let object = CrdtObject::new(root.get_map(name));
    (root, object)
}

#[test]
fn test_update_writes_flat_keys() {
    let (root, person) = new_object("person");
    person
        .update(|p| {
            p.set("name", "Alice")?;
            p.set("age", 40)?;
            Ok(())
        })
        .unwrap();

    let map = root.get_map("person");
    assert!(map.get("name").unwrap() == "Alice");
    assert_eq!(map.get("age"), Some(Value::Int(40)));
}

#[test]
fn test_round_trip_nested_values() {
    let (_root, obj) = new_object("doc");
    let value = json!({
        "title": "Report",
        "draft": false,
        "score": 9.5,
        "missing": null,
        "meta": {},
        "author": {"name": "Ada", "address": {"city": "London", "zip": "N1"}},
        "tags": ["a", null, "c"],
        "items": [{"label": "x", "done": true}, {"label": "y", "done": false}],
        "matrix": [[1, 2], [3]]
    });
    obj.set(&value).unwrap();
    assert_eq!(obj.get_clone(), value);
    assert_eq!(obj.to_json(), value);
}

#[test]
fn test_round_trip_top_level_array() {
    let (_root, obj) = new_object("list");
    let value = json!([{"x": 1}, {"x": 2}]);
    obj.set(&value).unwrap();
    assert_eq!(obj.get_clone(), value);
    assert_eq!(sorted_keys(obj.map().as_ref()), vec!["0.x", "1.x"]);
}

#[test]
fn test_gaps_read_back_as_null() {
    let (root, obj) = new_object("sparse");
    let map = root.get_map("sparse");
    map.set("list.0", Value::from("first")).unwrap();
    map.set("list.3", Value::from("fourth")).unwrap();

    assert_eq!(
        obj.get_clone(),
        json!({"list": ["first", null, null, "fourth"]})
    );
    let list = obj.get().array("list").unwrap();
    assert_eq!(list.len(), 4);
    assert_eq!(list.indices(), vec![0, 3]);
}

#[test]
fn test_huge_numeric_segments_are_field_names() {
    let (root, obj) = new_object("hostile");
    let map = root.get_map("hostile");
    map.set("a.18446744073709551615", Value::from(1)).unwrap();
    map.set("b.4000000000", Value::from(2)).unwrap();
    map.set("b.1", Value::from(3)).unwrap();

    assert_eq!(
        obj.get_clone(),
        json!({"a": {"18446744073709551615": 1}, "b": {"1": 3, "4000000000": 2}})
    );
    assert!(obj.get().array("a").is_none());
    assert!(obj.get().object("b").is_some());
}

#[test]
fn test_array_positions_are_bounded() {
    let (_root, obj) = new_object("bounded");
    obj.get().set("list", json!(["x"])).unwrap();
    let list = obj.get().array("list").unwrap();
    let err = list.set(usize::MAX, "far").unwrap_err();
    assert!(err.is_shape_error());
    assert_eq!(obj.get_clone(), json!({"list": ["x"]}));
}

#[test]
fn test_set_replaces_missing_top_level_fields() {
    let (root, obj) = new_object("items");
    obj.set(&json!({
        "i1": {"enabled": true, "color": "red"},
        "i2": {"enabled": false, "color": "blue"}
    }))
    .unwrap();
    obj.set(&json!({"i1": {"enabled": true, "color": "red"}}))
        .unwrap();

    let map = root.get_map("items");
    assert_no_keys_with_prefix(map.as_ref(), "i2");
    assert_eq!(sorted_keys(map.as_ref()), vec!["i1.color", "i1.enabled"]);
    assert_eq!(
        obj.get_clone(),
        json!({"i1": {"enabled": true, "color": "red"}})
    );
}

#[test]
fn test_set_is_one_transaction() {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };
    use collabmap::crdt::{MapEvent, MapEventKind};

    let (_root, obj) = new_object("batched");
    let commits = Arc::new(AtomicUsize::new(0));
    let counter = commits.clone();
    obj.map().on(
        MapEventKind::LocalAfterTransaction,
        Arc::new(move |_: &MapEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        }),
    );

    obj.set(&json!({"a": 1, "b": {"c": 2, "d": [1, 2, 3]}}))
        .unwrap();
    assert_eq!(commits.load(Ordering::SeqCst), 1);
}

#[test]
fn test_init_is_idempotent() {
    let (_root, obj) = new_object("settings");
    assert!(obj.init(&json!({"theme": "dark"})).unwrap());
    assert!(!obj.init(&json!({"theme": "light", "extra": 1})).unwrap());
    assert_eq!(obj.get_clone(), json!({"theme": "dark"}));
}

#[test]
fn test_empty_map_clones_to_empty_object() {
    let (_root, obj) = new_object("nothing");
    assert_eq!(obj.get_clone(), json!({}));
    assert!(obj.get().is_empty());
}

#[test]
fn test_empty_structures_share_encoding() {
    let (root, obj) = new_object("empties");
    obj.set(&json!({"list": [], "object": {}})).unwrap();

    let map = root.get_map("empties");
    assert!(map.get("list").unwrap().is_undefined());
    assert!(map.get("object").unwrap().is_undefined());
    assert_eq!(obj.get_clone(), json!({"list": {}, "object": {}}));
}

#[test]
fn test_invalid_field_names_rejected() {
    let (_root, obj) = new_object("invalid");
    assert!(obj.set(&json!({"a.b": 1})).unwrap_err().is_invalid_field());
    assert!(obj.set(&json!({"": 1})).unwrap_err().is_invalid_field());
    assert!(obj.get().set("x.y", 1).unwrap_err().is_invalid_field());
    assert!(obj.map().is_empty());
}

#[test]
fn test_set_rejects_primitives() {
    let (_root, obj) = new_object("primitive");
    let err = obj.set(&json!("text")).unwrap_err();
    assert!(err.is_shape_error());
    assert_eq!(err.module(), "object");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Layer {
    name: String,
    visible: bool,
    opacity: f64,
    tags: Vec<String>,
}

#[test]
fn test_typed_access() {
    let (_root, obj) = new_object("layer");
    let layer = Layer {
        name: "background".to_string(),
        visible: true,
        opacity: 0.5,
        tags: vec!["base".to_string(), "locked".to_string()],
    };
    obj.set_from(&layer).unwrap();
    assert_eq!(obj.get_as::<Layer>().unwrap(), layer);

    obj.get().set("visible", "yes").unwrap();
    let err = obj.get_as::<Layer>().unwrap_err();
    assert!(err.is_serialization_error());
}
