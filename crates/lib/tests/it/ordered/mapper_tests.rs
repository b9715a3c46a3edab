//! Mapper strategies plugged into ordered collections.

use std::sync::Arc;

use collabmap::{
    crdt::{CrdtMap, Value},
    object::CrdtObject,
    ordered::{FnMapper, JsonMapper, MappedOrderedMap, OrderedError, ValueMapper},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::helpers::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Layer {
    name: String,
    visible: bool,
    style: Style,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Style {
    color: String,
    width: u32,
}

fn layer(name: &str, color: &str) -> Layer {
    Layer {
        name: name.to_string(),
        visible: true,
        style: Style {
            color: color.to_string(),
            width: 2,
        },
    }
}

#[test]
fn test_json_mapper_stores_flat_structures() {
    let root = test_root();
    let layers = MappedOrderedMap::new(root.get_map("layers"), Arc::new(JsonMapper::<Layer>::new()));
    layers.add("base", layer("Base", "white")).unwrap();
    layers.insert("top", layer("Top", "red"), 0).unwrap();

    assert_eq!(layers.keys(), vec!["top", "base"]);
    assert_eq!(layers.get("base"), Some(layer("Base", "white")));

    // the payload is a regular projected object
    let record = root.get_map("layers").get("top").unwrap();
    let payload = record.as_map().unwrap().get("value").unwrap();
    let payload = payload.as_map().unwrap().clone();
    assert!(payload.get("style.color").unwrap() == "red");
    assert_eq!(
        CrdtObject::new(payload).get_clone(),
        json!({"name": "Top", "visible": true, "style": {"color": "red", "width": 2}})
    );
}

#[test]
fn test_fn_mapper() {
    let root = test_root();
    let upper = FnMapper::new(
        |s: &String, _| Ok(Value::from(s.to_uppercase())),
        |v: &Value| {
            v.as_text()
                .map(str::to_lowercase)
                .ok_or_else(|| {
                    OrderedError::MappingFailed {
                        type_name: "String",
                        reason: format!("expected text, found {}", v.type_name()),
                    }
                    .into()
                })
        },
    );
    let words = MappedOrderedMap::new(root.get_map("words"), Arc::new(upper));
    words.add("w1", "hello".to_string()).unwrap();

    let stored = root.get_map("words").get("w1").unwrap();
    let stored = stored.as_map().unwrap().get("value").unwrap();
    assert!(stored == "HELLO");
    assert_eq!(words.get("w1"), Some("hello".to_string()));
}

#[test]
fn test_value_mapper_is_identity() {
    let root = test_root();
    let values = MappedOrderedMap::new(root.get_map("raw"), Arc::new(ValueMapper));
    values.add("n", Value::from(1)).unwrap();
    values.add("t", Value::from("text")).unwrap();
    values.add("z", Value::Null).unwrap();

    assert_eq!(
        values.values(),
        vec![Value::Int(1), Value::from("text"), Value::Null]
    );
}

#[test]
fn test_undecodable_entries_are_skipped_on_load() {
    let root = test_root();
    let map = root.get_map("mixed");
    {
        let list = MappedOrderedMap::new(map.clone(), Arc::new(JsonMapper::<u32>::new()));
        list.add("good", 1).unwrap();
    }
    map.set("plain", Value::from("not a record")).unwrap();

    let list = MappedOrderedMap::new(map, Arc::new(JsonMapper::<u32>::new()));
    assert_eq!(list.keys(), vec!["good"]);
}

#[test]
fn test_mapping_failure_is_reported() {
    let root = test_root();
    let failing = FnMapper::new(
        |_: &u8, _| {
            Err(OrderedError::MappingFailed {
                type_name: "u8",
                reason: "refused".to_string(),
            }
            .into())
        },
        |_: &Value| Ok(0u8),
    );
    let list = MappedOrderedMap::new(root.get_map("failing"), Arc::new(failing));
    let err = list.add("x", 1).unwrap_err();
    assert!(err.is_mapping_error());
    assert!(list.is_empty());
}
