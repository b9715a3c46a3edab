//! Structured object projection over a flat replicated map.
//!
//! [`CrdtObject`] presents one replicated map as a nested structure. Nested properties
//! are stored under dot-joined flat keys (`address.city`, `items.0.label`), so every
//! property is an independent key for the replication layer and concurrent edits to
//! different properties never conflict.
//!
//! # Core Types
//!
//! - [`CrdtObject`] - Owner of the projection: whole-structure operations
//! - [`StructuredView`] / [`ArrayView`] - Live views used for property access
//! - [`Field`] - A materialized property: primitive, object view or array view
//! - [`FieldAccess`] - Property access shared by both view shapes
//!
//! ```
//! use collabmap::crdt::{CrdtMap, CrdtRoot, MemoryRoot};
//! use collabmap::object::CrdtObject;
//! use serde_json::json;
//!
//! let root = MemoryRoot::new();
//! let person = CrdtObject::new(root.get_map("person"));
//! person.set(&json!({"name": "Alice", "address": {"city": "Paris"}})).unwrap();
//!
//! assert!(root.get_map("person").get("address.city").unwrap() == "Paris");
//! assert_eq!(person.get_clone(), json!({"name": "Alice", "address": {"city": "Paris"}}));
//! ```

mod errors;
pub mod path;
mod view;

use std::sync::OnceLock;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as Json;
use tracing::debug;

pub use errors::ObjectError;
pub use view::{ArrayView, Field, FieldAccess, StructuredView};

use crate::{
    Result,
    crdt::{MapHandle, transact},
};
use path::PathBuf;

/// A nested structure projected onto one replicated map.
#[derive(Debug)]
pub struct CrdtObject {
    map: MapHandle,
    view: OnceLock<StructuredView>,
}

impl CrdtObject {
    /// Projects `map`. Existing content is kept.
    pub fn new(map: MapHandle) -> Self {
        Self {
            map,
            view: OnceLock::new(),
        }
    }

    /// The backing replicated map
    pub fn map(&self) -> &MapHandle {
        &self.map
    }

    /// Returns the live view of the whole structure.
    ///
    /// The view is created on first use and reused afterwards. Writes through it go
    /// straight to the map.
    pub fn get(&self) -> &StructuredView {
        self.view
            .get_or_init(|| StructuredView::over(self.map.clone()))
    }

    /// Runs `mutator` against the live view inside one transaction.
    ///
    /// Peers receive every write made by `mutator` as one unit.
    pub fn update<R>(&self, mutator: impl FnOnce(&StructuredView) -> Result<R>) -> Result<R> {
        transact(self.map.as_ref(), || mutator(self.get()))
    }

    /// Replaces the whole structure with `value`, an object or an array.
    ///
    /// Top-level fields missing from `value` are deleted together with everything
    /// below them; every field of `value` is then written. All of it happens in one
    /// transaction.
    pub fn set(&self, value: &Json) -> Result<()> {
        let fields: Vec<(String, &Json)> = match value {
            Json::Object(fields) => fields.iter().map(|(k, v)| (k.clone(), v)).collect(),
            Json::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            other => {
                return Err(ObjectError::NotStructured {
                    actual: json_kind(other),
                }
                .into());
            }
        };
        view::check_fields(value)?;

        let map = self.map.as_ref();
        transact(map, || {
            let root = PathBuf::root();
            let stale: Vec<String> = view::child_segments(map, &root)
                .into_iter()
                .filter(|existing| !fields.iter().any(|(name, _)| name == existing))
                .collect();
            debug!(
                fields = fields.len(),
                removed = stale.len(),
                "replacing structure"
            );
            for name in &stale {
                view::remove_tree(map, &root.join(name))?;
            }
            for (name, field) in &fields {
                view::write_at(map, &root.join(name), field)?;
            }
            Ok(())
        })
    }

    /// Calls [`set`](CrdtObject::set) only if the map has no keys yet.
    ///
    /// Returns whether the value was written.
    pub fn init(&self, value: &Json) -> Result<bool> {
        if !self.map.is_empty() {
            return Ok(false);
        }
        self.set(value)?;
        Ok(true)
    }

    /// Rebuilds an independent nested structure from the flat keys.
    ///
    /// Segment runs made only of array positions become arrays of length
    /// `max position + 1`, with `null` filling gaps. An empty map yields `{}`.
    pub fn get_clone(&self) -> Json {
        view::snapshot(self.map.as_ref(), &PathBuf::root())
    }

    /// Same as [`get_clone`](CrdtObject::get_clone)
    pub fn to_json(&self) -> Json {
        self.get_clone()
    }

    /// Deserializes the current structure into `T`
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.get_clone()).map_err(|e| {
            ObjectError::DeserializationFailed {
                object: self.describe(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Serializes `value` and replaces the structure with it
    pub fn set_from<T: Serialize>(&self, value: &T) -> Result<()> {
        let json = serde_json::to_value(value).map_err(|e| ObjectError::SerializationFailed {
            object: self.describe(),
            reason: e.to_string(),
        })?;
        self.set(&json)
    }

    fn describe(&self) -> String {
        format!("{} object", self.map.backend())
    }
}

fn json_kind(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}
