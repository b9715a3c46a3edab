//! Live views over a flat replicated map.
//!
//! A view is a `(map, path)` pair. Reading a field inspects the flat keys at and below
//! `path.field` and materializes the matching shape on demand:
//! - a primitive stored under the key is returned as [`Field::Value`]
//! - a nested replicated map becomes an object view over that map
//! - descendant keys whose next segments are all array positions become an
//!   [`ArrayView`], any other descendants a [`StructuredView`]
//! - a key holding `Undefined` with no descendants is an empty object
//!
//! Views hold no state besides the address, so they always reflect the current
//! content of the map, including remote changes.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map as JsonMap, Value as Json};
use tracing::trace;

use super::{
    ObjectError,
    path::{Path, PathBuf, parse_index, validate_field},
};
use crate::{
    Result,
    constants::MAX_ARRAY_POSITION,
    crdt::{CrdtMap, MapHandle, Value, transact},
};

/// A materialized property of a view.
#[derive(Debug, Clone)]
pub enum Field {
    /// A primitive stored directly under the flat key
    Value(Value),
    /// An object-shaped subtree
    Object(StructuredView),
    /// An array-shaped subtree
    Array(ArrayView),
}

impl Field {
    /// Borrows the primitive, if this field is one
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Field::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Borrows the object view, if this field is object-shaped
    pub fn as_object(&self) -> Option<&StructuredView> {
        match self {
            Field::Object(view) => Some(view),
            _ => None,
        }
    }

    /// Borrows the array view, if this field is array-shaped
    pub fn as_array(&self) -> Option<&ArrayView> {
        match self {
            Field::Array(view) => Some(view),
            _ => None,
        }
    }

    /// Returns an independent snapshot of this field
    pub fn to_json(&self) -> Json {
        match self {
            Field::Value(value) => value.to_json().unwrap_or(Json::Null),
            Field::Object(view) => view.to_json(),
            Field::Array(view) => view.to_json(),
        }
    }
}

/// Property access shared by object- and array-shaped views.
pub trait FieldAccess {
    /// Reads the field called `name`, or `None` if it is absent
    fn get_field(&self, name: &str) -> Option<Field>;

    /// Writes `value` under `name`, replacing whatever was stored there
    fn set_field(&self, name: &str, value: &Json) -> Result<()>;

    /// Deletes the field and everything below it. Returns whether anything was removed.
    fn remove_field(&self, name: &str) -> Result<bool>;

    /// Names of the fields currently present
    fn field_names(&self) -> Vec<String>;
}

/// Address of a view: a map and a path inside it.
#[derive(Debug, Clone)]
struct Node {
    map: MapHandle,
    path: PathBuf,
}

impl Node {
    fn children(&self) -> BTreeSet<String> {
        child_segments(self.map.as_ref(), &self.path)
    }

    fn read(&self, name: &str) -> Option<Field> {
        read_at(&self.map, self.path.join(name))
    }

    fn write(&self, name: &str, value: &Json) -> Result<()> {
        check_fields(value)?;
        let path = self.path.join(name);
        let map = self.map.as_ref();
        transact(map, || write_at(map, &path, value))
    }

    fn remove(&self, name: &str) -> Result<bool> {
        let path = self.path.join(name);
        let map = self.map.as_ref();
        transact(map, || remove_tree(map, &path))
    }
}

/// Object-shaped view over a flat replicated map.
///
/// ```
/// use collabmap::crdt::{CrdtRoot, MemoryRoot};
/// use collabmap::object::CrdtObject;
/// use serde_json::json;
///
/// let root = MemoryRoot::new();
/// let person = CrdtObject::new(root.get_map("person"));
/// person.get().set("name", "Alice").unwrap();
/// person.get().set("address", json!({"city": "Paris"})).unwrap();
///
/// let city = person.get().get_path("address.city").unwrap();
/// assert_eq!(city.to_json(), json!("Paris"));
/// ```
#[derive(Debug, Clone)]
pub struct StructuredView {
    node: Node,
}

impl StructuredView {
    /// View over the whole of `map`
    pub fn over(map: MapHandle) -> Self {
        Self::at(map, PathBuf::root())
    }

    pub(crate) fn at(map: MapHandle, path: PathBuf) -> Self {
        Self {
            node: Node { map, path },
        }
    }

    /// Path of this view inside its map
    pub fn path(&self) -> &Path {
        &self.node.path
    }

    /// The map this view reads from
    pub fn map(&self) -> &MapHandle {
        &self.node.map
    }

    /// Reads a field
    pub fn get(&self, name: &str) -> Option<Field> {
        self.get_field(name)
    }

    /// Writes a field from anything convertible to JSON
    pub fn set(&self, name: &str, value: impl Into<Json>) -> Result<()> {
        self.set_field(name, &value.into())
    }

    /// Deletes a field and its descendants
    pub fn remove(&self, name: &str) -> Result<bool> {
        self.remove_field(name)
    }

    /// Returns true if the field is present
    pub fn has(&self, name: &str) -> bool {
        self.get_field(name).is_some()
    }

    /// Reads the object-shaped field `name`
    pub fn object(&self, name: &str) -> Option<StructuredView> {
        match self.get_field(name)? {
            Field::Object(view) => Some(view),
            _ => None,
        }
    }

    /// Reads the array-shaped field `name`
    pub fn array(&self, name: &str) -> Option<ArrayView> {
        match self.get_field(name)? {
            Field::Array(view) => Some(view),
            _ => None,
        }
    }

    /// Follows a dot-separated path of field names and array positions.
    pub fn get_path(&self, path: &str) -> Option<Field> {
        let path = PathBuf::normalize(path);
        let mut current = Field::Object(self.clone());
        for segment in path.components() {
            current = match current {
                Field::Object(view) => view.get_field(segment)?,
                Field::Array(view) => view.get_field(segment)?,
                Field::Value(_) => return None,
            };
        }
        Some(current)
    }

    /// Number of fields present
    pub fn len(&self) -> usize {
        self.node.children().len()
    }

    /// Returns true if no field is present
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an independent snapshot of this subtree
    pub fn to_json(&self) -> Json {
        snapshot(self.node.map.as_ref(), &self.node.path)
    }
}

impl FieldAccess for StructuredView {
    fn get_field(&self, name: &str) -> Option<Field> {
        validate_field(name).ok()?;
        self.node.read(name)
    }

    fn set_field(&self, name: &str, value: &Json) -> Result<()> {
        validate_field(name)?;
        self.node.write(name, value)
    }

    fn remove_field(&self, name: &str) -> Result<bool> {
        validate_field(name)?;
        self.node.remove(name)
    }

    fn field_names(&self) -> Vec<String> {
        self.node.children().into_iter().collect()
    }
}

/// Array-shaped view over a flat replicated map.
///
/// Positions are the numeric path segments present below the view. Gaps are allowed;
/// [`len`](ArrayView::len) is one past the highest present position.
#[derive(Debug, Clone)]
pub struct ArrayView {
    node: Node,
}

impl ArrayView {
    pub(crate) fn at(map: MapHandle, path: PathBuf) -> Self {
        Self {
            node: Node { map, path },
        }
    }

    /// Path of this view inside its map
    pub fn path(&self) -> &Path {
        &self.node.path
    }

    /// Present positions, ascending
    pub fn indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .node
            .children()
            .iter()
            .filter_map(|segment| parse_index(segment))
            .collect();
        indices.sort_unstable();
        indices
    }

    /// One past the highest present position
    pub fn len(&self) -> usize {
        self.indices().last().map_or(0, |max| max.saturating_add(1))
    }

    /// Returns true if no position is present
    pub fn is_empty(&self) -> bool {
        self.indices().is_empty()
    }

    /// Reads the element at `index`
    pub fn get(&self, index: usize) -> Option<Field> {
        self.node.read(&index.to_string())
    }

    /// Writes the element at `index`
    pub fn set(&self, index: usize, value: impl Into<Json>) -> Result<()> {
        check_position(index)?;
        self.node.write(&index.to_string(), &value.into())
    }

    /// Writes `value` at position [`len`](ArrayView::len) and returns that position
    pub fn push(&self, value: impl Into<Json>) -> Result<usize> {
        let index = self.len();
        self.set(index, value)?;
        Ok(index)
    }

    /// Deletes the element at `index`, leaving a gap
    pub fn remove(&self, index: usize) -> Result<bool> {
        self.node.remove(&index.to_string())
    }

    /// Present elements with their positions, ascending
    pub fn elements(&self) -> Vec<(usize, Field)> {
        self.indices()
            .into_iter()
            .filter_map(|index| self.get(index).map(|field| (index, field)))
            .collect()
    }

    /// Returns an independent snapshot of this subtree
    pub fn to_json(&self) -> Json {
        snapshot(self.node.map.as_ref(), &self.node.path)
    }
}

impl FieldAccess for ArrayView {
    fn get_field(&self, name: &str) -> Option<Field> {
        self.get(parse_index(name)?)
    }

    fn set_field(&self, name: &str, value: &Json) -> Result<()> {
        let index = array_position(name)?;
        self.node.write(&index.to_string(), value)
    }

    fn remove_field(&self, name: &str) -> Result<bool> {
        let index = array_position(name)?;
        self.remove(index)
    }

    fn field_names(&self) -> Vec<String> {
        self.indices().into_iter().map(|i| i.to_string()).collect()
    }
}

fn check_position(position: usize) -> std::result::Result<(), ObjectError> {
    if position > MAX_ARRAY_POSITION {
        return Err(ObjectError::PositionOutOfRange {
            position,
            max: MAX_ARRAY_POSITION,
        });
    }
    Ok(())
}

fn array_position(name: &str) -> std::result::Result<usize, ObjectError> {
    parse_index(name).ok_or_else(|| ObjectError::InvalidField {
        field: name.to_string(),
        reason: "array positions must be non-negative integers",
    })
}

/// Distinct first segments of every key strictly below `path`.
pub(crate) fn child_segments(map: &dyn CrdtMap, path: &Path) -> BTreeSet<String> {
    map.keys()
        .iter()
        .filter_map(|key| path.child_segment(key))
        .map(str::to_string)
        .collect()
}

fn read_at(map: &MapHandle, path: PathBuf) -> Option<Field> {
    let stored = match map.get(path.as_str()) {
        Some(Value::Map(nested)) => return Some(Field::Object(StructuredView::over(nested))),
        Some(Value::Undefined) => Some(Value::Undefined),
        Some(primitive) => return Some(Field::Value(primitive)),
        None => None,
    };

    let segments = child_segments(map.as_ref(), &path);
    if segments.is_empty() {
        // "present but empty"
        return stored.map(|_| Field::Object(StructuredView::at(map.clone(), path)));
    }
    if segments.iter().all(|segment| parse_index(segment).is_some()) {
        Some(Field::Array(ArrayView::at(map.clone(), path)))
    } else {
        Some(Field::Object(StructuredView::at(map.clone(), path)))
    }
}

/// Rejects values containing object keys that cannot be path segments.
pub(crate) fn check_fields(value: &Json) -> Result<()> {
    match value {
        Json::Object(fields) => {
            for (name, child) in fields {
                validate_field(name)?;
                check_fields(child)?;
            }
        }
        Json::Array(items) => {
            if let Some(last) = items.len().checked_sub(1) {
                check_position(last)?;
            }
            for item in items {
                check_fields(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Writes `value` at `path`, flattening structures into descendant keys.
///
/// Callers validate field names with [`check_fields`] first and run this inside a
/// transaction.
pub(crate) fn write_at(map: &dyn CrdtMap, path: &PathBuf, value: &Json) -> Result<()> {
    match value {
        Json::Object(fields) if fields.is_empty() => write_empty(map, path),
        Json::Array(items) if items.is_empty() => write_empty(map, path),
        Json::Object(fields) => {
            remove_tree(map, path)?;
            for (name, child) in fields {
                write_at(map, &path.join(name), child)?;
            }
            Ok(())
        }
        Json::Array(items) => {
            remove_tree(map, path)?;
            for (index, child) in items.iter().enumerate() {
                write_at(map, &path.join_index(index), child)?;
            }
            Ok(())
        }
        scalar => {
            remove_descendants(map, path)?;
            let value = Value::from_json(scalar).unwrap_or(Value::Null);
            trace!(key = %path, value = %value, "write primitive");
            map.set(path.as_str(), value)
        }
    }
}

fn write_empty(map: &dyn CrdtMap, path: &PathBuf) -> Result<()> {
    remove_descendants(map, path)?;
    trace!(key = %path, "write empty structure");
    map.set(path.as_str(), Value::Undefined)
}

/// Deletes every strict descendant of `path`. Returns how many keys were removed.
pub(crate) fn remove_descendants(map: &dyn CrdtMap, path: &Path) -> Result<usize> {
    let mut removed = 0;
    for key in map.keys() {
        if path.strip_descendant(&key).is_some() && map.delete(&key)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// Deletes `path` itself and every descendant. Returns whether anything was removed.
pub(crate) fn remove_tree(map: &dyn CrdtMap, path: &Path) -> Result<bool> {
    let own = map.delete(path.as_str())?;
    let descendants = remove_descendants(map, path)?;
    if own || descendants > 0 {
        trace!(key = %path, descendants, "removed subtree");
    }
    Ok(own || descendants > 0)
}

#[derive(Default)]
struct TreeNode {
    leaf: Option<Value>,
    children: BTreeMap<String, TreeNode>,
}

impl TreeNode {
    fn insert<'a>(&mut self, mut segments: impl Iterator<Item = &'a str>, value: Value) {
        match segments.next() {
            Some(segment) => self
                .children
                .entry(segment.to_string())
                .or_default()
                .insert(segments, value),
            None => self.leaf = Some(value),
        }
    }

    fn into_json(self) -> Json {
        match self.leaf {
            Some(Value::Map(nested)) => return snapshot(nested.as_ref(), &PathBuf::root()),
            Some(Value::Undefined) | None => {}
            Some(primitive) => return primitive.to_json().unwrap_or(Json::Null),
        }

        if self.children.is_empty() {
            return Json::Object(JsonMap::new());
        }

        let positions: Option<Vec<usize>> =
            self.children.keys().map(|segment| parse_index(segment)).collect();
        match positions {
            Some(positions) => {
                let len = positions.iter().max().map_or(0, |max| max.saturating_add(1));
                let mut items = vec![Json::Null; len];
                for (position, child) in positions.into_iter().zip(self.children.into_values()) {
                    items[position] = child.into_json();
                }
                Json::Array(items)
            }
            None => Json::Object(
                self.children
                    .into_iter()
                    .map(|(segment, child)| (segment, child.into_json()))
                    .collect(),
            ),
        }
    }
}

/// Rebuilds the nested structure stored at and below `path`.
///
/// The result shares nothing with the map.
pub(crate) fn snapshot(map: &dyn CrdtMap, path: &Path) -> Json {
    let mut tree = TreeNode::default();
    for (key, value) in map.entries() {
        if !path.is_empty() && key == path.as_str() {
            tree.leaf = Some(value);
        } else if let Some(rest) = path.strip_descendant(&key) {
            let segments: Vec<&str> = rest.split('.').filter(|s| !s.is_empty()).collect();
            if !segments.is_empty() {
                tree.insert(segments.into_iter(), value);
            }
        }
    }
    tree.into_json()
}
