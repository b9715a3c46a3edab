//! Mapping strategies between domain values and replicated map values.

use std::{any::type_name, fmt, marker::PhantomData};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as Json;

use super::OrderedError;
use crate::{
    Result,
    crdt::{MapFactory, Value},
    object::CrdtObject,
};

/// Converts between a domain type and the value stored in an ordered entry.
pub trait Mapper<T>: Send + Sync {
    /// Produces the stored representation of `value`.
    ///
    /// Nested maps must be created through `factory` so they belong to the backend of
    /// the collection.
    fn to_crdt(&self, value: &T, factory: &dyn MapFactory) -> Result<Value>;

    /// Rebuilds the domain value from its stored representation
    fn from_crdt(&self, value: &Value) -> Result<T>;
}

/// Stores any serde type, flattening structures into a nested map with dot-path keys.
///
/// Scalars are stored as primitives. Objects and arrays become a nested map laid out
/// exactly like a [`CrdtObject`], so peers can edit individual fields concurrently.
pub struct JsonMapper<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonMapper<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    fn failed(reason: impl ToString) -> OrderedError {
        OrderedError::MappingFailed {
            type_name: type_name::<T>(),
            reason: reason.to_string(),
        }
    }
}

impl<T> Default for JsonMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonMapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonMapper<{}>", type_name::<T>())
    }
}

impl<T: Serialize + DeserializeOwned> Mapper<T> for JsonMapper<T> {
    fn to_crdt(&self, value: &T, factory: &dyn MapFactory) -> Result<Value> {
        let json = serde_json::to_value(value).map_err(Self::failed)?;
        if let Some(primitive) = Value::from_json(&json) {
            return Ok(primitive);
        }
        let map = factory.make_map(Vec::new())?;
        CrdtObject::new(map.clone()).set(&json)?;
        Ok(Value::Map(map))
    }

    fn from_crdt(&self, value: &Value) -> Result<T> {
        let json = match value {
            Value::Map(map) => CrdtObject::new(map.clone()).get_clone(),
            Value::Undefined => Json::Null,
            primitive => primitive.to_json().unwrap_or(Json::Null),
        };
        match serde_json::from_value(json.clone()) {
            Ok(value) => Ok(value),
            // Empty arrays and empty objects share one encoding
            Err(_) if json == Json::Object(Default::default()) => {
                serde_json::from_value(Json::Array(Vec::new())).map_err(|e| Self::failed(e).into())
            }
            Err(e) => Err(Self::failed(e).into()),
        }
    }
}

type ToCrdt<T> = dyn Fn(&T, &dyn MapFactory) -> Result<Value> + Send + Sync;
type FromCrdt<T> = dyn Fn(&Value) -> Result<T> + Send + Sync;

/// A mapping strategy made of two closures.
///
/// ```
/// use collabmap::crdt::Value;
/// use collabmap::ordered::FnMapper;
///
/// let upper = FnMapper::new(
///     |s: &String, _| Ok(Value::from(s.to_uppercase())),
///     |v: &Value| Ok(v.as_text().unwrap_or_default().to_lowercase()),
/// );
/// # let _ = upper;
/// ```
pub struct FnMapper<T> {
    to: Box<ToCrdt<T>>,
    from: Box<FromCrdt<T>>,
}

impl<T> FnMapper<T> {
    pub fn new<F, G>(to: F, from: G) -> Self
    where
        F: Fn(&T, &dyn MapFactory) -> Result<Value> + Send + Sync + 'static,
        G: Fn(&Value) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            to: Box::new(to),
            from: Box::new(from),
        }
    }
}

impl<T> Mapper<T> for FnMapper<T> {
    fn to_crdt(&self, value: &T, factory: &dyn MapFactory) -> Result<Value> {
        (self.to)(value, factory)
    }

    fn from_crdt(&self, value: &Value) -> Result<T> {
        (self.from)(value)
    }
}

/// Identity mapping for collections of raw values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValueMapper;

impl Mapper<Value> for ValueMapper {
    fn to_crdt(&self, value: &Value, _factory: &dyn MapFactory) -> Result<Value> {
        Ok(value.clone())
    }

    fn from_crdt(&self, value: &Value) -> Result<Value> {
        Ok(value.clone())
    }
}
