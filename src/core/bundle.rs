//! Integer-keyed heterogeneous value containers.
//!
//! A [`Bundle`] maps small integer keys to [`Value`]s. It is the payload
//! format for job parameters, job results and progress updates:
//!
//! - [`Bundle`]: The raw container with typed, defaulting getters
//! - [`JobResult`]: Success flag, optional error and ordered values
//! - [`Progress`]: Ordered values published while a job runs
//!
//! # Absent versus null
//!
//! [`Bundle::get`] returns `None` when a key was never stored and
//! `Some(Value::Null)` when a null was stored explicitly. The typed getters
//! (`get_int`, `get_str`, ...) treat both cases the same way and return the
//! caller-supplied default.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use super::recycle::Recycle;

/// A single value stored in a [`Bundle`].
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    /// Arbitrary owned object, retrieved with [`Bundle::get_object`].
    Object(Box<dyn Any + Send + Sync>),
}

impl Value {
    /// Check if this is an explicitly stored null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Object(_) => "object",
        }
    }

    /// Coerce to an integer.
    ///
    /// Floats are truncated, booleans map to 0/1 and strings are parsed.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.is_finite() => Some(*v as i64),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Json(v) => v.as_i64(),
            _ => None,
        }
    }

    /// Coerce to a float. Integers widen and strings are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Json(v) => v.as_f64(),
            _ => None,
        }
    }

    /// Coerce to a boolean. Non-zero integers are `true`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::Int(v) => Some(*v != 0),
            Value::Str(s) => s.trim().parse().ok(),
            Value::Json(v) => v.as_bool(),
            _ => None,
        }
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Json(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Borrow as raw bytes. Strings expose their UTF-8 bytes.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Convert to a JSON value. Opaque objects have no JSON form.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(v) => Some(serde_json::Value::from(*v)),
            Value::Int(v) => Some(serde_json::Value::from(*v)),
            Value::Float(v) => Some(serde_json::Value::from(*v)),
            Value::Str(s) => Some(serde_json::Value::from(s.as_str())),
            Value::Bytes(b) => Some(serde_json::Value::from(b.clone())),
            Value::Json(v) => Some(v.clone()),
            Value::Object(_) => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Value::Float(v) => f.debug_tuple("Float").field(v).finish(),
            Value::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Value::Bytes(v) => write!(f, "Bytes(len={})", v.len()),
            Value::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Value::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Mapping from small integer keys to heterogeneous values.
#[derive(Debug, Default)]
pub struct Bundle {
    values: BTreeMap<u32, Value>,
}

impl Bundle {
    /// Create an empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous one for that key.
    pub fn put(&mut self, key: u32, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(key, value.into())
    }

    /// Store an explicit null.
    pub fn put_null(&mut self, key: u32) -> Option<Value> {
        self.values.insert(key, Value::Null)
    }

    /// Store an arbitrary owned object.
    pub fn put_object<T: Any + Send + Sync>(&mut self, key: u32, object: T) -> Option<Value> {
        self.values.insert(key, Value::Object(Box::new(object)))
    }

    /// Serialize a value to JSON and store it.
    pub fn put_json<T: Serialize>(&mut self, key: u32, value: &T) -> Result<(), serde_json::Error> {
        let json = serde_json::to_value(value)?;
        self.values.insert(key, Value::Json(json));
        Ok(())
    }

    /// Append a value under the key after the current highest key.
    ///
    /// Returns the key used.
    pub fn push(&mut self, value: impl Into<Value>) -> u32 {
        let key = self.next_key();
        self.values.insert(key, value.into());
        key
    }

    fn next_key(&self) -> u32 {
        self.values
            .keys()
            .next_back()
            .map_or(0, |last| last.saturating_add(1))
    }

    /// Get the raw value for a key.
    ///
    /// `None` means the key is absent; a stored null is `Some(Value::Null)`.
    pub fn get(&self, key: u32) -> Option<&Value> {
        self.values.get(&key)
    }

    /// Remove a value.
    pub fn remove(&mut self, key: u32) -> Option<Value> {
        self.values.remove(&key)
    }

    /// Check if a key is present (including a stored null).
    pub fn contains(&self, key: u32) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.keys().copied()
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &Value)> + '_ {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn get_int(&self, key: u32, default: i32) -> i32 {
        self.get(key)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn get_long(&self, key: u32, default: i64) -> i64 {
        self.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    pub fn get_float(&self, key: u32, default: f32) -> f32 {
        self.get(key)
            .and_then(Value::as_f64)
            .map_or(default, |v| v as f32)
    }

    pub fn get_double(&self, key: u32, default: f64) -> f64 {
        self.get(key).and_then(Value::as_f64).unwrap_or(default)
    }

    pub fn get_bool(&self, key: u32, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_str<'a>(&'a self, key: u32, default: &'a str) -> &'a str {
        self.get(key).and_then(Value::as_str).unwrap_or(default)
    }

    /// Borrow a byte payload. There is no sensible default for bytes.
    pub fn get_bytes(&self, key: u32) -> Option<&[u8]> {
        self.get(key).and_then(Value::as_bytes)
    }

    /// Deserialize a value through its JSON form.
    ///
    /// Returns `None` if the key is absent or the value doesn't deserialize
    /// into `T`.
    pub fn get_json<T: DeserializeOwned>(&self, key: u32) -> Option<T> {
        let json = self.get(key)?.to_json()?;
        serde_json::from_value(json).ok()
    }

    /// Borrow a stored object of type `T`.
    pub fn get_object<T: Any>(&self, key: u32) -> Option<&T> {
        match self.get(key)? {
            Value::Object(object) => object.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Move a stored object of type `T` out of the bundle.
    ///
    /// A value of any other type stays in place.
    pub fn take_object<T: Any>(&mut self, key: u32) -> Option<Box<T>> {
        match self.values.remove(&key)? {
            Value::Object(object) => match object.downcast::<T>() {
                Ok(taken) => Some(taken),
                Err(object) => {
                    self.values.insert(key, Value::Object(object));
                    None
                }
            },
            other => {
                self.values.insert(key, other);
                None
            }
        }
    }
}

impl Recycle for Bundle {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// Outcome of a job body: a success flag and ordered values.
///
/// A fresh result starts out unsuccessful; the body calls
/// [`succeed`](Self::succeed) once its work is done, or
/// [`fail`](Self::fail) to report a recovered failure.
#[derive(Debug, Default)]
pub struct JobResult {
    success: bool,
    error: Option<String>,
    values: Bundle,
}

impl JobResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the result as successful.
    pub fn succeed(&mut self) -> &mut Self {
        self.success = true;
        self.error = None;
        self
    }

    /// Mark the result as failed with a message.
    pub fn fail(&mut self, error: impl Into<String>) -> &mut Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Error message recorded by [`fail`](Self::fail), if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Append a value after the current last one.
    pub fn push(&mut self, value: impl Into<Value>) -> u32 {
        self.values.push(value)
    }

    pub fn put(&mut self, key: u32, value: impl Into<Value>) -> Option<Value> {
        self.values.put(key, value)
    }

    pub fn values(&self) -> &Bundle {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Bundle {
        &mut self.values
    }
}

impl Recycle for JobResult {
    fn recycle(&mut self) {
        self.success = false;
        self.error = None;
        self.values.clear();
    }
}

/// Partial output published by a running job.
#[derive(Debug, Default)]
pub struct Progress {
    values: Bundle,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value after the current last one.
    pub fn push(&mut self, value: impl Into<Value>) -> u32 {
        self.values.push(value)
    }

    pub fn put(&mut self, key: u32, value: impl Into<Value>) -> Option<Value> {
        self.values.put(key, value)
    }

    pub fn values(&self) -> &Bundle {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut Bundle {
        &mut self.values
    }
}

impl Recycle for Progress {
    fn recycle(&mut self) {
        self.values.clear();
    }
}
