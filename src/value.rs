//! Values that cross the wire.
//!
//! [`Value`] is what every frame carries: request fields, arguments,
//! continuations and reply results. Everything except [`Value::Object`]
//! serializes; an `Object` holds a live local object and is replaced by a
//! [`RemoteRef`] when it is dumped (see [`crate::marshal`]).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use crate::error::RemoteError;
use crate::object::RemoteObject;

/// Opaque identifier of an exported local object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RefId(pub u64);

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Address of an object living in another (or this) process.
///
/// `id == None` addresses the front object of the server at `uri`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteRef {
    pub uri: String,
    pub id: Option<RefId>,
}

impl RemoteRef {
    /// Reference to an exported object.
    pub fn new(uri: impl Into<String>, id: RefId) -> Self {
        Self {
            uri: uri.into(),
            id: Some(id),
        }
    }

    /// Reference to the front object of a server.
    pub fn front(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            id: None,
        }
    }
}

/// A payload that could not be decoded, kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownValue {
    pub raw: ByteBuf,
    pub cause: String,
}

impl UnknownValue {
    /// Create a placeholder for `raw`.
    pub fn new(raw: impl Into<Vec<u8>>, cause: impl Into<String>) -> Self {
        Self {
            raw: ByteBuf::from(raw.into()),
            cause: cause.into(),
        }
    }
}

/// A live object owned by this process.
#[derive(Clone)]
pub struct LocalObject(pub Arc<dyn RemoteObject>);

impl LocalObject {
    /// Identity of the underlying allocation.
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for LocalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<{}:{:#x}>", self.0.type_name(), self.addr())
    }
}

impl PartialEq for LocalObject {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

/// A serialized value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(ByteBuf),
    Array(Vec<Value>),
    /// Array whose elements were dumped one by one, so each may be a proxy.
    WireArray(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Ref(RemoteRef),
    Error(RemoteError),
    Unknown(UnknownValue),
    /// Live local object; never serializable.
    #[serde(skip)]
    Object(LocalObject),
}

impl Value {
    /// Wrap a local object.
    pub fn object<T: RemoteObject>(object: T) -> Self {
        Value::Object(LocalObject(Arc::new(object)))
    }

    /// Wrap an already shared local object.
    pub fn from_shared(object: Arc<dyn RemoteObject>) -> Self {
        Value::Object(LocalObject(object))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::WireArray(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_remote_ref(&self) -> Option<&RemoteRef> {
        match self {
            Value::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// Integer argument, or a `TypeError`.
    pub fn to_int(&self) -> std::result::Result<i64, RemoteError> {
        self.as_int().ok_or_else(|| self.type_error("Integer"))
    }

    /// String argument, or a `TypeError`.
    pub fn to_str(&self) -> std::result::Result<&str, RemoteError> {
        self.as_str().ok_or_else(|| self.type_error("String"))
    }

    fn type_error(&self, expected: &str) -> RemoteError {
        RemoteError::new(
            "TypeError",
            format!("{} can't be coerced into {expected}", self.type_name()),
        )
    }

    /// Short class-like name of the value.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Array(_) | Value::WireArray(_) => "Array",
            Value::Map(_) => "Hash",
            Value::Ref(_) => "RemoteObject",
            Value::Error(e) => &e.kind,
            Value::Unknown(_) => "Unknown",
            Value::Object(obj) => obj.0.type_name(),
        }
    }

    /// Human readable rendering, used when a value must become an error message.
    pub fn describe(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(x) => x.to_string(),
            Value::Str(s) => format!("{s:?}"),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Array(items) | Value::WireArray(items) => {
                let inner: Vec<String> = items.iter().map(Value::describe).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Map(pairs) => {
                let inner: Vec<String> = pairs
                    .iter()
                    .map(|(k, v)| format!("{} => {}", k.describe(), v.describe()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Value::Ref(r) => match r.id {
                Some(id) => format!("#<RemoteObject {} {}>", r.uri, id),
                None => format!("#<RemoteObject {}>", r.uri),
            },
            Value::Error(e) => e.to_string(),
            Value::Unknown(u) => format!("#<Unknown {}>", u.cause),
            Value::Object(obj) => format!("{obj:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<RemoteError> for Value {
    fn from(err: RemoteError) -> Self {
        Value::Error(err)
    }
}

impl From<RemoteRef> for Value {
    fn from(r: RemoteRef) -> Self {
        Value::Ref(r)
    }
}
