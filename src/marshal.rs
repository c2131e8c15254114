//! Dumping values for the wire and loading them back.
//!
//! [`Marshal::dump`] never fails because a value is not representable: a
//! live object is exported and replaced by a [`RemoteRef`] to it, and any
//! other value holding live objects is wrapped in a [`ValueObject`] and
//! exported the same way. Elements of a [`Value::WireArray`] are handled one
//! by one, so only the elements that need it become references.
//!
//! [`Marshal::load`] undoes the parts that are local: `WireArray` becomes
//! `Array`, and references into this process's own servers resolve back to
//! the object they name.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec::MsgPackCodec;
use crate::error::{ObjwireError, RemoteError, Result};
use crate::object::{Call, RemoteObject};
use crate::protocol::build_frame;
use crate::refs::ReferenceTable;
use crate::server::ServerRegistry;
use crate::value::{LocalObject, RemoteRef, Value};

/// Dump/load context of one object space.
#[derive(Clone)]
pub struct Marshal {
    refs: Arc<ReferenceTable>,
    servers: Arc<ServerRegistry>,
    /// URI exported references point at.
    here: Option<String>,
}

impl Marshal {
    /// Create a marshal exporting into `refs` under the server at `here`.
    pub fn new(refs: Arc<ReferenceTable>, servers: Arc<ServerRegistry>, here: Option<String>) -> Self {
        Self {
            refs,
            servers,
            here,
        }
    }

    /// URI references are exported under.
    pub fn here(&self) -> Option<&str> {
        self.here.as_deref()
    }

    /// Encode `value`, substituting references for what cannot be encoded.
    ///
    /// With `is_error` set an unencodable value becomes an error describing
    /// it instead of a reference.
    ///
    /// # Errors
    ///
    /// `NoServer` when a reference is needed but no server is running.
    pub fn dump(&self, value: &Value, is_error: bool) -> Result<Vec<u8>> {
        match MsgPackCodec::encode(value) {
            Ok(bytes) => Ok(bytes),
            Err(e) if is_error => {
                tracing::debug!("error value not encodable ({}), describing it", e);
                let described = RemoteError::new(value.type_name().to_string(), value.describe());
                MsgPackCodec::encode(&Value::Error(described))
            }
            Err(_) => MsgPackCodec::encode(&self.substitute(value)?),
        }
    }

    /// [`Marshal::dump`] plus the length prefix.
    pub fn dump_frame(&self, value: &Value, is_error: bool) -> Result<Bytes> {
        build_frame(&self.dump(value, is_error)?)
    }

    /// Replace `value` by something encodable.
    fn substitute(&self, value: &Value) -> Result<Value> {
        match value {
            Value::WireArray(items) => items
                .iter()
                .map(|item| match MsgPackCodec::encode(item) {
                    Ok(_) => Ok(item.clone()),
                    Err(_) => self.substitute(item),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::WireArray),
            Value::Object(object) => Ok(Value::Ref(self.export(object)?)),
            other => {
                let holder = LocalObject(Arc::new(ValueObject::new(other.clone())));
                Ok(Value::Ref(self.export(&holder)?))
            }
        }
    }

    /// Export `object` and return a reference to it.
    pub fn export(&self, object: &LocalObject) -> Result<RemoteRef> {
        let uri = self.here.as_deref().ok_or(ObjwireError::NoServer)?;
        Ok(RemoteRef::new(uri, self.refs.export(object)))
    }

    /// Turn a received value into its local form.
    pub fn load(&self, value: Value) -> Value {
        match value {
            Value::WireArray(items) | Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.load(v)).collect())
            }
            Value::Map(pairs) => Value::Map(
                pairs
                    .into_iter()
                    .map(|(k, v)| (self.load(k), self.load(v)))
                    .collect(),
            ),
            Value::Ref(reference) => match self.resolve_local(&reference) {
                Some(object) => Value::Object(object),
                None => Value::Ref(reference),
            },
            other => other,
        }
    }

    /// The local object a reference names, if it points into this process.
    pub fn resolve_local(&self, reference: &RemoteRef) -> Option<LocalObject> {
        let server = self.servers.get(&reference.uri)?;
        match reference.id {
            None => Some(server.front().clone()),
            Some(id) => self.refs.get(id),
        }
    }
}

/// Read-only holder for a value that cannot travel by copy.
///
/// Peers receive a reference to the holder and read the value through it.
pub struct ValueObject {
    value: Value,
}

impl ValueObject {
    /// Wrap `value`.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    fn size(&self) -> Option<usize> {
        match &self.value {
            Value::Array(items) | Value::WireArray(items) => Some(items.len()),
            Value::Map(pairs) => Some(pairs.len()),
            Value::Str(s) => Some(s.len()),
            Value::Bytes(b) => Some(b.len()),
            _ => None,
        }
    }

    fn at(&self, key: &Value) -> Result<Value> {
        let found = match (&self.value, key) {
            (Value::Array(items) | Value::WireArray(items), Value::Int(index)) => {
                let len = items.len() as i64;
                let index = if *index < 0 { len + index } else { *index };
                usize::try_from(index).ok().and_then(|i| items.get(i)).cloned()
            }
            (Value::Map(pairs), key) => pairs
                .iter()
                .find(|(k, _)| same_key(k, key))
                .map(|(_, v)| v.clone()),
            _ => {
                return Err(RemoteError::new(
                    "TypeError",
                    format!("{} can't be indexed by {}", self.value.type_name(), key.type_name()),
                )
                .into())
            }
        };
        Ok(found.unwrap_or(Value::Nil))
    }

    fn elements(&self) -> Vec<Value> {
        match &self.value {
            Value::Array(items) | Value::WireArray(items) => items.clone(),
            Value::Map(pairs) => pairs
                .iter()
                .map(|(k, v)| Value::Array(vec![k.clone(), v.clone()]))
                .collect(),
            other => vec![other.clone()],
        }
    }
}

fn same_key(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        _ => a == b,
    }
}

impl RemoteObject for ValueObject {
    fn type_name(&self) -> &str {
        self.value.type_name()
    }

    fn invoke(&self, method: &str, call: Call) -> std::result::Result<Value, RemoteError> {
        match method {
            "size" | "length" => self
                .size()
                .map(|n| Value::Int(n as i64))
                .ok_or_else(|| RemoteError::no_method(method, self.type_name())),
            "at" | "[]" => self.at(call.arg(0)?).map_err(RemoteError::from),
            "to_a" => Ok(Value::Array(self.elements())),
            "each" => {
                for element in self.elements() {
                    call.yield_block(vec![element])?;
                }
                Ok(Value::Nil)
            }
            "inspect" | "to_s" => Ok(Value::Str(self.value.describe())),
            _ => Err(RemoteError::no_method(method, self.type_name())),
        }
    }

    fn responds_to(&self, method: &str) -> bool {
        matches!(
            method,
            "size" | "length" | "at" | "[]" | "to_a" | "each" | "inspect" | "to_s"
        )
    }
}
