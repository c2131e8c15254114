//! Method tables for objects built from closures.
//!
//! A [`ServiceBuilder`] maps method names to handlers, each with an
//! [`Arity`] checked before the handler runs. Ordinary handlers return a
//! value; deferrable handlers return a [`Deferred`] and run on the reactor.
//!
//! # Example
//!
//! ```
//! use objwire::object::{RemoteObject, ServiceBuilder};
//! use objwire::value::Value;
//!
//! let server = ServiceBuilder::new("TestServer")
//!     .method("identity", 1, |call| Ok(call.arg(0)?.clone()))
//!     .deferrable("later", 0, |call| call.deferred())
//!     .build();
//!
//! assert!(server.responds_to("identity"));
//! assert!(server.as_deferrable().unwrap().is_deferrable("later"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Call, DeferredCall, RemoteObject, SupportsDeferredDispatch};
use crate::deferred::Deferred;
use crate::error::RemoteError;
use crate::value::Value;

/// Boxed ordinary handler.
pub type MethodFn = Box<dyn Fn(Call) -> Result<Value, RemoteError> + Send + Sync>;

/// Boxed deferrable handler.
pub type DeferrableFn = Box<dyn Fn(DeferredCall) -> Deferred + Send + Sync>;

/// Number of arguments a method accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    /// Check a given argument count.
    pub fn check(&self, given: usize) -> Result<(), RemoteError> {
        let ok = match *self {
            Arity::Exact(n) => given == n,
            Arity::AtLeast(n) => given >= n,
        };
        if ok {
            Ok(())
        } else {
            Err(RemoteError::arity(given, self))
        }
    }
}

impl From<usize> for Arity {
    fn from(n: usize) -> Self {
        Arity::Exact(n)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "{n}+"),
        }
    }
}

enum Handler {
    Ordinary(MethodFn),
    Deferrable(DeferrableFn),
}

/// Entry for a registered method.
struct MethodEntry {
    handler: Handler,
    arity: Arity,
}

/// Builder for a [`ServiceObject`].
pub struct ServiceBuilder {
    type_name: String,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceBuilder {
    /// Start a method table for objects called `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            methods: HashMap::new(),
        }
    }

    /// Register an ordinary method. It runs on a worker thread.
    pub fn method<F>(mut self, name: &str, arity: impl Into<Arity>, handler: F) -> Self
    where
        F: Fn(Call) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.methods.insert(
            name.to_string(),
            MethodEntry {
                handler: Handler::Ordinary(Box::new(handler)),
                arity: arity.into(),
            },
        );
        self
    }

    /// Register a deferrable method. It runs on the reactor and must not block.
    pub fn deferrable<F>(mut self, name: &str, arity: impl Into<Arity>, handler: F) -> Self
    where
        F: Fn(DeferredCall) -> Deferred + Send + Sync + 'static,
    {
        self.methods.insert(
            name.to_string(),
            MethodEntry {
                handler: Handler::Deferrable(Box::new(handler)),
                arity: arity.into(),
            },
        );
        self
    }

    /// Finish the table.
    pub fn build(self) -> Arc<ServiceObject> {
        Arc::new(ServiceObject {
            type_name: self.type_name,
            methods: self.methods,
        })
    }
}

/// An object whose methods are registered closures.
pub struct ServiceObject {
    type_name: String,
    methods: HashMap<String, MethodEntry>,
}

impl ServiceObject {
    /// Names of all registered methods, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Declared arity of `method`.
    pub fn arity(&self, method: &str) -> Option<Arity> {
        self.methods.get(method).map(|e| e.arity)
    }
}

impl fmt::Debug for ServiceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceObject")
            .field("type_name", &self.type_name)
            .field("methods", &self.method_names())
            .finish()
    }
}

impl RemoteObject for ServiceObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn invoke(&self, method: &str, call: Call) -> Result<Value, RemoteError> {
        let entry = self
            .methods
            .get(method)
            .ok_or_else(|| RemoteError::no_method(method, &self.type_name))?;
        entry.arity.check(call.args().len())?;

        match &entry.handler {
            Handler::Ordinary(handler) => handler(call),
            Handler::Deferrable(_) => Err(RemoteError::new(
                "NotImplementedError",
                format!("`{method}' is deferrable and only runs on the reactor"),
            )),
        }
    }

    fn responds_to(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    fn as_deferrable(&self) -> Option<&dyn SupportsDeferredDispatch> {
        Some(self)
    }
}

impl SupportsDeferredDispatch for ServiceObject {
    fn is_deferrable(&self, method: &str) -> bool {
        matches!(
            self.methods.get(method),
            Some(MethodEntry {
                handler: Handler::Deferrable(_),
                ..
            })
        )
    }

    fn invoke_deferred(&self, method: &str, call: DeferredCall) -> Deferred {
        let Some(entry) = self.methods.get(method) else {
            return Deferred::failed(call.reactor(), RemoteError::no_method(method, &self.type_name));
        };
        if let Err(e) = entry.arity.check(call.args().len()) {
            return Deferred::failed(call.reactor(), e);
        }

        match &entry.handler {
            Handler::Deferrable(handler) => handler(call),
            Handler::Ordinary(_) => Deferred::failed(
                call.reactor(),
                RemoteError::new(
                    "NotImplementedError",
                    format!("`{method}' is not deferrable"),
                ),
            ),
        }
    }
}
