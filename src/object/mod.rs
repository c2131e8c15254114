//! Object module - the objects remote peers can call.
//!
//! Provides:
//! - [`RemoteObject`] - anything addressable through a reference
//! - [`SupportsDeferredDispatch`] - objects with methods that answer later
//! - [`ServiceBuilder`] / [`ServiceObject`] - method tables built from closures
//! - [`Block`] - a continuation passed along with a call
//! - [`Call`] / [`DeferredCall`] - what a method receives
//!
//! # Example
//!
//! ```
//! use objwire::object::{Arity, ServiceBuilder};
//! use objwire::value::Value;
//!
//! let calculator = ServiceBuilder::new("Calculator")
//!     .method("addtwo", 2, |call| Ok(Value::Int(call.int(0)? + call.int(1)?)))
//!     .method("sum", Arity::AtLeast(0), |call| {
//!         let mut total = 0;
//!         for i in 0..call.args().len() {
//!             total += call.int(i)?;
//!         }
//!         Ok(Value::Int(total))
//!     })
//!     .build();
//! ```

mod block;
mod registry;

pub use block::{Block, YIELD_METHOD};
pub use registry::{Arity, ServiceBuilder, ServiceObject};

use crate::deferred::Deferred;
use crate::dispatch::CallContext;
use crate::error::RemoteError;
use crate::proxy::ProxyObject;
use crate::reactor::ReactorHandle;
use crate::value::Value;

/// An object that can be the target of a remote call.
pub trait RemoteObject: Send + Sync + 'static {
    /// Class-like name used in error messages.
    fn type_name(&self) -> &str;

    /// Invoke `method` with the call's arguments.
    ///
    /// Runs on a worker thread and may block.
    fn invoke(&self, method: &str, call: Call) -> Result<Value, RemoteError>;

    /// Whether `method` is callable on this object.
    fn responds_to(&self, method: &str) -> bool;

    /// Deferred dispatch support, if any.
    fn as_deferrable(&self) -> Option<&dyn SupportsDeferredDispatch> {
        None
    }

    /// The continuation behind this object, if it is one.
    fn as_block(&self) -> Option<&Block> {
        None
    }
}

/// Objects whose listed methods run on the reactor and answer through a
/// [`Deferred`] instead of a return value.
pub trait SupportsDeferredDispatch {
    /// Whether `method` is deferrable.
    fn is_deferrable(&self, method: &str) -> bool;

    /// Invoke a deferrable method. Must not block.
    fn invoke_deferred(&self, method: &str, call: DeferredCall) -> Deferred;
}

fn no_block_given() -> RemoteError {
    RemoteError::new("LocalJumpError", "no block given (yield)")
}

fn missing_argument(index: usize, given: usize) -> RemoteError {
    RemoteError::new(
        "ArgumentError",
        format!("missing argument {index} (given {given})"),
    )
}

/// Arguments and surroundings of an ordinary call.
pub struct Call {
    args: Vec<Value>,
    block: Option<ProxyObject>,
    context: CallContext,
}

impl Call {
    /// Create a call.
    pub fn new(args: Vec<Value>, block: Option<ProxyObject>, context: CallContext) -> Self {
        Self {
            args,
            block,
            context,
        }
    }

    /// All arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Take the arguments.
    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    /// Argument at `index`.
    pub fn arg(&self, index: usize) -> Result<&Value, RemoteError> {
        self.args
            .get(index)
            .ok_or_else(|| missing_argument(index, self.args.len()))
    }

    /// Integer argument at `index`.
    pub fn int(&self, index: usize) -> Result<i64, RemoteError> {
        self.arg(index)?.to_int()
    }

    /// The block passed with the call, if any.
    pub fn block(&self) -> Option<&ProxyObject> {
        self.block.as_ref()
    }

    /// Invoke the block with `args` and wait for its result.
    ///
    /// For a block that lives in the caller's process this is a synchronous
    /// call back over the network.
    pub fn yield_block(&self, args: Vec<Value>) -> Result<Value, RemoteError> {
        let block = self.block.as_ref().ok_or_else(no_block_given)?;
        block.call(YIELD_METHOD, args).map_err(RemoteError::from)
    }

    /// Where the call came from.
    pub fn context(&self) -> &CallContext {
        &self.context
    }
}

/// Arguments and surroundings of a deferrable call.
pub struct DeferredCall {
    args: Vec<Value>,
    block: Option<ProxyObject>,
    context: CallContext,
    reactor: ReactorHandle,
}

impl DeferredCall {
    /// Create a deferrable call.
    pub fn new(
        args: Vec<Value>,
        block: Option<ProxyObject>,
        context: CallContext,
        reactor: ReactorHandle,
    ) -> Self {
        Self {
            args,
            block,
            context,
            reactor,
        }
    }

    /// All arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Argument at `index`.
    pub fn arg(&self, index: usize) -> Result<&Value, RemoteError> {
        self.args
            .get(index)
            .ok_or_else(|| missing_argument(index, self.args.len()))
    }

    /// The block passed with the call, if any.
    pub fn block(&self) -> Option<&ProxyObject> {
        self.block.as_ref()
    }

    /// A fresh pending deferred on this call's reactor.
    pub fn deferred(&self) -> Deferred {
        Deferred::new(&self.reactor)
    }

    /// Invoke the block with `args` without blocking.
    pub fn yield_async(&self, args: Vec<Value>) -> Deferred {
        match &self.block {
            Some(block) => block.send_async(YIELD_METHOD, args, None),
            None => Deferred::failed(&self.reactor, no_block_given()),
        }
    }

    /// Where the call came from.
    pub fn context(&self) -> &CallContext {
        &self.context
    }

    /// The reactor this call runs on.
    pub fn reactor(&self) -> &ReactorHandle {
        &self.reactor
    }
}
