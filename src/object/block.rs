//! Continuations.

use std::fmt;

use super::{Call, RemoteObject};
use crate::error::RemoteError;
use crate::value::Value;

/// Method name used to invoke a continuation.
pub const YIELD_METHOD: &str = "call";

type BlockFn = dyn Fn(Vec<Value>) -> Result<Value, RemoteError> + Send + Sync;

/// A callable passed along with a call.
///
/// When the call crosses the wire the block stays in the caller's process;
/// the callee receives a reference and every yield is a call back to it.
pub struct Block {
    func: Box<BlockFn>,
}

impl Block {
    /// Create a block from a closure.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    /// Run the block with `args`.
    pub fn apply(&self, args: Vec<Value>) -> Result<Value, RemoteError> {
        (self.func)(args)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Block")
    }
}

impl RemoteObject for Block {
    fn type_name(&self) -> &str {
        "Proc"
    }

    fn invoke(&self, method: &str, call: Call) -> Result<Value, RemoteError> {
        if method == YIELD_METHOD {
            self.apply(call.into_args())
        } else {
            Err(RemoteError::no_method(method, self.type_name()))
        }
    }

    fn responds_to(&self, method: &str) -> bool {
        method == YIELD_METHOD
    }

    fn as_block(&self) -> Option<&Block> {
        Some(self)
    }
}
