//! Request assembly.
//!
//! A request arrives as a run of values, one per frame:
//!
//! ```text
//! reference → method → arg_count → args[0..arg_count] → continuation
//! ```
//!
//! [`RequestAssembler`] is the per-connection state machine that folds those
//! values into a [`CallRequest`]. It resolves the reference as soon as it
//! arrives, so an unknown reference is reported before the rest of the
//! request is read.

use std::sync::Arc;

use crate::error::{ObjwireError, Result};
use crate::refs::ReferenceTable;
use crate::value::{LocalObject, RefId, Value};

/// Upper bound on argument slots reserved before the values arrive.
const PREALLOCATED_ARGS: usize = 64;

/// A fully assembled call.
#[derive(Debug)]
pub struct CallRequest {
    /// Reference the call was addressed to (`None` = front object).
    pub reference: Option<RefId>,
    /// Object the reference resolved to.
    pub target: LocalObject,
    /// Method name.
    pub method: String,
    /// Arguments, exactly as many as the request declared.
    pub args: Vec<Value>,
    /// Block value, `None` when the caller passed nil.
    pub continuation: Option<Value>,
}

impl CallRequest {
    /// Number of arguments.
    #[inline]
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

/// Outcome of feeding one value to the assembler.
#[derive(Debug)]
pub enum Step {
    /// More values are needed.
    Pending,
    /// A request is complete and should be dispatched.
    Ready(CallRequest),
    /// The request is refused; the error must be sent back as a failed reply.
    Rejected(ObjwireError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitReference,
    AwaitMethod,
    AwaitArgCount,
    AwaitArgs(u32),
    AwaitContinuation,
}

/// Per-connection request state machine.
pub struct RequestAssembler {
    state: State,
    refs: Arc<ReferenceTable>,
    front: LocalObject,
    arg_count_limit: u32,
    reference: Option<RefId>,
    /// `None` while skipping the remainder of a rejected request.
    target: Option<LocalObject>,
    method: String,
    args: Vec<Value>,
}

impl RequestAssembler {
    /// Create an assembler for a connection whose front object is `front`.
    pub fn new(refs: Arc<ReferenceTable>, front: LocalObject, arg_count_limit: u32) -> Self {
        Self {
            state: State::AwaitReference,
            refs,
            front,
            arg_count_limit,
            reference: None,
            target: None,
            method: String::new(),
            args: Vec::new(),
        }
    }

    /// Consume the next value of the stream.
    pub fn feed(&mut self, value: Value) -> Step {
        match self.state {
            State::AwaitReference => {
                let reference = match decode_reference(&value) {
                    Ok(reference) => reference,
                    Err(e) => return self.reject(e),
                };
                self.reference = reference;
                self.state = State::AwaitMethod;

                match self.refs.resolve(reference, &self.front) {
                    Ok(target) => {
                        self.target = Some(target);
                        Step::Pending
                    }
                    Err(e) => {
                        // Keep consuming this request's frames so the
                        // stream stays aligned, but never dispatch it.
                        tracing::debug!("rejecting request: {}", e);
                        self.target = None;
                        Step::Rejected(e)
                    }
                }
            }

            State::AwaitMethod => match value {
                Value::Str(method) => {
                    self.method = method;
                    self.state = State::AwaitArgCount;
                    Step::Pending
                }
                other => self.reject(ObjwireError::Protocol(format!(
                    "expected method name, got {}",
                    other.type_name()
                ))),
            },

            State::AwaitArgCount => {
                let count = match value {
                    Value::Int(n) if n >= 0 => n as u64,
                    other => {
                        return self.reject(ObjwireError::Protocol(format!(
                            "expected argument count, got {}",
                            other.describe()
                        )))
                    }
                };

                if count > u64::from(self.arg_count_limit) {
                    return self.reject(ObjwireError::TooManyArguments {
                        count,
                        limit: self.arg_count_limit,
                    });
                }

                // Bounded by the limit above.
                let count = count as u32;
                self.args = Vec::with_capacity((count as usize).min(PREALLOCATED_ARGS));
                self.state = if count == 0 {
                    State::AwaitContinuation
                } else {
                    State::AwaitArgs(count)
                };
                Step::Pending
            }

            State::AwaitArgs(remaining) => {
                self.args.push(value);
                self.state = if remaining == 1 {
                    State::AwaitContinuation
                } else {
                    State::AwaitArgs(remaining - 1)
                };
                Step::Pending
            }

            State::AwaitContinuation => {
                let continuation = if value.is_nil() { None } else { Some(value) };
                let reference = self.reference;
                let target = self.target.take();
                let method = std::mem::take(&mut self.method);
                let args = std::mem::take(&mut self.args);
                self.reset();

                match target {
                    Some(target) => Step::Ready(CallRequest {
                        reference,
                        target,
                        method,
                        args,
                        continuation,
                    }),
                    None => Step::Pending,
                }
            }
        }
    }

    /// Whether the assembler sits between requests.
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitReference
    }

    fn reject(&mut self, err: ObjwireError) -> Step {
        let skipping = self.state != State::AwaitReference && self.target.is_none();
        self.reset();
        if skipping {
            // Already answered when the reference failed.
            tracing::debug!("discarding rest of rejected request: {}", err);
            Step::Pending
        } else {
            tracing::warn!("malformed request: {}", err);
            Step::Rejected(err)
        }
    }

    fn reset(&mut self) {
        self.state = State::AwaitReference;
        self.reference = None;
        self.target = None;
        self.method.clear();
        self.args.clear();
    }
}

/// Encode a reference for the first frame of a request.
pub fn reference_value(reference: Option<RefId>) -> Value {
    match reference {
        None => Value::Nil,
        // Ids are allocated sequentially from 1 and never reach i64::MAX.
        Some(id) => Value::Int(id.0 as i64),
    }
}

/// Decode the first frame of a request.
pub fn decode_reference(value: &Value) -> Result<Option<RefId>> {
    match value {
        Value::Nil => Ok(None),
        Value::Int(n) if *n >= 0 => Ok(Some(RefId(*n as u64))),
        other => Err(ObjwireError::Protocol(format!(
            "expected reference, got {}",
            other.describe()
        ))),
    }
}
