//! Dispatch of assembled requests.
//!
//! A [`Dispatcher`] turns a [`CallRequest`] into a [`Deferred`]:
//!
//! 1. the [`SecurityPolicy`] may refuse the method;
//! 2. deferrable methods run in-line on the reactor and return their own
//!    deferred;
//! 3. every other method runs on a worker thread, where it may block, and
//!    resolves the deferred when it returns.
//!
//! Failures of any kind, panics included, resolve the deferred as failed.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::config::TransportConfig;
use crate::deferred::{Deferred, Outcome};
use crate::error::{ObjwireError, RemoteError};
use crate::object::{Call, DeferredCall, YIELD_METHOD};
use crate::protocol::CallRequest;
use crate::proxy::ProxyObject;
use crate::reactor::panic_message;
use crate::space::ObjectSpace;
use crate::value::{LocalObject, Value};

/// Method whose plain `Array` result is sent element by element.
const TO_A: &str = "to_a";

/// Names refused by [`DefaultSecurityPolicy`] besides `__`-prefixed ones.
const INSECURE_METHODS: &[&str] = &[
    "instance_eval",
    "instance_exec",
    "send",
    "public_send",
    "method_missing",
];

/// Decides whether a method may be called remotely.
pub trait SecurityPolicy: Send + Sync {
    /// `Err` refuses the call; the error becomes the reply.
    fn check_insecure_method(&self, target: &LocalObject, method: &str) -> Result<(), RemoteError>;
}

/// Refuses reflective methods and names starting with `__`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSecurityPolicy;

impl SecurityPolicy for DefaultSecurityPolicy {
    fn check_insecure_method(&self, target: &LocalObject, method: &str) -> Result<(), RemoteError> {
        if method.starts_with("__") || INSECURE_METHODS.contains(&method) {
            let err = ObjwireError::AccessDenied(format!(
                "insecure method `{method}' called for {}",
                target.0.type_name()
            ));
            return Err(RemoteError::from(err).with_kind("SecurityError"));
        }
        Ok(())
    }
}

/// Advisory isolation level of a call. Can only go up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsolationLevel(u32);

impl IsolationLevel {
    pub fn new(level: u32) -> Self {
        Self(level)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// The higher of `self` and `level`.
    #[must_use]
    pub fn raise(self, level: u32) -> Self {
        Self(self.0.max(level))
    }
}

/// Surroundings of a call: which server received it and from whom.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    server_uri: Option<String>,
    peer: Option<String>,
    isolation: IsolationLevel,
}

impl CallContext {
    /// Context of an in-process call.
    pub fn local() -> Self {
        Self::default()
    }

    /// Context of a call received by the server at `server_uri`.
    pub fn new(server_uri: impl Into<String>, peer: impl Into<String>) -> Self {
        Self {
            server_uri: Some(server_uri.into()),
            peer: Some(peer.into()),
            isolation: IsolationLevel::default(),
        }
    }

    /// The server that received the call; `None` for in-process calls.
    pub fn server_uri(&self) -> Option<&str> {
        self.server_uri.as_deref()
    }

    /// Address of the calling peer.
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Raise the isolation level; lowering is ignored.
    pub fn raise_isolation(&mut self, level: u32) {
        self.isolation = self.isolation.raise(level);
    }
}

/// Runs requests for one connection.
pub struct Dispatcher {
    space: ObjectSpace,
    policy: Arc<dyn SecurityPolicy>,
    isolation_level: u32,
}

impl Dispatcher {
    pub fn new(space: ObjectSpace, config: &TransportConfig) -> Self {
        Self {
            space,
            policy: config.security_policy.clone(),
            isolation_level: config.isolation_level,
        }
    }

    /// Execute `request`. The returned deferred resolves on completion.
    pub fn dispatch(&self, request: CallRequest, mut context: CallContext) -> Deferred {
        let reactor = self.space.reactor();
        let CallRequest {
            target,
            method,
            args,
            continuation,
            ..
        } = request;

        if let Err(e) = self.policy.check_insecure_method(&target, &method) {
            tracing::warn!("refused `{}' on {:?}: {}", method, target, e);
            return Deferred::failed(reactor, e);
        }
        context.raise_isolation(self.isolation_level);

        let block = match continuation {
            None => None,
            Some(value) => match ProxyObject::from_value(&self.space, value) {
                Ok(proxy) => Some(proxy),
                Err(e) => return Deferred::failed(reactor, e),
            },
        };

        if let Some(deferrable) = target.0.as_deferrable() {
            if deferrable.is_deferrable(&method) {
                tracing::debug!("deferred dispatch `{}' on {:?}", method, target);
                let call = DeferredCall::new(args, block, context, reactor.clone());
                let deferred = catch_unwind(AssertUnwindSafe(|| {
                    deferrable.invoke_deferred(&method, call)
                }))
                .unwrap_or_else(|panic| Deferred::failed(reactor, panicked(&*panic)));
                return if method == TO_A {
                    deferred.then(|value| Ok(coerce_to_a(value)))
                } else {
                    deferred
                };
            }
        }

        tracing::debug!("worker dispatch `{}' on {:?}", method, target);
        let deferred = Deferred::new(reactor);
        let done = deferred.clone();
        reactor.spawn_blocking(move || {
            let call = Call::new(args, block, context);
            let outcome = catch_unwind(AssertUnwindSafe(|| invoke_ordinary(&target, &method, call)))
                .unwrap_or_else(|panic| Err(panicked(&*panic)));
            done.resolve(outcome);
        });
        deferred
    }
}

/// Run an ordinary method on the calling thread.
pub(crate) fn invoke_ordinary(target: &LocalObject, method: &str, call: Call) -> Outcome {
    let result = match target.0.as_block() {
        Some(block) if method == YIELD_METHOD => block.apply(call.into_args()),
        _ => target.0.invoke(method, call),
    };
    if method == TO_A {
        result.map(coerce_to_a)
    } else {
        result
    }
}

fn coerce_to_a(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::WireArray(items),
        other => other,
    }
}

fn panicked(panic: &(dyn std::any::Any + Send)) -> RemoteError {
    RemoteError::new("Panic", panic_message(panic))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Block, ServiceBuilder};

    fn target() -> LocalObject {
        LocalObject(ServiceBuilder::new("Target").build())
    }

    #[test]
    fn test_default_policy() {
        let policy = DefaultSecurityPolicy;
        let target = target();

        assert!(policy.check_insecure_method(&target, "sum").is_ok());
        assert!(policy.check_insecure_method(&target, "to_s").is_ok());

        for method in ["__send__", "__id__", "instance_eval", "send"] {
            let err = policy.check_insecure_method(&target, method).unwrap_err();
            assert_eq!(err.kind, "SecurityError", "{method}");
            assert!(err.message.contains(method));
        }
    }

    #[test]
    fn test_isolation_only_goes_up() {
        let mut context = CallContext::new("tcp://h:1", "127.0.0.1");
        assert_eq!(context.isolation().value(), 0);

        context.raise_isolation(2);
        context.raise_isolation(1);
        assert_eq!(context.isolation(), IsolationLevel::new(2));
        assert_eq!(context.server_uri(), Some("tcp://h:1"));
        assert_eq!(context.peer(), Some("127.0.0.1"));
    }

    #[test]
    fn test_block_yield_is_applied_directly() {
        let block = LocalObject(Arc::new(Block::new(|args| Ok(Value::Int(args.len() as i64)))));
        let call = Call::new(vec![Value::Nil, Value::Nil], None, CallContext::local());

        assert_eq!(invoke_ordinary(&block, "call", call).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_to_a_is_coerced() {
        let target = LocalObject(
            ServiceBuilder::new("List")
                .method("to_a", 0, |_| Ok(Value::Array(vec![Value::Int(1)])))
                .method("items", 0, |_| Ok(Value::Array(vec![Value::Int(1)])))
                .build(),
        );
        let call = || Call::new(vec![], None, CallContext::local());

        assert_eq!(
            invoke_ordinary(&target, "to_a", call()).unwrap(),
            Value::WireArray(vec![Value::Int(1)])
        );
        assert_eq!(
            invoke_ordinary(&target, "items", call()).unwrap(),
            Value::Array(vec![Value::Int(1)])
        );
    }

    #[test]
    fn test_configured_isolation_reaches_the_method() {
        let space = ObjectSpace::new(TransportConfig::default()).unwrap();
        let config = TransportConfig::builder().isolation_level(1).build();
        let dispatcher = Dispatcher::new(space.clone(), &config);
        let target = LocalObject(
            ServiceBuilder::new("Target")
                .method("isolation", 0, |call| {
                    Ok(Value::Int(i64::from(call.context().isolation().value())))
                })
                .build(),
        );
        let request = || CallRequest {
            reference: None,
            target: target.clone(),
            method: "isolation".to_string(),
            args: Vec::new(),
            continuation: None,
        };

        let plain = CallContext::new("tcp://h:1", "127.0.0.1");
        assert_eq!(dispatcher.dispatch(request(), plain).wait().unwrap(), Value::Int(1));

        let mut raised = CallContext::new("tcp://h:1", "127.0.0.1");
        raised.raise_isolation(3);
        assert_eq!(dispatcher.dispatch(request(), raised).wait().unwrap(), Value::Int(3));
        space.shutdown();
    }
}
