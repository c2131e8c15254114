//! Client side handles to objects.
//!
//! A [`ProxyObject`] names an object by server URI and reference. Calls go
//! out over a fresh connection each; the reply resolves a [`Deferred`].
//! [`ProxyObject::call`] waits on that deferred from the calling thread, so
//! ordinary code sees a blocking method call while the reactor keeps
//! running.
//!
//! A proxy to an object of this process short-circuits the network and
//! invokes the object directly.
//!
//! # Example
//!
//! ```no_run
//! use objwire::{ObjectSpace, TransportConfig, Value};
//!
//! let space = ObjectSpace::new(TransportConfig::default()).unwrap();
//! let server = space.proxy("tcp://127.0.0.1:8787");
//! let sum = server.call("sum", vec![Value::Int(1), Value::Int(2)]).unwrap();
//! assert_eq!(sum, Value::Int(3));
//! ```

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::codec::MsgPackCodec;
use crate::deferred::{Deferred, Outcome};
use crate::dispatch::{invoke_ordinary, CallContext};
use crate::error::{ObjwireError, RemoteError, Result};
use crate::marshal::Marshal;
use crate::object::{Block, Call, DeferredCall};
use crate::protocol::{put_frame, reference_value, ReplyReader};
use crate::space::ObjectSpace;
use crate::value::{LocalObject, RefId, RemoteRef, Value};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Handle to a remote (or local) object.
#[derive(Clone)]
pub struct ProxyObject {
    space: ObjectSpace,
    target_uri: Option<String>,
    reference: Option<RefId>,
    local_object: Option<LocalObject>,
}

impl ProxyObject {
    /// Proxy for the front object of the server at `uri`.
    pub fn new(space: &ObjectSpace, uri: impl Into<String>) -> Self {
        Self {
            space: space.clone(),
            target_uri: Some(uri.into()),
            reference: None,
            local_object: None,
        }
    }

    /// Proxy for a received reference.
    pub fn from_ref(space: &ObjectSpace, reference: RemoteRef) -> Self {
        Self {
            space: space.clone(),
            target_uri: Some(reference.uri),
            reference: reference.id,
            local_object: None,
        }
    }

    /// Proxy that dispatches in-process.
    pub fn local(space: &ObjectSpace, object: LocalObject) -> Self {
        Self {
            space: space.clone(),
            target_uri: None,
            reference: None,
            local_object: Some(object),
        }
    }

    /// Proxy for a value that names an object.
    ///
    /// # Errors
    ///
    /// `TypeError` when `value` is neither a reference nor a live object.
    pub fn from_value(space: &ObjectSpace, value: Value) -> std::result::Result<Self, RemoteError> {
        match value {
            Value::Object(object) => Ok(Self::local(space, object)),
            Value::Ref(reference) => match space.marshal().resolve_local(&reference) {
                Some(object) => Ok(Self::local(space, object)),
                None => Ok(Self::from_ref(space, reference)),
            },
            other => Err(RemoteError::new(
                "TypeError",
                format!("{} is not a remote object", other.type_name()),
            )),
        }
    }

    /// URI of the server holding the object; `None` for local proxies.
    pub fn uri(&self) -> Option<&str> {
        self.target_uri.as_deref()
    }

    pub fn reference(&self) -> Option<RefId> {
        self.reference
    }

    pub fn is_local(&self) -> bool {
        self.local_object.is_some()
    }

    pub fn local_object(&self) -> Option<&LocalObject> {
        self.local_object.as_ref()
    }

    /// The value to send to name this object.
    pub fn to_value(&self) -> Value {
        match (&self.local_object, &self.target_uri) {
            (Some(object), _) => Value::Object(object.clone()),
            (None, Some(uri)) => Value::Ref(RemoteRef {
                uri: uri.clone(),
                id: self.reference,
            }),
            (None, None) => Value::Nil,
        }
    }

    /// Invoke `method` without blocking.
    ///
    /// `block`, if any, stays in this process; the callee receives a
    /// reference to it, which needs a running server here.
    pub fn send_async(&self, method: &str, args: Vec<Value>, block: Option<Block>) -> Deferred {
        let reactor = self.space.reactor();

        if let Some(object) = &self.local_object {
            return self.send_local(object, method, args, block);
        }
        let Some(uri) = self.target_uri.clone() else {
            return Deferred::failed(reactor, ObjwireError::BadUri(String::new()));
        };

        let limit = self.space.config().arg_count_limit;
        if args.len() > limit as usize {
            return Deferred::failed(
                reactor,
                ObjwireError::TooManyArguments {
                    count: args.len() as u64,
                    limit,
                },
            );
        }

        let marshal = self.space.marshal();
        let request = match self.encode_request(&marshal, method, &args, block) {
            Ok(request) => request,
            Err(e) => return Deferred::failed(reactor, e),
        };

        tracing::debug!("calling `{}' on {} ({:?})", method, uri, self.reference);
        let deferred = Deferred::new(reactor);
        let done = deferred.clone();
        let space = self.space.clone();
        reactor.spawn(async move {
            let outcome = match exchange(&space, &uri, request).await {
                Ok(outcome) => outcome.map(|value| marshal.load(value)),
                Err(e) => {
                    tracing::debug!("call to {} failed: {}", uri, e);
                    Err(e.into())
                }
            };
            done.resolve(outcome);
        });
        deferred
    }

    fn send_local(
        &self,
        object: &LocalObject,
        method: &str,
        args: Vec<Value>,
        block: Option<Block>,
    ) -> Deferred {
        let reactor = self.space.reactor();
        let block = block.map(|b| Self::local(&self.space, LocalObject(Arc::new(b))));

        let deferrable = object
            .0
            .as_deferrable()
            .is_some_and(|d| d.is_deferrable(method));
        if !deferrable {
            let call = Call::new(args, block, CallContext::local());
            return Deferred::resolved(reactor, invoke_ordinary(object, method, call));
        }

        // Deferrable methods only run on the reactor.
        let deferred = Deferred::new(reactor);
        let done = deferred.clone();
        let object = object.clone();
        let method = method.to_string();
        let handle = reactor.clone();
        reactor.next_tick(move || {
            if let Some(target) = object.0.as_deferrable() {
                let call = DeferredCall::new(args, block, CallContext::local(), handle);
                target.invoke_deferred(&method, call).chain(&done);
            }
        });
        deferred
    }

    fn encode_request(
        &self,
        marshal: &Marshal,
        method: &str,
        args: &[Value],
        block: Option<Block>,
    ) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        put_frame(&mut buf, &MsgPackCodec::encode(&reference_value(self.reference))?)?;
        put_frame(&mut buf, &MsgPackCodec::encode(&Value::from(method))?)?;
        put_frame(&mut buf, &MsgPackCodec::encode(&Value::Int(args.len() as i64))?)?;
        for arg in args {
            put_frame(&mut buf, &marshal.dump(arg, false)?)?;
        }

        let continuation = match block {
            None => Value::Nil,
            Some(block) => Value::Ref(marshal.export(&LocalObject(Arc::new(block)))?),
        };
        put_frame(&mut buf, &MsgPackCodec::encode(&continuation)?)?;
        Ok(buf.freeze())
    }

    /// Invoke `method` and wait for the result.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.call_with_block(method, args, None)
    }

    /// Invoke `method` with a block and wait for the result.
    ///
    /// # Errors
    ///
    /// `ReactorBlocked` on the reactor thread or from async code, where
    /// [`ProxyObject::send_async`] should be awaited instead. A failure raised by the
    /// target comes back as [`ObjwireError::Remote`] with this proxy's URI
    /// prepended to its backtrace.
    pub fn call_with_block(
        &self,
        method: &str,
        args: Vec<Value>,
        block: Option<Block>,
    ) -> Result<Value> {
        if let Some(object) = &self.local_object {
            let deferrable = object
                .0
                .as_deferrable()
                .is_some_and(|d| d.is_deferrable(method));
            if !deferrable {
                let block = block.map(|b| Self::local(&self.space, LocalObject(Arc::new(b))));
                let call = Call::new(args, block, CallContext::local());
                return invoke_ordinary(object, method, call).map_err(ObjwireError::Remote);
            }
        }

        if !self.space.reactor().can_block() {
            return Err(ObjwireError::ReactorBlocked);
        }

        self.send_async(method, args, block)
            .wait()
            .map_err(|e| self.annotate(e))
    }

    fn annotate(&self, err: ObjwireError) -> ObjwireError {
        match (err, &self.target_uri) {
            (ObjwireError::Remote(remote), Some(uri)) if !remote.is_unknown() => {
                ObjwireError::Remote(remote.with_call_site(uri.clone()))
            }
            (err, _) => err,
        }
    }
}

impl fmt::Debug for ProxyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyObject")
            .field("uri", &self.target_uri)
            .field("reference", &self.reference)
            .field("local_object", &self.local_object)
            .finish()
    }
}

/// Send one request over a new connection and read its reply.
async fn exchange(space: &ObjectSpace, uri: &str, request: Bytes) -> Result<Outcome> {
    let (transport, endpoint) = space.transports().resolve(uri)?;
    let mut stream = transport.connect(&endpoint).await?;
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut reader = ReplyReader::new(space.config().load_limit);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(ObjwireError::ConnectionClosed);
        }
        if let Some(reply) = reader.push(&buf[..n])? {
            return Ok(reply.into_result());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportConfig;
    use crate::object::ServiceBuilder;

    fn space() -> ObjectSpace {
        ObjectSpace::new(TransportConfig::default()).unwrap()
    }

    fn counter() -> LocalObject {
        LocalObject(
            ServiceBuilder::new("Counter")
                .method("double", 1, |call| Ok(Value::Int(call.int(0)? * 2)))
                .method("each_twice", 1, |call| {
                    let v = call.arg(0)?.clone();
                    call.yield_block(vec![v.clone()])?;
                    call.yield_block(vec![v])
                })
                .deferrable("later", 1, |call| {
                    let deferred = call.deferred();
                    deferred.succeed(call.arg(0).cloned().unwrap_or(Value::Nil));
                    deferred
                })
                .build(),
        )
    }

    #[test]
    fn test_local_call_short_circuits() {
        let space = space();
        let proxy = ProxyObject::local(&space, counter());

        assert!(proxy.is_local());
        assert!(proxy.uri().is_none());
        assert_eq!(proxy.call("double", vec![Value::Int(21)]).unwrap(), Value::Int(42));

        let err = proxy.call("triple", vec![Value::Int(1)]).unwrap_err();
        match err {
            ObjwireError::Remote(remote) => {
                assert_eq!(remote.kind, "NoMethodError");
                assert!(remote.backtrace.is_empty());
            }
            other => panic!("expected Remote, got {other:?}"),
        }
        space.shutdown();
    }

    #[test]
    fn test_local_call_with_block() {
        let space = space();
        let proxy = ProxyObject::local(&space, counter());
        let seen = Arc::new(std::sync::atomic::AtomicI64::new(0));
        let sink = seen.clone();
        let block = Block::new(move |args| {
            let n = args.first().map(Value::to_int).transpose()?.unwrap_or(0);
            sink.fetch_add(n, std::sync::atomic::Ordering::SeqCst);
            Ok(Value::Nil)
        });

        proxy
            .call_with_block("each_twice", vec![Value::Int(5)], Some(block))
            .unwrap();
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 10);
        space.shutdown();
    }

    #[test]
    fn test_local_deferrable_runs_on_reactor() {
        let space = space();
        let proxy = ProxyObject::local(&space, counter());

        assert_eq!(proxy.call("later", vec![Value::Int(7)]).unwrap(), Value::Int(7));
        space.shutdown();
    }

    #[test]
    fn test_from_value() {
        let space = space();

        let remote = ProxyObject::from_value(
            &space,
            Value::Ref(RemoteRef::new("tcp://127.0.0.1:1", RefId(3))),
        )
        .unwrap();
        assert!(!remote.is_local());
        assert_eq!(remote.uri(), Some("tcp://127.0.0.1:1"));
        assert_eq!(remote.reference(), Some(RefId(3)));
        assert_eq!(
            remote.to_value(),
            Value::Ref(RemoteRef::new("tcp://127.0.0.1:1", RefId(3)))
        );

        let local = ProxyObject::from_value(&space, Value::Object(counter())).unwrap();
        assert!(local.is_local());

        let err = ProxyObject::from_value(&space, Value::Int(1)).unwrap_err();
        assert_eq!(err.kind, "TypeError");
        space.shutdown();
    }

    #[test]
    fn test_argument_limit_is_checked_before_connecting() {
        let space = ObjectSpace::new(TransportConfig::builder().arg_count_limit(1).build()).unwrap();
        let proxy = space.proxy("tcp://127.0.0.1:1");

        let err = proxy
            .call("sum", vec![Value::Int(1), Value::Int(2)])
            .unwrap_err();
        match err {
            ObjwireError::Remote(remote) => assert_eq!(remote.kind, "TooManyArguments"),
            other => panic!("expected Remote, got {other:?}"),
        }
        space.shutdown();
    }

    #[test]
    fn test_block_needs_local_server() {
        let space = space();
        let proxy = space.proxy("tcp://127.0.0.1:1");

        let err = proxy
            .call_with_block("each", vec![], Some(Block::new(|_| Ok(Value::Nil))))
            .unwrap_err();
        match err {
            ObjwireError::Remote(remote) => assert_eq!(remote.kind, "ServerNotFound"),
            other => panic!("expected Remote, got {other:?}"),
        }
        space.shutdown();
    }

    #[tokio::test]
    async fn test_blocking_call_refused_in_async_code() {
        let space = space();
        let remote = space.proxy("tcp://127.0.0.1:1");
        assert!(matches!(
            remote.call("identity", vec![Value::Int(1)]),
            Err(ObjwireError::ReactorBlocked)
        ));

        // Ordinary local methods never wait on the reactor.
        let local = ProxyObject::local(&space, counter());
        assert_eq!(local.call("double", vec![Value::Int(2)]).unwrap(), Value::Int(4));

        tokio::task::spawn_blocking(move || space.shutdown()).await.unwrap();
    }
}
