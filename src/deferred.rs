//! Single-assignment result container with reactor-delivered callbacks.
//!
//! A [`Deferred`] starts pending and is resolved exactly once, either with a
//! [`Value`] or with a [`RemoteError`]. Callbacks registered with
//! [`Deferred::on_success`], [`Deferred::on_failure`] or
//! [`Deferred::on_complete`] always run on the reactor thread, in
//! registration order, exactly once. Resolution may happen on any thread.
//!
//! # Example
//!
//! ```
//! use objwire::deferred::Deferred;
//! use objwire::reactor::Reactor;
//! use objwire::value::Value;
//!
//! let reactor = Reactor::start().unwrap();
//! let deferred = Deferred::new(reactor.handle());
//!
//! assert!(deferred.succeed(Value::Int(1)));
//! assert!(!deferred.succeed(Value::Int(2))); // first resolution wins
//! assert_eq!(deferred.wait().unwrap(), Value::Int(1));
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::{ObjwireError, RemoteError, Result};
use crate::reactor::ReactorHandle;
use crate::value::Value;

/// What a deferred resolves to.
pub type Outcome = std::result::Result<Value, RemoteError>;

type Waiter = Box<dyn FnOnce(Outcome) + Send + 'static>;

enum Status {
    Pending,
    Succeeded(Value),
    Failed(RemoteError),
}

impl Status {
    fn outcome(&self) -> Option<Outcome> {
        match self {
            Status::Pending => None,
            Status::Succeeded(v) => Some(Ok(v.clone())),
            Status::Failed(e) => Some(Err(e.clone())),
        }
    }
}

struct State {
    status: Status,
    waiters: Vec<Waiter>,
}

/// Shared handle to an eventual result.
#[derive(Clone)]
pub struct Deferred {
    state: Arc<Mutex<State>>,
    reactor: ReactorHandle,
}

impl Deferred {
    /// Create a pending deferred whose callbacks run on `reactor`.
    pub fn new(reactor: &ReactorHandle) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                status: Status::Pending,
                waiters: Vec::new(),
            })),
            reactor: reactor.clone(),
        }
    }

    /// Create an already succeeded deferred.
    pub fn succeeded(reactor: &ReactorHandle, value: Value) -> Self {
        Self::resolved(reactor, Ok(value))
    }

    /// Create an already failed deferred.
    pub fn failed(reactor: &ReactorHandle, error: impl Into<RemoteError>) -> Self {
        Self::resolved(reactor, Err(error.into()))
    }

    /// Create an already resolved deferred.
    pub fn resolved(reactor: &ReactorHandle, outcome: Outcome) -> Self {
        let deferred = Self::new(reactor);
        deferred.resolve(outcome);
        deferred
    }

    /// The reactor callbacks are delivered on.
    pub fn reactor(&self) -> &ReactorHandle {
        &self.reactor
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve successfully. Returns `false` if already resolved.
    pub fn succeed(&self, value: Value) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolve as failed. Returns `false` if already resolved.
    pub fn fail(&self, error: impl Into<RemoteError>) -> bool {
        self.resolve(Err(error.into()))
    }

    /// Resolve with `outcome`. Only the first resolution has any effect.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let mut state = self.lock();
        if !matches!(state.status, Status::Pending) {
            return false;
        }
        state.status = match &outcome {
            Ok(v) => Status::Succeeded(v.clone()),
            Err(e) => Status::Failed(e.clone()),
        };
        let waiters = std::mem::take(&mut state.waiters);

        // Queued under the lock so a waiter added meanwhile lands after these.
        if !waiters.is_empty() {
            self.reactor.next_tick(move || {
                for waiter in waiters {
                    waiter(outcome.clone());
                }
            });
        }
        true
    }

    fn add_waiter(&self, waiter: Waiter) {
        let mut state = self.lock();
        match state.status.outcome() {
            Some(outcome) => self.reactor.next_tick(move || waiter(outcome)),
            None => state.waiters.push(waiter),
        }
    }

    /// Register a callback for the success value.
    pub fn on_success<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Value) + Send + 'static,
    {
        self.add_waiter(Box::new(move |outcome| {
            if let Ok(value) = outcome {
                f(value);
            }
        }));
        self
    }

    /// Register a callback for the failure error.
    pub fn on_failure<F>(&self, f: F) -> &Self
    where
        F: FnOnce(RemoteError) + Send + 'static,
    {
        self.add_waiter(Box::new(move |outcome| {
            if let Err(error) = outcome {
                f(error);
            }
        }));
        self
    }

    /// Register a callback for either outcome.
    pub fn on_complete<F>(&self, f: F) -> &Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.add_waiter(Box::new(f));
        self
    }

    /// Forward this deferred's outcome into `other`.
    pub fn chain(&self, other: &Deferred) {
        let other = other.clone();
        self.on_complete(move |outcome| {
            other.resolve(outcome);
        });
    }

    /// A new deferred resolved from this one's success value through `f`.
    ///
    /// Failures pass through untouched.
    pub fn then<F>(&self, f: F) -> Deferred
    where
        F: FnOnce(Value) -> Outcome + Send + 'static,
    {
        let next = Deferred::new(&self.reactor);
        let target = next.clone();
        self.on_complete(move |outcome| {
            target.resolve(outcome.and_then(f));
        });
        next
    }

    /// Succeeds with an `Array` of every value, in order, once all succeed;
    /// fails with the first failure.
    pub fn all(reactor: &ReactorHandle, items: Vec<Deferred>) -> Deferred {
        let combined = Deferred::new(reactor);
        if items.is_empty() {
            combined.succeed(Value::Array(Vec::new()));
            return combined;
        }

        let remaining = items.len();
        let slots = Arc::new(Mutex::new((vec![None; remaining], remaining)));
        for (index, item) in items.iter().enumerate() {
            let slots = slots.clone();
            let combined = combined.clone();
            item.on_complete(move |outcome| match outcome {
                Ok(value) => {
                    let mut guard = slots.lock().unwrap_or_else(PoisonError::into_inner);
                    let (values, remaining) = &mut *guard;
                    values[index] = Some(value);
                    *remaining -= 1;
                    if *remaining == 0 {
                        let values: Vec<Value> =
                            std::mem::take(values).into_iter().flatten().collect();
                        drop(guard);
                        combined.succeed(Value::Array(values));
                    }
                }
                Err(error) => {
                    combined.fail(error);
                }
            });
        }
        combined
    }

    /// Whether a result is available.
    pub fn is_resolved(&self) -> bool {
        !matches!(self.lock().status, Status::Pending)
    }

    /// The result, if resolved.
    pub fn peek(&self) -> Option<Outcome> {
        self.lock().status.outcome()
    }

    /// Await the result from async code.
    pub async fn outcome(&self) -> Outcome {
        let (tx, rx) = oneshot::channel();
        self.on_complete(move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await
            .unwrap_or_else(|_| Err(ObjwireError::ReactorStopped.into()))
    }

    /// Block the calling thread until the result is available.
    ///
    /// # Errors
    ///
    /// `ReactorBlocked` when called on the reactor thread, since the
    /// callback that would wake it could never run, or from async code
    /// (see [`ReactorHandle::can_block`]); await [`Deferred::outcome`]
    /// there instead. A failed result comes back as
    /// [`ObjwireError::Remote`].
    pub fn wait(&self) -> Result<Value> {
        if !self.reactor.can_block() {
            return Err(ObjwireError::ReactorBlocked);
        }

        let (tx, rx) = oneshot::channel();
        self.on_complete(move |outcome| {
            let _ = tx.send(outcome);
        });
        match rx.blocking_recv() {
            Ok(outcome) => outcome.map_err(ObjwireError::Remote),
            Err(_) => Err(ObjwireError::ReactorStopped),
        }
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        let status = match &state.status {
            Status::Pending => "pending",
            Status::Succeeded(_) => "succeeded",
            Status::Failed(_) => "failed",
        };
        f.debug_struct("Deferred")
            .field("status", &status)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::sync::mpsc;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_first_resolution_wins() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::new(reactor.handle());

        assert!(!d.is_resolved());
        assert!(d.fail(RemoteError::new("RuntimeError", "first")));
        assert!(!d.succeed(Value::Int(1)));
        assert!(!d.fail(RemoteError::new("RuntimeError", "second")));

        let err = d.peek().unwrap().unwrap_err();
        assert_eq!(err.message, "first");
    }

    #[test]
    fn test_callbacks_fire_once_in_order_on_reactor() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::new(reactor.handle());
        let (tx, rx) = mpsc::channel();

        for i in 0..3 {
            let tx = tx.clone();
            let handle = reactor.handle().clone();
            d.on_success(move |v| {
                tx.send((i, v, handle.is_reactor_thread())).unwrap();
            });
        }
        let never = tx.clone();
        d.on_failure(move |_| never.send((99, Value::Nil, false)).unwrap());

        d.succeed(Value::Int(7));
        d.succeed(Value::Int(8));

        for i in 0..3 {
            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), (i, Value::Int(7), true));
        }
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_late_registration_runs_on_next_tick() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::failed(reactor.handle(), RemoteError::new("E", "m"));
        let (tx, rx) = mpsc::channel();

        d.on_failure(move |e| tx.send(e.kind).unwrap());
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), "E");
    }

    #[test]
    fn test_resolve_from_worker_thread() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::new(reactor.handle());

        let remote = d.clone();
        std::thread::spawn(move || {
            remote.succeed(Value::from("done"));
        });

        assert_eq!(d.wait().unwrap(), Value::from("done"));
    }

    #[test]
    fn test_wait_returns_remote_error() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::failed(reactor.handle(), RemoteError::arity(1, 2));

        match d.wait() {
            Err(ObjwireError::Remote(e)) => assert_eq!(e.kind, "ArgumentError"),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn test_wait_refused_on_reactor_thread() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::succeeded(reactor.handle(), Value::Nil);
        let (tx, rx) = mpsc::channel();

        let inner = d.clone();
        reactor.handle().next_tick(move || {
            tx.send(matches!(inner.wait(), Err(ObjwireError::ReactorBlocked)))
                .unwrap();
        });
        assert!(rx.recv_timeout(TIMEOUT).unwrap());
    }

    #[test]
    fn test_chain_and_then() {
        let reactor = Reactor::start().unwrap();
        let source = Deferred::new(reactor.handle());
        let chained = Deferred::new(reactor.handle());
        source.chain(&chained);

        let doubled = chained.then(|v| Ok(Value::Int(v.as_int().unwrap_or(0) * 2)));
        source.succeed(Value::Int(21));

        assert_eq!(doubled.wait().unwrap(), Value::Int(42));
    }

    #[test]
    fn test_all_collects_in_order() {
        let reactor = Reactor::start().unwrap();
        let a = Deferred::new(reactor.handle());
        let b = Deferred::new(reactor.handle());
        let all = Deferred::all(reactor.handle(), vec![a.clone(), b.clone()]);

        b.succeed(Value::Int(2));
        a.succeed(Value::Int(1));

        assert_eq!(
            all.wait().unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );

        let empty = Deferred::all(reactor.handle(), Vec::new());
        assert_eq!(empty.wait().unwrap(), Value::Array(Vec::new()));
    }

    #[test]
    fn test_all_fails_fast() {
        let reactor = Reactor::start().unwrap();
        let a = Deferred::new(reactor.handle());
        let b = Deferred::failed(reactor.handle(), RemoteError::new("E", "bad"));
        let all = Deferred::all(reactor.handle(), vec![a, b]);

        assert!(matches!(all.wait(), Err(ObjwireError::Remote(e)) if e.message == "bad"));
    }

    #[tokio::test]
    async fn test_outcome_from_async_code() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::new(reactor.handle());

        let remote = d.clone();
        reactor.handle().next_tick(move || {
            remote.succeed(Value::Bool(true));
        });

        assert_eq!(d.outcome().await, Ok(Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_wait_refused_from_async_code() {
        let reactor = Reactor::start().unwrap();
        let d = Deferred::succeeded(reactor.handle(), Value::Nil);

        assert!(matches!(d.wait(), Err(ObjwireError::ReactorBlocked)));
        assert_eq!(d.outcome().await, Ok(Value::Nil));
    }

    #[test]
    fn test_waiters_from_other_threads_keep_registration_order() {
        let reactor = Reactor::start().unwrap();
        let (tx, rx) = mpsc::channel();

        for _ in 0..200 {
            let d = Deferred::new(reactor.handle());
            let first = tx.clone();
            d.on_success(move |_| first.send(1).unwrap());

            let resolver = d.clone();
            let racer = std::thread::spawn(move || {
                resolver.succeed(Value::Nil);
            });
            let second = tx.clone();
            d.on_success(move |_| second.send(2).unwrap());
            racer.join().unwrap();

            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 1);
            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), 2);
        }
    }
}
