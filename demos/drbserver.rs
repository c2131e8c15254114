//! Test server - the object the integration scenarios talk to.
//!
//! Exposes:
//! - `identity(x)`, `addtwo(a, b)`, `sum(*xs)`
//! - `blockyield(*xs) { |x| ... }` - yields each argument from a worker
//! - `raise_exception` - always fails
//! - `block_df(*xs) { |x| ... }` - deferrable: yields each argument once the
//!   block answered the previous one, without blocking, and answers with the
//!   sum of the block's results
//!
//! # Running
//!
//! ```text
//! RUST_LOG=objwire=debug cargo run --example drbserver -- tcp://127.0.0.1:8787
//! ```

use std::sync::Arc;

use objwire::deferred::Deferred;
use objwire::object::{Arity, DeferredCall, ServiceBuilder};
use objwire::{ObjectSpace, RemoteError, TransportConfig, Value};
use tracing_subscriber::EnvFilter;

fn sum(values: &[Value]) -> Result<i64, RemoteError> {
    values.iter().map(Value::to_int).sum()
}

fn block_df(call: DeferredCall) -> Deferred {
    let done = call.deferred();
    next_yield(Arc::new(call), 0, 0, done.clone());
    done
}

/// One step of `block_df`: yield argument `index`, continue from its result.
fn next_yield(call: Arc<DeferredCall>, index: usize, total: i64, done: Deferred) {
    let Some(value) = call.args().get(index).cloned() else {
        done.succeed(Value::Int(total));
        return;
    };

    let failed = done.clone();
    call.yield_async(vec![value])
        .on_success(move |result| match result.to_int() {
            Ok(n) => next_yield(call, index + 1, total + n, done),
            Err(e) => {
                done.fail(e);
            }
        })
        .on_failure(move |e| {
            failed.fail(e);
        });
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tcp://127.0.0.1:8787".to_string());

    let front = ServiceBuilder::new("TestServer")
        .method("identity", 1, |call| Ok(call.arg(0)?.clone()))
        .method("addtwo", 2, |call| Ok(Value::Int(call.int(0)? + call.int(1)?)))
        .method("sum", Arity::AtLeast(0), |call| Ok(Value::Int(sum(call.args())?)))
        .method("blockyield", Arity::AtLeast(0), |call| {
            for arg in call.args() {
                call.yield_block(vec![arg.clone()])?;
            }
            Ok(Value::Nil)
        })
        .method("raise_exception", 0, |_| {
            Err(RemoteError::new("RuntimeError", "raise_exception called"))
        })
        .deferrable("block_df", Arity::AtLeast(0), block_df)
        .build();

    let space = ObjectSpace::new(TransportConfig::default())?;
    let uri = space.start_service(&uri, front)?;
    tracing::info!("drbserver ready at {}", uri);
    println!("{uri}");

    loop {
        std::thread::park();
    }
}
