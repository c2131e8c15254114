//! # objwire
//!
//! Remote object RPC on a reactor.
//!
//! Clients hold proxies to objects living in another process and call
//! their methods, blocks included, as if they were local. Each call is a
//! run of length-prefixed values; each reply is a success flag and a value.
//!
//! ## Architecture
//!
//! - **Reactor**: one thread owns every connection and delivers every
//!   [`Deferred`] callback; ordinary methods run on a worker pool.
//! - **Server**: frames → values → [`protocol::RequestAssembler`] →
//!   [`dispatch::Dispatcher`] → `Deferred` → reply.
//! - **Client**: [`ProxyObject::send_async`] returns a `Deferred`;
//!   [`ProxyObject::call`] waits on it from the calling thread.
//! - Values that cannot be sent by copy travel as references to objects
//!   exported from the sender ([`marshal`]).
//!
//! ## Example
//!
//! ```no_run
//! use objwire::object::{Arity, Block, ServiceBuilder};
//! use objwire::{ObjectSpace, TransportConfig, Value};
//!
//! let server = ObjectSpace::new(TransportConfig::default()).unwrap();
//! let front = ServiceBuilder::new("Demo")
//!     .method("blockyield", Arity::AtLeast(0), |call| {
//!         for arg in call.args() {
//!             call.yield_block(vec![arg.clone()])?;
//!         }
//!         Ok(Value::Nil)
//!     })
//!     .build();
//! let uri = server.start_service("tcp://127.0.0.1:0", front).unwrap();
//!
//! // The client needs a server of its own so the block can be called back.
//! let client = ObjectSpace::new(TransportConfig::default()).unwrap();
//! client
//!     .start_service("tcp://127.0.0.1:0", ServiceBuilder::new("Client").build())
//!     .unwrap();
//!
//! let block = Block::new(|args| Ok(args.into_iter().next().unwrap_or(Value::Nil)));
//! client
//!     .proxy(&uri)
//!     .call_with_block("blockyield", vec![Value::Int(1), Value::Int(2)], Some(block))
//!     .unwrap();
//!
//! client.shutdown();
//! server.shutdown();
//! ```

pub mod codec;
pub mod config;
pub mod deferred;
pub mod dispatch;
pub mod error;
pub mod marshal;
pub mod object;
pub mod protocol;
pub mod proxy;
pub mod reactor;
pub mod refs;
pub mod server;
pub mod space;
pub mod transport;
pub mod value;
pub mod writer;

pub use config::TransportConfig;
pub use deferred::Deferred;
pub use error::{ObjwireError, RemoteError, Result};
pub use proxy::ProxyObject;
pub use space::ObjectSpace;
pub use value::Value;
