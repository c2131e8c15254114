//! Transport module - URI schemes mapped to stream sockets.
//!
//! Provides:
//! - [`TcpTransport`] - `tcp://host:port[?option]`
//! - [`UnixTransport`] - `unix:/path[?option]` (Unix only)
//! - [`TransportRegistry`] - picks the transport for a URI
//!
//! # Example
//!
//! ```
//! use objwire::transport::TransportRegistry;
//!
//! let registry = TransportRegistry::with_defaults(None);
//! let (transport, endpoint) = registry.resolve("tcp://127.0.0.1:8787").unwrap();
//! assert_eq!(transport.scheme(), "tcp");
//! assert_eq!(endpoint.address, "127.0.0.1:8787");
//! ```

mod tcp;
#[cfg(unix)]
mod unix;

pub use tcp::TcpTransport;
#[cfg(unix)]
pub use unix::{generate_socket_path, UnixTransport};

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ObjwireError, Result};

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Byte stream produced by any transport.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// A connected stream of any transport.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Hook run with a scheme no registered transport understands.
///
/// May return a transport to register before the lookup is retried.
pub type AutoLoadHook = Arc<dyn Fn(&str) -> Option<Arc<dyn Transport>> + Send + Sync>;

/// A parsed URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// URI as given.
    pub uri: String,
    /// Transport specific address (`host:port`, socket path).
    pub address: String,
    /// Text after `?`, if any.
    pub option: Option<String>,
}

/// A bound listener.
pub trait Listener: Send {
    /// URI peers should use to reach this listener.
    fn uri(&self) -> &str;

    /// Wait for the next connection; yields the stream and a peer address.
    fn accept(&mut self) -> BoxFuture<'_, Result<(BoxedStream, String)>>;
}

/// A URI scheme and the sockets behind it.
pub trait Transport: Send + Sync + 'static {
    /// Scheme handled, without the colon.
    fn scheme(&self) -> &'static str;

    /// Parse `uri`.
    ///
    /// # Errors
    ///
    /// `SchemeMismatch` when the URI belongs to another transport, `BadUri`
    /// when it is this transport's but malformed.
    fn parse(&self, uri: &str) -> Result<Endpoint>;

    /// Bind a listener.
    fn listen<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<Box<dyn Listener>>>;

    /// Open a connection.
    fn connect<'a>(&'a self, endpoint: &'a Endpoint) -> BoxFuture<'a, Result<BoxedStream>>;
}

/// Split off a trailing `?option`.
pub(crate) fn split_option(rest: &str) -> (&str, Option<String>) {
    match rest.split_once('?') {
        Some((head, option)) => (head, Some(option.to_string())),
        None => (rest, None),
    }
}

/// Scheme part of a URI, without the colon.
pub fn scheme_of(uri: &str) -> &str {
    uri.split_once(':').map(|(scheme, _)| scheme).unwrap_or(uri)
}

/// The transports known to an object space.
pub struct TransportRegistry {
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    auto_load: Option<AutoLoadHook>,
}

impl TransportRegistry {
    /// An empty registry.
    pub fn new(auto_load: Option<AutoLoadHook>) -> Self {
        Self {
            transports: RwLock::new(Vec::new()),
            auto_load,
        }
    }

    /// A registry with the built-in transports.
    pub fn with_defaults(auto_load: Option<AutoLoadHook>) -> Self {
        let registry = Self::new(auto_load);
        registry.register(Arc::new(TcpTransport));
        #[cfg(unix)]
        registry.register(Arc::new(UnixTransport));
        registry
    }

    /// Add a transport. Earlier registrations are tried first.
    pub fn register(&self, transport: Arc<dyn Transport>) {
        tracing::debug!("registered transport {}", transport.scheme());
        self.transports
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transport);
    }

    /// Registered schemes, in lookup order.
    pub fn schemes(&self) -> Vec<&'static str> {
        self.transports
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.scheme())
            .collect()
    }

    /// Find the transport for `uri` and parse it.
    ///
    /// The first parse that is not a `SchemeMismatch` decides. If none
    /// matches, the auto-load hook runs once and the lookup is retried once.
    pub fn resolve(&self, uri: &str) -> Result<(Arc<dyn Transport>, Endpoint)> {
        if let Some(found) = self.try_resolve(uri) {
            return found;
        }

        if let Some(hook) = &self.auto_load {
            let scheme = scheme_of(uri);
            tracing::debug!("auto-loading transport for scheme {:?}", scheme);
            if let Some(transport) = hook(scheme) {
                self.register(transport);
            }
            if let Some(found) = self.try_resolve(uri) {
                return found;
            }
        }

        Err(ObjwireError::UnknownScheme(uri.to_string()))
    }

    fn try_resolve(&self, uri: &str) -> Option<Result<(Arc<dyn Transport>, Endpoint)>> {
        let transports = self
            .transports
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for transport in transports.iter() {
            match transport.parse(uri) {
                Err(ObjwireError::SchemeMismatch(_)) => continue,
                Ok(endpoint) => return Some(Ok((transport.clone(), endpoint))),
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_defaults(None)
    }
}
