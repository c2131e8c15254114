//! The object space: reactor, registries and configuration of one process
//! context.
//!
//! Everything a server or proxy needs is reached through an
//! [`ObjectSpace`]; several spaces can coexist in one process, each with
//! its own reactor and reference table.
//!
//! # Example
//!
//! ```no_run
//! use objwire::object::ServiceBuilder;
//! use objwire::{ObjectSpace, TransportConfig, Value};
//!
//! let space = ObjectSpace::new(TransportConfig::default()).unwrap();
//! let front = ServiceBuilder::new("Echo")
//!     .method("identity", 1, |call| Ok(call.arg(0)?.clone()))
//!     .build();
//!
//! let uri = space.start_service("tcp://127.0.0.1:0", front).unwrap();
//! let echo = space.proxy(&uri);
//! assert_eq!(echo.call("identity", vec![Value::Int(1)]).unwrap(), Value::Int(1));
//!
//! space.shutdown();
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::TransportConfig;
use crate::error::{ObjwireError, Result};
use crate::marshal::Marshal;
use crate::object::RemoteObject;
use crate::proxy::ProxyObject;
use crate::reactor::{Reactor, ReactorConfig, ReactorHandle};
use crate::refs::ReferenceTable;
use crate::server::{self, ServerRegistry};
use crate::transport::TransportRegistry;
use crate::value::LocalObject;

struct Inner {
    reactor: ReactorHandle,
    /// Present when this space started the reactor itself.
    owned_reactor: Mutex<Option<Reactor>>,
    config: TransportConfig,
    refs: Arc<ReferenceTable>,
    servers: Arc<ServerRegistry>,
    transports: TransportRegistry,
}

/// Shared context of servers and proxies. Cheap to clone.
///
/// Running servers keep the space alive; call [`ObjectSpace::shutdown`]
/// to stop them and the reactor.
#[derive(Clone)]
pub struct ObjectSpace {
    inner: Arc<Inner>,
}

impl ObjectSpace {
    /// Start a space with its own reactor.
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::with_reactor_config(config, ReactorConfig::default())
    }

    /// Start a space with its own reactor, configured by `reactor_config`.
    pub fn with_reactor_config(config: TransportConfig, reactor_config: ReactorConfig) -> Result<Self> {
        let reactor = Reactor::with_config(reactor_config)?;
        let handle = reactor.handle().clone();
        Ok(Self::build(handle, Some(reactor), config))
    }

    /// A space sharing an existing reactor. [`ObjectSpace::shutdown`] leaves
    /// that reactor running.
    pub fn on_reactor(reactor: &ReactorHandle, config: TransportConfig) -> Self {
        Self::build(reactor.clone(), None, config)
    }

    fn build(reactor: ReactorHandle, owned: Option<Reactor>, config: TransportConfig) -> Self {
        let transports = TransportRegistry::with_defaults(config.auto_load.clone());
        Self {
            inner: Arc::new(Inner {
                reactor,
                owned_reactor: Mutex::new(owned),
                config,
                refs: Arc::new(ReferenceTable::new()),
                servers: Arc::new(ServerRegistry::new()),
                transports,
            }),
        }
    }

    pub fn reactor(&self) -> &ReactorHandle {
        &self.inner.reactor
    }

    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    pub fn refs(&self) -> &Arc<ReferenceTable> {
        &self.inner.refs
    }

    pub fn servers(&self) -> &Arc<ServerRegistry> {
        &self.inner.servers
    }

    pub fn transports(&self) -> &TransportRegistry {
        &self.inner.transports
    }

    /// Marshal exporting under the primary server.
    pub fn marshal(&self) -> Marshal {
        self.marshal_for(self.inner.servers.primary_uri())
    }

    /// Marshal exporting under `here`.
    pub fn marshal_for(&self, here: Option<String>) -> Marshal {
        Marshal::new(self.inner.refs.clone(), self.inner.servers.clone(), here)
    }

    /// Start a server at `uri` with `front` as its front object.
    ///
    /// Returns the URI the server is reachable at, which differs from `uri`
    /// when it asked for a free port or a generated socket path.
    pub async fn listen(&self, uri: &str, front: Arc<dyn RemoteObject>) -> Result<String> {
        let space = self.clone();
        let uri = uri.to_string();
        self.reactor()
            .spawn(async move {
                let server = server::start(space, &uri, LocalObject(front)).await?;
                Ok::<_, ObjwireError>(server.uri().to_string())
            })
            .await
            .map_err(|_| ObjwireError::ReactorStopped)?
    }

    /// Blocking form of [`ObjectSpace::listen`].
    ///
    /// # Errors
    ///
    /// `ReactorBlocked` on the reactor thread or from async code; await
    /// [`ObjectSpace::listen`] there.
    pub fn start_service(&self, uri: &str, front: Arc<dyn RemoteObject>) -> Result<String> {
        let space = self.clone();
        let uri = uri.to_string();
        self.reactor().block_on(async move {
            let server = server::start(space, &uri, LocalObject(front)).await?;
            Ok::<_, ObjwireError>(server.uri().to_string())
        })?
    }

    /// Stop the server at `uri`. Returns `false` if none runs there.
    pub fn stop_service(&self, uri: &str) -> bool {
        match self.inner.servers.remove(uri) {
            Some(server) => {
                server.stop();
                true
            }
            None => false,
        }
    }

    /// URI of the primary server.
    pub fn uri(&self) -> Option<String> {
        self.inner.servers.primary_uri()
    }

    /// Proxy for the front object of the server at `uri`.
    pub fn proxy(&self, uri: &str) -> ProxyObject {
        ProxyObject::new(self, uri)
    }

    /// Stop every server, then the reactor if this space owns it.
    pub fn shutdown(&self) {
        for server in self.inner.servers.all() {
            self.stop_service(server.uri());
        }
        let reactor = self
            .inner
            .owned_reactor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut reactor) = reactor {
            reactor.shutdown();
        }
    }
}

impl fmt::Debug for ObjectSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSpace")
            .field("servers", &self.inner.servers.len())
            .field("exported", &self.inner.refs.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ServiceBuilder;

    fn front() -> Arc<dyn RemoteObject> {
        ServiceBuilder::new("Front").build()
    }

    #[test]
    fn test_start_and_stop_service() {
        let space = ObjectSpace::new(TransportConfig::default()).unwrap();
        assert!(space.uri().is_none());

        let uri = space.start_service("tcp://127.0.0.1:0", front()).unwrap();
        assert!(uri.starts_with("tcp://127.0.0.1:"));
        assert_eq!(space.uri().as_deref(), Some(uri.as_str()));
        assert_eq!(space.marshal().here(), Some(uri.as_str()));

        assert!(space.stop_service(&uri));
        assert!(!space.stop_service(&uri));
        assert!(space.uri().is_none());
        space.shutdown();
    }

    #[test]
    fn test_unknown_scheme() {
        let space = ObjectSpace::new(TransportConfig::default()).unwrap();
        assert!(matches!(
            space.start_service("gopher://x:1", front()),
            Err(ObjwireError::UnknownScheme(_))
        ));
        space.shutdown();
    }

    #[tokio::test]
    async fn test_listen_from_async_code() {
        let space = ObjectSpace::new(TransportConfig::default()).unwrap();
        let uri = space.listen("tcp://127.0.0.1:0", front()).await.unwrap();

        assert!(space.servers().here(&uri));
        space.stop_service(&uri);
        // Joining the reactor thread from inside a runtime would block it.
        tokio::task::spawn_blocking(move || space.shutdown()).await.unwrap();
    }

    #[test]
    fn test_shared_reactor_survives_shutdown() {
        let reactor = Reactor::start().unwrap();
        let space = ObjectSpace::on_reactor(reactor.handle(), TransportConfig::default());
        space.shutdown();

        let answer = reactor.handle().block_on(async { 42 }).unwrap();
        assert_eq!(answer, 42);
    }
}
