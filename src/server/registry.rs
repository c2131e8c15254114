//! Servers listening in this process.

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;

use super::Server;

/// Active servers keyed by URI.
///
/// The first server registered becomes the primary one: references to
/// objects that are passed by value from outside any server (blocks given
/// to outbound calls, for instance) are exported under its URI.
pub struct ServerRegistry {
    servers: DashMap<String, Arc<Server>>,
    primary: RwLock<Option<String>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self {
            servers: DashMap::new(),
            primary: RwLock::new(None),
        }
    }

    /// Register `server` under its URI.
    pub fn insert(&self, server: Arc<Server>) {
        let uri = server.uri().to_string();
        {
            let mut primary = self.primary.write().unwrap_or_else(PoisonError::into_inner);
            if primary.is_none() {
                *primary = Some(uri.clone());
            }
        }
        self.servers.insert(uri, server);
    }

    pub fn get(&self, uri: &str) -> Option<Arc<Server>> {
        self.servers.get(uri).map(|entry| entry.value().clone())
    }

    /// Whether `uri` is served by this process.
    pub fn here(&self, uri: &str) -> bool {
        self.servers.contains_key(uri)
    }

    /// The primary server, if it is still running.
    pub fn primary(&self) -> Option<Arc<Server>> {
        let uri = self.primary_uri()?;
        self.get(&uri)
    }

    pub fn primary_uri(&self) -> Option<String> {
        self.primary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Unregister the server at `uri`.
    ///
    /// When it was the primary, another running server (if any) takes over.
    pub fn remove(&self, uri: &str) -> Option<Arc<Server>> {
        let (_, server) = self.servers.remove(uri)?;
        let mut primary = self.primary.write().unwrap_or_else(PoisonError::into_inner);
        if primary.as_deref() == Some(uri) {
            *primary = self.servers.iter().next().map(|entry| entry.key().clone());
        }
        Some(server)
    }

    /// Every registered server.
    pub fn all(&self) -> Vec<Arc<Server>> {
        self.servers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl Default for ServerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
