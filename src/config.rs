//! Configuration of servers and calls in an object space.
//!
//! # Example
//!
//! ```
//! use objwire::config::TransportConfig;
//!
//! let config = TransportConfig::builder()
//!     .load_limit(1024 * 1024)
//!     .arg_count_limit(16)
//!     .isolation_level(1)
//!     .acl(|peer: &str| peer == "127.0.0.1")
//!     .build();
//!
//! assert_eq!(config.arg_count_limit, 16);
//! assert!(config.permits("127.0.0.1"));
//! assert!(!config.permits("10.0.0.1"));
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::{DefaultSecurityPolicy, SecurityPolicy};
use crate::protocol::{DEFAULT_ARG_COUNT_LIMIT, DEFAULT_LOAD_LIMIT};
use crate::transport::{AutoLoadHook, Transport};
use crate::writer::WriterConfig;

/// Decides which peers may connect.
pub trait AccessControl: Send + Sync {
    /// Whether a connection from `peer` is allowed.
    fn permits(&self, peer: &str) -> bool;
}

impl<F> AccessControl for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn permits(&self, peer: &str) -> bool {
        self(peer)
    }
}

/// Limits and policies applied to every connection of an object space.
#[derive(Clone)]
pub struct TransportConfig {
    /// Maximum payload size of one frame.
    pub load_limit: u32,
    /// Maximum number of arguments of one request.
    pub arg_count_limit: u32,
    /// Minimum isolation level of every call.
    pub isolation_level: u32,
    /// Peer filter; `None` accepts everyone.
    pub acl: Option<Arc<dyn AccessControl>>,
    /// Per-call method filter.
    pub security_policy: Arc<dyn SecurityPolicy>,
    /// Run when a URI scheme is unknown.
    pub auto_load: Option<AutoLoadHook>,
    /// Reply queue of each connection.
    pub writer: WriterConfig,
}

impl TransportConfig {
    /// Start building a configuration.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::new()
    }

    /// Whether `peer` passes the ACL.
    pub fn permits(&self, peer: &str) -> bool {
        self.acl.as_ref().map_or(true, |acl| acl.permits(peer))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            load_limit: DEFAULT_LOAD_LIMIT,
            arg_count_limit: DEFAULT_ARG_COUNT_LIMIT,
            isolation_level: 0,
            acl: None,
            security_policy: Arc::new(DefaultSecurityPolicy),
            auto_load: None,
            writer: WriterConfig::default(),
        }
    }
}

impl fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportConfig")
            .field("load_limit", &self.load_limit)
            .field("arg_count_limit", &self.arg_count_limit)
            .field("isolation_level", &self.isolation_level)
            .field("acl", &self.acl.is_some())
            .field("auto_load", &self.auto_load.is_some())
            .field("writer", &self.writer)
            .finish()
    }
}

/// Fluent builder for [`TransportConfig`].
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Set the maximum payload size of one frame.
    ///
    /// Default: 26214400 (25 MiB)
    pub fn load_limit(mut self, limit: u32) -> Self {
        self.config.load_limit = limit;
        self
    }

    /// Set the maximum number of arguments per request.
    ///
    /// Default: 256
    pub fn arg_count_limit(mut self, limit: u32) -> Self {
        self.config.arg_count_limit = limit;
        self
    }

    /// Set the minimum isolation level of calls.
    ///
    /// Default: 0
    pub fn isolation_level(mut self, level: u32) -> Self {
        self.config.isolation_level = level;
        self
    }

    /// Only accept peers the ACL permits.
    pub fn acl<A: AccessControl + 'static>(mut self, acl: A) -> Self {
        self.config.acl = Some(Arc::new(acl));
        self
    }

    /// Replace the default security policy.
    pub fn security_policy<P: SecurityPolicy + 'static>(mut self, policy: P) -> Self {
        self.config.security_policy = Arc::new(policy);
        self
    }

    /// Install a hook for unknown URI schemes.
    pub fn auto_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) -> Option<Arc<dyn Transport>> + Send + Sync + 'static,
    {
        self.config.auto_load = Some(Arc::new(hook));
        self
    }

    /// Set the maximum queued reply frames per connection.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Set the reply channel capacity per connection.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Finish.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

impl Default for TransportConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
