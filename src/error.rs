//! Error types for objwire.
//!
//! [`ObjwireError`] is the local error type returned by every fallible
//! operation. [`RemoteError`] is the error *value* that travels over the wire
//! in a failed reply; every `ObjwireError` can be converted into one.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{RefId, UnknownValue};

/// Main error type for all objwire operations.
#[derive(Debug, thiserror::Error)]
pub enum ObjwireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    ///
    /// Never reaches a peer: `dump` substitutes a proxy instead.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// A frame declared a payload larger than the load limit.
    #[error("too large packet {length} (limit {limit})")]
    FrameTooLarge { length: u32, limit: u32 },

    /// No exported object is registered under this reference.
    #[error("unknown reference {0}")]
    UnknownReference(RefId),

    /// A request declared more arguments than the connection accepts.
    #[error("too many arguments ({count}, limit {limit})")]
    TooManyArguments { count: u64, limit: u32 },

    /// The URI does not belong to the transport that parsed it.
    #[error("scheme mismatch: {0}")]
    SchemeMismatch(String),

    /// No registered transport understands the URI scheme.
    #[error("unknown scheme: {0}")]
    UnknownScheme(String),

    /// The URI has a known scheme but cannot be parsed.
    #[error("can't parse uri: {0}")]
    BadUri(String),

    /// The security policy refused the call.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The target raised, or the call failed on the far side.
    #[error("{0}")]
    Remote(RemoteError),

    /// Protocol error (malformed request, unexpected value, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed before the exchange completed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// An operation needed a local server but none is running.
    #[error("no server is running in this object space")]
    NoServer,

    /// A blocking wait was attempted on the reactor thread.
    #[error("cannot block the reactor thread waiting on a deferred result")]
    ReactorBlocked,

    /// The reactor stopped before the operation completed.
    #[error("reactor stopped")]
    ReactorStopped,

    /// Backpressure timeout - reply queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using ObjwireError.
pub type Result<T> = std::result::Result<T, ObjwireError>;

/// Error kind used for values that could not be decoded.
pub const UNKNOWN_VALUE_KIND: &str = "UnknownValue";

/// An error as it travels inside a failed reply.
///
/// `kind` names the error class (`ArgumentError`, `UnknownReference`, ...),
/// `backtrace` lists call sites, innermost first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub backtrace: Vec<String>,
    /// Raw payload when this error stands in for an undecodable value.
    #[serde(default)]
    pub unknown: Option<UnknownValue>,
}

impl RemoteError {
    /// Create an error of the given kind.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            backtrace: Vec::new(),
            unknown: None,
        }
    }

    /// The `ArgumentError` raised for a wrong argument count.
    pub fn arity(given: usize, expected: impl fmt::Display) -> Self {
        Self::new(
            "ArgumentError",
            format!("wrong number of arguments (given {given}, expected {expected})"),
        )
    }

    /// The error raised when a method name is not registered on the target.
    pub fn no_method(method: &str, type_name: &str) -> Self {
        Self::new(
            "NoMethodError",
            format!("undefined method `{method}' for {type_name}"),
        )
    }

    /// Wrap an undecodable reply value so it can be re-raised untouched.
    pub fn from_unknown(value: UnknownValue) -> Self {
        Self {
            kind: UNKNOWN_VALUE_KIND.to_string(),
            message: format!("undecodable value: {}", value.cause),
            backtrace: Vec::new(),
            unknown: Some(value),
        }
    }

    /// Whether this error is a placeholder for an undecodable value.
    pub fn is_unknown(&self) -> bool {
        self.unknown.is_some()
    }

    /// Same error under another kind.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    /// Prepend a call-site entry to the backtrace.
    pub fn with_call_site(mut self, site: impl Into<String>) -> Self {
        self.backtrace.insert(0, site.into());
        self
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl From<ObjwireError> for RemoteError {
    fn from(err: ObjwireError) -> Self {
        let kind = match &err {
            ObjwireError::Remote(remote) => return remote.clone(),
            ObjwireError::Io(_) | ObjwireError::ConnectionClosed => "ConnectionError",
            ObjwireError::MsgPackEncode(_) => "SerializationFailed",
            ObjwireError::MsgPackDecode(_) => "DecodeError",
            ObjwireError::FrameTooLarge { .. } => "FrameTooLarge",
            ObjwireError::UnknownReference(_) => "UnknownReference",
            ObjwireError::TooManyArguments { .. } => "TooManyArguments",
            ObjwireError::SchemeMismatch(_) => "SchemeMismatch",
            ObjwireError::UnknownScheme(_) => "UnknownScheme",
            ObjwireError::BadUri(_) => "BadURI",
            ObjwireError::AccessDenied(_) => "AccessDenied",
            ObjwireError::Protocol(_) => "ProtocolError",
            ObjwireError::NoServer => "ServerNotFound",
            ObjwireError::ReactorBlocked => "ReactorBlocked",
            ObjwireError::ReactorStopped => "ReactorStopped",
            ObjwireError::BackpressureTimeout => "BackpressureTimeout",
        };
        Self::new(kind, err.to_string())
    }
}

impl From<RemoteError> for ObjwireError {
    fn from(err: RemoteError) -> Self {
        ObjwireError::Remote(err)
    }
}
