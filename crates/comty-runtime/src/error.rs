//! Runtime error types.

use serde_json::Value;
use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the client runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Network failure, abort or transport timeout. Never retried automatically.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// The server refused the call (403).
    #[error("Authorization denied: {message}")]
    AuthorizationDenied { message: String, data: Value },

    /// The session expired and could not be transparently renewed for this call.
    #[error("Session expired")]
    SessionExpired,

    /// Session renewal failed; the user must log in again.
    #[error("Invalid or expired session: {0}")]
    SessionInvalid(String),

    /// Any other non-success HTTP status, surfaced as-is.
    #[error("HTTP error {status}")]
    Http { status: u16, data: Value },

    /// An addon failed while contributing to an operation.
    #[error("Addon [{addon}] failed on [{operation}]: {message}")]
    AddonInvocation {
        addon: String,
        operation: &'static str,
        message: String,
    },

    /// A channel could not be established.
    #[error("Channel [{namespace}] connect error: {message}")]
    ChannelConnect { namespace: String, message: String },

    /// Sending on a channel that is not open.
    #[error("Channel [{0}] is closed")]
    ChannelClosed(String),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::TransportFailure(msg.into())
    }

    pub fn session_invalid(msg: impl Into<String>) -> Self {
        Self::SessionInvalid(msg.into())
    }

    pub fn channel_connect(namespace: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::ChannelConnect {
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this error means the user has to authenticate again.
    pub fn requires_relogin(&self) -> bool {
        matches!(self, Self::SessionInvalid(_) | Self::SessionExpired)
    }

    /// Check if this error is transient and the caller may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportFailure(_) | Self::ChannelConnect { .. })
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthorizationDenied { .. } => Some(403),
            Self::SessionExpired => Some(401),
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
