//! Channel connection states.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The last connect attempt failed.
    Erroring,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Erroring => "erroring",
        }
    }

    /// Check if this state allows transitioning to `target`.
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Connecting, Connected | Erroring | Disconnected)
                // Re-authentication keeps the connection up.
                | (Connected, Connected | Disconnected)
                | (Erroring, Connecting | Disconnected)
        )
    }

    /// Move to `target`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, target: ConnectionState) -> Result<()> {
        if !self.can_transition_to(target) {
            return Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            });
        }
        *self = target;
        Ok(())
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
