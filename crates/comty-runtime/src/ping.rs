//! Round-trip latency to the platform.

use serde::{Serialize, Serializer};
use std::fmt;
use std::time::{Duration, Instant};

/// How long each side of a ping may take.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of one round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Latency {
    Millis(u64),
    /// No answer within the limit.
    Timeout,
    Failed,
}

impl Latency {
    pub(crate) fn since(start: Instant) -> Self {
        Self::Millis(u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    pub fn millis(&self) -> Option<u64> {
        match self {
            Self::Millis(ms) => Some(*ms),
            _ => None,
        }
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Millis(ms) => write!(f, "{ms}ms"),
            Self::Timeout => f.write_str("timeout"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Numbers for answered pings, `"timeout"` or `"failed"` otherwise.
impl Serialize for Latency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Millis(ms) => serializer.serialize_u64(*ms),
            Self::Timeout => serializer.serialize_str("timeout"),
            Self::Failed => serializer.serialize_str("failed"),
        }
    }
}

/// Latency of the HTTP gateway and of the first live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PingReport {
    pub http: Latency,
    pub channel: Latency,
}
