//! Runtime configuration.
//!
//! Everything deserializes with defaults, so an empty document yields a
//! client pointed at the production origin with channels disabled.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Production API origin.
pub const DEFAULT_ORIGIN: &str = "https://api.comty.app";

/// Path of the token exchange endpoint.
pub const DEFAULT_RENEWAL_PATH: &str = "/auth";

/// Top-level client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base origin every request and channel is resolved against.
    pub origin: String,
    /// Service access key (headless mode only).
    pub access_key: Option<String>,
    /// Service private key (headless mode only).
    pub private_key: Option<String>,
    /// Non-interactive mode: requests authorize with the `Server` scheme.
    pub headless: bool,
    pub channels: ChannelsConfig,
    pub http: HttpConfig,
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN.to_string(),
            access_key: None,
            private_key: None,
            headless: false,
            channels: ChannelsConfig::default(),
            http: HttpConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create a config for the given origin with everything else defaulted.
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Service token derived from the key pair, when both halves are set.
    pub fn service_token(&self) -> Option<String> {
        match (self.access_key.as_deref(), self.private_key.as_deref()) {
            (Some(access), Some(private)) if !access.is_empty() && !private.is_empty() => {
                Some(format!("{access}:{private}"))
            }
            _ => None,
        }
    }

    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> Result<()> {
        let origin = url::Url::parse(&self.origin)
            .map_err(|e| Error::config(format!("invalid origin {}: {}", self.origin, e)))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "origin must be http(s), got {}",
                origin.scheme()
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for channel in &self.channels.list {
            if channel.namespace.is_empty() {
                return Err(Error::config("channel namespace must not be empty"));
            }
            if !seen.insert(channel.namespace.as_str()) {
                return Err(Error::config(format!(
                    "duplicate channel namespace: {}",
                    channel.namespace
                )));
            }
        }
        Ok(())
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout enforced by the transport, 0 disables it.
    pub request_timeout_ms: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            user_agent: concat!("comty-runtime/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

/// Session renewal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Token exchange endpoint.
    pub renewal_path: String,
    /// How long a request waits on somebody else's renewal before giving up.
    pub renewal_wait_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            renewal_path: DEFAULT_RENEWAL_PATH.to_string(),
            renewal_wait_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    pub fn renewal_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.renewal_wait_timeout_ms)
    }
}

/// Realtime channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    /// Create the channel manager at startup.
    pub enable: bool,
    /// Run `connect_all` as soon as the runtime is built.
    pub auto_connect: bool,
    /// Upper bound for one channel's connect handshake.
    pub connect_timeout_ms: u64,
    /// Keep-alive ping interval, 0 disables pings.
    pub heartbeat_interval_ms: u64,
    pub list: Vec<ChannelConfig>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            enable: false,
            auto_connect: true,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 25_000,
            list: default_channels(),
        }
    }
}

impl ChannelsConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

/// Transport flavour of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportVariant {
    #[default]
    Standard,
    Experimental,
}

impl std::fmt::Display for TransportVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => f.write_str("standard"),
            Self::Experimental => f.write_str("experimental"),
        }
    }
}

/// One remote topic the channel manager keeps a connection to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub namespace: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_true")]
    pub requires_auth: bool,
    #[serde(default)]
    pub variant: TransportVariant,
}

fn default_true() -> bool {
    true
}

impl ChannelConfig {
    /// A standard, authenticated, auto-connecting channel.
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
            auto_connect: true,
            requires_auth: true,
            variant: TransportVariant::Standard,
        }
    }

    pub fn experimental(mut self) -> Self {
        self.variant = TransportVariant::Experimental;
        self
    }

    pub fn without_auth(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    pub fn manual(mut self) -> Self {
        self.auto_connect = false;
        self
    }
}

/// Topics the platform serves.
pub fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new("posts", "/posts").experimental(),
        ChannelConfig::new("main", "/main"),
        ChannelConfig::new("notifications", "/notifications"),
        ChannelConfig::new("chats", "/chats"),
        ChannelConfig::new("music", "/music"),
    ]
}
