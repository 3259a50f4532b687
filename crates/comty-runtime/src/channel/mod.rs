//! Realtime channels.
//!
//! A channel is one persistent bidirectional connection to a platform topic.
//! [`ChannelManager`] owns the set of channels; how a connection is actually
//! opened is behind [`ChannelConnector`], with [`WebSocketConnector`] as the
//! production implementation.

mod frame;
mod manager;
mod state;
mod websocket;

pub use frame::{AUTH_EVENT, ChannelFrame, ERROR_EVENT, REAUTH_EVENT};
pub use manager::{ChannelManager, ChannelStatus};
pub use state::ConnectionState;
pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{ChannelConfig, TransportVariant};
use crate::error::{Error, Result};

/// Everything a connector needs to open one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub namespace: String,
    pub url: String,
    pub variant: TransportVariant,
    /// Credential presented during the handshake, if any.
    pub token: Option<String>,
}

impl ChannelTarget {
    /// Resolve the socket URL of `channel` against the HTTP `origin`.
    ///
    /// Standard channels connect to `<origin><path>` and authenticate with a
    /// frame after the upgrade. Experimental channels connect to
    /// `<origin>/<namespace>` and carry the token in the query string.
    pub fn resolve(origin: &str, channel: &ChannelConfig, token: Option<&str>) -> Result<Self> {
        let mut url = Url::parse(origin)
            .map_err(|e| Error::config(format!("invalid origin {origin}: {e}")))?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => return Err(Error::config(format!("unsupported origin scheme: {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::config(format!("cannot derive socket URL from {origin}")))?;

        let base = url.path().trim_end_matches('/').to_string();
        let suffix = match channel.variant {
            TransportVariant::Standard => channel.path.clone(),
            TransportVariant::Experimental => channel.namespace.clone(),
        };
        let suffix = suffix.trim_start_matches('/');
        url.set_path(&format!("{base}/{suffix}"));
        url.set_query(None);

        if channel.variant == TransportVariant::Experimental {
            if let Some(token) = token {
                url.query_pairs_mut().append_pair("token", token);
            }
        }

        Ok(Self {
            namespace: channel.namespace.clone(),
            url: url.to_string(),
            variant: channel.variant,
            token: token.map(str::to_string),
        })
    }
}

/// Inbound notification from an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// The connection went away.
    Disconnected { reason: Option<String> },
    /// The remote reported an error or the transport failed.
    Error(String),
    /// Any other inbound event.
    Event { name: String, payload: Value },
}

/// Outbound half of an open channel.
#[async_trait]
pub trait ChannelLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Send one frame.
    async fn emit(&self, frame: ChannelFrame) -> Result<()>;

    /// Close gracefully. Closing twice is a no-op.
    async fn close(&self);
}

/// An established channel.
pub struct ChannelSession {
    pub link: Arc<dyn ChannelLink>,
    pub signals: mpsc::Receiver<ChannelSignal>,
}

/// Opens channels.
///
/// `open` resolves once the connection is established and authenticated, or
/// fails with [`Error::ChannelConnect`].
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(&self, target: &ChannelTarget) -> Result<ChannelSession>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("https://api.comty.app", "wss://api.comty.app/chats")]
    #[case("http://localhost:9000/", "ws://localhost:9000/chats")]
    #[case("https://indev.comty.app/api", "wss://indev.comty.app/api/chats")]
    fn test_resolve_standard(#[case] origin: &str, #[case] expected: &str) {
        let target =
            ChannelTarget::resolve(origin, &ChannelConfig::new("chats", "/chats"), Some("t"))
                .unwrap();
        assert_eq!(target.url, expected);
        assert_eq!(target.token.as_deref(), Some("t"));
    }

    #[test]
    fn test_resolve_experimental_carries_token() {
        let channel = ChannelConfig::new("posts", "/ignored").experimental();

        let target =
            ChannelTarget::resolve("https://api.comty.app", &channel, Some("a b")).unwrap();
        assert_eq!(target.url, "wss://api.comty.app/posts?token=a+b");

        let anonymous = ChannelTarget::resolve("https://api.comty.app", &channel, None).unwrap();
        assert_eq!(anonymous.url, "wss://api.comty.app/posts");
    }

    #[test]
    fn test_resolve_rejects_bad_origin() {
        let channel = ChannelConfig::new("main", "/main");
        assert!(ChannelTarget::resolve("nope", &channel, None).is_err());
        assert!(ChannelTarget::resolve("ftp://x.y", &channel, None).is_err());
    }
}
