//! Comty client runtime.
//!
//! Keeps one authenticated identity valid across concurrent requests,
//! maintains the platform's realtime channels and lets addons contribute to
//! platform results.
//!
//! ## Core Types
//!
//! - [`Runtime`] - The shared context, built with [`Runtime::builder`]
//! - [`RequestGateway`] - Authorized calls with transparent session renewal
//! - [`RenewalCoordinator`] - Single-flight token exchange
//! - [`ChannelManager`] - Named set of persistent channels
//! - [`AddonRegistry`] - Installed addons indexed by operation
//! - [`EventBus`] - Session and channel lifecycle events
//!
//! ## Collaborators
//!
//! - [`HttpTransport`] / [`ReqwestTransport`] - Outbound HTTP
//! - [`ChannelConnector`] / [`WebSocketConnector`] - Outbound channels
//! - [`CredentialStore`] / [`MemoryCredentialStore`] - Token persistence
//!
//! ## Getters
//!
//! - [`library::my_library`], [`library::search`], [`library::release_data`]
//! - [`Runtime::measure_ping`]

pub mod addons;
pub mod channel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod events;
pub mod gateway;
pub mod library;
pub mod ping;
pub mod runtime;
pub mod session;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use addons::{Addon, AddonRegistry, Capabilities, Operation, Provides};
pub use channel::{
    ChannelConnector, ChannelFrame, ChannelLink, ChannelManager, ChannelSession, ChannelSignal,
    ChannelStatus, ChannelTarget, ConnectionState, WebSocketConnector,
};
pub use config::{ChannelConfig, ChannelsConfig, ClientConfig, TransportVariant};
pub use credentials::{CredentialStore, Credentials, MemoryCredentialStore};
pub use error::{Error, Result};
pub use events::{EventBus, RuntimeEvent};
pub use gateway::{AuthScheme, RequestGateway, RequestSpec, Response};
pub use ping::{Latency, PingReport};
pub use reqwest::Method;
pub use runtime::{Runtime, RuntimeBuilder, VERSION};
pub use session::{RenewalCoordinator, SessionListener};
pub use transport::{
    HttpTransport, ReqwestTransport, TransportError, TransportRequest, TransportResponse,
};
