//! Runtime event bus.
//!
//! Every component publishes onto one [`EventBus`] so consumers can react to
//! session renewal and channel lifecycle without holding references to the
//! producers. Events carry a stable string name (see [`RuntimeEvent::name`])
//! matching the names applications already listen for.

use std::future::Future;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Name published once a `connect_all` pass finishes.
pub const ALL_CONNECTED: &str = "wsmanager:all:connected";

/// Events published on the runtime bus.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A session renewal started (`session:refreshing`).
    SessionRefreshing,
    /// A session renewal stored new tokens (`session:refreshed`).
    SessionRefreshed,
    /// Renewal failed; the user must log in again (`session.invalid`).
    SessionInvalid { message: String },
    /// Credentials were cleared by logout (`session.destroyed`).
    SessionDestroyed,
    /// `<namespace>:connected`
    ChannelConnected { namespace: String },
    /// `<namespace>:disconnected`
    ChannelDisconnected {
        namespace: String,
        reason: Option<String>,
    },
    /// `<namespace>:error`
    ChannelError { namespace: String, message: String },
    /// Any other inbound channel event, `<namespace>:<event>`.
    ChannelMessage {
        namespace: String,
        event: String,
        payload: Value,
    },
    /// A `connect_all` pass completed (`wsmanager:all:connected`).
    ChannelsReady,
}

impl RuntimeEvent {
    /// The event name subscribers match on.
    pub fn name(&self) -> String {
        match self {
            Self::SessionRefreshing => "session:refreshing".to_string(),
            Self::SessionRefreshed => "session:refreshed".to_string(),
            Self::SessionInvalid { .. } => "session.invalid".to_string(),
            Self::SessionDestroyed => "session.destroyed".to_string(),
            Self::ChannelConnected { namespace } => format!("{namespace}:connected"),
            Self::ChannelDisconnected { namespace, .. } => format!("{namespace}:disconnected"),
            Self::ChannelError { namespace, .. } => format!("{namespace}:error"),
            Self::ChannelMessage {
                namespace, event, ..
            } => format!("{namespace}:{event}"),
            Self::ChannelsReady => ALL_CONNECTED.to_string(),
        }
    }

    /// Namespace of a channel event, `None` for session and bus-wide events.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Self::ChannelConnected { namespace }
            | Self::ChannelDisconnected { namespace, .. }
            | Self::ChannelError { namespace, .. }
            | Self::ChannelMessage { namespace, .. } => Some(namespace),
            _ => None,
        }
    }
}

/// Default channel capacity for runtime events.
const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcaster for runtime events.
///
/// Uses tokio's broadcast channel so any number of subscribers see every
/// event published after they subscribed.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    /// Create a new bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new bus with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to every runtime event.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    /// Publish an event.
    ///
    /// Returns the number of receivers that got the event, 0 when nobody listens.
    pub fn publish(&self, event: RuntimeEvent) -> usize {
        trace!(event = %event.name(), "Publishing runtime event");
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Resolve with the next event named `name`.
    ///
    /// The subscription is taken when this is called, not when the future is
    /// first polled, so an event published in between is not missed.
    /// Resolves to `None` if the bus is dropped first.
    pub fn once(&self, name: impl Into<String>) -> impl Future<Output = Option<RuntimeEvent>> {
        let name = name.into();
        let mut rx = self.subscribe();
        async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.name() == name => return Some(event),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
