//! Channel manager.
//!
//! Owns one entry per configured namespace and republishes every channel's
//! lifecycle on the shared [`EventBus`]:
//!
//! ```text
//! Disconnected --connect--> Connecting --ack--> Connected --close/error--> Disconnected
//!                                      --failure--> Erroring --connect--> Connecting
//!                                                            --close----> Disconnected
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::{
    ChannelConnector, ChannelFrame, ChannelLink, ChannelSession, ChannelSignal, ChannelTarget,
    ConnectionState,
};
use crate::config::{ChannelConfig, ChannelsConfig, TransportVariant};
use crate::credentials::{ACCESS_TOKEN_KEY, CredentialStore};
use crate::error::{Error, Result};
use crate::events::{EventBus, RuntimeEvent};
use crate::session::SessionListener;

/// Mutable part of a channel shared with its event pump.
#[derive(Debug, Default)]
struct ChannelRuntime {
    state: ConnectionState,
    last_error: Option<String>,
}

impl ChannelRuntime {
    fn move_to(&mut self, namespace: &str, target: ConnectionState) {
        if let Err(e) = self.state.transition(target) {
            warn!(namespace, error = %e, "Ignoring channel state change");
        }
    }
}

struct ChannelEntry {
    id: String,
    config: ChannelConfig,
    runtime: Arc<Mutex<ChannelRuntime>>,
    link: Option<Arc<dyn ChannelLink>>,
    pump: Option<JoinHandle<()>>,
    connected_at: Option<DateTime<Utc>>,
    reconnect_count: u32,
}

impl ChannelEntry {
    fn new(config: &ChannelConfig, reconnect_count: u32) -> Self {
        Self {
            id: format!("{}-{}", config.namespace, uuid::Uuid::new_v4()),
            config: config.clone(),
            runtime: Arc::new(Mutex::new(ChannelRuntime::default())),
            link: None,
            pump: None,
            connected_at: None,
            reconnect_count,
        }
    }

    fn state(&self) -> ConnectionState {
        self.runtime.lock().state
    }
}

impl Drop for ChannelEntry {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Point-in-time view of one channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub namespace: String,
    pub connection_id: String,
    pub variant: TransportVariant,
    pub state: ConnectionState,
    pub connected_at: Option<DateTime<Utc>>,
    pub reconnect_count: u32,
    pub last_error: Option<String>,
}

pub struct ChannelManager {
    origin: String,
    configs: Vec<ChannelConfig>,
    connect_timeout: Duration,
    connector: Arc<dyn ChannelConnector>,
    store: Arc<dyn CredentialStore>,
    bus: EventBus,
    channels: Mutex<HashMap<String, ChannelEntry>>,
}

impl ChannelManager {
    pub fn new(
        origin: impl Into<String>,
        config: &ChannelsConfig,
        connector: Arc<dyn ChannelConnector>,
        store: Arc<dyn CredentialStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            origin: origin.into(),
            configs: config.list.clone(),
            connect_timeout: config.connect_timeout(),
            connector,
            store,
            bus,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Configured channels, in declaration order.
    pub fn configs(&self) -> &[ChannelConfig] {
        &self.configs
    }

    pub fn config(&self, namespace: &str) -> Option<&ChannelConfig> {
        self.configs.iter().find(|c| c.namespace == namespace)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Current state of a channel, `None` if it is not registered.
    pub fn state(&self, namespace: &str) -> Option<ConnectionState> {
        self.channels.lock().get(namespace).map(ChannelEntry::state)
    }

    /// Status of every registered channel, in configuration order.
    pub fn snapshot(&self) -> Vec<ChannelStatus> {
        let channels = self.channels.lock();
        let mut statuses: Vec<_> = channels
            .values()
            .map(|entry| {
                let runtime = entry.runtime.lock();
                ChannelStatus {
                    namespace: entry.config.namespace.clone(),
                    connection_id: entry.id.clone(),
                    variant: entry.config.variant,
                    state: runtime.state,
                    connected_at: entry.connected_at,
                    reconnect_count: entry.reconnect_count,
                    last_error: runtime.last_error.clone(),
                }
            })
            .collect();

        let position = |ns: &str| {
            self.configs
                .iter()
                .position(|c| c.namespace == ns)
                .unwrap_or(usize::MAX)
        };
        statuses.sort_by(|a, b| {
            position(&a.namespace)
                .cmp(&position(&b.namespace))
                .then_with(|| a.namespace.cmp(&b.namespace))
        });
        statuses
    }

    /// Tear everything down and connect every auto-connect channel.
    ///
    /// Individual failures are contained; returns how many channels ended up
    /// connected. `wsmanager:all:connected` is published once per pass.
    #[instrument(skip(self))]
    pub async fn connect_all(&self) -> usize {
        if !self.is_empty() {
            info!("Disconnecting all channels before connecting them again");
            self.disconnect_all().await;
        }

        let mut connected = 0;
        for config in &self.configs {
            if !config.auto_connect {
                debug!(namespace = %config.namespace, "Registering manual channel");
                self.channels
                    .lock()
                    .insert(config.namespace.clone(), ChannelEntry::new(config, 0));
                continue;
            }

            match self.connect(config).await {
                Ok(()) => connected += 1,
                Err(e) => {
                    error!(namespace = %config.namespace, error = %e, "Failed to connect channel");
                }
            }
        }

        info!(connected, total = self.configs.len(), "All channels processed");
        self.bus.publish(RuntimeEvent::ChannelsReady);
        connected
    }

    /// Disconnect and remove every channel.
    pub async fn disconnect_all(&self) {
        let namespaces: Vec<String> = self.channels.lock().keys().cloned().collect();
        for namespace in namespaces {
            self.disconnect(&namespace).await;
        }
    }

    /// Connect `config` with the transport its variant declares.
    pub async fn connect(&self, config: &ChannelConfig) -> Result<()> {
        match config.variant {
            TransportVariant::Standard => self.connect_standard(config).await,
            TransportVariant::Experimental => self.connect_experimental(config).await,
        }
    }

    pub async fn connect_standard(&self, config: &ChannelConfig) -> Result<()> {
        self.open(config, TransportVariant::Standard).await
    }

    pub async fn connect_experimental(&self, config: &ChannelConfig) -> Result<()> {
        self.open(config, TransportVariant::Experimental).await
    }

    /// Connect a configured channel by namespace.
    pub async fn connect_namespace(&self, namespace: &str) -> Result<()> {
        let config = self
            .config(namespace)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown channel namespace: {namespace}")))?;
        self.connect(&config).await
    }

    /// Close a channel gracefully and forget it. No-op if it is not registered.
    pub async fn disconnect(&self, namespace: &str) {
        let Some(mut entry) = self.channels.lock().remove(namespace) else {
            debug!(namespace, "Channel not registered, nothing to disconnect");
            return;
        };

        if let Some(pump) = entry.pump.take() {
            pump.abort();
        }

        let was_connected = entry.state().is_connected();
        if let Some(link) = entry.link.take() {
            if link.is_connected() {
                link.close().await;
            }
        }
        {
            let mut runtime = entry.runtime.lock();
            if runtime.state != ConnectionState::Disconnected {
                runtime.move_to(namespace, ConnectionState::Disconnected);
            }
        }

        if was_connected {
            info!(namespace, "Channel disconnected");
            self.bus.publish(RuntimeEvent::ChannelDisconnected {
                namespace: namespace.to_string(),
                reason: Some("client disconnect".to_string()),
            });
        }
    }

    /// Hand a renewed credential to every channel.
    ///
    /// Live channels get an `auth:reauth` frame; channels that are not
    /// connected are reconnected. Manual channels that were never opened
    /// are left alone.
    #[instrument(skip(self, token))]
    pub async fn reauthenticate_all(&self, token: &str) {
        let entries: Vec<(ChannelConfig, ConnectionState, Option<Arc<dyn ChannelLink>>)> = self
            .channels
            .lock()
            .values()
            .map(|e| (e.config.clone(), e.state(), e.link.clone()))
            .collect();

        for (config, state, link) in entries {
            let namespace = config.namespace.as_str();

            if let Some(link) = link.filter(|l| state.is_connected() && l.is_connected()) {
                match link.emit(ChannelFrame::reauth(token)).await {
                    Ok(()) => {
                        debug!(namespace, "Channel re-authenticated");
                        continue;
                    }
                    Err(e) => {
                        warn!(namespace, error = %e, "Re-authentication failed, reconnecting");
                    }
                }
            } else if !config.auto_connect && state == ConnectionState::Disconnected {
                continue;
            }

            if let Err(e) = self.connect(&config).await {
                error!(namespace, error = %e, "Failed to reconnect channel after renewal");
            }
        }
    }

    /// Send one event on a connected channel.
    pub async fn emit(&self, namespace: &str, event: &str, payload: Value) -> Result<()> {
        let link = self
            .channels
            .lock()
            .get(namespace)
            .and_then(|e| e.link.clone())
            .ok_or_else(|| Error::ChannelClosed(namespace.to_string()))?;

        if !link.is_connected() {
            return Err(Error::ChannelClosed(namespace.to_string()));
        }
        link.emit(ChannelFrame::new(event, payload)).await
    }

    async fn open(&self, config: &ChannelConfig, variant: TransportVariant) -> Result<()> {
        let namespace = config.namespace.clone();

        // Replace any previous entry.
        let previous = self.channels.lock().remove(&namespace);
        let reconnect_count = match previous {
            Some(mut old) => {
                if let Some(pump) = old.pump.take() {
                    pump.abort();
                }
                if let Some(link) = old.link.take() {
                    link.close().await;
                }
                old.reconnect_count + 1
            }
            None => 0,
        };

        let entry = ChannelEntry::new(config, reconnect_count);
        let entry_id = entry.id.clone();
        let runtime = entry.runtime.clone();
        runtime.lock().move_to(&namespace, ConnectionState::Connecting);
        self.channels.lock().insert(namespace.clone(), entry);

        let opened = self.establish(config, variant).await;

        let session = match opened {
            Ok(session) => session,
            Err(e) => {
                {
                    let mut runtime = runtime.lock();
                    runtime.move_to(&namespace, ConnectionState::Erroring);
                    runtime.last_error = Some(e.to_string());
                }
                self.bus.publish(RuntimeEvent::ChannelError {
                    namespace: namespace.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let orphaned = {
            let mut channels = self.channels.lock();
            match channels.get_mut(&namespace).filter(|e| e.id == entry_id) {
                Some(entry) => {
                    runtime.lock().move_to(&namespace, ConnectionState::Connected);
                    entry.connected_at = Some(Utc::now());
                    entry.link = Some(session.link.clone());
                    entry.pump = Some(tokio::spawn(pump_signals(
                        namespace.clone(),
                        variant,
                        session.signals,
                        session.link,
                        runtime,
                        self.bus.clone(),
                    )));
                    None
                }
                // Disconnected or replaced while the handshake was running.
                None => Some(session.link),
            }
        };

        if let Some(link) = orphaned {
            link.close().await;
            return Err(Error::ChannelClosed(namespace));
        }

        info!(namespace = %namespace, %variant, reconnect_count, "Channel connected");
        self.bus.publish(RuntimeEvent::ChannelConnected { namespace });
        Ok(())
    }

    /// Open the transport for `config`, bounded by the connect timeout.
    async fn establish(
        &self,
        config: &ChannelConfig,
        variant: TransportVariant,
    ) -> Result<ChannelSession> {
        let token = self.store.get(ACCESS_TOKEN_KEY);
        if config.requires_auth && token.is_none() {
            return Err(Error::channel_connect(
                &config.namespace,
                "no session token available",
            ));
        }

        let mut target = ChannelTarget::resolve(&self.origin, config, token.as_deref())?;
        target.variant = variant;

        tokio::time::timeout(self.connect_timeout, self.connector.open(&target))
            .await
            .unwrap_or_else(|_| {
                Err(Error::channel_connect(
                    &config.namespace,
                    format!("timed out after {:?}", self.connect_timeout),
                ))
            })
    }
}

/// Republish one channel's inbound signals until it goes away.
///
/// An error signal ends the session: the link is closed and the channel is
/// reported disconnected.
async fn pump_signals(
    namespace: String,
    variant: TransportVariant,
    mut signals: mpsc::Receiver<ChannelSignal>,
    link: Arc<dyn ChannelLink>,
    runtime: Arc<Mutex<ChannelRuntime>>,
    bus: EventBus,
) {
    let reason = loop {
        match signals.recv().await {
            Some(ChannelSignal::Event { name, payload }) => {
                if variant == TransportVariant::Standard {
                    bus.publish(RuntimeEvent::ChannelMessage {
                        namespace: namespace.clone(),
                        event: name,
                        payload,
                    });
                }
            }
            Some(ChannelSignal::Error(message)) => {
                warn!(namespace = %namespace, error = %message, "Channel error");
                runtime.lock().last_error = Some(message.clone());
                bus.publish(RuntimeEvent::ChannelError {
                    namespace: namespace.clone(),
                    message: message.clone(),
                });
                link.close().await;
                break Some(message);
            }
            Some(ChannelSignal::Disconnected { reason }) => break reason,
            None => break None,
        }
    };

    runtime.lock().move_to(&namespace, ConnectionState::Disconnected);
    info!(namespace = %namespace, reason = ?reason, "Channel dropped");
    bus.publish(RuntimeEvent::ChannelDisconnected { namespace, reason });
}

#[async_trait]
impl SessionListener for ChannelManager {
    async fn session_renewed(&self, access_token: &str) {
        self.reauthenticate_all(access_token).await;
    }
}
