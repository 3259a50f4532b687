//! The shared runtime context.
//!
//! [`Runtime`] ties the pieces together: one event bus, one credential
//! store, the request gateway with its renewal coordinator, the optional
//! channel manager and the addon registry. Build it once and share the
//! `Arc`.

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::addons::{Addon, AddonRegistry};
use crate::channel::{ChannelConnector, ChannelManager, WebSocketConnector};
use crate::config::{ClientConfig, TransportVariant};
use crate::credentials::{
    ACCESS_TOKEN_KEY, CredentialStore, Credentials, MemoryCredentialStore,
};
use crate::error::{Error, Result};
use crate::events::{EventBus, RuntimeEvent};
use crate::gateway::{AuthScheme, RequestGateway, RequestSpec, Response};
use crate::ping::{Latency, PING_TIMEOUT, PingReport};
use crate::session::RenewalCoordinator;
use crate::transport::{HttpTransport, ReqwestTransport};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for [`Runtime`]. Every collaborator has a production default.
pub struct RuntimeBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    connector: Option<Arc<dyn ChannelConnector>>,
    store: Option<Arc<dyn CredentialStore>>,
    bus: Option<EventBus>,
}

impl RuntimeBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            connector: None,
            store: None,
            bus: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn ChannelConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the runtime.
    ///
    /// When channels are enabled with `auto_connect`, every channel is
    /// connected before this returns.
    pub async fn build(self) -> Result<Arc<Runtime>> {
        let config = self.config;
        config.validate()?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config.http)?),
        };
        let connector: Arc<dyn ChannelConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(WebSocketConnector::new(
                config.channels.heartbeat_interval(),
            )),
        };
        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryCredentialStore::new()),
        };
        let bus = self.bus.unwrap_or_default();

        if config.headless {
            match config.service_token() {
                Some(token) => {
                    debug!("Using service credentials");
                    store.set(ACCESS_TOKEN_KEY, &token);
                }
                None => debug!("Headless mode without service keys"),
            }
        }

        let renewal = Arc::new(RenewalCoordinator::new(
            config.origin.clone(),
            config.session.renewal_path.clone(),
            config.session.renewal_wait_timeout(),
            transport.clone(),
            store.clone(),
            bus.clone(),
        ));
        let gateway = RequestGateway::new(
            config.origin.clone(),
            AuthScheme::for_headless(config.headless),
            transport,
            store.clone(),
            renewal,
        );

        let runtime = Arc::new(Runtime {
            config,
            bus,
            store,
            gateway,
            connector,
            channels: RwLock::new(None),
            addons: AddonRegistry::new(),
        });

        if runtime.config.channels.enable {
            let manager = runtime.enable_channels();
            if runtime.config.channels.auto_connect {
                manager.connect_all().await;
            }
        }

        info!(version = VERSION, origin = %runtime.config.origin, "Runtime ready");
        Ok(runtime)
    }
}

pub struct Runtime {
    config: ClientConfig,
    bus: EventBus,
    store: Arc<dyn CredentialStore>,
    gateway: RequestGateway,
    connector: Arc<dyn ChannelConnector>,
    channels: RwLock<Option<Arc<ChannelManager>>>,
    addons: AddonRegistry,
}

impl Runtime {
    pub fn builder(config: ClientConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn version(&self) -> &'static str {
        VERSION
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn origin(&self) -> &str {
        &self.config.origin
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.bus.subscribe()
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    pub fn renewal(&self) -> &Arc<RenewalCoordinator> {
        self.gateway.renewal()
    }

    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }

    /// Current token pair.
    pub fn credentials(&self) -> Credentials {
        Credentials::load(self.store.as_ref())
    }

    /// The channel manager, if channels are enabled.
    pub fn channels(&self) -> Option<Arc<ChannelManager>> {
        self.channels.read().clone()
    }

    /// Send a call through the gateway.
    pub async fn request(&self, spec: RequestSpec) -> Result<Response> {
        self.gateway.send(spec).await
    }

    pub async fn request_json<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T> {
        self.gateway.send_json(spec).await
    }

    /// Register an addon under `name`.
    pub fn register_addon(&self, name: impl Into<String>, addon: Arc<dyn Addon>) {
        self.addons.register(name, addon);
    }

    /// Create the channel manager if it does not exist yet.
    ///
    /// The manager follows session renewals from then on. Channels are not
    /// connected by this call.
    pub fn enable_channels(&self) -> Arc<ChannelManager> {
        let mut slot = self.channels.write();
        if let Some(manager) = slot.as_ref() {
            return manager.clone();
        }

        let manager = Arc::new(ChannelManager::new(
            self.config.origin.clone(),
            &self.config.channels,
            self.connector.clone(),
            self.store.clone(),
            self.bus.clone(),
        ));
        self.gateway.renewal().add_listener(manager.clone());
        *slot = Some(manager.clone());
        info!(channels = self.config.channels.list.len(), "Channels enabled");
        manager
    }

    /// Store a fresh token pair and reconnect channels with it.
    #[instrument(skip(self, credentials))]
    pub async fn login(&self, credentials: Credentials) -> Result<()> {
        if !credentials.has_access_token() {
            return Err(Error::session_invalid("login requires an access token"));
        }
        credentials.persist(self.store.as_ref());
        info!("Session stored");

        if let Some(manager) = self.channels() {
            manager.connect_all().await;
        }
        Ok(())
    }

    /// Clear the session and close every channel.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        Credentials::clear(self.store.as_ref());
        if let Some(manager) = self.channels() {
            manager.disconnect_all().await;
        }
        info!("Session destroyed");
        self.bus.publish(RuntimeEvent::SessionDestroyed);
    }

    /// Round-trip latency of the gateway (`GET /ping`) and of the first
    /// connected standard channel (`ping` answered by `pong`).
    pub async fn measure_ping(&self) -> PingReport {
        self.measure_ping_within(PING_TIMEOUT).await
    }

    /// [`Runtime::measure_ping`] with a custom limit per side.
    #[instrument(skip(self))]
    pub async fn measure_ping_within(&self, limit: Duration) -> PingReport {
        let (http, channel) = tokio::join!(self.ping_http(limit), self.ping_channel(limit));
        debug!(%http, %channel, "Ping measured");
        PingReport { http, channel }
    }

    async fn ping_http(&self, limit: Duration) -> Latency {
        let start = Instant::now();
        match timeout(limit, self.request(RequestSpec::get("/ping"))).await {
            Ok(Ok(_)) => Latency::since(start),
            Ok(Err(e)) => {
                warn!(error = %e, "HTTP ping failed");
                Latency::Failed
            }
            Err(_) => Latency::Timeout,
        }
    }

    async fn ping_channel(&self, limit: Duration) -> Latency {
        let Some(manager) = self.channels() else {
            debug!("Channels disabled, nothing to ping");
            return Latency::Failed;
        };
        let Some(namespace) = manager
            .snapshot()
            .into_iter()
            .find(|s| s.state.is_connected() && s.variant == TransportVariant::Standard)
            .map(|s| s.namespace)
        else {
            debug!("No connected channel to ping");
            return Latency::Failed;
        };

        let start = Instant::now();
        let pong = self.bus.once(format!("{namespace}:pong"));
        if let Err(e) = manager.emit(&namespace, "ping", Value::Null).await {
            warn!(namespace = %namespace, error = %e, "Channel ping failed");
            return Latency::Failed;
        }
        // An unanswered channel ping counts as failed, not timed out.
        match timeout(limit, pong).await {
            Ok(Some(_)) => Latency::since(start),
            Ok(None) | Err(_) => Latency::Failed,
        }
    }

    /// Close every channel. Credentials are kept.
    pub async fn shutdown(&self) {
        if let Some(manager) = self.channels() {
            manager.disconnect_all().await;
        }
        debug!("Runtime shut down");
    }
}
