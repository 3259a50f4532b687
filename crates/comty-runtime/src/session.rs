//! Session renewal coordinator.
//!
//! At most one token exchange runs at a time. The first request that needs a
//! renewal becomes the leader and performs the exchange; every request that
//! needs one while it is in flight follows it by awaiting the same outcome.
//!
//! ```text
//! Idle --renew()--> Renewing --exchange ok--> Idle  (session:refreshed)
//!                            --exchange err-> Idle  (session.invalid)
//! ```

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::credentials::{CredentialStore, Credentials};
use crate::error::{Error, Result};
use crate::events::{EventBus, RuntimeEvent};
use crate::gateway::resolve_url;
use crate::transport::{HttpTransport, TransportRequest};

/// Notified after every successful renewal.
#[async_trait]
pub trait SessionListener: Send + Sync {
    async fn session_renewed(&self, access_token: &str);
}

/// Outcome shared between the renewal leader and its followers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    Refreshed { access_token: String },
    Failed { message: String },
}

type OutcomeReceiver = watch::Receiver<Option<RenewalOutcome>>;

enum Role {
    Leader(watch::Sender<Option<RenewalOutcome>>),
    Follower(OutcomeReceiver),
}

/// Clears the in-flight slot even if the leader future is dropped mid-exchange.
struct InFlightGuard<'a> {
    slot: &'a Mutex<Option<OutcomeReceiver>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

pub struct RenewalCoordinator {
    origin: String,
    renewal_path: String,
    wait_timeout: Duration,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    bus: EventBus,
    in_flight: Mutex<Option<OutcomeReceiver>>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
    exchanges: AtomicU64,
}

impl RenewalCoordinator {
    pub fn new(
        origin: impl Into<String>,
        renewal_path: impl Into<String>,
        wait_timeout: Duration,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            origin: origin.into(),
            renewal_path: renewal_path.into(),
            wait_timeout,
            transport,
            store,
            bus,
            in_flight: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
            exchanges: AtomicU64::new(0),
        }
    }

    /// Whether a renewal is currently in flight.
    pub fn is_renewing(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Number of token exchanges issued so far.
    pub fn exchanges_issued(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    /// Whether `path` targets the token exchange endpoint itself.
    pub fn is_renewal_path(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path);
        path.trim_end_matches('/') == self.renewal_path.trim_end_matches('/')
    }

    /// Register a listener notified after each successful renewal.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    /// Renew the session, or wait for the renewal already in flight.
    ///
    /// Returns the new access token. Any failure is reported as
    /// [`Error::SessionInvalid`].
    pub async fn renew(&self) -> Result<String> {
        let role = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(rx) => {
                debug!("Session renewal already in flight, waiting for it");
                self.follow(rx).await
            }
            Role::Leader(tx) => self.lead(tx).await,
        }
    }

    async fn follow(&self, mut rx: OutcomeReceiver) -> Result<String> {
        let waited = tokio::time::timeout(self.wait_timeout, rx.wait_for(Option::is_some)).await;

        let outcome = match waited {
            Ok(Ok(outcome)) => outcome.clone(),
            Ok(Err(_)) => {
                return Err(Error::session_invalid("session renewal was abandoned"));
            }
            Err(_) => {
                warn!(timeout = ?self.wait_timeout, "Timed out waiting for session renewal");
                return Err(Error::session_invalid(format!(
                    "timed out after {:?} waiting for session renewal",
                    self.wait_timeout
                )));
            }
        };

        match outcome {
            Some(RenewalOutcome::Refreshed { access_token }) => Ok(access_token),
            Some(RenewalOutcome::Failed { message }) => Err(Error::SessionInvalid(message)),
            None => Err(Error::session_invalid("session renewal produced no outcome")),
        }
    }

    #[instrument(skip(self, tx))]
    async fn lead(&self, tx: watch::Sender<Option<RenewalOutcome>>) -> Result<String> {
        let guard = InFlightGuard {
            slot: &self.in_flight,
        };

        info!("Session expired, trying to regenerate");
        self.bus.publish(RuntimeEvent::SessionRefreshing);

        let outcome = match self.exchange().await {
            Ok(access_token) => RenewalOutcome::Refreshed { access_token },
            Err(message) => RenewalOutcome::Failed { message },
        };

        drop(guard);

        match &outcome {
            RenewalOutcome::Refreshed { .. } => {
                self.bus.publish(RuntimeEvent::SessionRefreshed);
            }
            RenewalOutcome::Failed { message } => {
                error!(error = %message, "Failed to regenerate token");
                self.bus.publish(RuntimeEvent::SessionInvalid {
                    message: message.clone(),
                });
            }
        }

        let _ = tx.send(Some(outcome.clone()));

        match outcome {
            RenewalOutcome::Refreshed { access_token } => {
                let listeners: Vec<_> = self.listeners.read().iter().cloned().collect();
                for listener in listeners {
                    listener.session_renewed(&access_token).await;
                }
                Ok(access_token)
            }
            RenewalOutcome::Failed { message } => Err(Error::SessionInvalid(message)),
        }
    }

    /// Exchange the stored token pair for a new one and persist it.
    async fn exchange(&self) -> std::result::Result<String, String> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);

        let current = Credentials::load(self.store.as_ref());
        let request = TransportRequest {
            method: Method::POST,
            url: resolve_url(&self.origin, &self.renewal_path),
            query: Vec::new(),
            body: Some(json!({
                "authToken": current.access_token,
                "refreshToken": current.refresh_token,
            })),
            headers: Vec::new(),
        };

        let response = self.transport.send(request).await.map_err(|e| {
            debug!(error = %e, "Token exchange request failed");
            "Failed to regenerate token.".to_string()
        })?;

        let access_token = response
            .data
            .get("token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| "Failed to regenerate token, invalid server response.".to_string())?
            .to_string();

        let refresh_token = response
            .data
            .get("refreshToken")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(current.refresh_token);

        Credentials {
            access_token: Some(access_token.clone()),
            refresh_token,
        }
        .persist(self.store.as_ref());

        info!("Session token regenerated");
        Ok(access_token)
    }
}
