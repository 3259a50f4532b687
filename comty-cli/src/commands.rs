use anyhow::{Context, Result, bail};
use comty_runtime::addons::{LibraryQuery, ReleaseQuery, SearchQuery, SortOrder};
use comty_runtime::{
    Credentials, MemoryCredentialStore, Method, RequestSpec, Runtime, RuntimeEvent, library,
};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::config::AppConfig;

pub struct CommandExecutor {
    runtime: Arc<Runtime>,
}

impl CommandExecutor {
    /// Build a runtime from `config`. Channels are only created when `channels` is set,
    /// and are never connected here.
    pub async fn new(config: &AppConfig, channels: bool) -> Result<Self> {
        let mut client = config.client.clone();
        client.channels.enable = channels;
        client.channels.auto_connect = false;

        let store = Arc::new(MemoryCredentialStore::with_credentials(
            &config.credentials(),
        ));
        let runtime = Runtime::builder(client)
            .credential_store(store)
            .build()
            .await
            .context("Failed to initialize the comty runtime")?;

        Ok(Self { runtime })
    }

    /// Current token pair, including any renewal done while running.
    pub fn credentials(&self) -> Credentials {
        self.runtime.credentials()
    }

    pub async fn request(
        &self,
        method: &str,
        path: &str,
        query: Vec<(String, String)>,
        body: Option<&str>,
        compact: bool,
    ) -> Result<()> {
        let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method: {method}"))?;

        let mut spec = RequestSpec::new(method, path);
        for (key, value) in query {
            spec = spec.query(key, value);
        }
        if let Some(body) = body {
            let body: Value = serde_json::from_str(body).context("Request body is not valid JSON")?;
            spec = spec.body(body);
        }

        let response = self.runtime.request(spec).await?;
        print_json(&response.data, compact)
    }

    pub async fn search(&self, keywords: String, limit: u32) -> Result<()> {
        let query = SearchQuery::new(keywords).limit(limit);
        let results = library::search(&self.runtime, query).await?;
        print_json(&results, false)
    }

    pub async fn library(
        &self,
        limit: u32,
        offset: u32,
        kind: Option<String>,
        asc: bool,
    ) -> Result<()> {
        let query = LibraryQuery {
            limit,
            offset,
            order: if asc { SortOrder::Asc } else { SortOrder::Desc },
            kind,
        };
        let results = library::my_library(&self.runtime, query).await?;
        print_json(&results, false)
    }

    pub async fn release(&self, id: String, service: Option<String>) -> Result<()> {
        let query = ReleaseQuery {
            id,
            service,
            ..ReleaseQuery::default()
        };
        let data = library::release_data(&self.runtime, query).await?;
        print_json(&data, false)
    }

    /// Connect channels and print every runtime event as one JSON line until Ctrl+C.
    pub async fn listen(&self, namespaces: &[String]) -> Result<()> {
        let manager = self.runtime.enable_channels();
        for namespace in namespaces {
            if manager.config(namespace).is_none() {
                bail!("Unknown channel namespace: {namespace}");
            }
        }

        let mut events = self.runtime.subscribe();
        if namespaces.is_empty() {
            let connected = manager.connect_all().await;
            info!(connected, total = manager.configs().len(), "Channels connected");
        } else {
            for namespace in namespaces {
                if let Err(e) = manager.connect_namespace(namespace).await {
                    warn!(namespace = %namespace, error = %e, "Failed to connect channel");
                }
            }
        }

        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => println!("{}", event_line(&event)),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, closing channels");
                    break;
                }
            }
        }

        self.runtime.shutdown().await;
        Ok(())
    }

    /// Print gateway and channel latency. Channels, when enabled, are
    /// connected first and closed afterwards.
    pub async fn ping(&self, limit: Duration) -> Result<()> {
        if let Some(manager) = self.runtime.channels() {
            let connected = manager.connect_all().await;
            info!(connected, "Channels connected for ping");
        }

        let report = self.runtime.measure_ping_within(limit).await;
        info!(http = %report.http, channel = %report.channel, "Ping");
        self.runtime.shutdown().await;
        print_json(&report, false)
    }
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{text}");
    Ok(())
}

fn event_line(event: &RuntimeEvent) -> Value {
    let data = match event {
        RuntimeEvent::SessionInvalid { message } => json!({ "message": message }),
        RuntimeEvent::ChannelDisconnected { reason, .. } => json!({ "reason": reason }),
        RuntimeEvent::ChannelError { message, .. } => json!({ "message": message }),
        RuntimeEvent::ChannelMessage { payload, .. } => payload.clone(),
        _ => Value::Null,
    };
    json!({ "event": event.name(), "data": data })
}
