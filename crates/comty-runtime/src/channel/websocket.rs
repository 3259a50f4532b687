use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{
    ChannelConnector, ChannelFrame, ChannelLink, ChannelSession, ChannelSignal, ChannelTarget,
};
use crate::config::TransportVariant;
use crate::error::{Error, Result};
use crate::transport::install_rustls_provider;

const SIGNAL_BUFFER: usize = 100;
const OUTBOUND_BUFFER: usize = 100;

/// [`ChannelConnector`] over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    heartbeat_interval: Option<Duration>,
}

impl WebSocketConnector {
    pub fn new(heartbeat_interval: Option<Duration>) -> Self {
        install_rustls_provider();
        Self { heartbeat_interval }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(Some(Duration::from_secs(25)))
    }
}

/// Decode one inbound message into a signal.
fn decode_message(namespace: &str, message: &Message) -> Option<ChannelSignal> {
    let frame = match message {
        Message::Text(text) => ChannelFrame::decode(text.as_str()),
        Message::Binary(bytes) => serde_json::from_slice::<ChannelFrame>(bytes).map_err(Into::into),
        Message::Close(close) => {
            return Some(ChannelSignal::Disconnected {
                reason: close
                    .as_ref()
                    .map(|c| c.reason.to_string())
                    .filter(|r| !r.is_empty()),
            });
        }
        _ => return None,
    };

    match frame {
        Ok(frame) if frame.is_error() => Some(ChannelSignal::Error(frame.error_message())),
        Ok(frame) => Some(ChannelSignal::Event {
            name: frame.event,
            payload: frame.data,
        }),
        Err(e) => {
            warn!(namespace, error = %e, "Failed to decode channel frame");
            None
        }
    }
}

struct WebSocketLink {
    namespace: String,
    outbound: mpsc::Sender<Message>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

#[async_trait]
impl ChannelLink for WebSocketLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, frame: ChannelFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::ChannelClosed(self.namespace.clone()));
        }
        let text = frame.encode()?;
        self.outbound
            .send(Message::text(text))
            .await
            .map_err(|_| Error::ChannelClosed(self.namespace.clone()))
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn open(&self, target: &ChannelTarget) -> Result<ChannelSession> {
        info!(namespace = %target.namespace, variant = %target.variant, "Connecting to channel");

        let (mut ws_stream, _) = connect_async(target.url.as_str())
            .await
            .map_err(|e| Error::channel_connect(&target.namespace, e.to_string()))?;

        if target.variant == TransportVariant::Standard {
            if let Some(token) = &target.token {
                let auth = ChannelFrame::auth(token).encode()?;
                ws_stream
                    .send(Message::text(auth))
                    .await
                    .map_err(|e| Error::channel_connect(&target.namespace, e.to_string()))?;
            }
        }

        let connected = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);

        let namespace = target.namespace.clone();
        let heartbeat = self.heartbeat_interval;
        let connected_task = connected.clone();
        let shutdown_task = shutdown.clone();

        tokio::spawn(async move {
            let (mut sink, mut stream) = ws_stream.split();
            let mut heartbeat_timer =
                tokio::time::interval(heartbeat.unwrap_or(Duration::from_secs(3600)));
            heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            heartbeat_timer.tick().await;

            let reason = loop {
                tokio::select! {
                    _ = heartbeat_timer.tick(), if heartbeat.is_some() => {
                        if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                            error!(namespace = %namespace, error = %e, "Failed to send heartbeat");
                            let _ = signal_tx.send(ChannelSignal::Error(e.to_string())).await;
                            break Some(e.to_string());
                        }
                        trace!(namespace = %namespace, "Sent heartbeat");
                    }

                    Some(msg) = outbound_rx.recv() => {
                        if let Err(e) = sink.send(msg).await {
                            error!(namespace = %namespace, error = %e, "Failed to send frame");
                            let _ = signal_tx.send(ChannelSignal::Error(e.to_string())).await;
                            break Some(e.to_string());
                        }
                    }

                    msg_opt = stream.next() => {
                        match msg_opt {
                            Some(Ok(msg)) => match decode_message(&namespace, &msg) {
                                Some(ChannelSignal::Disconnected { reason }) => break reason,
                                Some(signal) => {
                                    if signal_tx.send(signal).await.is_err() {
                                        // Nobody is listening anymore.
                                        break None;
                                    }
                                }
                                None => {}
                            },
                            Some(Err(e)) => {
                                error!(namespace = %namespace, error = %e, "WebSocket error");
                                let _ = signal_tx.send(ChannelSignal::Error(e.to_string())).await;
                                break Some(e.to_string());
                            }
                            None => {
                                warn!(namespace = %namespace, "WebSocket stream closed");
                                break Some("stream closed".to_string());
                            }
                        }
                    }

                    _ = shutdown_task.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        connected_task.store(false, Ordering::SeqCst);
                        debug!(namespace = %namespace, "Channel closed by client");
                        return;
                    }
                }
            };

            connected_task.store(false, Ordering::SeqCst);
            let _ = signal_tx.send(ChannelSignal::Disconnected { reason }).await;
            debug!(namespace = %namespace, "Channel task stopped");
        });

        let link = WebSocketLink {
            namespace: target.namespace.clone(),
            outbound: outbound_tx,
            connected,
            shutdown,
        };

        Ok(ChannelSession {
            link: Arc::new(link),
            signals: signal_rx,
        })
    }
}
