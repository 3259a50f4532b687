//! Scripted collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::channel::{
    ChannelConnector, ChannelFrame, ChannelLink, ChannelSession, ChannelSignal, ChannelTarget,
};
use crate::error::{Error, Result};
use crate::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};

/// One scripted transport answer.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    outcome: std::result::Result<TransportResponse, TransportError>,
    delay: Option<Duration>,
}

impl Reply {
    pub(crate) fn ok(data: Value) -> Self {
        Self::status(200, data)
    }

    pub(crate) fn status(status: u16, data: Value) -> Self {
        let outcome = if (200..300).contains(&status) {
            Ok(TransportResponse { status, data })
        } else {
            Err(TransportError::Http { status, data })
        };
        Self {
            outcome,
            delay: None,
        }
    }

    pub(crate) fn expired() -> Self {
        Self::status(401, json!({ "expired": true }))
    }

    pub(crate) fn network(message: &str) -> Self {
        Self {
            outcome: Err(TransportError::Network(message.to_string())),
            delay: None,
        }
    }

    /// Answer only after `delay`.
    pub(crate) fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Responder = Box<dyn Fn(&TransportRequest) -> Reply + Send + Sync>;

enum Route {
    /// Replies served in order; the last one repeats.
    Queue(VecDeque<Reply>),
    Dynamic(Responder),
}

/// [`HttpTransport`] answering from per-route scripts and recording calls.
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<(String, String), Route>>,
    calls: Mutex<Vec<TransportRequest>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Queue `reply` for `method path`.
    pub(crate) fn on(&self, method: &str, path: &str, reply: Reply) {
        let mut routes = self.routes.lock();
        let key = (method.to_uppercase(), path.to_string());
        match routes.get_mut(&key) {
            Some(Route::Queue(queue)) => queue.push_back(reply),
            _ => {
                routes.insert(key, Route::Queue(VecDeque::from([reply])));
            }
        }
    }

    /// Answer `method path` by inspecting each request.
    pub(crate) fn on_with<F>(&self, method: &str, path: &str, responder: F)
    where
        F: Fn(&TransportRequest) -> Reply + Send + Sync + 'static,
    {
        self.routes.lock().insert(
            (method.to_uppercase(), path.to_string()),
            Route::Dynamic(Box::new(responder)),
        );
    }

    pub(crate) fn calls(&self) -> Vec<TransportRequest> {
        self.calls.lock().clone()
    }

    pub(crate) fn calls_to(&self, path: &str) -> Vec<TransportRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| path_of(&r.url) == path)
            .cloned()
            .collect()
    }

    fn reply_for(&self, request: &TransportRequest) -> Reply {
        let key = (request.method.as_str().to_string(), path_of(&request.url));
        let mut routes = self.routes.lock();
        match routes.get_mut(&key) {
            Some(Route::Queue(queue)) if queue.len() > 1 => {
                queue.pop_front().unwrap_or_else(|| Reply::status(404, Value::Null))
            }
            Some(Route::Queue(queue)) => queue
                .front()
                .cloned()
                .unwrap_or_else(|| Reply::status(404, Value::Null)),
            Some(Route::Dynamic(responder)) => responder(request),
            None => Reply::status(404, json!({ "error": "no route" })),
        }
    }
}

fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.calls.lock().push(request.clone());
        let reply = self.reply_for(&request);

        match reply.delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        reply.outcome
    }
}

/// [`ChannelLink`] recording emitted frames.
#[derive(Debug)]
pub(crate) struct FakeLink {
    connected: AtomicBool,
    emitted: Mutex<Vec<ChannelFrame>>,
}

impl FakeLink {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            emitted: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn emitted(&self) -> Vec<ChannelFrame> {
        self.emitted.lock().clone()
    }
}

#[async_trait]
impl ChannelLink for FakeLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, frame: ChannelFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::ChannelClosed("fake".to_string()));
        }
        self.emitted.lock().push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// [`ChannelConnector`] with per-namespace failure injection.
#[derive(Default)]
pub(crate) struct FakeConnector {
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    opened: Mutex<Vec<ChannelTarget>>,
    links: Mutex<HashMap<String, Arc<FakeLink>>>,
    senders: Mutex<HashMap<String, mpsc::Sender<ChannelSignal>>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Refuse connections to `namespace`.
    pub(crate) fn fail(&self, namespace: &str) {
        self.failing.lock().insert(namespace.to_string());
    }

    pub(crate) fn recover(&self, namespace: &str) {
        self.failing.lock().remove(namespace);
        self.hanging.lock().remove(namespace);
    }

    /// Never complete the handshake for `namespace`.
    pub(crate) fn hang(&self, namespace: &str) {
        self.hanging.lock().insert(namespace.to_string());
    }

    /// Targets of every successful open.
    pub(crate) fn opened(&self) -> Vec<ChannelTarget> {
        self.opened.lock().clone()
    }

    /// Most recent link opened for `namespace`.
    pub(crate) fn link(&self, namespace: &str) -> Option<Arc<FakeLink>> {
        self.links.lock().get(namespace).cloned()
    }

    /// Deliver `signal` on the most recent session of `namespace`.
    pub(crate) async fn signal(&self, namespace: &str, signal: ChannelSignal) {
        let sender = self.senders.lock().get(namespace).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(signal).await;
        }
    }
}

#[async_trait]
impl ChannelConnector for FakeConnector {
    async fn open(&self, target: &ChannelTarget) -> Result<ChannelSession> {
        if self.hanging.lock().contains(&target.namespace) {
            futures::future::pending::<()>().await;
        }
        if self.failing.lock().contains(&target.namespace) {
            return Err(Error::channel_connect(
                &target.namespace,
                "connection refused",
            ));
        }

        let link = Arc::new(FakeLink::new());
        let (tx, rx) = mpsc::channel(16);

        self.opened.lock().push(target.clone());
        self.links
            .lock()
            .insert(target.namespace.clone(), link.clone());
        self.senders.lock().insert(target.namespace.clone(), tx);

        Ok(ChannelSession {
            link,
            signals: rx,
        })
    }
}
