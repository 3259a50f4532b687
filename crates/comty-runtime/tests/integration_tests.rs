//! Integration tests for the comty runtime.
//!
//! The HTTP backend and the channel connector are in-process fakes built on
//! the public collaborator traits, so every scenario runs without network.

use async_trait::async_trait;
use comty_runtime::addons::{
    ItemGroup, MergeResult, Search, SearchQuery, split_limit, standard_list_merge,
};
use comty_runtime::channel::REAUTH_EVENT;
use comty_runtime::library;
use comty_runtime::{
    Addon, Capabilities, ChannelConfig, ChannelConnector, ChannelFrame, ChannelLink,
    ChannelSession, ChannelSignal, ChannelTarget, ClientConfig, ConnectionState, Credentials,
    CredentialStore, Error, HttpTransport, MemoryCredentialStore, Provides, RequestSpec, Result,
    Runtime, RuntimeEvent, TransportError, TransportRequest, TransportResponse,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const ORIGIN: &str = "https://api.test";

/// Fake platform backend.
///
/// `/auth` answers with the configured exchange reply after `auth_delay`.
/// `/forbidden` always answers 403. Every other path accepts `Bearer new`
/// and reports any other credential as expired.
struct Backend {
    calls: Mutex<Vec<TransportRequest>>,
    auth_reply: std::result::Result<Value, TransportError>,
    auth_delay: Duration,
    routes: HashMap<String, Value>,
}

impl Backend {
    fn renewing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            auth_reply: Ok(json!({ "token": "new", "refreshToken": "r2" })),
            auth_delay: Duration::from_millis(50),
            routes: HashMap::new(),
        }
    }

    fn with_auth_reply(mut self, reply: std::result::Result<Value, TransportError>) -> Self {
        self.auth_reply = reply;
        self
    }

    fn route(mut self, path: &str, data: Value) -> Self {
        self.routes.insert(path.to_string(), data);
        self
    }

    fn calls_to(&self, path: &str) -> Vec<TransportRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.strip_prefix(ORIGIN) == Some(path))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HttpTransport for Backend {
    async fn send(
        &self,
        request: TransportRequest,
    ) -> std::result::Result<TransportResponse, TransportError> {
        self.calls.lock().push(request.clone());
        let path = request.url.strip_prefix(ORIGIN).unwrap_or_default().to_string();

        if path == "/auth" {
            tokio::time::sleep(self.auth_delay).await;
            return self.auth_reply.clone().map(|data| TransportResponse { status: 200, data });
        }
        tokio::task::yield_now().await;

        if path == "/forbidden" {
            return Err(TransportError::Http {
                status: 403,
                data: json!({ "error": "nope" }),
            });
        }
        if request.header("Authorization") != Some("Bearer new") {
            return Err(TransportError::Http {
                status: 401,
                data: json!({ "expired": true }),
            });
        }
        Ok(TransportResponse {
            status: 200,
            data: self.routes.get(&path).cloned().unwrap_or(json!({ "ok": true })),
        })
    }
}

#[derive(Default)]
struct Link {
    connected: AtomicBool,
    frames: Mutex<Vec<ChannelFrame>>,
}

#[async_trait]
impl ChannelLink for Link {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn emit(&self, frame: ChannelFrame) -> Result<()> {
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Connector {
    refused: HashSet<String>,
    opened: Mutex<Vec<ChannelTarget>>,
    links: Mutex<HashMap<String, Arc<Link>>>,
    senders: Mutex<HashMap<String, mpsc::Sender<ChannelSignal>>>,
}

impl Connector {
    fn refusing(namespaces: &[&str]) -> Self {
        Self {
            refused: namespaces.iter().map(|ns| ns.to_string()).collect(),
            ..Self::default()
        }
    }

    fn link(&self, namespace: &str) -> Arc<Link> {
        self.links.lock()[namespace].clone()
    }

    fn sender(&self, namespace: &str) -> mpsc::Sender<ChannelSignal> {
        self.senders.lock()[namespace].clone()
    }
}

#[async_trait]
impl ChannelConnector for Connector {
    async fn open(&self, target: &ChannelTarget) -> Result<ChannelSession> {
        if self.refused.contains(&target.namespace) {
            return Err(Error::channel_connect(&target.namespace, "connection refused"));
        }

        let link = Arc::new(Link::default());
        link.connected.store(true, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);

        self.opened.lock().push(target.clone());
        self.links.lock().insert(target.namespace.clone(), link.clone());
        self.senders.lock().insert(target.namespace.clone(), tx);

        Ok(ChannelSession {
            link,
            signals: rx,
        })
    }
}

fn drain(rx: &mut broadcast::Receiver<RuntimeEvent>) -> Vec<String> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

async fn runtime_with(
    config: ClientConfig,
    backend: Arc<Backend>,
    connector: Arc<Connector>,
    store: Arc<MemoryCredentialStore>,
) -> Arc<Runtime> {
    Runtime::builder(config)
        .transport(backend)
        .connector(connector)
        .credential_store(store)
        .build()
        .await
        .expect("Failed to build runtime")
}

fn signed_in() -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_credentials(&Credentials::new(
        "old", "r1",
    )))
}

mod session_renewal_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_expiry_triggers_single_exchange() {
        let backend = Arc::new(Backend::renewing());
        let store = signed_in();
        let runtime = runtime_with(
            ClientConfig::with_origin(ORIGIN),
            backend.clone(),
            Arc::new(Connector::default()),
            store.clone(),
        )
        .await;
        let mut events = runtime.subscribe();

        let handles: Vec<_> = ["/feed", "/profile", "/settings"]
            .into_iter()
            .map(|path| {
                let runtime = runtime.clone();
                tokio::spawn(async move { runtime.request(RequestSpec::get(path)).await })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            let response = handle.unwrap().expect("request should succeed after renewal");
            assert_eq!(response.data, json!({ "ok": true }));
        }

        let exchanges = backend.calls_to("/auth");
        assert_eq!(exchanges.len(), 1);
        assert_eq!(
            exchanges[0].body,
            Some(json!({ "authToken": "old", "refreshToken": "r1" }))
        );
        assert_eq!(runtime.renewal().exchanges_issued(), 1);

        for path in ["/feed", "/profile", "/settings"] {
            let calls = backend.calls_to(path);
            assert_eq!(calls.len(), 2, "{path} should be retried exactly once");
            assert_eq!(calls[1].header("Authorization"), Some("Bearer new"));
        }

        assert_eq!(Credentials::load(store.as_ref()), Credentials::new("new", "r2"));
        assert_eq!(
            drain(&mut events),
            vec!["session:refreshing", "session:refreshed"]
        );
    }

    #[tokio::test]
    async fn test_failed_exchange_invalidates_session() {
        let backend = Arc::new(Backend::renewing().with_auth_reply(Err(TransportError::Http {
            status: 401,
            data: json!({ "error": "refresh token revoked" }),
        })));
        let store = signed_in();
        let runtime = runtime_with(
            ClientConfig::with_origin(ORIGIN),
            backend.clone(),
            Arc::new(Connector::default()),
            store.clone(),
        )
        .await;
        let invalid = runtime.events().once("session.invalid");

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let runtime = runtime.clone();
                tokio::spawn(async move { runtime.request(RequestSpec::get("/feed")).await })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            let err = handle.unwrap().unwrap_err();
            assert!(err.requires_relogin());
            assert!(matches!(
                err,
                Error::SessionInvalid(ref m) if m == "Failed to regenerate token."
            ));
        }

        assert_eq!(backend.calls_to("/auth").len(), 1);
        assert_eq!(Credentials::load(store.as_ref()), Credentials::new("old", "r1"));
        assert!(!runtime.renewal().is_renewing());

        match invalid.await {
            Some(RuntimeEvent::SessionInvalid { message }) => {
                assert_eq!(message, "Failed to regenerate token.");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_without_token_is_invalid_response() {
        let backend = Arc::new(Backend::renewing().with_auth_reply(Ok(json!({}))));
        let store = signed_in();
        let runtime = runtime_with(
            ClientConfig::with_origin(ORIGIN),
            backend,
            Arc::new(Connector::default()),
            store.clone(),
        )
        .await;

        let invalid = runtime.events().once("session.invalid");
        let err = runtime.request(RequestSpec::get("/feed")).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid or expired session: Failed to regenerate token, invalid server response."
        );

        // Nothing stored, nothing left pending.
        assert_eq!(runtime.credentials(), Credentials::new("old", "r1"));
        assert_eq!(store.get("token").as_deref(), Some("old"));
        assert_eq!(store.get("refreshToken").as_deref(), Some("r1"));
        assert!(!runtime.renewal().is_renewing());

        match tokio::time::timeout(Duration::from_secs(1), invalid).await {
            Ok(Some(RuntimeEvent::SessionInvalid { message })) => {
                assert_eq!(message, "Failed to regenerate token, invalid server response.");
            }
            other => panic!("expected session.invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_forbidden_never_renews() {
        let backend = Arc::new(Backend::renewing());
        let runtime = runtime_with(
            ClientConfig::with_origin(ORIGIN),
            backend.clone(),
            Arc::new(Connector::default()),
            signed_in(),
        )
        .await;

        let err = runtime
            .request(RequestSpec::get("/forbidden"))
            .await
            .unwrap_err();
        match err {
            Error::AuthorizationDenied { message, .. } => assert_eq!(message, "nope"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(backend.calls_to("/auth").is_empty());
        assert_eq!(backend.calls_to("/forbidden").len(), 1);
    }
}

mod channel_tests {
    use super::*;

    fn channels_config(list: Vec<ChannelConfig>) -> ClientConfig {
        let mut config = ClientConfig::with_origin(ORIGIN);
        config.channels.enable = true;
        config.channels.list = list;
        config
    }

    #[tokio::test]
    async fn test_connect_all_contains_failures() {
        let connector = Arc::new(Connector::refusing(&["main", "chats"]));
        let runtime = runtime_with(
            channels_config(vec![
                ChannelConfig::new("main", "/main"),
                ChannelConfig::new("chats", "/chats"),
                ChannelConfig::new("music", "/music"),
            ]),
            Arc::new(Backend::renewing()),
            connector.clone(),
            signed_in(),
        )
        .await;
        let manager = runtime.channels().unwrap();
        let mut events = runtime.subscribe();

        assert_eq!(manager.connect_all().await, 1);

        assert_eq!(manager.state("main"), Some(ConnectionState::Erroring));
        assert_eq!(manager.state("chats"), Some(ConnectionState::Erroring));
        assert_eq!(manager.state("music"), Some(ConnectionState::Connected));

        let names = drain(&mut events);
        let ready = names.iter().filter(|n| *n == "wsmanager:all:connected").count();
        assert_eq!(ready, 1);
        assert!(names.contains(&"main:error".to_string()));
        assert!(names.contains(&"music:connected".to_string()));

        let opened = connector.opened.lock().clone();
        let music = opened.iter().rfind(|t| t.namespace == "music").unwrap();
        assert_eq!(music.token.as_deref(), Some("old"));
        assert_eq!(music.url, "wss://api.test/music");
    }

    #[tokio::test]
    async fn test_renewal_reauthenticates_channels() {
        let connector = Arc::new(Connector::default());
        let backend = Arc::new(Backend::renewing());
        let runtime = runtime_with(
            channels_config(vec![
                ChannelConfig::new("chats", "/chats"),
                ChannelConfig::new("posts", "/posts").experimental(),
            ]),
            backend,
            connector.clone(),
            signed_in(),
        )
        .await;
        let manager = runtime.channels().unwrap();
        assert_eq!(manager.state("chats"), Some(ConnectionState::Connected));

        runtime.request(RequestSpec::get("/feed")).await.unwrap();

        for namespace in ["chats", "posts"] {
            let link = connector.link(namespace);
            let frames = link.frames.lock().clone();
            assert_eq!(frames.last().unwrap().event, REAUTH_EVENT);
            assert_eq!(frames.last().unwrap().data, json!("new"));
        }

        // Live channels swap credentials without reopening.
        assert_eq!(connector.opened.lock().len(), 2);
        assert_eq!(manager.state("posts"), Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn test_inbound_events_reach_the_bus() {
        let connector = Arc::new(Connector::default());
        let runtime = runtime_with(
            channels_config(vec![ChannelConfig::new("notifications", "/notifications")]),
            Arc::new(Backend::renewing()),
            connector.clone(),
            signed_in(),
        )
        .await;

        let message = runtime.events().once("notifications:new");
        connector
            .sender("notifications")
            .send(ChannelSignal::Event {
                name: "new".into(),
                payload: json!({ "id": 7 }),
            })
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), message)
            .await
            .expect("event should be republished");
        match event {
            Some(RuntimeEvent::ChannelMessage { payload, .. }) => {
                assert_eq!(payload, json!({ "id": 7 }));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let dropped = runtime.events().once("notifications:disconnected");
        connector
            .sender("notifications")
            .send(ChannelSignal::Disconnected {
                reason: Some("server restart".into()),
            })
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), dropped)
            .await
            .expect("drop should be reported");

        let manager = runtime.channels().unwrap();
        assert_eq!(
            manager.state("notifications"),
            Some(ConnectionState::Disconnected)
        );
    }

    #[tokio::test]
    async fn test_logout_closes_channels() {
        let connector = Arc::new(Connector::default());
        let runtime = runtime_with(
            channels_config(vec![ChannelConfig::new("main", "/main")]),
            Arc::new(Backend::renewing()),
            connector.clone(),
            signed_in(),
        )
        .await;

        runtime.logout().await;

        assert!(!connector.link("main").is_connected());
        assert!(runtime.channels().unwrap().is_empty());
        assert_eq!(runtime.credentials(), Credentials::default());
    }
}

mod addon_tests {
    use super::*;

    struct Source {
        item: Option<&'static str>,
        seen: Mutex<Vec<u32>>,
    }

    impl Source {
        fn new(item: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                item,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Provides<Search> for Source {
        async fn invoke(&self, args: &SearchQuery) -> Result<MergeResult> {
            self.seen.lock().push(args.limit);
            match self.item {
                Some(item) => Ok(MergeResult::from([(
                    "tracks".to_string(),
                    ItemGroup::new(vec![json!({ "id": item })], 10),
                )])),
                None => Err(Error::other("service unavailable")),
            }
        }
    }

    impl Addon for Source {
        fn declare(self: Arc<Self>, capabilities: &mut Capabilities) {
            capabilities.provide::<Search>(self);
        }
    }

    #[tokio::test]
    async fn test_search_blends_addons_and_skips_failures() {
        let backend = Arc::new(Backend::renewing().route(
            "/search",
            json!({
                "tracks": { "items": [{ "id": "platform" }], "total_items": 1 },
                "users": { "items": [], "total_items": 0 },
            }),
        ));
        let runtime = runtime_with(
            ClientConfig::with_origin(ORIGIN),
            backend.clone(),
            Arc::new(Connector::default()),
            Arc::new(MemoryCredentialStore::with_credentials(&Credentials::new(
                "new", "r",
            ))),
        )
        .await;

        let tidal = Source::new(Some("tidal"));
        let broken = Source::new(None);
        let deezer = Source::new(Some("deezer"));
        runtime.register_addon("tidal", tidal.clone());
        runtime.register_addon("broken", broken.clone());
        runtime.register_addon("deezer", deezer.clone());

        let results = library::search(&runtime, SearchQuery::new("lofi"))
            .await
            .unwrap();

        let ids: Vec<_> = results["tracks"]
            .items
            .iter()
            .map(|t| t["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["platform", "tidal", "deezer"]);
        assert_eq!(results["tracks"].total_items, 21);
        assert!(results["users"].items.is_empty());

        let expected = split_limit(50, 3);
        assert_eq!(expected, 12);
        assert_eq!(*tidal.seen.lock(), vec![expected]);
        assert_eq!(*broken.seen.lock(), vec![expected]);
        let call = &backend.calls_to("/search")[0];
        assert!(call.query.contains(&("limit".to_string(), "12".to_string())));
    }

    #[test]
    fn test_merge_is_associative_on_totals() {
        let group = |ids: &[&str], total| {
            MergeResult::from([(
                "tracks".to_string(),
                ItemGroup::new(ids.iter().map(|id| json!(id)).collect(), total),
            )])
        };

        let left = standard_list_merge(
            standard_list_merge(group(&["a"], 1), group(&["b"], 2)),
            group(&["c"], 3),
        );
        let right = standard_list_merge(
            group(&["a"], 1),
            standard_list_merge(group(&["b"], 2), group(&["c"], 3)),
        );
        assert_eq!(left, right);
        assert_eq!(left["tracks"].total_items, 6);
    }
}
