//! Request gateway.
//!
//! Wraps the [`HttpTransport`] with the authorization interceptor and the
//! expired-session replay: a call that comes back `401` with `expired: true`
//! is renewed through the [`RenewalCoordinator`] and sent again once.

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

use crate::credentials::{ACCESS_TOKEN_KEY, CredentialStore};
use crate::error::{Error, Result};
use crate::session::RenewalCoordinator;
use crate::transport::{HttpTransport, TransportError, TransportRequest, TransportResponse};

pub type Response = TransportResponse;

/// Join `path` onto `origin` the way a base URL works: plain concatenation,
/// absolute URLs pass through untouched.
pub(crate) fn resolve_url(origin: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let origin = origin.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{origin}{path}")
    } else {
        format!("{origin}/{path}")
    }
}

/// Authorization scheme injected by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Interactive user sessions.
    Bearer,
    /// Headless service clients authenticating with a key pair.
    Server,
}

impl AuthScheme {
    pub fn for_headless(headless: bool) -> Self {
        if headless { Self::Server } else { Self::Bearer }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bearer => "Bearer",
            Self::Server => "Server",
        }
    }
}

/// Description of one call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize>(self, body: &T) -> Result<Self> {
        Ok(self.body(serde_json::to_value(body)?))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// What to do with a failed response.
enum Failure {
    Expired,
    Terminal(Error),
}

pub struct RequestGateway {
    origin: String,
    scheme: AuthScheme,
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn CredentialStore>,
    renewal: Arc<RenewalCoordinator>,
}

impl RequestGateway {
    pub fn new(
        origin: impl Into<String>,
        scheme: AuthScheme,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn CredentialStore>,
        renewal: Arc<RenewalCoordinator>,
    ) -> Self {
        Self {
            origin: origin.into(),
            scheme,
            transport,
            store,
            renewal,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn renewal(&self) -> &Arc<RenewalCoordinator> {
        &self.renewal
    }

    /// Send a call, renewing the session once if it comes back expired.
    #[instrument(skip(self, spec), fields(method = %spec.method, path = %spec.path))]
    pub async fn send(&self, spec: RequestSpec) -> Result<Response> {
        let (request, sent_token) = self.prepare(&spec);

        let failure = match self.transport.send(request).await {
            Ok(response) => return Ok(response),
            Err(e) => self.classify(&spec, e),
        };

        match failure {
            Failure::Terminal(err) => Err(err),
            Failure::Expired => {
                let current = self.store.get(ACCESS_TOKEN_KEY);
                if current.is_some() && current != sent_token {
                    debug!("Session was renewed while the call was in flight, replaying");
                } else {
                    self.renewal.renew().await?;
                }

                let (request, _) = self.prepare(&spec);
                match self.transport.send(request).await {
                    Ok(response) => Ok(response),
                    Err(e) => match self.classify(&spec, e) {
                        Failure::Expired => Err(Error::SessionExpired),
                        Failure::Terminal(err) => Err(err),
                    },
                }
            }
        }
    }

    /// Send a call and decode its body.
    pub async fn send_json<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T> {
        let response = self.send(spec).await?;
        Ok(serde_json::from_value(response.data)?)
    }

    /// Build the transport request, injecting authorization when absent.
    ///
    /// Also returns the access token the request was authorized with.
    fn prepare(&self, spec: &RequestSpec) -> (TransportRequest, Option<String>) {
        let mut headers = spec.headers.clone();
        let mut sent_token = None;

        if !spec.has_header("Authorization") {
            match self.store.get(ACCESS_TOKEN_KEY) {
                Some(token) => {
                    headers.push((
                        "Authorization".to_string(),
                        format!("{} {}", self.scheme.as_str(), token),
                    ));
                    sent_token = Some(token);
                }
                None => warn!(path = %spec.path, "Making a request with no session token"),
            }
        }

        let request = TransportRequest {
            method: spec.method.clone(),
            url: resolve_url(&self.origin, &spec.path),
            query: spec.query.clone(),
            body: spec.body.clone(),
            headers,
        };
        (request, sent_token)
    }

    fn classify(&self, spec: &RequestSpec, error: TransportError) -> Failure {
        match error {
            TransportError::Network(message) | TransportError::Aborted(message) => {
                error!(%message, "Request aborted or network error");
                Failure::Terminal(Error::TransportFailure(message))
            }
            TransportError::Http { status: 403, data } => {
                let message = data
                    .get("error")
                    .or_else(|| data.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("Forbidden")
                    .to_string();
                Failure::Terminal(Error::AuthorizationDenied { message, data })
            }
            TransportError::Http { status: 401, data }
                if is_expired(&data) && !self.renewal.is_renewal_path(&spec.path) =>
            {
                Failure::Expired
            }
            TransportError::Http { status, data } => {
                Failure::Terminal(Error::Http { status, data })
            }
        }
    }
}

fn is_expired(data: &Value) -> bool {
    data.get("expired").and_then(Value::as_bool).unwrap_or(false)
}
