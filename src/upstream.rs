//! The upstream inference server: where it lives, how long we wait for it, and how a single
//! exchange with it is performed.
use crate::client::HttpClient;
use crate::errors::ConnectionFailure;
use axum::body::{Body, Bytes};
use axum::http::{Method, Request, StatusCode, header};
use bon::Builder;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:1234";
pub const DEFAULT_CHAT_TIMEOUT: Duration = Duration::from_secs(180);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";
pub const MODELS_PATH: &str = "v1/models";

/// Location of the upstream server and the per-call timeouts used when talking to it.
///
/// This is the whole of the gateway's configuration; it is handed to [`crate::AppState`] at
/// construction time so tests can point the gateway at a stub.
#[derive(Debug, Clone, Builder)]
pub struct Upstream {
    /// Base URL of the inference server. A path prefix is kept when building endpoint URLs.
    pub base_url: Url,
    /// Budget for a forwarded chat completion, covering the response head and body.
    #[builder(default = DEFAULT_CHAT_TIMEOUT)]
    pub chat_timeout: Duration,
    /// Budget for the `/v1/models` connectivity probe.
    #[builder(default = DEFAULT_PROBE_TIMEOUT)]
    pub probe_timeout: Duration,
}

impl Default for Upstream {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default upstream URL should be valid"),
            chat_timeout: DEFAULT_CHAT_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl Upstream {
    /// The base URL as the user would write it, without the trailing slash `Url` adds.
    pub fn base_url_display(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Port the upstream listens on, falling back to the scheme's default.
    pub fn port(&self) -> Option<u16> {
        self.base_url.port_or_known_default()
    }

    /// Resolve a relative endpoint path (`v1/...`) against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let prefixed = format!("{}/", base.path());
            base.set_path(&prefixed);
        }
        base.join(path)
    }

    /// Build the POST that carries a chat completion body to the upstream, byte for byte.
    pub fn chat_completions_request(&self, body: Bytes) -> Result<Request<Body>, ConnectionFailure> {
        let url = self
            .endpoint(CHAT_COMPLETIONS_PATH)
            .map_err(|e| ConnectionFailure::other(format!("Invalid upstream URL: {e}")))?;
        Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .map_err(|e| ConnectionFailure::other(format!("Invalid upstream request: {e}")))
    }

    /// Build the GET used by the connectivity probe.
    pub fn models_request(&self) -> Result<Request<Body>, ConnectionFailure> {
        let url = self
            .endpoint(MODELS_PATH)
            .map_err(|e| ConnectionFailure::other(format!("Invalid upstream URL: {e}")))?;
        Request::builder()
            .method(Method::GET)
            .uri(url.as_str())
            .body(Body::empty())
            .map_err(|e| ConnectionFailure::other(format!("Invalid upstream request: {e}")))
    }
}

/// What the upstream said, fully buffered.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl UpstreamResponse {
    /// The body as JSON, or as a JSON string of its text when it isn't valid JSON.
    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&self.body).into_owned())
        })
    }
}

/// Perform one exchange with the upstream. The timeout covers both waiting for the response
/// head and reading the body; when it fires the in-flight call is dropped.
pub async fn send<T: HttpClient>(
    client: &T,
    req: Request<Body>,
    timeout: Duration,
) -> Result<UpstreamResponse, ConnectionFailure> {
    let uri = req.uri().clone();
    let exchange = async {
        let response = client
            .request(req)
            .await
            .map_err(|e| ConnectionFailure::from_error(&*e))?;
        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ConnectionFailure::from_error(&e))?;
        Ok::<_, ConnectionFailure>(UpstreamResponse {
            status: parts.status,
            body,
        })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(response)) => {
            debug!(%uri, status = %response.status, bytes = response.body.len(), "Upstream responded");
            trace!("Upstream body: {}", String::from_utf8_lossy(&response.body));
            Ok(response)
        }
        Ok(Err(failure)) => Err(failure),
        Err(_) => Err(ConnectionFailure::timed_out(timeout)),
    }
}
