//! lm-relay - a local forwarding gateway for LM Studio
//!
//! This library accepts chat-completion requests from a frontend application and relays them to
//! a locally running, OpenAI-compatible inference server. Upstream answers are returned as-is;
//! failures are reported with a normalized JSON envelope.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, instrument};

pub mod client;
pub mod cors;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod upstream;

use client::{HttpClient, HyperClient, PoolConfig};
use cors::AllowedOrigins;
use upstream::Upstream;

pub const API_CHAT_COMPLETIONS: &str = "/api/chat/completions";
pub const V1_CHAT_COMPLETIONS: &str = "/v1/chat/completions";
pub const HEALTH_CHECK: &str = "/test";
pub const API_CONNECTION_TEST: &str = "/test-api-connection";

/// The main application state: the HTTP client used to reach the upstream and the immutable
/// gateway configuration.
#[derive(Clone, Debug)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub upstream: Upstream,
    pub allowed_origins: AllowedOrigins,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client
    pub fn new(upstream: Upstream) -> Self {
        Self::with_client(upstream, client::create_hyper_client(PoolConfig::default()))
    }
}

impl<T: HttpClient> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing)
    pub fn with_client(upstream: Upstream, http_client: T) -> Self {
        Self {
            http_client,
            upstream,
            allowed_origins: AllowedOrigins::Any,
        }
    }

    pub fn with_allowed_origins(mut self, allowed_origins: AllowedOrigins) -> Self {
        self.allowed_origins = allowed_origins;
        self
    }
}

/// Build the main router for the gateway
/// This creates routes for:
/// - `POST /api/chat/completions` - Validated chat completions, upstream errors wrapped
/// - `POST /v1/chat/completions` - Pass-through chat completions
/// - `GET /test` - Local health check
/// - `GET /test-api-connection` - Upstream connectivity probe
///
/// Any other path answers 404, and a known path with the wrong method answers 405.
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    let cors = cors::cors_layer(&state.allowed_origins);
    Router::new()
        .route(
            API_CHAT_COMPLETIONS,
            post(handlers::api_chat_completions::<T>)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            V1_CHAT_COMPLETIONS,
            post(handlers::v1_chat_completions::<T>)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            HEALTH_CHECK,
            get(handlers::health::<T>)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .route(
            API_CONNECTION_TEST,
            get(handlers::test_api_connection::<T>)
                .options(handlers::preflight)
                .fallback(handlers::method_not_allowed),
        )
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// The prefix is prepended to every metric name, e.g. `lm_relay_http_requests_total`.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Stands in for the upstream: records every request and answers with a fixed response,
    /// or fails the way a dead upstream would.
    pub struct MockHttpClient {
        pub requests: Arc<Mutex<Vec<MockRequest>>>,
        outcome: Arc<dyn Fn() -> Result<axum::response::Response, std::io::Error> + Send + Sync>,
        delay: Option<Duration>,
    }

    #[derive(Debug, Clone)]
    pub struct MockRequest {
        pub method: String,
        pub uri: String,
        pub headers: Vec<(String, String)>,
        pub body: Vec<u8>,
    }

    impl MockRequest {
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        }
    }

    impl MockHttpClient {
        pub fn new(status: StatusCode, body: &str) -> Self {
            let body = body.to_string();
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                outcome: Arc::new(move || {
                    Ok(axum::response::Response::builder()
                        .status(status)
                        .header("content-type", "application/json")
                        .body(axum::body::Body::from(body.clone()))
                        .unwrap())
                }),
                delay: None,
            }
        }

        /// Every request fails before a response is produced, with the given io error kind.
        pub fn failing(kind: std::io::ErrorKind) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                outcome: Arc::new(move || Err(std::io::Error::new(kind, "mock connection failure"))),
                delay: None,
            }
        }

        pub fn refusing() -> Self {
            Self::failing(std::io::ErrorKind::ConnectionRefused)
        }

        /// Wait this long before answering.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn get_requests(&self) -> Vec<MockRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl std::fmt::Debug for MockHttpClient {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockHttpClient")
                .field("requests", &self.requests)
                .field("outcome", &"<closure>")
                .field("delay", &self.delay)
                .finish()
        }
    }

    impl Clone for MockHttpClient {
        fn clone(&self) -> Self {
            Self {
                requests: Arc::clone(&self.requests),
                outcome: Arc::clone(&self.outcome),
                delay: self.delay,
            }
        }
    }

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn request(
            &self,
            req: axum::extract::Request,
        ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
            let method = req.method().to_string();
            let uri = req.uri().to_string();
            let headers = req
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
                .collect();

            let body = axum::body::to_bytes(req.into_body(), usize::MAX)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?
                .to_vec();

            self.requests.lock().unwrap().push(MockRequest {
                method,
                uri,
                headers,
                body,
            });

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            (self.outcome)().map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
        }
    }
}
