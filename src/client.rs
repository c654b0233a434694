//! HTTP client abstraction for forwarding requests to the upstream inference server
//!
//! Handlers only ever talk to the upstream through [`HttpClient`], so the real hyper client can
//! be swapped for a stub in tests.
use async_trait::async_trait;
use axum::response::IntoResponse;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use std::time::Duration;

pub type HyperClient = Client<
    hyper_tls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    axum::body::Body,
>;

/// Send one request, get back either the upstream's response or a connection-level failure.
#[async_trait]
pub trait HttpClient: std::fmt::Debug {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
        self.request(req)
            .await
            .map(|res| res.into_response())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// Connection pool settings for the hyper client.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: 100,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

pub fn create_hyper_client(pool: PoolConfig) -> HyperClient {
    let https = hyper_tls::HttpsConnector::new();

    tracing::debug!(
        "HTTP client pool config: idle_timeout={}s, max_idle_per_host={}",
        pool.idle_timeout.as_secs(),
        pool.max_idle_per_host
    );

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(pool.idle_timeout)
        .pool_max_idle_per_host(pool.max_idle_per_host)
        .pool_timer(hyper_util::rt::TokioTimer::new())
        .build(https)
}
