mod config;

use anyhow::Context;
use clap::Parser as _;
use config::{Config, Settings};
use lm_relay::{
    API_CHAT_COMPLETIONS, AppState, HEALTH_CHECK, V1_CHAT_COMPLETIONS,
    build_metrics_layer_and_handle, build_metrics_router, build_router,
    client::create_hyper_client,
};
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Config::parse().resolve().await?;
    info!("Starting lm-relay with config: {:?}", settings);

    let app_state = AppState::with_client(
        settings.upstream.clone(),
        create_hyper_client(settings.pool),
    )
    .with_allowed_origins(settings.allowed_origins.clone());
    let mut router = build_router(app_state);

    if let Some(metrics) = &settings.metrics {
        let (prometheus_layer, handle) = build_metrics_layer_and_handle(metrics.prefix.clone());
        router = router.layer(prometheus_layer);

        let metrics_addr = format!("0.0.0.0:{}", metrics.port);
        let metrics_listener = TcpListener::bind(&metrics_addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener to {metrics_addr}"))?;
        info!("Metrics endpoint listening on {}", metrics_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, build_metrics_router(handle)).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let bind_addr = format!("0.0.0.0:{}", settings.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    log_banner(&settings);

    axum::serve(listener, router).await?;

    Ok(())
}

fn log_banner(settings: &Settings) {
    let local = format!("http://localhost:{}", settings.port);
    info!("=== LM Studio Proxy Server ===");
    info!("Proxy server running on {}", local);
    info!(
        "Proxying requests to {}",
        settings.upstream.base_url_display()
    );
    info!("Available endpoints:");
    info!("- API Endpoint: {local}{API_CHAT_COMPLETIONS}");
    info!("- Alt Endpoint: {local}{V1_CHAT_COMPLETIONS}");
    info!("- Health Check: {local}{HEALTH_CHECK}");
    info!("=============================");
}
