/// Axum handlers for the gateway
use crate::AppState;
use crate::client::HttpClient;
use crate::errors::{ConnectionFailure, GatewayError};
use crate::models::{ChatCompletionFields, ConnectionTestResponse, HealthResponse};
use crate::upstream::{self, UpstreamResponse};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, error, info, instrument, warn};

/// `POST /api/chat/completions`: checks for `model` and `messages`, forwards, and wraps upstream
/// error statuses in an envelope.
#[instrument(skip(state, body))]
pub async fn api_chat_completions<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let Some(fields) = ChatCompletionFields::extract(&body) else {
        warn!("Rejecting chat completion without model and messages");
        return Err(GatewayError::MissingFields);
    };
    info!(
        model = %fields.model_label(),
        messages = fields.message_count(),
        "Forwarding chat completion"
    );

    let response = forward_chat_completion(&state, body)
        .await
        .map_err(GatewayError::Proxy)?;

    if !response.status.is_success() {
        error!(
            status = %response.status,
            "Upstream rejected chat completion: {}",
            String::from_utf8_lossy(&response.body)
        );
        return Err(GatewayError::UpstreamStatus {
            status: response.status,
            body: response.body_json(),
        });
    }

    Ok(json_response(response))
}

/// `POST /v1/chat/completions`: forwards anything and passes the upstream's answer through
/// untouched, error statuses included.
#[instrument(skip(state, body))]
pub async fn v1_chat_completions<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let response = forward_chat_completion(&state, body)
        .await
        .map_err(GatewayError::Proxy)?;
    Ok(json_response(response))
}

async fn forward_chat_completion<T: HttpClient>(
    state: &AppState<T>,
    body: Bytes,
) -> Result<UpstreamResponse, ConnectionFailure> {
    info!(
        "Forwarding to upstream at: {}/{}",
        state.upstream.base_url_display(),
        upstream::CHAT_COMPLETIONS_PATH
    );
    debug!("Request body: {}", String::from_utf8_lossy(&body));

    let req = state.upstream.chat_completions_request(body)?;
    match upstream::send(&state.http_client, req, state.upstream.chat_timeout).await {
        Ok(response) => {
            info!(status = %response.status, "Upstream response status");
            debug!(
                "Upstream response: {}",
                String::from_utf8_lossy(&response.body)
            );
            Ok(response)
        }
        Err(failure) => {
            error!(kind = ?failure.kind, "Error while forwarding to upstream: {}", failure);
            Err(failure)
        }
    }
}

fn json_response(response: UpstreamResponse) -> Response {
    (
        response.status,
        [(header::CONTENT_TYPE, "application/json")],
        response.body,
    )
        .into_response()
}

/// `GET /test`: answers locally, never touches the upstream.
#[instrument(skip(state))]
pub async fn health<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
) -> Json<HealthResponse> {
    Json(HealthResponse::new(state.upstream.base_url_display()))
}

/// `GET /test-api-connection`: asks the upstream for its model list.
#[instrument(skip(state))]
pub async fn test_api_connection<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
) -> Result<Json<ConnectionTestResponse>, GatewayError> {
    info!(
        "Testing connection to upstream API at: {}",
        state.upstream.base_url_display()
    );
    let probe_failed = |failure: ConnectionFailure| {
        error!(kind = ?failure.kind, "Error connecting to upstream API: {}", failure);
        GatewayError::ProbeConnection {
            failure,
            upstream_port: state.upstream.port(),
        }
    };

    let req = state.upstream.models_request().map_err(probe_failed)?;
    let response = upstream::send(&state.http_client, req, state.upstream.probe_timeout)
        .await
        .map_err(probe_failed)?;

    if !response.status.is_success() {
        error!(status = %response.status, "Upstream API connection test failed");
        return Err(GatewayError::ProbeStatus {
            status: response.status,
            body: response.body_json(),
        });
    }

    info!("Upstream API connection test successful");
    debug!(
        "Available models: {}",
        String::from_utf8_lossy(&response.body)
    );
    Ok(Json(ConnectionTestResponse::new(response.body_json())))
}

/// Bare `OPTIONS` on a known route. Real preflights are answered by the CORS layer first.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn method_not_allowed(method: Method, uri: Uri) -> GatewayError {
    GatewayError::MethodNotAllowed {
        method,
        path: uri.path().to_string(),
    }
}

pub async fn not_found(method: Method, uri: Uri) -> GatewayError {
    debug!(%method, path = %uri.path(), "No route matched");
    GatewayError::NotFound
}
