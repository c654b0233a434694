//! Request-level failures and the JSON envelope they are reported with.
//!
//! [`GatewayError::status_code`] and [`GatewayError::envelope`] are plain functions of the
//! error value; no handler builds an error body by hand.
use axum::Json;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// How an outbound call failed before any HTTP response was available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Nothing is listening at the upstream address.
    Refused,
    TimedOut,
    Other,
}

/// An outbound call that never produced an upstream status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConnectionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl ConnectionFailure {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Other,
            message: message.into(),
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self {
            kind: FailureKind::TimedOut,
            message: format!("timeout of {}ms exceeded", after.as_millis()),
        }
    }

    /// Classify an error from the HTTP client by walking its source chain for an
    /// [`std::io::Error`] whose kind tells us what happened.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut kind = FailureKind::Other;
        let mut messages: Vec<String> = Vec::new();
        let mut current = Some(err);

        while let Some(e) = current {
            if kind == FailureKind::Other
                && let Some(io) = e.downcast_ref::<std::io::Error>()
            {
                kind = match io.kind() {
                    std::io::ErrorKind::ConnectionRefused => FailureKind::Refused,
                    std::io::ErrorKind::TimedOut => FailureKind::TimedOut,
                    _ => FailureKind::Other,
                };
            }
            let text = e.to_string();
            if messages.last() != Some(&text) {
                messages.push(text);
            }
            current = e.source();
        }

        Self {
            kind,
            message: messages.join(": "),
        }
    }
}

/// The normalized JSON body returned to callers on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ErrorEnvelope {
    fn new(error: &str, message: impl Into<String>) -> Self {
        Self {
            error: error.to_string(),
            message: message.into(),
            details: None,
            suggestion: None,
            status_code: None,
            data: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("The request must include model and messages fields")]
    MissingFields,

    /// The upstream answered a chat completion with a non-success status.
    #[error("Request failed with status code {}", .status.as_u16())]
    UpstreamStatus {
        status: StatusCode,
        body: serde_json::Value,
    },

    /// A chat completion could not be delivered.
    #[error(transparent)]
    Proxy(ConnectionFailure),

    /// The connectivity probe could not reach the upstream.
    #[error("{failure}")]
    ProbeConnection {
        #[source]
        failure: ConnectionFailure,
        upstream_port: Option<u16>,
    },

    /// The connectivity probe reached the upstream but got a non-success status.
    #[error("Request failed with status code {}", .status.as_u16())]
    ProbeStatus {
        status: StatusCode,
        body: serde_json::Value,
    },

    #[error("Endpoint not found")]
    NotFound,

    #[error("The request method is not allowed for this endpoint")]
    MethodNotAllowed { method: Method, path: String },
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingFields => StatusCode::BAD_REQUEST,
            GatewayError::UpstreamStatus { status, .. } => *status,
            GatewayError::Proxy(_)
            | GatewayError::ProbeConnection { .. }
            | GatewayError::ProbeStatus { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let message = self.to_string();
        match self {
            GatewayError::MissingFields => ErrorEnvelope::new("Missing required fields", message),
            GatewayError::UpstreamStatus { body, .. } => ErrorEnvelope {
                details: Some(body.clone()),
                ..ErrorEnvelope::new("LM Studio API Error", message)
            },
            GatewayError::Proxy(_) => ErrorEnvelope::new("Proxy Error", message),
            GatewayError::ProbeConnection {
                failure,
                upstream_port,
            } => ErrorEnvelope {
                suggestion: (failure.kind == FailureKind::Refused)
                    .then(|| refused_suggestion(*upstream_port)),
                ..ErrorEnvelope::new("API Connection Error", message)
            },
            GatewayError::ProbeStatus { status, body } => ErrorEnvelope {
                status_code: Some(status.as_u16()),
                data: Some(body.clone()),
                ..ErrorEnvelope::new("API Connection Error", message)
            },
            GatewayError::NotFound => ErrorEnvelope::new("Not Found", message),
            GatewayError::MethodNotAllowed { .. } => {
                ErrorEnvelope::new("Method Not Allowed", message)
            }
        }
    }
}

fn refused_suggestion(port: Option<u16>) -> String {
    match port {
        Some(port) => {
            format!("Make sure LM Studio is running and the API is enabled on port {port}")
        }
        None => "Make sure LM Studio is running and the API is enabled".to_string(),
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if let GatewayError::MethodNotAllowed { method, path } = &self {
            warn!(%method, %path, "Method not allowed");
        }
        (status, Json(self.envelope())).into_response()
    }
}
