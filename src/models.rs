/// Wire types for the gateway's own endpoints.
///
/// Chat completion bodies are never re-serialized: [`ChatCompletionFields`] only looks at the two
/// fields the validated route requires, and the original bytes are what get forwarded.
use serde::{Deserialize, Serialize};

/// The part of a chat completion request `/api/chat/completions` insists on.
///
/// Only presence is checked: a field that is missing or `null` is absent, any other value is
/// accepted as is.
#[derive(Debug, Clone)]
pub(crate) struct ChatCompletionFields {
    pub(crate) model: serde_json::Value,
    pub(crate) messages: serde_json::Value,
}

impl ChatCompletionFields {
    /// Parse just enough of `body` to check the required fields. Anything that isn't a JSON
    /// object is treated as missing them.
    pub(crate) fn extract(body: &[u8]) -> Option<Self> {
        let mut object: serde_json::Map<String, serde_json::Value> =
            serde_json::from_slice(body).ok()?;
        let model = object.remove("model").filter(|v| !v.is_null())?;
        let messages = object.remove("messages").filter(|v| !v.is_null())?;
        Some(Self { model, messages })
    }

    /// The model identifier for logging; non-string values are shown as JSON.
    pub(crate) fn model_label(&self) -> String {
        match &self.model {
            serde_json::Value::String(model) => model.clone(),
            other => other.to_string(),
        }
    }

    /// Number of messages when `messages` is an array, zero otherwise.
    pub(crate) fn message_count(&self) -> usize {
        self.messages.as_array().map_or(0, Vec::len)
    }
}

/// Paths served by the gateway, as advertised by `GET /test`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    pub chat_completions: String,
    pub alt_chat_completions: String,
    pub health_check: String,
    pub api_connection_test: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            chat_completions: crate::API_CHAT_COMPLETIONS.into(),
            alt_chat_completions: crate::V1_CHAT_COMPLETIONS.into(),
            health_check: crate::HEALTH_CHECK.into(),
            api_connection_test: crate::API_CONNECTION_TEST.into(),
        }
    }
}

/// Body of `GET /test`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
    pub endpoints: Endpoints,
    pub lm_studio_target: String,
}

impl HealthResponse {
    pub fn new(upstream_base: &str) -> Self {
        Self {
            status: "ok".into(),
            message: "Proxy server is running".into(),
            endpoints: Endpoints::default(),
            lm_studio_target: upstream_base.to_string(),
        }
    }
}

/// Body of a successful `GET /test-api-connection`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionTestResponse {
    pub status: String,
    pub message: String,
    /// Whatever the upstream returned from `/v1/models`.
    pub models: serde_json::Value,
}

impl ConnectionTestResponse {
    pub fn new(models: serde_json::Value) -> Self {
        Self {
            status: "ok".into(),
            message: "Successfully connected to LM Studio API".into(),
            models,
        }
    }
}
