//! The `{ok:false, where, error, ...}` envelope returned by the image proxy.

use crate::services::image_gateway::{ErrorKind, GatewayError, UpstreamBody};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{Map, Value};
use std::error::Error as _;

/// Which proxy endpoint produced the error; the first half of `where`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Ping,
    Submit,
    Status,
    Result,
    Server,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Ping => "ping",
            Endpoint::Submit => "submit",
            Endpoint::Status => "status",
            Endpoint::Result => "result",
            Endpoint::Server => "server",
        }
    }
}

#[derive(Debug)]
pub struct ProxyError {
    pub status: StatusCode,
    pub location: String,
    pub message: String,
    pub context: Map<String, Value>,
}

impl ProxyError {
    pub fn new(
        status: StatusCode,
        endpoint: Endpoint,
        stage: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            location: format!("{}:{}", endpoint.as_str(), stage),
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn bad_request(endpoint: Endpoint, stage: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, endpoint, stage, message)
    }

    pub fn internal(endpoint: Endpoint, stage: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, endpoint, stage, message)
    }

    /// Attach an extra top-level field to the envelope.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn missing_api_key(endpoint: Endpoint) -> Self {
        Self::from_gateway(endpoint, GatewayError::MissingApiKey)
    }

    /// Map a gateway failure to its status code and diagnostic context:
    /// 500 for configuration, 400 for caller input, 502 for anything upstream.
    pub fn from_gateway(endpoint: Endpoint, err: GatewayError) -> Self {
        let status = match err.kind() {
            ErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Input => StatusCode::BAD_REQUEST,
            ErrorKind::Transport | ErrorKind::Protocol => StatusCode::BAD_GATEWAY,
        };
        let stage = err.stage();

        match err {
            GatewayError::MissingApiKey => Self::new(
                status,
                endpoint,
                stage,
                "Missing IMAGE_API_KEY (server did not load env vars)",
            ),
            GatewayError::EmptyPrompt => Self::new(status, endpoint, stage, "Missing prompt"),
            GatewayError::EmptyJobId => Self::new(status, endpoint, stage, "Missing jobId"),
            GatewayError::Transport(e) => {
                let details = e
                    .source()
                    .map(|source| source.to_string())
                    .unwrap_or_else(|| e.to_string());
                Self::new(status, endpoint, stage, "fetch failed")
                    .with("details", details)
                    .with("timeout", e.is_timeout())
            }
            GatewayError::NonJson { status: upstream, snippet } => {
                Self::new(status, endpoint, stage, "Upstream returned non-JSON")
                    .with("status", upstream)
                    .with("snippet", snippet)
            }
            GatewayError::BadStatus {
                status: upstream,
                body,
            } => {
                let error = Self::new(
                    status,
                    endpoint,
                    stage,
                    format!("Upstream {} failed", endpoint.as_str()),
                )
                .with("status", upstream);
                match body {
                    UpstreamBody::Json(details) => error.with("details", details),
                    UpstreamBody::Text(snippet) => error.with("snippet", snippet),
                }
            }
            GatewayError::MissingJobId { details } => Self::new(
                status,
                endpoint,
                stage,
                "Upstream response did not include a job id",
            )
            .with("details", details),
            GatewayError::UnexpectedShape {
                status: upstream,
                reason,
                details,
            } => Self::new(status, endpoint, stage, "Upstream returned an unexpected body")
                .with("status", upstream)
                .with("reason", reason)
                .with("details", details),
            GatewayError::NotImage {
                status: upstream,
                content_type,
            } => Self::new(status, endpoint, stage, "Upstream result is not an image")
                .with("status", upstream)
                .with("contentType", content_type.map(Value::String).unwrap_or(Value::Null)),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(
                status = %self.status,
                location = %self.location,
                error = %self.message,
                "Image proxy request failed"
            );
        }

        let mut body = Map::new();
        body.insert("ok".to_string(), Value::Bool(false));
        body.insert("where".to_string(), Value::String(self.location));
        body.insert("error".to_string(), Value::String(self.message));
        for (key, value) in self.context {
            body.entry(key).or_insert(value);
        }

        (self.status, Json(Value::Object(body))).into_response()
    }
}
