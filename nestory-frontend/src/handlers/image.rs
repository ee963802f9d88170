//! Same-origin proxy for the image generation API.
//!
//! The browser never sees the upstream key: each handler checks that the key
//! is configured, forwards a single call through [`ImageGateway`] and turns
//! any failure into a [`ProxyError`] envelope.
//!
//! [`ImageGateway`]: crate::services::ImageGateway

use crate::error::{Endpoint, ProxyError};
use crate::models::job::{PingReply, StatusReply, SubmitReply, SubmitRequest};
use crate::services::image_gateway::snippet;
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, PathRejection},
        Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;

const RAW_BODY_SNIPPET_CHARS: usize = 200;

pub async fn ping(State(state): State<AppState>) -> Result<Json<PingReply>, ProxyError> {
    if !state.gateway.is_configured() {
        return Err(ProxyError::missing_api_key(Endpoint::Ping));
    }

    let report = state.gateway.ping().await.map_err(|e| {
        ProxyError::from_gateway(Endpoint::Ping, e).with("baseUrl", state.gateway.base_url())
    })?;

    Ok(Json(PingReply {
        ok: true,
        upstream_status: report.upstream_status,
        snippet: report.snippet,
    }))
}

/// `POST /api/image/submit` with `{prompt, steps?}`.
///
/// The body is read raw so that malformed JSON and oversized bodies still get
/// the envelope instead of axum's plain-text rejection.
pub async fn submit(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SubmitReply>, ProxyError> {
    if !state.gateway.is_configured() {
        return Err(ProxyError::missing_api_key(Endpoint::Submit));
    }

    let body = body.map_err(|rejection| {
        ProxyError::new(
            rejection.status(),
            Endpoint::Submit,
            "body",
            "Unreadable request body",
        )
        .with("details", rejection.body_text())
    })?;

    let payload: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(&body).map_err(|_| {
            let raw = String::from_utf8_lossy(&body);
            ProxyError::bad_request(Endpoint::Submit, "body", "Invalid JSON body")
                .with("raw", snippet(&raw, RAW_BODY_SNIPPET_CHARS))
        })?
    };

    let request = SubmitRequest::from_json(&payload);
    if request.prompt.is_empty() {
        return Err(ProxyError::bad_request(
            Endpoint::Submit,
            "validate",
            "Missing prompt",
        ));
    }

    let job_id = state
        .gateway
        .submit(&request.prompt, request.steps)
        .await
        .map_err(|e| ProxyError::from_gateway(Endpoint::Submit, e))?;

    Ok(Json(SubmitReply { ok: true, job_id }))
}

fn job_id_from_path(
    endpoint: Endpoint,
    path: Result<Path<String>, PathRejection>,
) -> Result<String, ProxyError> {
    let raw = match path {
        Ok(Path(job_id)) => job_id,
        Err(rejection) => {
            return Err(
                ProxyError::bad_request(endpoint, "validate", "Missing jobId")
                    .with("details", rejection.body_text()),
            )
        }
    };

    let job_id = raw.trim().to_string();
    if job_id.is_empty() {
        return Err(ProxyError::bad_request(endpoint, "validate", "Missing jobId"));
    }
    Ok(job_id)
}

pub async fn status(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<StatusReply>, ProxyError> {
    if !state.gateway.is_configured() {
        return Err(ProxyError::missing_api_key(Endpoint::Status));
    }
    let job_id = job_id_from_path(Endpoint::Status, path)?;

    let report = state.gateway.status(&job_id).await.map_err(|e| {
        ProxyError::from_gateway(Endpoint::Status, e).with("baseUrl", state.gateway.base_url())
    })?;

    Ok(Json(StatusReply {
        ok: true,
        job_id,
        status: report.status,
        raw: report.raw,
    }))
}

/// Streams the upstream bytes back untouched as `image/png`.
pub async fn result(
    State(state): State<AppState>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Response, ProxyError> {
    if !state.gateway.is_configured() {
        return Err(ProxyError::missing_api_key(Endpoint::Result));
    }
    let job_id = job_id_from_path(Endpoint::Result, path)?;

    let image = state.gateway.result(&job_id).await.map_err(|e| {
        ProxyError::from_gateway(Endpoint::Result, e).with("baseUrl", state.gateway.base_url())
    })?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        image,
    )
        .into_response())
}

fn missing_job_id(state: &AppState, endpoint: Endpoint) -> ProxyError {
    if !state.gateway.is_configured() {
        return ProxyError::missing_api_key(endpoint);
    }
    ProxyError::bad_request(endpoint, "validate", "Missing jobId")
}

/// `/api/image/status/` with nothing after the slash.
pub async fn status_without_job_id(State(state): State<AppState>) -> ProxyError {
    missing_job_id(&state, Endpoint::Status)
}

/// `/api/image/result/` with nothing after the slash.
pub async fn result_without_job_id(State(state): State<AppState>) -> ProxyError {
    missing_job_id(&state, Endpoint::Result)
}
