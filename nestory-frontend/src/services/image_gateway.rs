//! Client for the upstream image generation API.
//!
//! Three job calls (`/submit`, `/status/{id}`, `/result/{id}`) plus a root
//! ping. Every call is a single attempt; failures come back as
//! [`GatewayError`] with enough context (status, body snippet) for the proxy
//! to report them without re-reading the upstream response.

use crate::config::ImageApiSettings;
use crate::models::{PingReport, StatusReport};
use crate::models::job::NormalizedStatus;
use crate::services::metrics;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use service_core::observability::TracedClientExt;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the upstream secret.
pub const API_KEY_HEADER: &str = "X-API-Key";

const PING_SNIPPET_CHARS: usize = 200;
const SUBMIT_SNIPPET_CHARS: usize = 300;
const STATUS_SNIPPET_CHARS: usize = 400;
const RESULT_SNIPPET_CHARS: usize = 400;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Coarse classification used to pick an HTTP status for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Input,
    Transport,
    Protocol,
}

/// Upstream body attached to a non-2xx response.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    Json(Value),
    Text(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Missing IMAGE_API_KEY")]
    MissingApiKey,

    #[error("Missing prompt")]
    EmptyPrompt,

    #[error("Missing jobId")]
    EmptyJobId,

    #[error("fetch failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Upstream returned non-JSON (status {status})")]
    NonJson { status: u16, snippet: String },

    #[error("Upstream responded with status {status}")]
    BadStatus { status: u16, body: UpstreamBody },

    #[error("Upstream response did not include a job id")]
    MissingJobId { details: Value },

    #[error("Upstream response has an unexpected shape: {reason}")]
    UnexpectedShape {
        status: u16,
        reason: String,
        details: Value,
    },

    #[error("Upstream result is not an image (content type {content_type:?})")]
    NotImage {
        status: u16,
        content_type: Option<String>,
    },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::MissingApiKey => ErrorKind::Configuration,
            GatewayError::EmptyPrompt | GatewayError::EmptyJobId => ErrorKind::Input,
            GatewayError::Transport(_) => ErrorKind::Transport,
            GatewayError::NonJson { .. }
            | GatewayError::BadStatus { .. }
            | GatewayError::MissingJobId { .. }
            | GatewayError::UnexpectedShape { .. }
            | GatewayError::NotImage { .. } => ErrorKind::Protocol,
        }
    }

    /// Short machine-readable label for where the call went wrong.
    pub fn stage(&self) -> &'static str {
        match self {
            GatewayError::MissingApiKey => "env",
            GatewayError::EmptyPrompt | GatewayError::EmptyJobId => "validate",
            GatewayError::Transport(_) => "upstream-fetch",
            GatewayError::NonJson { .. } => "upstream-nonjson",
            GatewayError::BadStatus { .. } => "upstream-badstatus",
            GatewayError::MissingJobId { .. } => "missing-jobid",
            GatewayError::UnexpectedShape { .. } => "upstream-shape",
            GatewayError::NotImage { .. } => "upstream-nonimage",
        }
    }
}

#[derive(Debug, Serialize)]
struct UpstreamSubmit<'a> {
    prompt: &'a str,
    steps: i64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpstreamJobId {
    Text(String),
    Number(serde_json::Number),
}

impl UpstreamJobId {
    fn into_string(self) -> String {
        match self {
            UpstreamJobId::Text(s) => s.trim().to_string(),
            UpstreamJobId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpstreamSubmitted {
    #[serde(default)]
    job_id: Option<UpstreamJobId>,
}

#[derive(Debug, Deserialize)]
struct UpstreamJobStatus {
    #[serde(default)]
    status: Option<String>,
}

/// First `max_chars` characters of an upstream body, for diagnostics only.
pub fn snippet(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[derive(Clone)]
pub struct ImageGateway {
    client: Client,
    base_url: String,
    api_key: Option<Secret<String>>,
}

impl ImageGateway {
    pub fn new(settings: &ImageApiSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key().cloned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when a non-blank API key is configured.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn api_key(&self) -> Result<&str, GatewayError> {
        self.api_key
            .as_ref()
            .map(|key| key.expose_secret().as_str())
            .ok_or(GatewayError::MissingApiKey)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Hit the upstream root and report whatever comes back.
    pub async fn ping(&self) -> Result<PingReport, GatewayError> {
        let key = self.api_key()?;

        let outcome: Result<PingReport, GatewayError> = async {
            let response = self
                .client
                .traced_get(&self.url(""))
                .header(API_KEY_HEADER, key)
                .send()
                .await
                .map_err(GatewayError::Transport)?;

            let upstream_status = response.status().as_u16();
            let text = response.text().await.map_err(GatewayError::Transport)?;

            Ok(PingReport {
                upstream_status,
                snippet: snippet(&text, PING_SNIPPET_CHARS),
            })
        }
        .await;

        metrics::record_upstream("ping", &outcome);
        outcome
    }

    /// Submit a generation job and return the upstream job id.
    pub async fn submit(&self, prompt: &str, steps: i64) -> Result<String, GatewayError> {
        let key = self.api_key()?;
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(GatewayError::EmptyPrompt);
        }

        tracing::debug!(prompt_len = prompt.len(), steps, "Submitting image job upstream");

        let outcome: Result<String, GatewayError> = async {
            let response = self
                .client
                .traced_post(&self.url("submit"))
                .header(API_KEY_HEADER, key)
                .json(&UpstreamSubmit { prompt, steps })
                .send()
                .await
                .map_err(GatewayError::Transport)?;

            let status = response.status();
            let text = response.text().await.map_err(GatewayError::Transport)?;

            let body: Value = serde_json::from_str(&text).map_err(|_| GatewayError::NonJson {
                status: status.as_u16(),
                snippet: snippet(&text, SUBMIT_SNIPPET_CHARS),
            })?;

            if !status.is_success() {
                return Err(GatewayError::BadStatus {
                    status: status.as_u16(),
                    body: UpstreamBody::Json(body),
                });
            }

            serde_json::from_value::<UpstreamSubmitted>(body.clone())
                .ok()
                .and_then(|accepted| accepted.job_id)
                .map(UpstreamJobId::into_string)
                .filter(|job_id| !job_id.is_empty())
                .ok_or(GatewayError::MissingJobId { details: body })
        }
        .await;

        match &outcome {
            Ok(job_id) => tracing::info!(job_id = %job_id, "Upstream accepted image job"),
            Err(e) => tracing::warn!(error = %e, stage = e.stage(), "Upstream submit failed"),
        }

        metrics::record_upstream("submit", &outcome);
        outcome
    }

    /// Fetch and normalize the status of a job.
    pub async fn status(&self, job_id: &str) -> Result<StatusReport, GatewayError> {
        let key = self.api_key()?;
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(GatewayError::EmptyJobId);
        }

        let outcome: Result<StatusReport, GatewayError> = async {
            let url = self.url(&format!("status/{}", urlencoding::encode(job_id)));
            let response = self
                .client
                .traced_get(&url)
                .header(API_KEY_HEADER, key)
                .send()
                .await
                .map_err(GatewayError::Transport)?;

            let status = response.status();
            let text = response.text().await.map_err(GatewayError::Transport)?;

            let body: Value = serde_json::from_str(&text).map_err(|_| GatewayError::NonJson {
                status: status.as_u16(),
                snippet: snippet(&text, STATUS_SNIPPET_CHARS),
            })?;

            if !status.is_success() {
                return Err(GatewayError::BadStatus {
                    status: status.as_u16(),
                    body: UpstreamBody::Json(body),
                });
            }

            if !body.is_object() {
                return Err(GatewayError::UnexpectedShape {
                    status: status.as_u16(),
                    reason: "expected a JSON object".to_string(),
                    details: body,
                });
            }

            let parsed: UpstreamJobStatus =
                serde_json::from_value(body.clone()).map_err(|e| GatewayError::UnexpectedShape {
                    status: status.as_u16(),
                    reason: e.to_string(),
                    details: body.clone(),
                })?;

            Ok(StatusReport {
                status: NormalizedStatus::from_raw(parsed.status.as_deref().unwrap_or_default()),
                raw: body,
            })
        }
        .await;

        if let Ok(report) = &outcome {
            tracing::debug!(job_id = %job_id, status = report.status.as_str(), "Upstream job status");
        }

        metrics::record_upstream("status", &outcome);
        outcome
    }

    /// Download the finished image. The caller is expected to have seen
    /// `done` from [`ImageGateway::status`] first; this does not re-check.
    pub async fn result(&self, job_id: &str) -> Result<Bytes, GatewayError> {
        let key = self.api_key()?;
        let job_id = job_id.trim();
        if job_id.is_empty() {
            return Err(GatewayError::EmptyJobId);
        }

        let outcome: Result<Bytes, GatewayError> = async {
            let url = self.url(&format!("result/{}", urlencoding::encode(job_id)));
            let response = self
                .client
                .traced_get(&url)
                .header(API_KEY_HEADER, key)
                .send()
                .await
                .map_err(GatewayError::Transport)?;

            let status = response.status();

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(GatewayError::BadStatus {
                    status: status.as_u16(),
                    body: UpstreamBody::Text(snippet(&text, RESULT_SNIPPET_CHARS)),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string());

            let image = response.bytes().await.map_err(GatewayError::Transport)?;

            let declared_image = content_type
                .as_deref()
                .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"));

            if !declared_image && !image.starts_with(PNG_SIGNATURE) {
                return Err(GatewayError::NotImage {
                    status: status.as_u16(),
                    content_type,
                });
            }

            Ok(image)
        }
        .await;

        match &outcome {
            Ok(image) => tracing::info!(job_id = %job_id, size = image.len(), "Fetched image result"),
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, stage = e.stage(), "Upstream result failed"),
        }

        metrics::record_upstream("result", &outcome);
        outcome
    }
}
