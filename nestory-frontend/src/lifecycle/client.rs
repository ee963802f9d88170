//! Client side of the same-origin proxy: what the job controller and the CLI
//! talk to.

use crate::models::{NormalizedStatus, StoryResponse, TopicSummary, TopicsResponse};
use crate::services::image_gateway::snippet;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client};
use serde_json::{json, Value};
use service_core::observability::TracedClientExt;
use thiserror::Error;

const REPLY_SNIPPET_CHARS: usize = 200;
const RESULT_SNIPPET_CHARS: usize = 250;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{0}")]
    Transport(#[from] reqwest::Error),

    #[error("{op} returned non-JSON ({status}): {snippet}")]
    NonJson {
        op: &'static str,
        status: u16,
        snippet: String,
    },

    /// The proxy's own `error` message, or `"<Op> failed (<status>)"` when
    /// the reply carried none.
    #[error("{message}")]
    Rejected {
        op: &'static str,
        status: u16,
        message: String,
    },

    #[error("Result failed ({status}): {snippet}")]
    BadResult { status: u16, snippet: String },

    #[error("Missing jobId from submit")]
    MissingJobId,
}

/// The three job calls the controller needs.
#[async_trait]
pub trait JobApi: Send + Sync {
    async fn submit(&self, prompt: &str, steps: i64) -> Result<String, ClientError>;
    async fn status(&self, job_id: &str) -> Result<NormalizedStatus, ClientError>;
    async fn result(&self, job_id: &str) -> Result<Bytes, ClientError>;
}

#[derive(Clone)]
pub struct ProxyClient {
    client: Client,
    base_url: String,
}

impl ProxyClient {
    pub fn new(base_url: &str) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn topics(&self) -> Result<Vec<TopicSummary>, ClientError> {
        let response = self.client.traced_get(&self.url("/api/story")).send().await?;
        let body = read_json("Topics", response).await?;

        let topics: TopicsResponse =
            serde_json::from_value(body).map_err(|e| ClientError::Rejected {
                op: "Topics",
                status: 200,
                message: format!("Topics reply had an unexpected shape: {}", e),
            })?;
        Ok(topics.topics)
    }

    pub async fn story(&self, child: &str, topic: &str) -> Result<StoryResponse, ClientError> {
        let response = self
            .client
            .traced_post(&self.url("/api/story"))
            .json(&json!({ "child": child, "topic": topic }))
            .send()
            .await?;
        let body = read_json("Story", response).await?;

        serde_json::from_value(body).map_err(|e| ClientError::Rejected {
            op: "Story",
            status: 200,
            message: format!("Story reply had an unexpected shape: {}", e),
        })
    }
}

/// Parse a proxy reply as JSON and surface its `error` when it is not OK.
async fn read_json(op: &'static str, response: reqwest::Response) -> Result<Value, ClientError> {
    let status = response.status();
    let text = response.text().await?;

    let body: Value = serde_json::from_str(&text).map_err(|_| ClientError::NonJson {
        op,
        status: status.as_u16(),
        snippet: snippet(&text, REPLY_SNIPPET_CHARS),
    })?;

    if !status.is_success() {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} failed ({})", op, status.as_u16()));

        return Err(ClientError::Rejected {
            op,
            status: status.as_u16(),
            message,
        });
    }

    Ok(body)
}

#[async_trait]
impl JobApi for ProxyClient {
    async fn submit(&self, prompt: &str, steps: i64) -> Result<String, ClientError> {
        let response = self
            .client
            .traced_post(&self.url("/api/image/submit"))
            .json(&json!({ "prompt": prompt, "steps": steps }))
            .send()
            .await?;
        let body = read_json("Submit", response).await?;

        body.get("jobId")
            .and_then(Value::as_str)
            .filter(|job_id| !job_id.is_empty())
            .map(str::to_string)
            .ok_or(ClientError::MissingJobId)
    }

    async fn status(&self, job_id: &str) -> Result<NormalizedStatus, ClientError> {
        let url = self.url(&format!("/api/image/status/{}", urlencoding::encode(job_id)));
        let response = self.client.traced_get(&url).send().await?;
        let body = read_json("Status", response).await?;

        Ok(body
            .get("status")
            .and_then(Value::as_str)
            .map(NormalizedStatus::from_raw)
            .unwrap_or(NormalizedStatus::Running))
    }

    async fn result(&self, job_id: &str) -> Result<Bytes, ClientError> {
        let url = self.url(&format!("/api/image/result/{}", urlencoding::encode(job_id)));
        let response = self.client.traced_get(&url).send().await?;

        let status = response.status();
        let is_png = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|content_type| content_type.contains("image/png"));

        if !status.is_success() || !is_png {
            let text = response.text().await.unwrap_or_default();
            return Err(ClientError::BadResult {
                status: status.as_u16(),
                snippet: snippet(&text, RESULT_SNIPPET_CHARS),
            });
        }

        Ok(response.bytes().await?)
    }
}
