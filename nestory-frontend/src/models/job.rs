use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Steps sent upstream when the caller gives none (or nothing numeric).
pub const DEFAULT_STEPS: i64 = 10;

/// Three-way view of whatever status string the upstream reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizedStatus {
    Running,
    Done,
    Error,
}

impl NormalizedStatus {
    /// `done|completed|succeeded` and `error|failed` (any case); everything
    /// else, including an empty string, is still running.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "done" | "completed" | "succeeded" => NormalizedStatus::Done,
            "error" | "failed" => NormalizedStatus::Error,
            _ => NormalizedStatus::Running,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NormalizedStatus::Running => "running",
            NormalizedStatus::Done => "done",
            NormalizedStatus::Error => "error",
        }
    }
}

/// Normalized status plus the untouched upstream body for debugging.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: NormalizedStatus,
    pub raw: Value,
}

/// Upstream reachability as seen by `GET {base}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReport {
    pub upstream_status: u16,
    pub snippet: String,
}

/// A submit request as accepted from the browser.
///
/// `prompt` may arrive as any JSON scalar; `steps` may be a number or a
/// numeric string.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub prompt: String,
    pub steps: i64,
}

impl SubmitRequest {
    pub fn from_json(body: &Value) -> Self {
        let prompt = match body.get("prompt") {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        };

        Self {
            prompt,
            steps: steps_from(body.get("steps")),
        }
    }
}

/// Finite numbers are truncated toward zero; anything else means the default.
pub fn steps_from(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(v) if v.is_finite() && v.abs() < i64::MAX as f64 => v.trunc() as i64,
        _ => DEFAULT_STEPS,
    }
}

/// `POST /api/image/submit` success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReply {
    pub ok: bool,
    #[serde(rename = "jobId")]
    pub job_id: String,
}

/// `GET /api/image/status/{jobId}` success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReply {
    pub ok: bool,
    #[serde(rename = "jobId")]
    pub job_id: String,
    pub status: NormalizedStatus,
    pub raw: Value,
}

/// `GET /api/image/ping` success body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingReply {
    pub ok: bool,
    #[serde(rename = "upstreamStatus")]
    pub upstream_status: u16,
    pub snippet: String,
}
