use crate::models::{StoryRequest, StoryResponse, TopicsResponse};
use crate::services::story;
use axum::{body::Bytes, extract::rejection::BytesRejection, Json};
use service_core::error::AppError;

pub async fn list_topics() -> Json<TopicsResponse> {
    Json(TopicsResponse {
        topics: story::list_topics(),
    })
}

/// `POST /api/story` with `{child, topic}`. Every input problem, including
/// an unparseable or oversized body, is a 400 `{error}`. A blank body reads
/// as `{}`.
pub async fn create_story(
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<StoryResponse>, AppError> {
    let body = body.map_err(|rejection| {
        AppError::BadRequest(anyhow::anyhow!(
            "Unreadable request body: {}",
            rejection.body_text()
        ))
    })?;

    let request: StoryRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StoryRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid JSON body: {}", e)))?
    };

    let child = request.child.unwrap_or_default();
    let topic = request.topic.unwrap_or_default();

    let story = story::generate(&child, &topic).map_err(|e| {
        tracing::debug!(topic = %topic, error = %e, "Rejected story request");
        AppError::BadRequest(anyhow::Error::new(e))
    })?;

    Ok(Json(story))
}
