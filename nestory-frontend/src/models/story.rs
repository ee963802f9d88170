use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSummary {
    pub key: String,
    pub title: String,
}

/// `GET /api/story` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsResponse {
    pub topics: Vec<TopicSummary>,
}

/// `POST /api/story` body. Both fields are optional on the wire so that a
/// missing name is reported as such rather than as a malformed body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryRequest {
    #[serde(default)]
    pub child: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryResponse {
    pub topic_title: String,
    pub story: String,
}
