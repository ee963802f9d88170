pub mod job;
pub mod story;

pub use job::{NormalizedStatus, PingReport, StatusReport, SubmitRequest};
pub use story::{StoryRequest, StoryResponse, TopicSummary, TopicsResponse};
