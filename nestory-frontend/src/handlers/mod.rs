pub mod app;
pub mod image;
pub mod metrics;
pub mod story;
