pub mod image_gateway;
pub mod metrics;
pub mod story;

pub use image_gateway::{GatewayError, ImageGateway};
