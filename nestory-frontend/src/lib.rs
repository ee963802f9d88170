pub mod config;
pub mod error;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use services::ImageGateway;
use std::sync::Arc;

pub use startup::{build_router, Application};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ImageGateway>,
}

impl AppState {
    pub fn new(gateway: ImageGateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }
}
