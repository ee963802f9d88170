#![allow(dead_code)]

use axum::{body::to_bytes, response::Response, Router};
use nestory_frontend::config::{ImageApiSettings, ServerSettings, Settings, TelemetrySettings};
use nestory_frontend::services::ImageGateway;
use nestory_frontend::startup::{build_router, Application};
use nestory_frontend::AppState;
use secrecy::Secret;
use serde_json::Value;

pub const TEST_API_KEY: &str = "test-image-key";

/// Smallest byte string the proxy recognises as a PNG.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";

pub fn test_settings(upstream_base: &str, api_key: Option<&str>) -> Settings {
    Settings {
        server: ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0, // Random port
        },
        image_api: ImageApiSettings {
            base_url: upstream_base.to_string(),
            api_key: api_key.map(|key| Secret::new(key.to_string())),
            timeout_secs: 5,
        },
        telemetry: TelemetrySettings::default(),
    }
}

/// Router wired to `upstream_base`, for `oneshot` tests.
pub fn test_router(upstream_base: &str, api_key: Option<&str>) -> Router {
    let settings = test_settings(upstream_base, api_key);
    let gateway = ImageGateway::new(&settings.image_api).expect("Failed to build gateway");
    build_router(AppState::new(gateway))
}

pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    serde_json::from_slice(&bytes).expect("Body is not JSON")
}

pub struct TestApp {
    pub address: String,
    pub port: u16,
}

impl TestApp {
    pub async fn spawn(upstream_base: &str, api_key: Option<&str>) -> Self {
        let app = Application::build(test_settings(upstream_base, api_key))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to answer
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp { address, port }
    }
}
