use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub server: ServerSettings,
    pub image_api: ImageApiSettings,
    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ImageApiSettings {
    /// Root URL of the upstream image generation service.
    pub base_url: String,
    /// Sent as `X-API-Key`. Left unset the server still starts, but every
    /// image endpoint answers 500 until it is configured.
    #[serde(default)]
    pub api_key: Option<Secret<String>>,
    /// Per-request timeout for upstream calls.
    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,
}

impl ImageApiSettings {
    /// The configured key, treating a blank value as absent.
    pub fn api_key(&self) -> Option<&Secret<String>> {
        self.api_key
            .as_ref()
            .filter(|key| !key.expose_secret().trim().is_empty())
    }
}

fn default_upstream_timeout() -> u64 {
    120
}

#[derive(Deserialize, Clone, Debug)]
pub struct TelemetrySettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector, e.g. `http://tempo:4317`. Export is off when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load settings from `nestory-frontend/config/base.yaml` and `APP_*`
/// variables. `IMAGE_API_BASE` and `IMAGE_API_KEY` are accepted as well.
pub fn get_configuration() -> Result<Settings, AppError> {
    let legacy = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

    service_core::config::load_settings(
        "nestory-frontend",
        &[
            ("image_api.base_url", legacy("IMAGE_API_BASE")),
            ("image_api.api_key", legacy("IMAGE_API_KEY")),
            ("telemetry.otlp_endpoint", legacy("OTLP_ENDPOINT")),
        ],
    )
}
