use crate::error::AppError;
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Resolve `<service>/config` whether the process runs from the workspace
/// root or from inside the service directory.
pub fn configuration_directory(base_path: &Path, service_dir: &str) -> PathBuf {
    if base_path.ends_with(service_dir) {
        base_path.join("config")
    } else {
        base_path.join(service_dir).join("config")
    }
}

/// Layered settings: `config/base.yaml` (optional) overridden by `APP_*`
/// environment variables, with `__` separating nested keys.
///
/// `overrides` are applied last and let a service honour legacy variable
/// names (`IMAGE_API_KEY` and friends) without renaming them.
pub fn load_settings<T: DeserializeOwned>(
    service_dir: &str,
    overrides: &[(&str, Option<String>)],
) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let base_path = std::env::current_dir()?;
    let configuration_directory = configuration_directory(&base_path, service_dir);

    let mut builder = Config::builder()
        .add_source(File::from(configuration_directory.join("base.yaml")).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        );

    for (key, value) in overrides {
        builder = builder.set_override_option(*key, value.clone())?;
    }

    let settings = builder.build()?;
    Ok(settings.try_deserialize::<T>()?)
}
