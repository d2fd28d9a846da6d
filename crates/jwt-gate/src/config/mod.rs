//! Configuration management
//!
//! Supports configuration loading with precedence: env > file > CLI > defaults.
//! CLI values are applied to the builder passed in, so file and environment
//! settings layered on top of it win.

mod builder;
mod env;
mod file;

pub use builder::{AuthSettings, Config, ConfigBuilder, TelemetryConfig, TransportConfig};
pub use file::find_config_file;

use crate::Result;

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Layer the first config file found and the environment over `base`
pub fn load_config(base: ConfigBuilder) -> Result<ConfigBuilder> {
    let mut builder = base;

    if let Some(path) = file::find_config_file() {
        tracing::info!("Loading configuration from {}", path.display());
        builder = file::load_from_file(&path, builder)?;
    }

    env::load_from_env(builder)
}

/// Layer a specific config file and the environment over `base`
pub fn load_config_from_path(path: &std::path::Path, base: ConfigBuilder) -> Result<ConfigBuilder> {
    let builder = file::load_from_file(path, base)?;
    env::load_from_env(builder)
}
