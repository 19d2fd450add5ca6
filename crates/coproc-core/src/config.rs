//! Kernel configuration loader.
//!
//! Reads `coproc.toml` from a directory and deserializes it into
//! [`KernelConfig`]. A missing or malformed file falls back to defaults, and
//! out-of-range values are clamped.

use std::path::{Path, PathBuf};

use coproc_types::config::KernelConfig;

/// File name of the kernel configuration.
pub const CONFIG_FILE_NAME: &str = "coproc.toml";

/// Pipelines directory used when the config names none.
pub const DEFAULT_PIPELINES_DIR: &str = "pipelines";

/// Load kernel configuration from `{dir}/coproc.toml`.
///
/// - Missing file: [`KernelConfig::default()`].
/// - Unreadable or unparseable file: logs a warning, returns the default.
/// - Otherwise the parsed config, normalized.
pub async fn load_kernel_config(dir: &Path) -> KernelConfig {
    let config_path = dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no kernel config found, using defaults");
            return KernelConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read kernel config, using defaults");
            return KernelConfig::default();
        }
    };

    match toml::from_str::<KernelConfig>(&content) {
        Ok(config) => config.normalized(),
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse kernel config, using defaults");
            KernelConfig::default()
        }
    }
}

/// Where pipelines live for a config loaded from `config_dir`.
///
/// Relative `pipelines_dir` values are resolved against `config_dir`.
pub fn resolve_pipelines_dir(config: &KernelConfig, config_dir: &Path) -> PathBuf {
    match &config.pipelines_dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => config_dir.join(dir),
        None => config_dir.join(DEFAULT_PIPELINES_DIR),
    }
}
