//! Kernel configuration types.
//!
//! `KernelConfig` represents the `coproc.toml` that controls the token
//! budget, activation estimates, pipeline discovery and logging. All fields
//! have sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::pipeline::DEFAULT_LIFECYCLE_EVENT;

/// Top-level configuration for the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Total token budget shared by all engines (before headroom).
    #[serde(default = "default_total_budget")]
    pub total_budget: u64,

    /// Share of `total_budget` withheld from allocations and reachable only in burst mode.
    #[serde(default = "default_headroom_percent")]
    pub headroom_percent: u8,

    /// Token estimate reported for `lite` activations.
    #[serde(default = "default_lite_token_estimate")]
    pub lite_token_estimate: u64,

    /// Characters per token used to estimate `full` activations.
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u64,

    /// Lifecycle event a compiled pipeline waits on when the plan names none.
    #[serde(default = "default_lifecycle_event")]
    pub default_lifecycle_event: String,

    /// Directory holding `*.pipeline.yaml` files (optionally per phase).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipelines_dir: Option<PathBuf>,

    /// Stop a pipeline at the first failed `MOVE`.
    #[serde(default)]
    pub abort_on_failure: bool,

    /// Capacity of the message and lifecycle broadcast channels.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    #[serde(default)]
    pub log: LogConfig,
}

fn default_total_budget() -> u64 {
    100_000
}

fn default_headroom_percent() -> u8 {
    10
}

fn default_lite_token_estimate() -> u64 {
    200
}

fn default_chars_per_token() -> u64 {
    4
}

fn default_lifecycle_event() -> String {
    DEFAULT_LIFECYCLE_EVENT.to_string()
}

fn default_bus_capacity() -> usize {
    1024
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            total_budget: default_total_budget(),
            headroom_percent: default_headroom_percent(),
            lite_token_estimate: default_lite_token_estimate(),
            chars_per_token: default_chars_per_token(),
            default_lifecycle_event: default_lifecycle_event(),
            pipelines_dir: None,
            abort_on_failure: false,
            bus_capacity: default_bus_capacity(),
            log: LogConfig::default(),
        }
    }
}

impl KernelConfig {
    /// Clamp out-of-range values into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.headroom_percent = self.headroom_percent.min(100);
        self.chars_per_token = self.chars_per_token.max(1);
        self.bus_capacity = self.bus_capacity.max(1);
        self
    }
}

/// Logging output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Bridge spans to OpenTelemetry (stdout exporter).
    #[serde(default)]
    pub otel: bool,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_config_default_values() {
        let config = KernelConfig::default();
        assert_eq!(config.total_budget, 100_000);
        assert_eq!(config.headroom_percent, 10);
        assert_eq!(config.lite_token_estimate, 200);
        assert_eq!(config.chars_per_token, 4);
        assert_eq!(config.default_lifecycle_event, "phase-start");
        assert!(!config.abort_on_failure);
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_kernel_config_deserialize_with_defaults() {
        let config: KernelConfig = toml::from_str("").unwrap();
        assert_eq!(config, KernelConfig::default());
    }

    #[test]
    fn test_kernel_config_deserialize_with_values() {
        let toml_str = r#"
total_budget = 500000
headroom_percent = 20
abort_on_failure = true
pipelines_dir = "/var/lib/coproc/pipelines"

[log]
format = "json"
otel = true
"#;
        let config: KernelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.total_budget, 500_000);
        assert_eq!(config.headroom_percent, 20);
        assert!(config.abort_on_failure);
        assert_eq!(
            config.pipelines_dir,
            Some(PathBuf::from("/var/lib/coproc/pipelines"))
        );
        assert_eq!(config.log.format, LogFormat::Json);
        assert!(config.log.otel);
        assert_eq!(config.lite_token_estimate, 200);
    }

    #[test]
    fn test_normalized_clamps_ranges() {
        let config = KernelConfig {
            headroom_percent: 150,
            chars_per_token: 0,
            bus_capacity: 0,
            ..KernelConfig::default()
        }
        .normalized();
        assert_eq!(config.headroom_percent, 100);
        assert_eq!(config.chars_per_token, 1);
        assert_eq!(config.bus_capacity, 1);
    }
}
