//! Script host configuration.
//!
//! Every field has a default, so a config file only lists what it changes:
//!
//! ```json
//! { "max_operations": 500000, "max_logs_per_pass": 20 }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::script_diagnostics::MAX_DIAGNOSTICS;
use crate::script_log::MAX_LOGS_PER_PASS;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostConfig {
    /// Operation budget for one script call (pass or rebuild).
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    /// Diagnostics kept before the oldest are dropped.
    pub max_diagnostics: usize,
    /// Script `print`/`debug` lines allowed per pass.
    pub max_logs_per_pass: u32,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_string_size: 10_000,
            max_array_size: 1_000,
            max_map_size: 500,
            max_diagnostics: MAX_DIAGNOSTICS,
            max_logs_per_pass: MAX_LOGS_PER_PASS,
        }
    }
}

impl HostConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Invalid host configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("In {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config = HostConfig::from_json(r#"{ "max_operations": 42 }"#).unwrap();
        assert_eq!(config.max_operations, 42);
        assert_eq!(config.max_call_levels, HostConfig::default().max_call_levels);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(HostConfig::from_json(r#"{ "max_ops": 1 }"#).is_err());
    }
}
