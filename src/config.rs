//! Configuration
//!
//! `ChartConfig` carries every tunable of the pipeline. Values come from the
//! built-in defaults, then an optional JSON/YAML file, then environment
//! variables (a `.env` file is honored).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::chart::linked::{TitleAnnotationFallback, LINKED_INTERACTION_META_KEY};
use crate::chart::sizing::SizingConfig;
use crate::embed::EmbedConfig;
use crate::sandbox::SandboxLimits;

/// Configuration for the chart pipeline and its host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChartConfig {
    /// Outer LIMIT applied to every data-fetch query
    pub row_limit: usize,
    /// Byte budget for error strings returned to the caller
    pub error_message_limit: usize,
    /// Character budget for snippet previews in log records
    pub preview_chars: usize,
    /// Key under `layout.meta` holding the linked-interaction contract
    pub meta_key: String,
    pub title_fallback: TitleAnnotationFallback,
    pub sandbox: SandboxLimits,
    pub sizing: SizingConfig,
    pub embed: EmbedConfig,
    /// Address the artifact host listens on
    pub bind_addr: String,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            row_limit: 2000,
            error_message_limit: 600,
            preview_chars: 240,
            meta_key: LINKED_INTERACTION_META_KEY.to_string(),
            title_fallback: TitleAnnotationFallback::default(),
            sandbox: SandboxLimits::default(),
            sizing: SizingConfig::default(),
            embed: EmbedConfig::default(),
            bind_addr: "127.0.0.1:8002".to_string(),
        }
    }
}

impl ChartConfig {
    /// Defaults, then `path` (if any), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();

        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;

        info!(
            row_limit = config.row_limit,
            bind_addr = %config.bind_addr,
            title_fallback = ?config.title_fallback,
            "Chart configuration loaded"
        );
        Ok(config)
    }

    /// Parse a config file; `.yaml`/`.yml` are YAML, everything else JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {:?}", path))?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        );
        let config = if is_yaml {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config at {:?}", path))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config at {:?}", path))?
        };
        debug!("Loaded config file {:?}", path);
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("CHART_ROW_LIMIT") {
            self.row_limit = v.parse().context("CHART_ROW_LIMIT must be a positive integer")?;
        }
        if let Ok(v) = std::env::var("CHART_MAX_STEPS") {
            self.sandbox.max_steps = v.parse().context("CHART_MAX_STEPS must be a positive integer")?;
        }
        if let Ok(v) = std::env::var("CHART_PLOTLY_CDN") {
            self.embed.library_url = v;
        }
        if let Ok(v) = std::env::var("CHART_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("CHART_TITLE_FALLBACK") {
            self.title_fallback = v.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }
        Ok(())
    }

    /// Reject settings that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.row_limit == 0 {
            anyhow::bail!("row_limit must be greater than zero");
        }
        if self.meta_key.trim().is_empty() {
            anyhow::bail!("meta_key must not be empty");
        }
        self.sizing.validate().map_err(|e| anyhow::anyhow!(e))?;
        if self.sandbox.max_steps == 0 || self.sandbox.max_source_bytes == 0 {
            anyhow::bail!("sandbox limits must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = ChartConfig::default();
        assert_eq!(config.row_limit, 2000);
        assert_eq!(config.meta_key, "pylogue_linked_interaction");
        assert_eq!(config.sizing.default_height, 420);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"row_limit": 50, "sizing": {{"min_height": 300}}}}"#).unwrap();

        let config = ChartConfig::from_file(file.path()).unwrap();
        assert_eq!(config.row_limit, 50);
        assert_eq!(config.sizing.min_height, 300);
        assert_eq!(config.sizing.max_height, 560);
        assert_eq!(config.preview_chars, 240);
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "title_fallback: second_when_multiple").unwrap();
        writeln!(file, "embed:\n  library_url: https://example.test/plotly.js").unwrap();

        let config = ChartConfig::from_file(file.path()).unwrap();
        assert_eq!(config.title_fallback, TitleAnnotationFallback::SecondWhenMultiple);
        assert_eq!(config.embed.library_url, "https://example.test/plotly.js");
    }

    #[test]
    fn test_invalid_sizing_rejected() {
        let mut config = ChartConfig::default();
        config.sizing.min_height = 900;
        assert!(config.validate().is_err());
    }
}
